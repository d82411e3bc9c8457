//! Risk rules.
//!
//! A [`RuleSet`] is an explicit, ordered list of tagged pattern rules. The
//! standard set covers the usual destructive and locking statements; callers
//! may build their own set for a stricter or looser policy.

use super::report::Severity;
use crate::error::{DeployError, Result};
use crate::sql::ObjectName;
use regex::Regex;
use std::collections::BTreeMap;

/// Rule categories used by the standard rule set.
pub mod category {
    pub const DROP_TABLE: &str = "drop_table";
    pub const DROP_COLUMN: &str = "drop_column";
    pub const TRUNCATE_TABLE: &str = "truncate_table";
    pub const DROP_DATABASE: &str = "drop_database";
    pub const DROP_SCHEMA: &str = "drop_schema";
    pub const ALTER_COLUMN: &str = "alter_column";
    pub const NOT_NULL_COLUMN_ADD: &str = "not_null_column_add";
    pub const INDEX_ON_EXISTING_TABLE: &str = "index_on_existing_table";
    pub const CONSTRAINT_ADDITION: &str = "constraint_addition";
    pub const DROP_CONSTRAINT: &str = "drop_constraint";
    pub const DROP_INDEX: &str = "drop_index";
    pub const CREATE_TABLE: &str = "create_table";
    pub const CREATE_SCHEMA: &str = "create_schema";
    pub const NULLABLE_COLUMN_ADD: &str = "nullable_column_add";
    pub const FILTERED_INDEX: &str = "filtered_index";
    pub const CONSTRAINT_ON_NEW_TABLE: &str = "constraint_on_new_table";
    pub const CREATE_INDEX: &str = "create_index";
    pub const IDEMPOTENT_PROGRAMMABILITY: &str = "idempotent_programmability";
}

/// One- to four-part object name, quoted or bare.
const NAME: &str = r#"(?:\[[^\]]+\]|"[^"]+"|[\w#@$]+)(?:\s*\.\s*(?:\[[^\]]+\]|"[^"]+"|[\w#@$]+))*"#;

/// Column name followed by a type with optional length or precision.
const COLUMN_AND_TYPE: &str = r#"(?:\[[^\]]+\]|"[^"]+"|\w+)\s+\w+(?:\s*\([\w\s,]*\))?"#;

/// Which objects a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    /// Every match counts.
    Any,
    /// Only matches whose `object` capture names an object the plan has not
    /// created by this point.
    ExistingObject,
}

/// A case-insensitive pattern with its explanation.
#[derive(Debug, Clone)]
pub struct PatternRule {
    category: String,
    pattern: Regex,
    description: String,
    recommendation: String,
    scope: RuleScope,
}

impl PatternRule {
    /// Compile a rule. The pattern is matched case-insensitively.
    pub fn new(
        category: impl Into<String>,
        pattern: &str,
        description: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Result<Self> {
        let category = category.into();
        let pattern = Regex::new(&format!("(?i){pattern}")).map_err(|e| DeployError::InvalidRule {
            category: category.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            category,
            pattern,
            description: description.into(),
            recommendation: recommendation.into(),
            scope: RuleScope::Any,
        })
    }

    /// Restrict the rule to objects that exist before the plan runs.
    ///
    /// The pattern must have a capture group named `object`.
    pub fn on_existing_objects(mut self) -> Result<Self> {
        if !self.pattern.capture_names().any(|n| n == Some("object")) {
            return Err(DeployError::InvalidRule {
                category: self.category,
                reason: "existing-object rules need an `object` capture group".to_string(),
            });
        }
        self.scope = RuleScope::ExistingObject;
        Ok(self)
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn recommendation(&self) -> &str {
        &self.recommendation
    }

    pub fn scope(&self) -> RuleScope {
        self.scope
    }

    /// Check the rule against comment-masked statement text.
    ///
    /// `first_definition` maps objects to the index of the operation that
    /// creates them; `position` is the index of the operation being checked.
    pub fn matches(
        &self,
        text: &str,
        first_definition: &BTreeMap<ObjectName, usize>,
        position: usize,
    ) -> bool {
        match self.scope {
            RuleScope::Any => self.pattern.is_match(text),
            RuleScope::ExistingObject => self.pattern.captures_iter(text).any(|caps| {
                let created = caps
                    .name("object")
                    .and_then(|m| ObjectName::parse(m.as_str()))
                    .and_then(|name| first_definition.get(&name))
                    .is_some_and(|&at| at <= position);
                !created
            }),
        }
    }
}

/// A rule tagged with the severity it raises.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Raises an error; the deployment is blocked.
    Blocking(PatternRule),
    /// Raises a warning; the deployment needs approval.
    Warning(PatternRule),
    /// Marks a statement as known-safe.
    Safe(PatternRule),
}

impl Rule {
    pub fn pattern(&self) -> &PatternRule {
        match self {
            Rule::Blocking(p) | Rule::Warning(p) | Rule::Safe(p) => p,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Rule::Blocking(_) => Severity::Error,
            Rule::Warning(_) => Severity::Warning,
            Rule::Safe(_) => Severity::Info,
        }
    }
}

/// An ordered set of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Rules in insertion order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The standard rule set.
    pub fn standard() -> Result<Self> {
        use category::*;

        let blocking = [
            (
                DROP_TABLE,
                r"\bDROP\s+TABLE\b".to_string(),
                "Drops a table and all of its data",
                "Archive the data and remove the table in a separate, reviewed change",
            ),
            (
                DROP_COLUMN,
                r"\bDROP\s+COLUMN\b".to_string(),
                "Drops a column and its data",
                "Stop writing the column first and drop it in a later release",
            ),
            (
                TRUNCATE_TABLE,
                r"\bTRUNCATE\s+TABLE\b".to_string(),
                "Removes every row from a table",
                "Delete in batches with an explicit predicate, or move the purge out of the deployment",
            ),
            (
                DROP_DATABASE,
                r"\bDROP\s+DATABASE\b".to_string(),
                "Drops a database",
                "Database removal is never part of a schema deployment",
            ),
            (
                DROP_SCHEMA,
                r"\bDROP\s+SCHEMA\b".to_string(),
                "Drops a schema",
                "Move or drop the contained objects in a reviewed change first",
            ),
        ];
        let warning = [
            (
                ALTER_COLUMN,
                r"\bALTER\s+COLUMN\b".to_string(),
                "Changes a column definition; may rewrite the table and hold a schema lock",
                "Schedule in a maintenance window and check for data truncation",
            ),
            (
                NOT_NULL_COLUMN_ADD,
                format!(r"(?m)\bALTER\s+TABLE\s+{NAME}\s+ADD\s+{COLUMN_AND_TYPE}\s+NOT\s+NULL\s*(?:[;,)]|$)"),
                "Adds a NOT NULL column without a default; fails on a table with rows",
                "Add the column as NULL or give it a default constraint",
            ),
            (
                DROP_CONSTRAINT,
                r"\bDROP\s+CONSTRAINT\b".to_string(),
                "Drops a constraint; data integrity is no longer enforced",
                "Confirm no application relies on the constraint",
            ),
            (
                DROP_INDEX,
                r"\bDROP\s+INDEX\b".to_string(),
                "Drops an index; dependent queries may slow down",
                "Check query plans that use the index before dropping it",
            ),
        ];
        let warning_existing = [
            (
                INDEX_ON_EXISTING_TABLE,
                format!(
                    r"\bCREATE\s+(?:UNIQUE\s+)?(?:(?:NON)?CLUSTERED\s+)?INDEX\s+{NAME}\s+ON\s+(?P<object>{NAME})"
                ),
                "Builds an index on an existing table; locks or slows writes while it runs",
                "Build the index ONLINE or during low traffic",
            ),
            (
                CONSTRAINT_ADDITION,
                format!(
                    r"\bALTER\s+TABLE\s+(?P<object>{NAME})\s+(?:WITH\s+(?:NO)?CHECK\s+)?ADD\s+CONSTRAINT\b"
                ),
                "Adds a constraint to an existing table; existing rows are validated",
                "Verify existing data satisfies the constraint before deploying",
            ),
        ];
        let safe = [
            (
                CREATE_TABLE,
                r"\bCREATE\s+TABLE\b".to_string(),
                "Creates a new table",
                "None",
            ),
            (
                CREATE_SCHEMA,
                r"\bCREATE\s+SCHEMA\b".to_string(),
                "Creates a new schema",
                "None",
            ),
            (
                NULLABLE_COLUMN_ADD,
                format!(r"\bALTER\s+TABLE\s+{NAME}\s+ADD\s+{COLUMN_AND_TYPE}\s+NULL\b"),
                "Adds a nullable column",
                "None",
            ),
            (
                FILTERED_INDEX,
                r"\bCREATE\s+(?:UNIQUE\s+)?(?:NONCLUSTERED\s+)?INDEX\b[^;]*\bWHERE\b".to_string(),
                "Creates a filtered index",
                "None",
            ),
            (
                CONSTRAINT_ON_NEW_TABLE,
                format!(r"\bALTER\s+TABLE\s+{NAME}\s+(?:WITH\s+(?:NO)?CHECK\s+)?ADD\s+CONSTRAINT\b"),
                "Adds a constraint to a table created by this deployment",
                "None",
            ),
            (
                CREATE_INDEX,
                r"\bCREATE\s+(?:UNIQUE\s+)?(?:(?:NON)?CLUSTERED\s+)?INDEX\b".to_string(),
                "Creates an index on a table created by this deployment",
                "None",
            ),
            (
                IDEMPOTENT_PROGRAMMABILITY,
                r"\bCREATE\s+OR\s+ALTER\s+(?:PROC|PROCEDURE|FUNCTION|TRIGGER|VIEW)\b|\bCREATE\s+(?:TRIGGER|VIEW)\s+IF\s+NOT\s+EXISTS\b|\bIF\s+EXISTS\b[^;]*\bDROP\s+(?:PROC|PROCEDURE|FUNCTION|TRIGGER|VIEW)\b"
                    .to_string(),
                "Creates or replaces a programmability object",
                "None",
            ),
        ];

        let mut set = RuleSet::new();
        for (category, pattern, description, recommendation) in blocking {
            set = set.with_rule(Rule::Blocking(PatternRule::new(
                category,
                &pattern,
                description,
                recommendation,
            )?));
        }
        for (category, pattern, description, recommendation) in warning {
            set = set.with_rule(Rule::Warning(PatternRule::new(
                category,
                &pattern,
                description,
                recommendation,
            )?));
        }
        for (category, pattern, description, recommendation) in warning_existing {
            set = set.with_rule(Rule::Warning(
                PatternRule::new(category, &pattern, description, recommendation)?
                    .on_existing_objects()?,
            ));
        }
        for (category, pattern, description, recommendation) in safe {
            set = set.with_rule(Rule::Safe(PatternRule::new(
                category,
                &pattern,
                description,
                recommendation,
            )?));
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(set: &RuleSet, category: &str) -> PatternRule {
        set.rules()
            .iter()
            .map(Rule::pattern)
            .find(|p| p.category() == category)
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_standard_set_compiles() {
        let set = RuleSet::standard().unwrap();
        assert_eq!(set.len(), 18);
        assert_eq!(
            set.rules().iter().filter(|r| r.severity() == Severity::Error).count(),
            5
        );
    }

    #[test]
    fn test_not_null_add_needs_no_default() {
        let set = RuleSet::standard().unwrap();
        let rule = rule(&set, category::NOT_NULL_COLUMN_ADD);
        let none = BTreeMap::new();
        assert!(rule.matches("ALTER TABLE [dbo].[Orders] ADD [Priority] INT NOT NULL;", &none, 0));
        assert!(rule.matches("alter table dbo.Orders add Code varchar(10) not null", &none, 0));
        assert!(rule.matches(
            "ALTER TABLE dbo.T ADD C INT NOT NULL\nALTER TABLE dbo.T ADD D INT NULL",
            &none,
            0
        ));
        assert!(rule.matches("ALTER TABLE dbo.T ADD C INT NOT NULL, D INT NULL;", &none, 0));
        assert!(!rule.matches(
            "ALTER TABLE dbo.Orders ADD Region CHAR(2) NOT NULL CONSTRAINT DF_R DEFAULT ('EU');",
            &none,
            0
        ));
        assert!(!rule.matches(
            "ALTER TABLE dbo.Orders ADD CONSTRAINT ck CHECK (Region IS NOT NULL);",
            &none,
            0
        ));
    }

    #[test]
    fn test_existing_object_scope() {
        let set = RuleSet::standard().unwrap();
        let rule = rule(&set, category::INDEX_ON_EXISTING_TABLE);
        assert_eq!(rule.scope(), RuleScope::ExistingObject);

        let text = "CREATE NONCLUSTERED INDEX ix ON [dbo].[Foo] (Bar)";
        let mut created = BTreeMap::new();
        assert!(rule.matches(text, &created, 3));

        created.insert(ObjectName::new("dbo", "foo"), 1);
        assert!(!rule.matches(text, &created, 3));

        // Created by a later operation: still an existing table here
        created.insert(ObjectName::new("dbo", "foo"), 5);
        assert!(rule.matches(text, &created, 3));
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let err = PatternRule::new("broken", "(unclosed", "d", "r").unwrap_err();
        assert!(matches!(err, DeployError::InvalidRule { .. }));

        let err = PatternRule::new("no_group", r"\bDROP\b", "d", "r")
            .unwrap()
            .on_existing_objects()
            .unwrap_err();
        assert!(err.to_string().contains("object"));
    }
}
