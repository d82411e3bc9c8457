//! Plan risk classification.

use super::estimate::{estimate_plan, TargetMetadata, DEFAULT_ROW_COUNT};
use super::report::{OperationRef, Severity, ValidationIssue, ValidationReport};
use super::rules::{PatternRule, RuleSet};
use crate::plan::{DeploymentPlan, Operation};
use crate::sql::{mask_comments, ObjectName};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Classifies every operation of a plan against a [`RuleSet`].
///
/// The classifier holds no state between calls: the same plan, metadata and
/// rules always produce the same report.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    rules: RuleSet,
    default_row_count: u64,
}

impl RiskClassifier {
    /// Create a classifier with the given rules.
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            default_row_count: DEFAULT_ROW_COUNT,
        }
    }

    /// Row count assumed for existing tables missing from the metadata.
    pub fn with_default_row_count(mut self, rows: u64) -> Self {
        self.default_row_count = rows;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Classify a plan.
    pub fn classify(&self, plan: &DeploymentPlan, metadata: &TargetMetadata) -> ValidationReport {
        let mut first_definition: BTreeMap<ObjectName, usize> = BTreeMap::new();
        for (i, op) in plan.operations().iter().enumerate() {
            for name in op.defines() {
                first_definition.entry(name.clone()).or_insert(i);
            }
        }

        let issues: Vec<ValidationIssue> = plan
            .operations()
            .par_iter()
            .enumerate()
            .map(|(i, op)| self.classify_operation(op, i, &first_definition))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();

        let report = ValidationReport::new(
            issues,
            estimate_plan(plan, metadata, self.default_row_count),
            plan.approval_phases(),
            plan.len(),
        );
        tracing::info!(
            operations = report.operation_count,
            errors = report.error_count,
            warnings = report.warning_count,
            result = %report.overall_result,
            "plan validated"
        );
        report
    }

    fn classify_operation(
        &self,
        op: &Operation,
        position: usize,
        first_definition: &BTreeMap<ObjectName, usize>,
    ) -> Vec<ValidationIssue> {
        let text = mask_comments(op.statement_text());

        for severity in [Severity::Error, Severity::Warning, Severity::Info] {
            let rules = self.matching_rules(severity, &text, first_definition, position);
            if rules.is_empty() {
                continue;
            }
            if severity == Severity::Error {
                tracing::warn!(
                    phase = op.phase().number(),
                    object = op.object_name(),
                    rules = rules.len(),
                    "blocking statement"
                );
            }
            return rules
                .into_iter()
                .map(|rule| ValidationIssue {
                    severity,
                    category: rule.category().to_string(),
                    description: rule.description().to_string(),
                    recommendation: rule.recommendation().to_string(),
                    related_operation: OperationRef {
                        phase: op.phase(),
                        ordinal: op.ordinal_within_phase(),
                        object_name: op.object_name().to_string(),
                    },
                })
                .collect();
        }
        Vec::new()
    }

    fn matching_rules(
        &self,
        severity: Severity,
        text: &str,
        first_definition: &BTreeMap<ObjectName, usize>,
        position: usize,
    ) -> Vec<&PatternRule> {
        self.rules
            .rules()
            .iter()
            .filter(|rule| rule.severity() == severity)
            .map(|rule| rule.pattern())
            .filter(|rule| rule.matches(text, first_definition, position))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::plan::PlanBuilder;
    use crate::validate::report::OverallResult;
    use crate::validate::rules::{category, Rule};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn classifier() -> RiskClassifier {
        RiskClassifier::new(RuleSet::standard().unwrap())
    }

    fn plan(statements: &[(u8, &str)]) -> DeploymentPlan {
        statements
            .iter()
            .enumerate()
            .fold(PlanBuilder::new(1), |b, (i, (phase, sql))| {
                b.with_operation(Operation::entity(Phase::new(*phase).unwrap(), format!("op{i}"), *sql))
            })
            .build()
            .unwrap()
    }

    fn categories(report: &ValidationReport) -> Vec<(Severity, &str)> {
        report
            .issues
            .iter()
            .map(|i| (i.severity, i.category.as_str()))
            .collect()
    }

    #[test]
    fn test_new_table_with_index_is_safe() {
        let plan = plan(&[
            (1, "CREATE TABLE Foo (Id INT NOT NULL, Bar INT NULL)"),
            (6, "CREATE NONCLUSTERED INDEX ix ON Foo (Bar)"),
        ]);
        let report = classifier().classify(&plan, &TargetMetadata::new());

        assert_eq!(report.overall_result, OverallResult::Safe);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            categories(&report),
            vec![
                (Severity::Info, category::CREATE_TABLE),
                (Severity::Info, category::CREATE_INDEX),
            ]
        );
    }

    #[test]
    fn test_constraint_on_existing_table_warns() {
        let plan = plan(&[(
            5,
            "ALTER TABLE Foo ADD CONSTRAINT fk FOREIGN KEY (BarId) REFERENCES Bar (Id)",
        )]);
        let report = classifier().classify(&plan, &TargetMetadata::new());

        assert_eq!(report.overall_result, OverallResult::Warnings);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(
            categories(&report),
            vec![(Severity::Warning, category::CONSTRAINT_ADDITION)]
        );
        assert!(report.requires_approval());
    }

    #[test]
    fn test_constraint_on_new_table_is_reported() {
        let plan = plan(&[
            (1, "CREATE TABLE Foo (Id INT NOT NULL, BarId INT NULL)"),
            (5, "ALTER TABLE [dbo].[Foo] ADD CONSTRAINT fk FOREIGN KEY (BarId) REFERENCES Bar (Id)"),
        ]);
        let report = classifier().classify(&plan, &TargetMetadata::new());

        assert_eq!(report.overall_result, OverallResult::Safe);
        assert_eq!(
            categories(&report),
            vec![
                (Severity::Info, category::CREATE_TABLE),
                (Severity::Info, category::CONSTRAINT_ON_NEW_TABLE),
            ]
        );
    }

    #[test]
    fn test_unguarded_not_null_add_in_column_list_warns() {
        let plan = plan(&[(1, "ALTER TABLE dbo.T ADD C INT NOT NULL, D INT NULL;")]);
        let report = classifier().classify(&plan, &TargetMetadata::new());
        assert_eq!(report.overall_result, OverallResult::Warnings);
        assert_eq!(
            categories(&report),
            vec![(Severity::Warning, category::NOT_NULL_COLUMN_ADD)]
        );
    }

    #[test]
    fn test_drop_column_blocks() {
        let plan = plan(&[
            (1, "CREATE TABLE dbo.Other (Id INT)"),
            (10, "ALTER TABLE Foo DROP COLUMN Bar"),
        ]);
        let report = classifier().classify(&plan, &TargetMetadata::new());

        assert_eq!(report.overall_result, OverallResult::Blocked);
        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.error_count, 1);
        let first = report.first_error().unwrap();
        assert_eq!(first.category, category::DROP_COLUMN);
        assert_eq!(first.related_operation.phase, Phase::COLUMN_CONSTRAINTS);
    }

    #[test]
    fn test_blocking_suppresses_lower_severities() {
        let plan = plan(&[(
            1,
            "DROP TABLE dbo.Old; TRUNCATE TABLE dbo.Staging; CREATE TABLE dbo.New (Id INT)",
        )]);
        let report = classifier().classify(&plan, &TargetMetadata::new());
        assert_eq!(
            categories(&report),
            vec![
                (Severity::Error, category::DROP_TABLE),
                (Severity::Error, category::TRUNCATE_TABLE),
            ]
        );
    }

    #[test]
    fn test_comments_are_masked() {
        let plan = plan(&[(
            1,
            "-- DROP TABLE dbo.Orders\nCREATE TABLE dbo.Orders2 (Id INT) /* TRUNCATE TABLE x */",
        )]);
        let report = classifier().classify(&plan, &TargetMetadata::new());
        assert_eq!(report.overall_result, OverallResult::Safe);
    }

    #[test]
    fn test_dynamic_sql_stays_visible() {
        let plan = plan(&[(29, "EXEC sp_executesql N'DROP TABLE dbo.Temp'")]);
        let report = classifier().classify(&plan, &TargetMetadata::new());
        assert_eq!(report.overall_result, OverallResult::Blocked);
    }

    #[test]
    fn test_enhanced_programmability_is_safe() {
        let plan = plan(&[(15, "CREATE PROCEDURE dbo.p AS SELECT 1")]);
        let report = classifier().classify(&plan, &TargetMetadata::new());
        assert_eq!(
            categories(&report),
            vec![(Severity::Info, category::IDEMPOTENT_PROGRAMMABILITY)]
        );
    }

    #[test]
    fn test_injected_rule_set() {
        let rules = RuleSet::new().with_rule(Rule::Blocking(
            PatternRule::new("no_grants", r"\bGRANT\b", "Grants are managed elsewhere", "Remove").unwrap(),
        ));
        let plan = plan(&[(19, "GRANT SELECT ON dbo.Orders TO reporting")]);
        let report = RiskClassifier::new(rules).classify(&plan, &TargetMetadata::new());
        assert_eq!(report.error_count, 1);
        assert_eq!(report.approval_phases, vec![Phase::new(19).unwrap()]);
    }

    fn statement() -> impl Strategy<Value = (u8, String)> {
        let sql = prop_oneof![
            Just("CREATE TABLE dbo.T{} (Id INT)"),
            Just("CREATE INDEX ix{} ON dbo.T{} (Id)"),
            Just("ALTER TABLE dbo.T{} ADD C INT NULL"),
            Just("ALTER TABLE dbo.T{} ALTER COLUMN C BIGINT NULL"),
            Just("ALTER TABLE dbo.T{} DROP COLUMN C"),
            Just("INSERT INTO dbo.T{} VALUES (1)"),
        ];
        (1u8..=29, sql, 0u8..4).prop_map(|(phase, sql, n)| (phase, sql.replace("{}", &n.to_string())))
    }

    proptest! {
        #[test]
        fn prop_classification_is_deterministic(statements in proptest::collection::vec(statement(), 0..20)) {
            let mut builder = PlanBuilder::new(1);
            for (i, (phase, sql)) in statements.iter().enumerate() {
                builder = builder.with_operation(Operation::entity(Phase::new(*phase).unwrap(), format!("op{i}"), sql.clone()));
            }
            // Forward references are a plan error, not a classifier concern
            let Ok(plan) = builder.build() else { return Ok(()); };

            let classifier = classifier();
            let first = classifier.classify(&plan, &TargetMetadata::new());
            let second = classifier.classify(&plan, &TargetMetadata::new());
            prop_assert_eq!(&first, &second);

            let max = first.issues.iter().map(|i| i.severity).max();
            prop_assert_eq!(first.is_blocked(), max == Some(Severity::Error));
            prop_assert_eq!(
                first.overall_result == OverallResult::Warnings,
                max == Some(Severity::Warning)
            );
        }
    }
}
