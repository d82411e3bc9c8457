//! Object name extraction.
//!
//! Finds the schema-scoped objects a statement creates and the objects it
//! touches, using the token stream only. Names are normalised so that
//! `[dbo].[Orders]`, `"dbo"."orders"` and `Orders` compare equal.

use super::lexer::{significant_tokens, SpannedToken, Token};
use super::span::Span;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Schema assumed for unqualified names.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// Schemas owned by the server; references into them never order a plan.
const SYSTEM_SCHEMAS: &[&str] = &["sys", "information_schema"];

/// Keywords after which the next name is a referenced object.
const REFERENCE_KEYWORDS: &[&str] = &[
    "ON", "REFERENCES", "INTO", "UPDATE", "FROM", "JOIN", "EXEC", "EXECUTE", "TABLE",
];

/// Bare words that can follow a reference keyword without naming an object.
const NOT_A_NAME: &[&str] = &[
    "ACTION", "ALL", "AS", "BEGIN", "CASCADE", "COLUMN", "CONSTRAINT", "DATABASE", "DEFAULT",
    "DELETE", "DISTINCT", "END", "EXISTS", "IF", "INDEX", "INSERT", "KEY", "NO", "NOT", "NULL",
    "OFF", "ON", "PRIMARY", "SCHEMA", "SELECT", "SET", "STATISTICS", "TO", "TOP", "UPDATE",
    "VALUES", "WHERE", "WITH",
];

/// A normalised, schema-qualified object name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectName {
    /// Lower-cased schema.
    pub schema: String,
    /// Lower-cased object name.
    pub name: String,
}

impl ObjectName {
    /// Create a normalised name. An empty schema becomes `dbo`.
    pub fn new(schema: &str, name: &str) -> Self {
        let schema = if schema.is_empty() { DEFAULT_SCHEMA } else { schema };
        Self {
            schema: schema.to_lowercase(),
            name: name.to_lowercase(),
        }
    }

    /// Parse a dotted name such as `dbo.Orders` or `[Sales].[Order Lines]`.
    pub fn parse(text: &str) -> Option<Self> {
        let tokens = significant_tokens(text);
        let parsed = parse_qualified_name(&tokens, 0)?;
        (parsed.next == tokens.len()).then_some(parsed.name)
    }

    /// Whether the name lives in a server-owned schema.
    pub fn is_system(&self) -> bool {
        SYSTEM_SCHEMAS.contains(&self.schema.as_str())
    }
}

impl std::fmt::Display for ObjectName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Kinds of schema-scoped objects a `CREATE` statement can define.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Table,
    View,
    Procedure,
    Function,
    Trigger,
    Type,
    Synonym,
    Sequence,
}

impl ObjectKind {
    fn from_keyword(token: &Token) -> Option<Self> {
        let Token::Word(word) = token else {
            return None;
        };
        let kind = match word.to_ascii_uppercase().as_str() {
            "TABLE" => ObjectKind::Table,
            "VIEW" => ObjectKind::View,
            "PROC" | "PROCEDURE" => ObjectKind::Procedure,
            "FUNCTION" => ObjectKind::Function,
            "TRIGGER" => ObjectKind::Trigger,
            "TYPE" => ObjectKind::Type,
            "SYNONYM" => ObjectKind::Synonym,
            "SEQUENCE" => ObjectKind::Sequence,
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical keyword used in generated `DROP` statements.
    pub fn keyword(self) -> &'static str {
        match self {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Procedure => "PROCEDURE",
            ObjectKind::Function => "FUNCTION",
            ObjectKind::Trigger => "TRIGGER",
            ObjectKind::Type => "TYPE",
            ObjectKind::Synonym => "SYNONYM",
            ObjectKind::Sequence => "SEQUENCE",
        }
    }

    /// Programmability objects: the ones that can be dropped and recreated
    /// without losing data.
    pub fn is_programmable(self) -> bool {
        matches!(
            self,
            ObjectKind::View | ObjectKind::Procedure | ObjectKind::Function | ObjectKind::Trigger
        )
    }
}

/// A name found in a token stream.
#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedName {
    /// Normalised name.
    pub name: ObjectName,
    /// Source range of the name as written, quoting included.
    pub span: Span,
    /// Index of the first token after the name.
    pub next: usize,
}

/// Parse a one- to four-part name starting at `index`.
///
/// Only the last two parts are kept; server and database qualifiers are
/// ignored. Temporary tables (`#t`) and variables (`@v`) are not names.
pub fn parse_qualified_name(tokens: &[SpannedToken], index: usize) -> Option<QualifiedName> {
    let first = tokens.get(index)?;
    let mut parts = vec![first.token.ident()?];
    let mut span = first.span;
    let mut next = index + 1;

    while parts.len() < 4 {
        match (tokens.get(next), tokens.get(next + 1)) {
            (Some(dot), Some(part)) if dot.token == Token::Dot => match part.token.ident() {
                Some(ident) => {
                    parts.push(ident);
                    span = span.merge(part.span);
                    next += 2;
                }
                None => break,
            },
            _ => break,
        }
    }

    let name = parts[parts.len() - 1];
    if name.is_empty() || name.starts_with('#') || name.starts_with('@') {
        return None;
    }
    let schema = if parts.len() >= 2 { parts[parts.len() - 2] } else { "" };

    Some(QualifiedName {
        name: ObjectName::new(schema, name),
        span,
        next,
    })
}

/// A `CREATE [OR ALTER] <kind> [IF NOT EXISTS] <name>` header.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateStatement {
    /// What is being created.
    pub kind: ObjectKind,
    /// The created object's name.
    pub name: QualifiedName,
    /// Whether the header reads `CREATE OR ALTER`.
    pub or_alter: bool,
    /// Whether the header reads `IF NOT EXISTS` after the kind.
    pub if_not_exists: bool,
    /// Index of the `CREATE` token.
    pub token_index: usize,
}

/// A matched `CREATE` header, before its name is read.
struct Header {
    kind: ObjectKind,
    or_alter: bool,
    if_not_exists: bool,
    name_index: usize,
}

/// Match `CREATE [OR ALTER] <kind> [IF NOT EXISTS]` at `index`.
fn create_header(tokens: &[SpannedToken], index: usize) -> Option<Header> {
    if !tokens.get(index)?.token.is_keyword("CREATE") {
        return None;
    }
    let mut j = index + 1;
    let mut or_alter = false;
    if tokens.get(j).is_some_and(|t| t.token.is_keyword("OR"))
        && tokens.get(j + 1).is_some_and(|t| t.token.is_keyword("ALTER"))
    {
        or_alter = true;
        j += 2;
    }
    let kind = ObjectKind::from_keyword(&tokens.get(j)?.token)?;
    let name_index = j + 1;
    let if_not_exists = tokens.get(name_index).is_some_and(|t| t.token.is_keyword("IF"))
        && tokens.get(name_index + 1).is_some_and(|t| t.token.is_keyword("NOT"))
        && tokens.get(name_index + 2).is_some_and(|t| t.token.is_keyword("EXISTS"));
    Some(Header {
        kind,
        or_alter,
        if_not_exists,
        name_index: if if_not_exists { name_index + 3 } else { name_index },
    })
}

/// Find every `CREATE` header that defines a schema-scoped object.
///
/// Index headers are skipped: an index name is not schema-scoped and is not
/// referenced by other statements.
pub fn create_statements(tokens: &[SpannedToken]) -> Vec<CreateStatement> {
    (0..tokens.len())
        .filter_map(|i| {
            let header = create_header(tokens, i)?;
            let name = parse_qualified_name(tokens, header.name_index)?;
            Some(CreateStatement {
                kind: header.kind,
                name,
                or_alter: header.or_alter,
                if_not_exists: header.if_not_exists,
                token_index: i,
            })
        })
        .collect()
}

/// Number of `CREATE <kind>` headers whose object name cannot be read.
pub fn unnamed_creates(tokens: &[SpannedToken]) -> usize {
    (0..tokens.len())
        .filter_map(|i| create_header(tokens, i))
        .filter(|header| parse_qualified_name(tokens, header.name_index).is_none())
        .count()
}

/// Match `DROP <kind> [IF EXISTS] <name>` at `index`.
pub fn drop_statement(tokens: &[SpannedToken], index: usize) -> Option<(ObjectKind, QualifiedName)> {
    if !tokens.get(index)?.token.is_keyword("DROP") {
        return None;
    }
    let kind = ObjectKind::from_keyword(&tokens.get(index + 1)?.token)?;
    let mut j = index + 2;
    if tokens.get(j).is_some_and(|t| t.token.is_keyword("IF"))
        && tokens.get(j + 1).is_some_and(|t| t.token.is_keyword("EXISTS"))
    {
        j += 2;
    }
    Some((kind, parse_qualified_name(tokens, j)?))
}

/// Objects the script creates.
pub fn defined_objects(source: &str) -> BTreeSet<ObjectName> {
    let tokens = significant_tokens(source);
    create_statements(&tokens)
        .into_iter()
        .map(|c| c.name.name)
        .collect()
}

/// Objects the script touches without creating them.
pub fn referenced_objects(source: &str) -> BTreeSet<ObjectName> {
    let tokens = significant_tokens(source);
    let defined: BTreeSet<ObjectName> = create_statements(&tokens)
        .into_iter()
        .map(|c| c.name.name)
        .collect();

    let mut referenced = BTreeSet::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i].token;

        let after_keyword = REFERENCE_KEYWORDS.iter().any(|k| token.is_keyword(k));
        if after_keyword {
            let mut start = i + 1;
            // GRANT ... ON OBJECT::dbo.p / ON TYPE::dbo.t
            if token.is_keyword("ON")
                && tokens
                    .get(start)
                    .is_some_and(|t| t.token.is_keyword("OBJECT") || t.token.is_keyword("TYPE"))
            {
                start += 1;
            }
            if let Some(found) = name_at(&tokens, start) {
                // `ON a.id = b.id` is a join predicate, not an object
                let predicate = token.is_keyword("ON")
                    && tokens.get(found.next).is_some_and(|t| t.token == Token::Eq);
                if !predicate {
                    referenced.insert(found.name);
                }
                i = found.next;
                continue;
            }
        } else if let Some(found) = name_at(&tokens, i) {
            // Two-part function call: dbo.fn_total(...)
            let qualified = found.next - i >= 3;
            let call = tokens.get(found.next).is_some_and(|t| t.token == Token::LParen);
            if qualified && call {
                referenced.insert(found.name);
            }
            if qualified {
                i = found.next;
                continue;
            }
        }
        i += 1;
    }

    referenced
        .into_iter()
        .filter(|name| !name.is_system() && !defined.contains(name))
        .collect()
}

fn name_at(tokens: &[SpannedToken], index: usize) -> Option<QualifiedName> {
    let first = tokens.get(index)?;
    if let Token::Word(word) = &first.token {
        if NOT_A_NAME.iter().any(|k| word.eq_ignore_ascii_case(k)) {
            return None;
        }
    }
    parse_qualified_name(tokens, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(items: &[(&str, &str)]) -> BTreeSet<ObjectName> {
        items.iter().map(|(s, n)| ObjectName::new(s, n)).collect()
    }

    #[test]
    fn test_normalisation() {
        assert_eq!(ObjectName::parse("[dbo].[Orders]"), Some(ObjectName::new("dbo", "orders")));
        assert_eq!(ObjectName::parse("Orders"), Some(ObjectName::new("DBO", "ORDERS")));
        assert_eq!(
            ObjectName::parse("srv.db.Sales.\"Order Lines\""),
            Some(ObjectName::new("sales", "order lines"))
        );
        assert_eq!(ObjectName::parse("#scratch"), None);
        assert_eq!(ObjectName::new("", "x").to_string(), "dbo.x");
    }

    #[test]
    fn test_create_headers() {
        let tokens = significant_tokens(
            "CREATE OR ALTER PROCEDURE [sales].[usp_Load] AS BEGIN SELECT 1 END",
        );
        let creates = create_statements(&tokens);
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].kind, ObjectKind::Procedure);
        assert!(creates[0].or_alter);
        assert_eq!(creates[0].name.name, ObjectName::new("sales", "usp_load"));

        let tokens = significant_tokens("CREATE TABLE IF NOT EXISTS Orders (Id INTEGER)");
        let creates = create_statements(&tokens);
        assert_eq!(creates[0].name.name, ObjectName::new("", "orders"));
        assert!(creates[0].if_not_exists);
        assert!(!creates[0].or_alter);
        assert!(referenced_objects("CREATE TABLE IF NOT EXISTS Orders (Id INTEGER)").is_empty());
    }

    #[test]
    fn test_unnamed_and_drop() {
        let tokens = significant_tokens("CREATE PROCEDURE @p AS SELECT 1");
        assert!(create_statements(&tokens).is_empty());
        assert_eq!(unnamed_creates(&tokens), 1);

        let tokens = significant_tokens("DROP VIEW IF EXISTS [rpt].[Totals]");
        let (kind, name) = drop_statement(&tokens, 0).unwrap();
        assert_eq!(kind, ObjectKind::View);
        assert_eq!(name.name, ObjectName::new("rpt", "totals"));
    }

    #[test]
    fn test_index_is_not_a_definition() {
        let source = "CREATE UNIQUE NONCLUSTERED INDEX ix_orders ON dbo.Orders (Id)";
        assert!(defined_objects(source).is_empty());
        assert_eq!(referenced_objects(source), names(&[("dbo", "orders")]));
    }

    #[test]
    fn test_references() {
        let source = "INSERT INTO dbo.Audit (Id) \
                      SELECT o.Id FROM Orders o JOIN sales.Lines l ON o.Id = l.OrderId; \
                      EXEC dbo.usp_Refresh; \
                      SELECT dbo.fn_Total(1);";
        assert_eq!(
            referenced_objects(source),
            names(&[
                ("dbo", "audit"),
                ("dbo", "orders"),
                ("sales", "lines"),
                ("dbo", "usp_refresh"),
                ("dbo", "fn_total"),
            ])
        );
    }

    #[test]
    fn test_self_definition_is_not_a_reference() {
        let source = "CREATE TABLE dbo.Foo (Id INT NOT NULL); INSERT INTO dbo.Foo VALUES (1)";
        assert_eq!(defined_objects(source), names(&[("dbo", "foo")]));
        assert!(referenced_objects(source).is_empty());
    }

    #[test]
    fn test_foreign_key_and_grant_references() {
        let fk = "ALTER TABLE dbo.Lines ADD CONSTRAINT fk FOREIGN KEY (OrderId) \
                  REFERENCES dbo.Orders (Id) ON DELETE CASCADE";
        assert_eq!(
            referenced_objects(fk),
            names(&[("dbo", "lines"), ("dbo", "orders")])
        );

        let grant = "GRANT EXECUTE ON OBJECT::dbo.usp_Load TO app_role";
        assert_eq!(referenced_objects(grant), names(&[("dbo", "usp_load")]));
    }

    #[test]
    fn test_system_and_commented_names_ignored() {
        let source = "-- FROM dbo.Ghost\nSELECT 1 FROM sys.objects WHERE name = 'x'";
        assert!(referenced_objects(source).is_empty());
    }
}
