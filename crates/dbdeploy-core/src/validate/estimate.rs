//! Duration and storage estimates.
//!
//! A coarse cost model: a fixed per-statement overhead plus a row-based
//! term for statements that touch a table existing before the deployment.
//! Row counts come from caller-supplied [`TargetMetadata`]; unknown tables
//! fall back to a conservative default.

use crate::error::Result;
use crate::plan::DeploymentPlan;
use crate::sql::{significant_tokens, ObjectName, SpannedToken};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Rows assumed for an existing table with no metadata.
pub const DEFAULT_ROW_COUNT: u64 = 100_000;

/// Row size assumed for an existing table with no metadata.
pub const DEFAULT_ROW_BYTES: u64 = 200;

const STATEMENT_OVERHEAD_MS: u64 = 50;
const INDEX_ENTRY_BYTES: u64 = 24;
const COLUMN_BYTES: u64 = 8;
const EMPTY_TABLE_BYTES: i64 = 8 * 1024;

/// Statistics for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub row_count: u64,
    #[serde(default = "default_row_bytes")]
    pub avg_row_bytes: u64,
}

fn default_row_bytes() -> u64 {
    DEFAULT_ROW_BYTES
}

/// Optional facts about the target database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetMetadata {
    tables: BTreeMap<ObjectName, TableStats>,
}

impl TargetMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record statistics for a table, named `schema.table` or `table`.
    pub fn with_table(mut self, name: &str, stats: TableStats) -> Self {
        if let Some(name) = ObjectName::parse(name) {
            self.tables.insert(name, stats);
        }
        self
    }

    /// Parse metadata JSON: `{"tables": {"dbo.Orders": {"row_count": 10}}}`.
    pub fn from_json(json: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            tables: BTreeMap<String, TableStats>,
        }
        let raw: Raw = serde_json::from_str(json)?;
        Ok(raw
            .tables
            .into_iter()
            .fold(Self::new(), |metadata, (name, stats)| metadata.with_table(&name, stats)))
    }

    /// Load metadata from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn table(&self, name: &ObjectName) -> Option<&TableStats> {
        self.tables.get(name)
    }
}

/// Estimated cost of a deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEstimate {
    pub duration_ms: u64,
    pub storage_delta_bytes: i64,
}

impl std::ops::Add for DeploymentEstimate {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            duration_ms: self.duration_ms.saturating_add(other.duration_ms),
            storage_delta_bytes: self.storage_delta_bytes.saturating_add(other.storage_delta_bytes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementShape {
    CreateTable,
    CreateIndex,
    AddConstraint,
    AlterColumn,
    AddColumn,
    DropTable,
    Other,
}

fn has_sequence(tokens: &[SpannedToken], words: &[&str]) -> bool {
    tokens.windows(words.len()).any(|window| {
        window
            .iter()
            .zip(words)
            .all(|(t, w)| t.token.is_keyword(w))
    })
}

fn shape(tokens: &[SpannedToken]) -> StatementShape {
    let creates_index = tokens.iter().enumerate().any(|(i, t)| {
        t.token.is_keyword("CREATE")
            && tokens[i + 1..]
                .iter()
                .take(3)
                .any(|next| next.token.is_keyword("INDEX"))
    });

    if has_sequence(tokens, &["DROP", "TABLE"]) {
        StatementShape::DropTable
    } else if has_sequence(tokens, &["CREATE", "TABLE"]) {
        StatementShape::CreateTable
    } else if creates_index {
        StatementShape::CreateIndex
    } else if has_sequence(tokens, &["ALTER", "COLUMN"]) {
        StatementShape::AlterColumn
    } else if has_sequence(tokens, &["ADD", "CONSTRAINT"]) {
        StatementShape::AddConstraint
    } else if has_sequence(tokens, &["ALTER", "TABLE"]) && tokens.iter().any(|t| t.token.is_keyword("ADD")) {
        StatementShape::AddColumn
    } else {
        StatementShape::Other
    }
}

/// Estimate a whole plan.
pub fn estimate_plan(
    plan: &DeploymentPlan,
    metadata: &TargetMetadata,
    default_row_count: u64,
) -> DeploymentEstimate {
    let mut created: BTreeSet<&ObjectName> = BTreeSet::new();
    let mut total = DeploymentEstimate::default();

    for op in plan.operations() {
        created.extend(op.defines());
        let existing = op.references().iter().find(|name| !created.contains(name));
        let stats = existing.map(|name| {
            metadata.table(name).copied().unwrap_or(TableStats {
                row_count: default_row_count,
                avg_row_bytes: DEFAULT_ROW_BYTES,
            })
        });
        let tokens = significant_tokens(op.statement_text());
        total = total + estimate_statement(shape(&tokens), stats);
    }
    total
}

fn estimate_statement(shape: StatementShape, stats: Option<TableStats>) -> DeploymentEstimate {
    let rows = stats.map_or(0, |s| s.row_count);
    let row_bytes = stats.map_or(0, |s| s.avg_row_bytes);
    let bytes = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);

    let (work_ms, storage) = match shape {
        StatementShape::CreateTable => (0, EMPTY_TABLE_BYTES),
        StatementShape::CreateIndex => (rows / 100, bytes(rows.saturating_mul(INDEX_ENTRY_BYTES))),
        StatementShape::AddConstraint => (rows / 500, 0),
        StatementShape::AlterColumn => (rows / 50, 0),
        StatementShape::AddColumn => (rows / 200, bytes(rows.saturating_mul(COLUMN_BYTES))),
        StatementShape::DropTable => (0, -bytes(rows.saturating_mul(row_bytes))),
        StatementShape::Other => (0, 0),
    };
    DeploymentEstimate {
        duration_ms: STATEMENT_OVERHEAD_MS + work_ms,
        storage_delta_bytes: storage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Operation, PlanBuilder};
    use crate::phase::Phase;

    fn plan(statements: &[(u8, &str)]) -> DeploymentPlan {
        statements
            .iter()
            .enumerate()
            .fold(PlanBuilder::new(1).without_enhancement(), |b, (i, (phase, sql))| {
                b.with_operation(Operation::entity(Phase::new(*phase).unwrap(), format!("op{i}"), *sql))
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_metadata_json_normalises_names() {
        let metadata = TargetMetadata::from_json(
            r#"{"tables": {"[dbo].[Orders]": {"row_count": 10, "avg_row_bytes": 50}, "Sales": {"row_count": 3}}}"#,
        )
        .unwrap();
        assert_eq!(
            metadata.table(&ObjectName::new("dbo", "orders")).unwrap().row_count,
            10
        );
        assert_eq!(
            metadata.table(&ObjectName::new("dbo", "sales")).unwrap().avg_row_bytes,
            DEFAULT_ROW_BYTES
        );
    }

    #[test]
    fn test_index_on_new_table_costs_overhead_only() {
        let plan = plan(&[
            (1, "CREATE TABLE dbo.Foo (Id INT)"),
            (6, "CREATE NONCLUSTERED INDEX ix ON dbo.Foo (Id)"),
        ]);
        let estimate = estimate_plan(&plan, &TargetMetadata::new(), DEFAULT_ROW_COUNT);
        assert_eq!(estimate.duration_ms, 2 * STATEMENT_OVERHEAD_MS);
        assert_eq!(estimate.storage_delta_bytes, EMPTY_TABLE_BYTES);
    }

    #[test]
    fn test_existing_table_uses_metadata_or_default() {
        let plan = plan(&[(6, "CREATE NONCLUSTERED INDEX ix ON dbo.Orders (CustomerId)")]);

        let known = TargetMetadata::new().with_table(
            "dbo.Orders",
            TableStats {
                row_count: 1_000,
                avg_row_bytes: 100,
            },
        );
        let estimate = estimate_plan(&plan, &known, DEFAULT_ROW_COUNT);
        assert_eq!(estimate.duration_ms, STATEMENT_OVERHEAD_MS + 10);
        assert_eq!(estimate.storage_delta_bytes, 24_000);

        let unknown = estimate_plan(&plan, &TargetMetadata::new(), DEFAULT_ROW_COUNT);
        assert_eq!(unknown.duration_ms, STATEMENT_OVERHEAD_MS + DEFAULT_ROW_COUNT / 100);
    }

    #[test]
    fn test_drop_table_frees_storage() {
        let plan = plan(&[(1, "DROP TABLE dbo.Legacy")]);
        let metadata = TargetMetadata::new().with_table(
            "dbo.Legacy",
            TableStats {
                row_count: 10,
                avg_row_bytes: 100,
            },
        );
        assert_eq!(estimate_plan(&plan, &metadata, 0).storage_delta_bytes, -1_000);
    }
}
