//! The fixed, ordered deployment phases.
//!
//! Every operation belongs to exactly one of 29 phases. Phases run in
//! numeric order; later phases may depend on objects created by earlier
//! ones, never the other way around.

use serde::{Deserialize, Serialize};

/// Number of deployment phases.
pub const PHASE_COUNT: u8 = 29;

const LABELS: [&str; PHASE_COUNT as usize] = [
    "create tables",
    "primary key indexes",
    "unique indexes",
    "reference data",
    "foreign key constraints",
    "non-clustered indexes",
    "composite indexes",
    "filtered indexes",
    "computed columns",
    "advanced column constraints",
    "user-defined types",
    "scalar functions",
    "table-valued functions",
    "views",
    "stored procedures",
    "triggers",
    "roles",
    "users",
    "object permissions",
    "schema permissions",
    "synonyms",
    "full-text catalogs and indexes",
    "partition functions and schemes",
    "table partitioning",
    "database options",
    "statistics update",
    "data validation scripts",
    "documentation",
    "maintenance tasks",
];

/// A deployment phase, 1 through 29.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Phase(u8);

impl Phase {
    pub const CREATE_TABLES: Phase = Phase(1);
    pub const PRIMARY_KEYS: Phase = Phase(2);
    pub const UNIQUE_INDEXES: Phase = Phase(3);
    pub const REFERENCE_DATA: Phase = Phase(4);
    pub const FOREIGN_KEYS: Phase = Phase(5);
    pub const NONCLUSTERED_INDEXES: Phase = Phase(6);
    pub const COMPOSITE_INDEXES: Phase = Phase(7);
    pub const FILTERED_INDEXES: Phase = Phase(8);
    pub const COMPUTED_COLUMNS: Phase = Phase(9);
    pub const COLUMN_CONSTRAINTS: Phase = Phase(10);

    /// Create a phase from its number, if it is in range.
    pub fn new(number: u8) -> Option<Self> {
        (1..=PHASE_COUNT).contains(&number).then_some(Phase(number))
    }

    /// All phases in execution order.
    pub fn all() -> impl Iterator<Item = Phase> {
        (1..=PHASE_COUNT).map(Phase)
    }

    /// The phase number.
    pub fn number(self) -> u8 {
        self.0
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        LABELS[(self.0 - 1) as usize]
    }

    /// Whether operations in this phase always need a human or policy
    /// approval, whatever their content.
    pub fn requires_approval(self) -> bool {
        matches!(self.0, 16..=20 | 22..=25 | 27 | 29)
    }

    /// Parse a repository folder name such as `04-reference-data`,
    /// `15_stored_procedures` or `9`.
    pub fn from_folder_name(name: &str) -> Option<Self> {
        let digits: &str = {
            let end = name
                .char_indices()
                .find(|(_, c)| !c.is_ascii_digit())
                .map(|(i, _)| i)
                .unwrap_or(name.len());
            &name[..end]
        };
        if digits.is_empty() {
            return None;
        }
        let rest = &name[digits.len()..];
        if !(rest.is_empty() || rest.starts_with('-') || rest.starts_with('_')) {
            return None;
        }
        digits.parse::<u8>().ok().and_then(Phase::new)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for Phase {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Phase::new(value).ok_or_else(|| format!("phase {value} is outside 1..={PHASE_COUNT}"))
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> u8 {
        phase.0
    }
}
