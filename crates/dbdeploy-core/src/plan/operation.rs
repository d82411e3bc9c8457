//! Planned operations.

use crate::phase::Phase;
use crate::sql::{defined_objects, referenced_objects, ObjectName};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Where an operation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Generated from the descriptor diff.
    EntityDerived,
    /// Read from the script repository.
    RepositoryScript,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::EntityDerived => write!(f, "entity"),
            SourceKind::RepositoryScript => write!(f, "script"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entity" => Ok(SourceKind::EntityDerived),
            "script" => Ok(SourceKind::RepositoryScript),
            other => Err(format!("unknown operation source '{other}'")),
        }
    }
}

/// A single planned, executable statement within a phase.
///
/// Operations are immutable once built. Rewriting the statement (for example
/// adding an idempotency guard) yields a new operation through
/// [`Operation::rewritten`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    phase: Phase,
    source_kind: SourceKind,
    object_name: String,
    statement_text: String,
    ordinal_within_phase: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_path: Option<PathBuf>,
    #[serde(skip)]
    defines: BTreeSet<ObjectName>,
    #[serde(skip)]
    references: BTreeSet<ObjectName>,
}

impl Operation {
    /// Create an entity-derived operation. The ordinal is assigned by the
    /// plan builder.
    pub fn entity(phase: Phase, object_name: impl Into<String>, statement: impl Into<String>) -> Self {
        Self::from_parts(phase, 0, SourceKind::EntityDerived, object_name, statement, None)
    }

    /// Create an operation from a repository script.
    ///
    /// The object name is the first object the script creates, or the file
    /// stem when it creates none.
    pub fn script(phase: Phase, ordinal: u32, path: &Path, text: impl Into<String>) -> Self {
        let text = text.into();
        let object_name = defined_objects(&text)
            .into_iter()
            .next()
            .map(|name| name.to_string())
            .unwrap_or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
        Self::from_parts(
            phase,
            ordinal,
            SourceKind::RepositoryScript,
            object_name,
            text,
            Some(path.to_path_buf()),
        )
    }

    pub(crate) fn from_parts(
        phase: Phase,
        ordinal: u32,
        source_kind: SourceKind,
        object_name: impl Into<String>,
        statement: impl Into<String>,
        source_path: Option<PathBuf>,
    ) -> Self {
        let statement_text = statement.into();
        Self {
            phase,
            source_kind,
            object_name: object_name.into(),
            defines: defined_objects(&statement_text),
            references: referenced_objects(&statement_text),
            statement_text,
            ordinal_within_phase: ordinal,
            source_path,
        }
    }

    /// A copy of this operation with different statement text.
    pub fn rewritten(&self, statement: impl Into<String>) -> Self {
        Self::from_parts(
            self.phase,
            self.ordinal_within_phase,
            self.source_kind,
            self.object_name.clone(),
            statement,
            self.source_path.clone(),
        )
    }

    pub(crate) fn with_ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal_within_phase = ordinal;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn statement_text(&self) -> &str {
        &self.statement_text
    }

    /// 1-based position within the phase.
    pub fn ordinal_within_phase(&self) -> u32 {
        self.ordinal_within_phase
    }

    /// Script file, for repository operations.
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Objects this operation creates.
    pub fn defines(&self) -> &BTreeSet<ObjectName> {
        &self.defines
    }

    /// Objects this operation touches without creating them.
    pub fn references(&self) -> &BTreeSet<ObjectName> {
        &self.references
    }

    /// `(phase, ordinal)` sort key.
    pub fn position(&self) -> (Phase, u32) {
        (self.phase, self.ordinal_within_phase)
    }
}
