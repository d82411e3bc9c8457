//! Plan audit trail.
//!
//! Everything the builder changed or dropped on the way from inputs to plan
//! is recorded here, so a reviewer can diff the executed text against the
//! scripts as written.

use crate::ddl::SkippedChange;
use crate::enhance::{EnhancementOutcome, SkipReason};
use crate::phase::Phase;
use crate::repository::RepositoryLoadError;
use serde::Serialize;
use std::path::PathBuf;

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    /// The enhancer rewrote or declined to rewrite a script.
    Enhancement(EnhancementRecord),
    /// A descriptor change needs a hand-authored script.
    DestructiveChangeSkipped(SkippedChange),
    /// A repository file could not be loaded.
    LoadError(RepositoryLoadError),
}

/// Enhancer result for one operation, with the text as written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancementRecord {
    pub phase: Phase,
    pub ordinal: u32,
    pub object_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    pub outcome: EnhancementOutcome,
    pub original_text: String,
}

impl EnhancementRecord {
    /// The skip reason, when the enhancer left the script as written.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self.outcome {
            EnhancementOutcome::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

/// A script left non-idempotent because the enhancer could not read it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancementNote {
    pub phase: Phase,
    pub object_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    pub reason: SkipReason,
}

impl std::fmt::Display for EnhancementNote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "script enhancement skipped for '{}' in phase {}: {}",
            self.object_name, self.phase, self.reason
        )
    }
}
