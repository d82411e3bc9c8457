//! Core error types.

use crate::phase::Phase;
use std::path::PathBuf;
use thiserror::Error;

/// Deployment orchestration errors.
///
/// Every variant that concerns a single planned operation carries the
/// operation's phase, object name and statement text so the source script or
/// descriptor can be fixed without re-running the pipeline.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The script repository root could not be read.
    #[error("script repository unavailable at {path}: {reason}")]
    RepositoryUnavailable {
        /// Repository root.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// An operation references an object that a later operation creates.
    #[error(
        "plan ordering violation: '{object}' is referenced in phase {phase} by '{object_name}' \
         but is created later in phase {defined_in}\n{statement}"
    )]
    PlanOrderingViolation {
        /// The referenced object.
        object: String,
        /// Phase of the offending operation.
        phase: Phase,
        /// Object name of the offending operation.
        object_name: String,
        /// Statement text of the offending operation.
        statement: String,
        /// Phase of the operation that creates the object.
        defined_in: Phase,
    },

    /// The descriptor feed is older than the deployed snapshot.
    #[error("descriptor version regressed: deployed {deployed}, feed {feed}")]
    DescriptorVersionRegressed {
        /// Version recorded by the last deployment.
        deployed: u64,
        /// Version supplied by the feed.
        feed: u64,
    },

    /// Validation produced error-severity issues; execution refused.
    #[error(
        "validation blocked: {error_count} error(s); first in phase {phase} on '{object_name}': \
         {description}\n{statement}"
    )]
    ValidationBlocked {
        /// Number of error-severity issues.
        error_count: usize,
        /// Phase of the first blocking operation.
        phase: Phase,
        /// Object name of the first blocking operation.
        object_name: String,
        /// Statement text of the first blocking operation.
        statement: String,
        /// Description of the first blocking issue.
        description: String,
    },

    /// The run needs an explicit approval before it may execute.
    #[error("approval required before execution: {reason}")]
    ApprovalRequired {
        /// Why approval is needed.
        reason: String,
    },

    /// A deployment run was asked to make an illegal state transition.
    #[error("invalid run transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: crate::deploy::RunState,
        /// Requested state.
        to: crate::deploy::RunState,
    },

    /// A statement failed; the transaction was rolled back.
    #[error(
        "execution failed at phase {phase} operation {ordinal} ('{object_name}'): {cause}{}\n{statement}",
        restored_suffix(.restored)
    )]
    ExecutionFailed {
        /// Phase of the failing operation.
        phase: Phase,
        /// Ordinal of the failing operation within its phase.
        ordinal: u32,
        /// Object name of the failing operation.
        object_name: String,
        /// Statement text of the failing operation.
        statement: String,
        /// Target error message.
        cause: String,
        /// Whether the platform point-in-time restore ran.
        restored: bool,
    },

    /// The target failed before any operation ran; nothing was applied.
    #[error("execution aborted before the first operation ({stage}): {cause}")]
    ExecutionAborted {
        /// What the executor was doing: `restore point` or `begin`.
        stage: String,
        /// Target error message.
        cause: String,
    },

    /// The target committed but the compiled deployment was not written.
    ///
    /// The schema change is live; the history is missing its entry.
    #[error("deployment {run_id} committed but its compiled deployment was not recorded: {cause}")]
    ArtifactNotRecorded {
        /// Run that committed.
        run_id: String,
        /// Why the artifact write failed.
        cause: String,
    },

    /// No compiled deployment exists for the requested version.
    #[error("deployment version not found: {version}")]
    VersionNotFound {
        /// Requested version.
        version: String,
    },

    /// A stored artifact could not be parsed or failed its checksum.
    #[error("deployment history corrupt at {path}: {reason}")]
    HistoryCorrupt {
        /// Offending artifact file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// An artifact with the same version already exists.
    #[error("compiled deployment already exists: {path}")]
    ArtifactExists {
        /// Existing artifact file.
        path: PathBuf,
    },

    /// Error reported by the deployment target.
    #[error("target error: {0}")]
    Target(#[from] TargetError),

    /// State storage error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A risk rule pattern did not compile.
    #[error("invalid rule '{category}': {reason}")]
    InvalidRule {
        /// Rule category.
        category: String,
        /// Regex error.
        reason: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors raised by a deployment target (the hosting database platform).
#[derive(Debug, Error)]
pub enum TargetError {
    /// Connecting to or opening the target failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A statement was rejected by the target.
    #[error("{0}")]
    Statement(String),

    /// Transaction control (begin/commit/rollback) failed.
    #[error("transaction control failed: {0}")]
    Transaction(String),

    /// Capturing or applying a restore point failed.
    #[error("restore point failed: {0}")]
    RestorePoint(String),
}

impl From<rusqlite::Error> for TargetError {
    fn from(err: rusqlite::Error) -> Self {
        TargetError::Statement(err.to_string())
    }
}

impl From<serde_json::Error> for DeployError {
    fn from(err: serde_json::Error) -> Self {
        DeployError::Deserialization(err.to_string())
    }
}

fn restored_suffix(restored: &bool) -> &'static str {
    if *restored {
        " (restore point applied)"
    } else {
        ""
    }
}

/// Result alias used across the crate.
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_failed_display() {
        let err = DeployError::ExecutionFailed {
            phase: Phase::new(15).unwrap(),
            ordinal: 3,
            object_name: "dbo.usp_Refresh".to_string(),
            statement: "EXEC dbo.missing".to_string(),
            cause: "no such procedure".to_string(),
            restored: true,
        };
        let text = err.to_string();
        assert!(text.contains("phase 15"));
        assert!(text.contains("dbo.usp_Refresh"));
        assert!(text.contains("restore point applied"));
        assert!(text.contains("EXEC dbo.missing"));
    }

    #[test]
    fn test_ordering_violation_names_object() {
        let err = DeployError::PlanOrderingViolation {
            object: "dbo.audit".to_string(),
            phase: Phase::new(4).unwrap(),
            object_name: "seed_audit".to_string(),
            statement: "INSERT INTO dbo.Audit VALUES (1)".to_string(),
            defined_in: Phase::new(14).unwrap(),
        };
        let text = err.to_string();
        assert!(text.contains("'dbo.audit'"));
        assert!(text.contains("phase 14"));
    }
}
