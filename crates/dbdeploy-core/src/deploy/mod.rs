//! Transactional deployment execution.
//!
//! A [`DeploymentRun`] moves through an explicit state machine; only an
//! approved run reaches the [`DeploymentExecutor`], which applies the plan to
//! a [`DeploymentTarget`] inside a single transaction.

pub mod executor;
pub mod journal;
pub mod run;
pub mod sqlite;
pub mod target;

pub use executor::{DeploymentExecutor, ExecutionSummary};
pub use journal::{RunJournal, RunKind, RunOutcome, RunRecord};
pub use run::{Approval, DeploymentRun, RunState};
pub use sqlite::SqliteTarget;
pub use target::{DeploymentTarget, RestorePoint};
