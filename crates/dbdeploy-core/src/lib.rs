//! dbdeploy core - ordered, validated, transactional schema deployments.
//!
//! A deployment combines DDL generated from schema descriptors with
//! hand-authored scripts from a phase-foldered repository, classifies the
//! resulting plan for risk, executes it inside one transaction and records
//! every committed run as an immutable compiled artifact.

pub mod artifact;
pub mod config;
pub mod ddl;
pub mod deploy;
pub mod descriptor;
pub mod enhance;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod plan;
pub mod repository;
pub mod sql;
pub mod validate;

pub use artifact::{ArtifactStore, CompiledDeployment, DeploymentSummary, ReverseIntentReport};
pub use config::DeployConfig;
pub use deploy::{Approval, DeploymentExecutor, DeploymentRun, DeploymentTarget, RunState, SqliteTarget};
pub use descriptor::{DescriptorSnapshot, SnapshotStore};
pub use error::{DeployError, Result, TargetError};
pub use orchestrator::{DeploymentOutcome, Deployer, PreparedPlan};
pub use phase::Phase;
pub use plan::{DeploymentPlan, Operation, PlanBuilder, SourceKind};
pub use repository::ScriptRepository;
pub use validate::{OverallResult, RiskClassifier, RuleSet, TargetMetadata, ValidationReport};
