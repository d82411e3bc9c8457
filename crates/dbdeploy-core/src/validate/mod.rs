//! Deployment risk validation.
//!
//! Every operation of a plan is matched against an explicit [`RuleSet`] and
//! the resulting issues are rolled up into a [`ValidationReport`]. The
//! report's overall result gates execution: `Blocked` refuses to run,
//! `Warnings` needs an explicit approval.

pub mod classifier;
pub mod estimate;
pub mod report;
pub mod rules;

pub use classifier::RiskClassifier;
pub use estimate::{DeploymentEstimate, TableStats, TargetMetadata, DEFAULT_ROW_COUNT};
pub use report::{OperationRef, OverallResult, Severity, ValidationIssue, ValidationReport};
pub use rules::{category, PatternRule, Rule, RuleScope, RuleSet};
