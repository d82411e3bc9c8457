//! Compiled deployment artifacts.
//!
//! Every committed run leaves one immutable `deployment_<version>.sql` file.
//! The directory is the deployment history; rollback and restore requests
//! are answered from it.

pub mod compiled;
pub mod rollback;
pub mod store;

pub use compiled::{ChangeSummary, CompiledDeployment, CompiledOperation, FORMAT};
pub use rollback::{ReversalAction, ReversalItem, ReverseIntentReport};
pub use store::{ArtifactStore, DeploymentSummary};
