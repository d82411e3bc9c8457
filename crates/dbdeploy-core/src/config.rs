//! Orchestrator configuration.

use crate::validate::DEFAULT_ROW_COUNT;
use std::path::PathBuf;

/// Default script repository root.
pub const DEFAULT_REPOSITORY: &str = "database";

/// Default compiled deployment directory.
pub const DEFAULT_ARTIFACT_DIR: &str = "deployments";

/// Default sled state directory (descriptor snapshots and run journal).
pub const DEFAULT_STATE_DIR: &str = ".dbdeploy/state";

/// Deployment orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    /// Root of the phase-foldered script repository.
    pub repository: PathBuf,

    /// Descriptor feed JSON. `None` deploys scripts only.
    pub descriptors: Option<PathBuf>,

    /// Target metadata JSON for estimates.
    pub metadata: Option<PathBuf>,

    /// Directory holding `deployment_<version>.sql` history.
    pub artifact_dir: PathBuf,

    /// Directory of the sled state database.
    pub state_dir: PathBuf,

    /// Row count assumed for existing tables without metadata.
    pub default_row_count: u64,

    /// Add drop guards to programmability scripts.
    pub enhance_scripts: bool,
}

impl DeployConfig {
    /// Create a configuration for a script repository.
    pub fn new(repository: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.into(),
            descriptors: None,
            metadata: None,
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            default_row_count: DEFAULT_ROW_COUNT,
            enhance_scripts: true,
        }
    }

    /// Set the descriptor feed.
    pub fn with_descriptors(mut self, path: impl Into<PathBuf>) -> Self {
        self.descriptors = Some(path.into());
        self
    }

    /// Set the target metadata file.
    pub fn with_metadata(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata = Some(path.into());
        self
    }

    /// Set the artifact directory.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    /// Set the state directory.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Set the default row count for estimates.
    pub fn with_default_row_count(mut self, rows: u64) -> Self {
        self.default_row_count = rows;
        self
    }

    /// Leave programmability scripts exactly as written.
    pub fn without_enhancement(mut self) -> Self {
        self.enhance_scripts = false;
        self
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self::new(DEFAULT_REPOSITORY)
    }
}
