//! The seam to the hosting database platform.

use crate::error::TargetError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A platform snapshot taken before execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePoint {
    /// When the point was captured.
    pub timestamp: DateTime<Utc>,
    /// Database the point belongs to.
    pub target_database: String,
    /// Last compiled deployment version applied before this run, if any.
    pub preceding_version: Option<String>,
    /// Platform handle used to restore the point.
    pub reference: String,
}

/// A database a plan can be deployed to.
///
/// Implementations run every statement of a deployment inside one
/// transaction opened by [`begin`](Self::begin). A restore point is the
/// platform's own mechanism (backup, snapshot, point-in-time restore); the
/// executor only asks for one and hands it back.
pub trait DeploymentTarget {
    /// Database name, for logs and restore points.
    fn name(&self) -> &str;

    /// Whether a failed run must also restore the platform snapshot.
    fn is_production(&self) -> bool;

    /// Capture a restore point.
    fn capture_restore_point(&mut self, preceding_version: Option<&str>) -> Result<RestorePoint, TargetError>;

    /// Open the deployment transaction.
    fn begin(&mut self) -> Result<(), TargetError>;

    /// Run one operation's statement text.
    fn execute(&mut self, statement: &str) -> Result<(), TargetError>;

    /// Commit the deployment transaction.
    fn commit(&mut self) -> Result<(), TargetError>;

    /// Roll the deployment transaction back.
    fn rollback(&mut self) -> Result<(), TargetError>;

    /// Return the database to a restore point.
    fn restore(&mut self, point: &RestorePoint) -> Result<(), TargetError>;
}
