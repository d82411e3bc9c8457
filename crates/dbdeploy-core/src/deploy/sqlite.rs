//! SQLite deployment target for local rehearsal.
//!
//! SQLite runs DDL inside transactions, so a failed rehearsal leaves the
//! database untouched. Restore points are file copies taken with the
//! online-backup API.

use super::target::{DeploymentTarget, RestorePoint};
use crate::error::TargetError;
use chrono::Utc;
use rusqlite::{Connection, DatabaseName};
use std::path::{Path, PathBuf};

/// A SQLite database file.
pub struct SqliteTarget {
    conn: Connection,
    name: String,
    restore_dir: PathBuf,
    production: bool,
}

impl SqliteTarget {
    /// Open (or create) a database file.
    ///
    /// Restore points go to `<file>.restore/` next to the database.
    pub fn open(path: &Path) -> Result<Self, TargetError> {
        let conn = Connection::open(path).map_err(|e| TargetError::Connection(e.to_string()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string());
        let mut restore_dir = path.as_os_str().to_owned();
        restore_dir.push(".restore");
        Ok(Self {
            conn,
            name,
            restore_dir: PathBuf::from(restore_dir),
            production: false,
        })
    }

    /// Store restore points in a different directory.
    pub fn with_restore_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.restore_dir = dir.into();
        self
    }

    /// Treat the database as production.
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl std::fmt::Debug for SqliteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTarget")
            .field("name", &self.name)
            .field("restore_dir", &self.restore_dir)
            .field("production", &self.production)
            .finish()
    }
}

impl DeploymentTarget for SqliteTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_production(&self) -> bool {
        self.production
    }

    fn capture_restore_point(&mut self, preceding_version: Option<&str>) -> Result<RestorePoint, TargetError> {
        std::fs::create_dir_all(&self.restore_dir).map_err(|e| TargetError::RestorePoint(e.to_string()))?;
        let timestamp = Utc::now();
        let file = self
            .restore_dir
            .join(format!("{}_{}.db", self.name, timestamp.format("%Y%m%dT%H%M%S%6f")));

        self.conn
            .backup(DatabaseName::Main, &file, None)
            .map_err(|e| TargetError::RestorePoint(e.to_string()))?;

        tracing::info!(database = %self.name, path = %file.display(), "restore point captured");
        Ok(RestorePoint {
            timestamp,
            target_database: self.name.clone(),
            preceding_version: preceding_version.map(str::to_string),
            reference: file.to_string_lossy().into_owned(),
        })
    }

    fn begin(&mut self) -> Result<(), TargetError> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| TargetError::Transaction(e.to_string()))
    }

    fn execute(&mut self, statement: &str) -> Result<(), TargetError> {
        self.conn.execute_batch(statement)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TargetError> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| TargetError::Transaction(e.to_string()))
    }

    fn rollback(&mut self) -> Result<(), TargetError> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| TargetError::Transaction(e.to_string()))
    }

    fn restore(&mut self, point: &RestorePoint) -> Result<(), TargetError> {
        self.conn
            .restore(
                DatabaseName::Main,
                Path::new(&point.reference),
                None::<fn(rusqlite::backup::Progress)>,
            )
            .map_err(|e| TargetError::RestorePoint(e.to_string()))?;
        tracing::warn!(database = %self.name, reference = %point.reference, "restore point applied");
        Ok(())
    }
}
