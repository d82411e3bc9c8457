//! Run journal.
//!
//! Records the `Executing` entry and the terminal outcome of every run so a
//! crash mid-deployment is visible on the next start.

use super::run::DeploymentRun;
use crate::error::{DeployError, Result};
use chrono::{DateTime, Utc};
use rkyv::{Archive, Deserialize, Serialize};

/// What kind of run a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum RunKind {
    Deploy,
    Rollback,
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunKind::Deploy => write!(f, "deploy"),
            RunKind::Rollback => write!(f, "rollback"),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Statements were being applied when the record was written.
    Executing,
    Committed,
    RolledBack {
        /// Whether the platform restore point was applied.
        restored: bool,
    },
    Blocked,
    /// Every reversal item was acknowledged.
    Acknowledged,
    /// At least one reversal item needs a hand-authored script.
    ManualReversalRequired,
}

impl RunOutcome {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, RunOutcome::Executing)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Executing => write!(f, "executing"),
            RunOutcome::Committed => write!(f, "committed"),
            RunOutcome::RolledBack { restored: false } => write!(f, "rolled_back"),
            RunOutcome::RolledBack { restored: true } => write!(f, "rolled_back_and_restored"),
            RunOutcome::Blocked => write!(f, "blocked"),
            RunOutcome::Acknowledged => write!(f, "acknowledged"),
            RunOutcome::ManualReversalRequired => write!(f, "manual_reversal_required"),
        }
    }
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub kind: RunKind,
    pub outcome: RunOutcome,
    pub descriptor_version: u64,
    pub operation_count: u64,
    /// Deployed artifact version, or the rollback target.
    pub version: Option<String>,
    pub error: Option<String>,
    /// Microseconds since epoch.
    pub started_at: u64,
    /// Microseconds since epoch.
    pub finished_at: Option<u64>,
}

impl RunRecord {
    /// A record for a deployment run.
    pub fn for_run(run: &DeploymentRun, outcome: RunOutcome) -> Self {
        Self {
            run_id: run.id().to_string(),
            kind: RunKind::Deploy,
            outcome,
            descriptor_version: run.plan().descriptor_version(),
            operation_count: run.plan().len() as u64,
            version: None,
            error: None,
            started_at: micros(run.started_at()),
            finished_at: (!outcome.is_in_flight()).then(|| micros(Utc::now())),
        }
    }

    /// A record for a rollback or restore run.
    pub fn for_rollback(run_id: impl Into<String>, target_version: Option<String>, outcome: RunOutcome) -> Self {
        let now = micros(Utc::now());
        Self {
            run_id: run_id.into(),
            kind: RunKind::Rollback,
            outcome,
            descriptor_version: 0,
            operation_count: 0,
            version: target_version,
            error: None,
            started_at: now,
            finished_at: Some(now),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| DeployError::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| DeployError::Deserialization(e.to_string()))
    }

    fn key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(4 + 8 + self.run_id.len());
        key.extend_from_slice(b"run:");
        key.extend_from_slice(&self.started_at.to_be_bytes());
        key.extend_from_slice(self.run_id.as_bytes());
        key
    }
}

fn micros(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp_micros()).unwrap_or(0)
}

/// Sled-backed run journal.
pub struct RunJournal {
    tree: sled::Tree,
}

impl RunJournal {
    /// Tree name for run records.
    pub const TREE_NAME: &'static str = "deployment:runs";

    /// Open or create the journal. Runs left in flight are logged.
    pub fn open(db: &sled::Db) -> Result<Self> {
        let journal = Self {
            tree: db.open_tree(Self::TREE_NAME)?,
        };
        for record in journal.in_flight()? {
            tracing::warn!(
                run = %record.run_id,
                descriptor_version = record.descriptor_version,
                operations = record.operation_count,
                "previous deployment run did not finish; check the target before deploying"
            );
        }
        Ok(journal)
    }

    /// Insert or replace a record.
    pub fn record(&self, record: &RunRecord) -> Result<()> {
        self.tree.insert(record.key(), record.to_bytes()?)?;
        self.tree.flush()?;
        tracing::debug!(run = %record.run_id, outcome = %record.outcome, "run journaled");
        Ok(())
    }

    /// All records, oldest first.
    pub fn list(&self) -> Result<Vec<RunRecord>> {
        let mut records = Vec::new();
        for result in self.tree.scan_prefix(b"run:") {
            let (_, value) = result?;
            records.push(RunRecord::from_bytes(&value)?);
        }
        Ok(records)
    }

    /// Runs whose last record is `Executing`.
    pub fn in_flight(&self) -> Result<Vec<RunRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.outcome.is_in_flight())
            .collect())
    }

    /// Most recent record.
    pub fn latest(&self) -> Result<Option<RunRecord>> {
        match self.tree.scan_prefix(b"run:").next_back() {
            Some(result) => {
                let (_, value) = result?;
                Ok(Some(RunRecord::from_bytes(&value)?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(run_id: &str, started_at: u64, outcome: RunOutcome) -> RunRecord {
        RunRecord {
            run_id: run_id.to_string(),
            kind: RunKind::Deploy,
            outcome,
            descriptor_version: 3,
            operation_count: 12,
            version: None,
            error: None,
            started_at,
            finished_at: None,
        }
    }

    #[test]
    fn test_record_replaces_in_flight_entry() {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let journal = RunJournal::open(&db).unwrap();

        journal.record(&record("a1", 10, RunOutcome::Executing)).unwrap();
        assert_eq!(journal.in_flight().unwrap().len(), 1);

        let done = record("a1", 10, RunOutcome::Committed).with_version("000001-0123456789ab");
        journal.record(&done).unwrap();
        assert!(journal.in_flight().unwrap().is_empty());
        assert_eq!(journal.list().unwrap(), vec![done]);
    }

    #[test]
    fn test_records_survive_reopen_in_order() {
        let dir = TempDir::new().unwrap();
        {
            let db = sled::open(dir.path()).unwrap();
            let journal = RunJournal::open(&db).unwrap();
            journal.record(&record("b", 20, RunOutcome::RolledBack { restored: true })).unwrap();
            journal.record(&record("a", 10, RunOutcome::Executing)).unwrap();
        }
        let db = sled::open(dir.path()).unwrap();
        let journal = RunJournal::open(&db).unwrap();
        let ids: Vec<String> = journal.list().unwrap().into_iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(journal.latest().unwrap().unwrap().run_id, "b");
        assert_eq!(journal.in_flight().unwrap()[0].run_id, "a");
    }
}
