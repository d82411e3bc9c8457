//! Append-only compiled deployment history.

use super::compiled::{sequence_of, ChangeSummary, CompiledDeployment, Header};
use crate::error::{DeployError, Result};
use crate::plan::DeploymentPlan;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const PREFIX: &str = "deployment_";
const EXTENSION: &str = ".sql";

/// History entry read from an artifact header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentSummary {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub source_descriptor_version: u64,
    pub operation_count: usize,
    pub change_summary: ChangeSummary,
    pub path: PathBuf,
}

/// Directory of `deployment_<version>.sql` files.
///
/// Files are written once and never modified. A file that fails to parse is
/// reported as corrupt, never repaired.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Open the history directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact for a version.
    pub fn path_for(&self, version: &str) -> PathBuf {
        self.dir.join(format!("{PREFIX}{version}{EXTENSION}"))
    }

    /// Stored versions, oldest first.
    pub fn versions(&self) -> Result<Vec<String>> {
        let mut versions: Vec<(u64, String)> = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(version) = name
                .to_str()
                .and_then(|n| n.strip_prefix(PREFIX))
                .and_then(|n| n.strip_suffix(EXTENSION))
            else {
                continue;
            };
            match sequence_of(version) {
                Some(sequence) => versions.push((sequence, version.to_string())),
                None => tracing::warn!(file = ?entry.path(), "ignoring file with unrecognized version"),
            }
        }
        versions.sort();
        Ok(versions.into_iter().map(|(_, v)| v).collect())
    }

    /// Most recent version.
    pub fn latest_version(&self) -> Result<Option<String>> {
        Ok(self.versions()?.pop())
    }

    /// Version immediately before `version`.
    pub fn previous_version(&self, version: &str) -> Result<Option<String>> {
        let versions = self.versions()?;
        let index = versions
            .iter()
            .position(|v| v == version)
            .ok_or_else(|| DeployError::VersionNotFound {
                version: version.to_string(),
            })?;
        Ok(index.checked_sub(1).map(|i| versions[i].clone()))
    }

    /// Compile a committed plan as the next history entry and store it.
    pub fn append(&self, plan: &DeploymentPlan, generated_at: DateTime<Utc>) -> Result<CompiledDeployment> {
        let sequence = self
            .versions()?
            .last()
            .and_then(|v| sequence_of(v))
            .map_or(1, |s| s + 1);
        let compiled = CompiledDeployment::from_plan(plan, sequence, generated_at);
        self.save(&compiled)?;
        Ok(compiled)
    }

    /// Write an artifact. An existing file for the version is never replaced.
    pub fn save(&self, compiled: &CompiledDeployment) -> Result<PathBuf> {
        let path = self.path_for(compiled.version());
        if path.exists() {
            return Err(DeployError::ArtifactExists { path });
        }
        let tmp = self.dir.join(format!(".{PREFIX}{}{EXTENSION}.tmp", compiled.version()));
        std::fs::write(&tmp, compiled.render())?;

        // hard_link refuses to replace an existing destination
        let linked = std::fs::hard_link(&tmp, &path);
        std::fs::remove_file(&tmp)?;
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(DeployError::ArtifactExists { path });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            version = compiled.version(),
            operations = compiled.operations().len(),
            path = %path.display(),
            "compiled deployment stored"
        );
        Ok(path)
    }

    /// Load and verify an artifact.
    pub fn load(&self, version: &str) -> Result<CompiledDeployment> {
        let path = self.path_for(version);
        if !path.exists() {
            return Err(DeployError::VersionNotFound {
                version: version.to_string(),
            });
        }
        let text = std::fs::read_to_string(&path).map_err(|e| DeployError::HistoryCorrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        CompiledDeployment::parse(&text).map_err(|reason| DeployError::HistoryCorrupt { path, reason })
    }

    /// Read one artifact's header.
    pub fn summary(&self, version: &str) -> Result<DeploymentSummary> {
        read_summary(&self.path_for(version))
    }

    /// Past deployments, newest first. Headers are read as the iterator
    /// advances.
    pub fn history(&self) -> Result<impl Iterator<Item = Result<DeploymentSummary>> + '_> {
        let versions = self.versions()?;
        Ok(versions.into_iter().rev().map(move |v| self.summary(&v)))
    }
}

fn read_summary(path: &Path) -> Result<DeploymentSummary> {
    let corrupt = |reason: String| DeployError::HistoryCorrupt {
        path: path.to_path_buf(),
        reason,
    };
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut header = String::new();
    for line in reader.lines() {
        let line = line.map_err(|e| corrupt(e.to_string()))?;
        if line == "BEGIN TRANSACTION;" {
            let header = Header::parse(&header).map_err(corrupt)?;
            return Ok(DeploymentSummary {
                version: header.version,
                generated_at: header.generated_at,
                source_descriptor_version: header.source_descriptor_version,
                operation_count: header.operation_count,
                change_summary: header.change_summary,
                path: path.to_path_buf(),
            });
        }
        header.push_str(&line);
        header.push('\n');
    }
    Err(corrupt("missing BEGIN TRANSACTION".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::plan::{Operation, PlanBuilder};
    use tempfile::TempDir;

    fn plan(table: &str) -> DeploymentPlan {
        PlanBuilder::new(1)
            .with_operation(Operation::entity(
                Phase::CREATE_TABLES,
                format!("dbo.{table}"),
                format!("CREATE TABLE {table} (Id INTEGER);"),
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_append_orders_versions() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();

        let first = store.append(&plan("a"), Utc::now()).unwrap();
        let second = store.append(&plan("b"), Utc::now()).unwrap();
        assert!(first.version().starts_with("000001-"));
        assert!(second.version().starts_with("000002-"));

        assert_eq!(store.versions().unwrap(), vec![first.version(), second.version()]);
        assert_eq!(store.latest_version().unwrap().as_deref(), Some(second.version()));
        assert_eq!(
            store.previous_version(second.version()).unwrap().as_deref(),
            Some(first.version())
        );
        assert_eq!(store.previous_version(first.version()).unwrap(), None);

        let history: Vec<String> = store
            .history()
            .unwrap()
            .map(|s| s.unwrap().version)
            .collect();
        assert_eq!(history, vec![second.version(), first.version()]);
        assert_eq!(store.load(first.version()).unwrap(), first);
    }

    #[test]
    fn test_save_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let compiled = store.append(&plan("a"), Utc::now()).unwrap();

        let err = store.save(&compiled).unwrap_err();
        assert!(matches!(err, DeployError::ArtifactExists { .. }));
        assert_eq!(store.versions().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_artifact_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let compiled = store.append(&plan("a"), Utc::now()).unwrap();

        let path = store.path_for(compiled.version());
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("INTEGER", "TEXT")).unwrap();

        match store.load(compiled.version()).unwrap_err() {
            DeployError::HistoryCorrupt { path: reported, reason } => {
                assert_eq!(reported, path);
                assert!(reason.contains("checksum"));
            }
            other => panic!("Expected HistoryCorrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_version() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.load("000009-000000000000").unwrap_err(),
            DeployError::VersionNotFound { .. }
        ));
        assert!(matches!(
            store.previous_version("000009-000000000000").unwrap_err(),
            DeployError::VersionNotFound { .. }
        ));
        assert_eq!(store.history().unwrap().count(), 0);
    }
}
