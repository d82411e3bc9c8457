//! Script repository loading.
//!
//! The repository root holds one folder per phase (`04-reference-data`,
//! `15_stored_procedures`, `9`, ...). Each folder holds `.sql` files that run
//! in filename order: numbered files first by number, then the rest by name.

use crate::error::{DeployError, Result};
use crate::phase::Phase;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// A script read from the repository.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFile {
    /// Phase of the containing folder.
    pub phase: Phase,
    /// 1-based position within the phase.
    pub ordinal: u32,
    /// File path.
    pub path: PathBuf,
    /// File contents.
    pub text: String,
}

/// A file that could not be loaded. Loading continues without it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryLoadError {
    /// Offending file or folder.
    pub path: PathBuf,
    /// Phase of the containing folder.
    pub phase: Option<Phase>,
    /// What went wrong.
    pub reason: String,
}

impl std::fmt::Display for RepositoryLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.phase {
            Some(phase) => write!(f, "{} (phase {phase}): {}", self.path.display(), self.reason),
            None => write!(f, "{}: {}", self.path.display(), self.reason),
        }
    }
}

/// Result of loading a repository.
#[derive(Debug, Clone, Default)]
pub struct LoadedRepository {
    /// Scripts ordered by phase, then ordinal.
    pub scripts: Vec<ScriptFile>,
    /// Files that were skipped.
    pub errors: Vec<RepositoryLoadError>,
}

impl LoadedRepository {
    /// Scripts of one phase.
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &ScriptFile> {
        self.scripts.iter().filter(move |s| s.phase == phase)
    }
}

/// A script repository on disk.
#[derive(Debug, Clone)]
pub struct ScriptRepository {
    root: PathBuf,
}

impl ScriptRepository {
    /// Create a repository rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load all scripts.
    ///
    /// Only an unreadable root is fatal. Unreadable or non-UTF-8 files are
    /// reported in [`LoadedRepository::errors`].
    pub fn load(&self) -> Result<LoadedRepository> {
        let unavailable = |reason: String| DeployError::RepositoryUnavailable {
            path: self.root.clone(),
            reason,
        };

        let entries = fs::read_dir(&self.root).map_err(|e| unavailable(e.to_string()))?;
        let mut folders: BTreeMap<Phase, Vec<PathBuf>> = BTreeMap::new();
        for entry in entries {
            let path = entry.map_err(|e| unavailable(e.to_string()))?.path();
            let phase = path
                .is_dir()
                .then(|| path.file_name().and_then(|n| n.to_str()))
                .flatten()
                .and_then(Phase::from_folder_name);
            match phase {
                Some(phase) => folders.entry(phase).or_default().push(path),
                None => tracing::warn!(path = %path.display(), "ignoring entry that is not a phase folder"),
            }
        }

        let mut result = LoadedRepository::default();
        let mut candidates: Vec<(Phase, PathBuf)> = Vec::new();
        for (phase, dirs) in folders {
            if dirs.len() > 1 {
                tracing::warn!(phase = phase.number(), folders = dirs.len(), "several folders map to one phase; merging");
            }
            let mut files = Vec::new();
            for dir in dirs {
                match list_scripts(&dir) {
                    Ok(found) => files.extend(found),
                    Err(e) => result.errors.push(RepositoryLoadError {
                        path: dir,
                        phase: Some(phase),
                        reason: e.to_string(),
                    }),
                }
            }
            files.sort_by(|a, b| compare_script_names(a, b));
            candidates.extend(files.into_iter().map(|path| (phase, path)));
        }

        // Reads fan out; collect keeps the candidate order
        let reads: Vec<(Phase, PathBuf, std::result::Result<String, String>)> = candidates
            .into_par_iter()
            .map(|(phase, path)| {
                let text = fs::read(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| String::from_utf8(bytes).map_err(|_| "file is not valid UTF-8".to_string()));
                (phase, path, text)
            })
            .collect();

        let mut ordinals: BTreeMap<Phase, u32> = BTreeMap::new();
        for (phase, path, text) in reads {
            match text {
                Ok(text) => {
                    let ordinal = ordinals.entry(phase).or_insert(0);
                    *ordinal += 1;
                    result.scripts.push(ScriptFile {
                        phase,
                        ordinal: *ordinal,
                        path,
                        text,
                    });
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), phase = phase.number(), %reason, "skipping unreadable script");
                    result.errors.push(RepositoryLoadError {
                        path,
                        phase: Some(phase),
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            root = %self.root.display(),
            scripts = result.scripts.len(),
            errors = result.errors.len(),
            "script repository loaded"
        );
        Ok(result)
    }
}

fn list_scripts(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_sql = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("sql"));
        if path.is_file() && is_sql {
            files.push(path);
        } else {
            tracing::warn!(path = %path.display(), "ignoring non-script entry");
        }
    }
    Ok(files)
}

fn numeric_prefix(name: &str) -> Option<u64> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Numbered files first (by number, then name), then the rest by name.
fn compare_script_names(a: &Path, b: &Path) -> Ordering {
    let name = |p: &Path| p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let (a, b) = (name(a), name(b));
    match (numeric_prefix(&a), numeric_prefix(&b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(&b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(&b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_load_orders_phases_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "15_stored_procedures/b_proc.sql", b"CREATE PROCEDURE b AS SELECT 1");
        write(root, "15_stored_procedures/10_later.sql", b"SELECT 10");
        write(root, "15_stored_procedures/2_first.SQL", b"SELECT 2");
        write(root, "15_stored_procedures/a_proc.sql", b"SELECT 'a'");
        write(root, "04-reference-data/seed.sql", b"INSERT INTO t VALUES (1)");
        write(root, "04-reference-data/readme.md", b"notes");
        write(root, "30-extra/ignored.sql", b"SELECT 0");
        write(root, "docs/ignored.sql", b"SELECT 0");

        let loaded = ScriptRepository::new(root).load().unwrap();

        let listed: Vec<(u8, u32, String)> = loaded
            .scripts
            .iter()
            .map(|s| {
                (
                    s.phase.number(),
                    s.ordinal,
                    s.path.file_name().unwrap().to_string_lossy().into_owned(),
                )
            })
            .collect();
        assert_eq!(
            listed,
            vec![
                (4, 1, "seed.sql".to_string()),
                (15, 1, "2_first.SQL".to_string()),
                (15, 2, "10_later.sql".to_string()),
                (15, 3, "a_proc.sql".to_string()),
                (15, 4, "b_proc.sql".to_string()),
            ]
        );
        assert!(loaded.errors.is_empty());
        assert_eq!(loaded.phase(Phase::new(15).unwrap()).count(), 4);
    }

    #[test]
    fn test_non_utf8_file_is_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "01-tables/1_bad.sql", &[0xff, 0xfe, 0x00]);
        write(dir.path(), "01-tables/2_good.sql", b"CREATE TABLE t (id INT)");

        let loaded = ScriptRepository::new(dir.path()).load().unwrap();

        assert_eq!(loaded.scripts.len(), 1);
        assert_eq!(loaded.scripts[0].ordinal, 1);
        assert_eq!(loaded.errors.len(), 1);
        assert_eq!(loaded.errors[0].phase, Phase::new(1));
        assert!(loaded.errors[0].reason.contains("UTF-8"));
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScriptRepository::new(dir.path().join("missing")).load().unwrap_err();
        assert!(matches!(err, DeployError::RepositoryUnavailable { .. }));
    }
}
