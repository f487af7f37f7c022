//! Durable per-instrument progress.
//!
//! The whole map is rewritten after every change through a temporary file and
//! a rename, so a crash leaves either the previous or the new version on disk,
//! never a truncated one. At most the in-flight instrument is lost.

use crate::HarvestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Pending,
    Done,
    Failed,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckpointStatus::Pending => "pending",
            CheckpointStatus::Done => "done",
            CheckpointStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub status: CheckpointStatus,
    pub last_attempt: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    entries: BTreeMap<String, CheckpointEntry>,
}

/// Shape written by the first generation of the tool: a flat list of finished ids
#[derive(Debug, Deserialize)]
struct LegacyCheckpoint {
    processed_instruments: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub pending: usize,
    pub done: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    entries: BTreeMap<String, CheckpointEntry>,
}

impl CheckpointStore {
    /// Empty store bound to `path`; nothing is read until `load`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// `new` followed by `load`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        let mut store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge the file's entries over what is in memory. A missing file means
    /// nothing has been done yet; an unreadable one is moved aside.
    pub fn load(&mut self) -> Result<(), HarvestError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No checkpoint yet, starting fresh");
                return Ok(());
            }
            Err(e) => {
                return Err(HarvestError::Checkpoint(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let loaded = match parse_checkpoint(&text) {
            Ok(entries) => entries,
            Err(reason) => {
                let aside = corrupt_path(&self.path);
                warn!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    "Checkpoint unreadable ({reason}); starting fresh"
                );
                std::fs::rename(&self.path, &aside).map_err(|e| {
                    HarvestError::Checkpoint(format!(
                        "cannot move corrupt checkpoint aside: {e}"
                    ))
                })?;
                return Ok(());
            }
        };

        let count = loaded.len();
        self.entries.extend(loaded);
        let summary = self.summary();
        info!(
            loaded = count,
            done = summary.done,
            failed = summary.failed,
            "Checkpoint loaded"
        );
        Ok(())
    }

    /// Persist the whole map atomically.
    pub fn flush(&self) -> Result<(), HarvestError> {
        let err = |what: &str, e: &dyn fmt::Display| {
            HarvestError::Checkpoint(format!("{what} {}: {e}", self.path.display()))
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| err("cannot create directory for", &e))?;

        let file = CheckpointFile {
            version: FORMAT_VERSION,
            entries: self.entries.clone(),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| err("cannot create temp file for", &e))?;
        serde_json::to_writer_pretty(&mut tmp, &file).map_err(|e| err("cannot encode", &e))?;
        tmp.write_all(b"\n").map_err(|e| err("cannot write", &e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| err("cannot sync", &e))?;
        tmp.persist(&self.path)
            .map_err(|e| err("cannot replace", &e.error))?;

        debug!(entries = self.entries.len(), "Checkpoint flushed");
        Ok(())
    }

    pub fn is_done(&self, identifier: &str) -> bool {
        self.entries
            .get(identifier)
            .is_some_and(|e| e.status == CheckpointStatus::Done)
    }

    pub fn get(&self, identifier: &str) -> Option<&CheckpointEntry> {
        self.entries.get(identifier)
    }

    /// Record the outcome of one processing attempt and persist immediately.
    /// The latest call for an identifier wins.
    pub fn record_attempt(
        &mut self,
        identifier: &str,
        status: CheckpointStatus,
        detail: Option<String>,
    ) -> Result<(), HarvestError> {
        self.insert(identifier, status, detail);
        self.flush()
    }

    /// Record several outcomes with a single write. Either all of them reach
    /// the file or the error is returned.
    pub fn record_batch<I>(&mut self, outcomes: I) -> Result<(), HarvestError>
    where
        I: IntoIterator<Item = (String, CheckpointStatus, Option<String>)>,
    {
        let mut changed = false;
        for (identifier, status, detail) in outcomes {
            self.insert(&identifier, status, detail);
            changed = true;
        }
        if changed {
            self.flush()?;
        }
        Ok(())
    }

    fn insert(&mut self, identifier: &str, status: CheckpointStatus, detail: Option<String>) {
        let attempts = self.entries.get(identifier).map_or(0, |e| e.attempts) + 1;
        self.entries.insert(
            identifier.to_string(),
            CheckpointEntry {
                status,
                last_attempt: Utc::now(),
                detail,
                attempts,
            },
        );
    }

    /// Drop entries so the identifiers are processed again. Returns how many existed.
    pub fn forget<S: AsRef<str>>(&mut self, identifiers: &[S]) -> Result<usize, HarvestError> {
        let mut removed = 0;
        for id in identifiers {
            let key: &str = id.as_ref();
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.flush()?;
        }
        Ok(removed)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &CheckpointEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &CheckpointEntry)> {
        self.entries()
            .filter(|(_, e)| e.status == CheckpointStatus::Failed)
    }

    pub fn summary(&self) -> CheckpointSummary {
        let mut summary = CheckpointSummary::default();
        for entry in self.entries.values() {
            match entry.status {
                CheckpointStatus::Pending => summary.pending += 1,
                CheckpointStatus::Done => summary.done += 1,
                CheckpointStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_checkpoint(text: &str) -> Result<BTreeMap<String, CheckpointEntry>, String> {
    if text.trim().is_empty() {
        return Err("file is empty".to_string());
    }
    let err = match serde_json::from_str::<CheckpointFile>(text) {
        Ok(file) => return Ok(file.entries),
        Err(e) => e,
    };
    let legacy: LegacyCheckpoint = serde_json::from_str(text).map_err(|_| err.to_string())?;
    info!(
        count = legacy.processed_instruments.len(),
        "Importing legacy checkpoint list as done"
    );
    let now = Utc::now();
    Ok(legacy
        .processed_instruments
        .into_iter()
        .map(|id| {
            (
                id,
                CheckpointEntry {
                    status: CheckpointStatus::Done,
                    last_attempt: now,
                    detail: None,
                    attempts: 1,
                },
            )
        })
        .collect())
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}
