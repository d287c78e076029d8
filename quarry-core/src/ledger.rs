//! Checkpoint ledger: per-instrument last-ingested date, persisted across runs.
//!
//! Each instrument key is in one of two states: `Unseen` (never ingested) or
//! `Checked(date)`. A checkpoint only moves forward. The file-backed ledger
//! rewrites its whole JSON file (temp file + rename) on every advance, so a
//! crash mid-run leaves it consistent with the instruments processed so far.
//!
//! File format: `{"group/instrument": "YYYY-MM-DD" | null, ...}`.

use crate::domain::InstrumentKey;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Ingestion state of one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Checkpoint {
    Unseen,
    Checked(NaiveDate),
}

impl Checkpoint {
    /// Due unless the stored date lies strictly after `today`.
    pub fn is_due(&self, today: NaiveDate) -> bool {
        match self {
            Checkpoint::Unseen => true,
            Checkpoint::Checked(date) => today >= *date,
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Checkpoint::Unseen => None,
            Checkpoint::Checked(date) => Some(*date),
        }
    }
}

impl From<Option<NaiveDate>> for Checkpoint {
    fn from(value: Option<NaiveDate>) -> Self {
        value.map_or(Checkpoint::Unseen, Checkpoint::Checked)
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("checkpoint file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("checkpoint I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checkpoint for {key} cannot move back from {current} to {attempted}")]
    Regression {
        key: InstrumentKey,
        current: NaiveDate,
        attempted: NaiveDate,
    },

    #[error("checkpoint serialization: {0}")]
    Serialize(String),
}

/// Read/advance contract shared by every ledger implementation.
pub trait CheckpointLedger: Send {
    /// State of `key`. Keys the ledger has never heard of are `Unseen`.
    fn checkpoint(&self, key: &InstrumentKey) -> Checkpoint;

    /// Move `key` to `Checked(date)` and make the change durable.
    fn advance(&mut self, key: &InstrumentKey, date: NaiveDate) -> Result<(), LedgerError>;

    /// All entries in key order.
    fn entries(&self) -> Vec<(InstrumentKey, Checkpoint)>;

    fn is_due(&self, key: &InstrumentKey, today: NaiveDate) -> bool {
        self.checkpoint(key).is_due(today)
    }
}

type Entries = BTreeMap<InstrumentKey, Option<NaiveDate>>;

/// Add every universe key not yet present as `Unseen`. Existing entries are
/// never touched or removed. Returns how many keys were added.
fn extend_with_universe(entries: &mut Entries, universe: &[InstrumentKey]) -> usize {
    let mut added = 0;
    for key in universe {
        if !entries.contains_key(key) {
            entries.insert(key.clone(), None);
            added += 1;
        }
    }
    added
}

fn checked_advance(
    entries: &mut Entries,
    key: &InstrumentKey,
    date: NaiveDate,
) -> Result<(), LedgerError> {
    if let Some(Some(current)) = entries.get(key) {
        if date < *current {
            return Err(LedgerError::Regression {
                key: key.clone(),
                current: *current,
                attempted: date,
            });
        }
    }
    entries.insert(key.clone(), Some(date));
    Ok(())
}

/// JSON-file ledger.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    entries: Entries,
}

impl FileLedger {
    /// Ledger location for an engine identity: `{dir}/{identity}.checkpoint`.
    pub fn path_for(dir: &Path, identity: &str) -> PathBuf {
        dir.join(format!("{identity}.checkpoint"))
    }

    /// Load the ledger at `path` and extend it with `universe`.
    ///
    /// A missing file is a fresh start. A file that exists but cannot be read
    /// or parsed is an error: checkpoint history is never silently reset.
    pub fn load(path: impl Into<PathBuf>, universe: &[InstrumentKey]) -> Result<Self, LedgerError> {
        let path = path.into();
        let mut entries = match fs::read_to_string(&path) {
            Ok(content) => {
                serde_json::from_str::<Entries>(&content).map_err(|e| LedgerError::Corrupt {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no checkpoint file, starting empty");
                Entries::new()
            }
            Err(e) => {
                return Err(LedgerError::Corrupt {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        let added = extend_with_universe(&mut entries, universe);
        if added > 0 {
            info!(path = %path.display(), added, "extended checkpoint ledger with new instruments");
        }

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the whole file atomically.
    fn persist(&self) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| LedgerError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| LedgerError::Serialize(e.to_string()))?;

        let tmp_path = self.path.with_extension("checkpoint.tmp");
        fs::write(&tmp_path, json).map_err(|e| LedgerError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            LedgerError::Io {
                path: self.path.clone(),
                source: e,
            }
        })
    }
}

impl CheckpointLedger for FileLedger {
    fn checkpoint(&self, key: &InstrumentKey) -> Checkpoint {
        self.entries.get(key).copied().flatten().into()
    }

    fn advance(&mut self, key: &InstrumentKey, date: NaiveDate) -> Result<(), LedgerError> {
        let previous = self.entries.get(key).copied();
        checked_advance(&mut self.entries, key, date)?;
        if let Err(e) = self.persist() {
            // keep memory in step with disk
            match previous {
                Some(value) => self.entries.insert(key.clone(), value),
                None => self.entries.remove(key),
            };
            return Err(e);
        }
        debug!(%key, %date, "checkpoint advanced");
        Ok(())
    }

    fn entries(&self) -> Vec<(InstrumentKey, Checkpoint)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), Checkpoint::from(*v)))
            .collect()
    }
}

/// Non-persistent ledger for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    entries: Entries,
}

impl MemoryLedger {
    pub fn new(universe: &[InstrumentKey]) -> Self {
        let mut entries = Entries::new();
        extend_with_universe(&mut entries, universe);
        Self { entries }
    }

    pub fn with_checkpoint(mut self, key: InstrumentKey, date: NaiveDate) -> Self {
        self.entries.insert(key, Some(date));
        self
    }
}

impl CheckpointLedger for MemoryLedger {
    fn checkpoint(&self, key: &InstrumentKey) -> Checkpoint {
        self.entries.get(key).copied().flatten().into()
    }

    fn advance(&mut self, key: &InstrumentKey, date: NaiveDate) -> Result<(), LedgerError> {
        checked_advance(&mut self.entries, key, date)
    }

    fn entries(&self) -> Vec<(InstrumentKey, Checkpoint)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), Checkpoint::from(*v)))
            .collect()
    }
}
