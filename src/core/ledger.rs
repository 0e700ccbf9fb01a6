//! Result ledger with file-based persistence.
//!
//! Each event directory holds one JSON record per step plus one run record:
//!
//! ```text
//! <events_dir>/<event_id>/logs/<step>_result.json
//! <events_dir>/<event_id>/logs/workflow_state.json
//! ```
//!
//! Every write is a full replace via a temp file and `rename`, so a reader
//! never observes a half-written record.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::domain::{RunRecord, StepResult};

const LOGS_DIR: &str = "logs";
const RUN_RECORD_FILE: &str = "workflow_state.json";
const LEASE_FILE: &str = ".run.lock";

/// Errors raised by a ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Event directory not found: {}", .0.display())]
    EventDirMissing(PathBuf),

    #[error("Invalid name for a ledger record: {0:?}")]
    InvalidName(String),

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt record {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("A run is already in progress for event {0}")]
    Busy(String),
}

/// Exclusive claim on an event for the duration of a run.
///
/// Released when dropped.
#[derive(Debug, Default)]
pub struct RunLease {
    _lock: Option<std::fs::File>,
}

impl RunLease {
    /// A lease that guards nothing (for ledgers without cross-process locking)
    pub fn unguarded() -> Self {
        Self::default()
    }
}

/// Durable store of per-step results and per-run records
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Persist (replace) the result of one step
    async fn put_step_result(
        &self,
        event_id: &str,
        step: &str,
        result: &StepResult,
    ) -> Result<(), LedgerError>;

    /// Load the last recorded result of one step
    async fn get_step_result(
        &self,
        event_id: &str,
        step: &str,
    ) -> Result<Option<StepResult>, LedgerError>;

    /// Persist (replace) the run record
    async fn put_run_record(&self, event_id: &str, record: &RunRecord) -> Result<(), LedgerError>;

    /// Load the last run record
    async fn get_run_record(&self, event_id: &str) -> Result<Option<RunRecord>, LedgerError>;

    /// Claim the event against runs in other processes
    async fn acquire_lease(&self, _event_id: &str) -> Result<RunLease, LedgerError> {
        Ok(RunLease::unguarded())
    }
}

/// Ledger storing JSON records under each event's `logs/` directory
#[derive(Debug, Clone)]
pub struct FileLedger {
    events_dir: PathBuf,
}

impl FileLedger {
    pub fn new(events_dir: impl Into<PathBuf>) -> Self {
        Self {
            events_dir: events_dir.into(),
        }
    }

    /// Root directory holding one subdirectory per event
    pub fn events_dir(&self) -> &Path {
        &self.events_dir
    }

    /// Path of a step's result record.
    ///
    /// Step names are free-form; characters outside `[A-Za-z0-9_.~-]` are
    /// percent-encoded in the file name.
    pub fn step_result_path(&self, event_id: &str, step: &str) -> Result<PathBuf, LedgerError> {
        let stem = step_file_stem(step)?;
        Ok(self.logs_dir(event_id)?.join(format!("{}_result.json", stem)))
    }

    /// Path of the run record
    pub fn run_record_path(&self, event_id: &str) -> Result<PathBuf, LedgerError> {
        Ok(self.logs_dir(event_id)?.join(RUN_RECORD_FILE))
    }

    fn logs_dir(&self, event_id: &str) -> Result<PathBuf, LedgerError> {
        validate_event_id(event_id)?;
        Ok(self.events_dir.join(event_id).join(LOGS_DIR))
    }

    /// Ensure the event exists and its logs directory is present
    async fn prepare_logs_dir(&self, event_id: &str) -> Result<PathBuf, LedgerError> {
        validate_event_id(event_id)?;
        let event_dir = self.events_dir.join(event_id);
        if !fs::metadata(&event_dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(LedgerError::EventDirMissing(event_dir));
        }

        let logs_dir = self.logs_dir(event_id)?;
        fs::create_dir_all(&logs_dir)
            .await
            .map_err(|source| LedgerError::Write {
                path: logs_dir.clone(),
                source,
            })?;
        Ok(logs_dir)
    }
}

#[async_trait]
impl Ledger for FileLedger {
    async fn put_step_result(
        &self,
        event_id: &str,
        step: &str,
        result: &StepResult,
    ) -> Result<(), LedgerError> {
        let path = self.step_result_path(event_id, step)?;
        self.prepare_logs_dir(event_id).await?;
        write_atomic(&path, result).await?;
        debug!(event_id, step, status = %result.status, "Step result recorded");
        Ok(())
    }

    async fn get_step_result(
        &self,
        event_id: &str,
        step: &str,
    ) -> Result<Option<StepResult>, LedgerError> {
        let path = self.step_result_path(event_id, step)?;
        read_record(&path).await
    }

    async fn put_run_record(&self, event_id: &str, record: &RunRecord) -> Result<(), LedgerError> {
        let path = self.run_record_path(event_id)?;
        self.prepare_logs_dir(event_id).await?;
        write_atomic(&path, record).await?;
        debug!(event_id, status = %record.overall_status, "Run record written");
        Ok(())
    }

    async fn get_run_record(&self, event_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        let path = self.run_record_path(event_id)?;
        read_record(&path).await
    }

    async fn acquire_lease(&self, event_id: &str) -> Result<RunLease, LedgerError> {
        let logs_dir = self.prepare_logs_dir(event_id).await?;
        let path = logs_dir.join(LEASE_FILE);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|source| LedgerError::Write {
                path: path.clone(),
                source,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(RunLease { _lock: Some(file) }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(LedgerError::Busy(event_id.to_string()))
            }
            Err(source) => Err(LedgerError::Write { path, source }),
        }
    }
}

/// An event id names one directory directly under the events root
fn validate_event_id(event_id: &str) -> Result<(), LedgerError> {
    let ok = !event_id.is_empty()
        && event_id != "."
        && event_id != ".."
        && !event_id.contains(['/', '\\', '\0']);

    if ok {
        Ok(())
    } else {
        Err(LedgerError::InvalidName(event_id.to_string()))
    }
}

/// File stem for a step name: percent-encoded, never hidden, never empty
fn step_file_stem(step: &str) -> Result<String, LedgerError> {
    if step.is_empty() {
        return Err(LedgerError::InvalidName(step.to_string()));
    }

    let encoded = urlencoding::encode(step);
    Ok(match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded.into_owned(),
    })
}

async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), LedgerError> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");

    fs::write(&tmp_path, json)
        .await
        .map_err(|source| LedgerError::Write {
            path: tmp_path.clone(),
            source,
        })?;

    fs::rename(&tmp_path, path)
        .await
        .map_err(|source| LedgerError::Write {
            path: path.to_path_buf(),
            source,
        })
}

async fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, LedgerError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LedgerError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| LedgerError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}
