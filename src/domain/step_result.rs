//! Per-step outcomes recorded in the result ledger.
//!
//! Only terminal statuses exist here: a step is never persisted as "running".

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Handler completed its work
    Success,

    /// Handler reported failure or faulted
    Failed,

    /// No handler is registered for the step name
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// The recorded outcome of one (event, step) pair.
///
/// Written once per execution; a later run replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Terminal status
    pub status: StepStatus,

    /// Human-readable summary
    #[serde(default)]
    pub message: String,

    /// Error detail if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Handler-specific output references (paths, URLs, ids)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, serde_json::Value>,

    /// When the step finished
    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    fn new(status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error: None,
            outputs: BTreeMap::new(),
            completed_at: Utc::now(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(StepStatus::Success, message)
    }

    /// A failed result whose error detail is `error`
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(StepStatus::Failed, format!("Step failed: {}", error)).with_error(error)
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::new(StepStatus::Skipped, message)
    }

    /// Attach an output reference
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    /// Attach error detail
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}
