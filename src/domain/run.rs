//! Run records.
//!
//! A RunRecord is the aggregate outcome of one pass over an event's enabled
//! steps. It is written once, at the end of the run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ordered::OrderedMap;
use super::step_result::{StepResult, StepStatus};

/// Aggregate status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step succeeded
    Success,

    /// At least one step succeeded, at least one did not
    Partial,

    /// No step succeeded (or there were no steps)
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One completed run of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique identifier for this run
    pub run_id: Uuid,

    /// The event that was run
    pub event_id: String,

    /// Whether the idempotent skip was disabled
    #[serde(default)]
    pub forced: bool,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished
    pub completed_at: DateTime<Utc>,

    /// Step results in execution order
    #[serde(rename = "module_results")]
    pub steps: OrderedMap<StepResult>,

    /// Aggregate over `steps`
    pub overall_status: RunStatus,
}

impl RunRecord {
    /// Result for a single step, if it ran in this run
    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.get(name)
    }

    /// Number of steps with the given status
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.values().filter(|r| r.status == status).count()
    }
}
