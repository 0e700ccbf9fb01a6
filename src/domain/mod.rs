//! Domain types for mediarun.
//!
//! This module contains the core data structures:
//! - Event: per-session configuration (enabled steps, metadata)
//! - StepResult: the recorded outcome of one step
//! - RunRecord: the aggregate outcome of one run

pub mod event;
pub mod ordered;
pub mod run;
pub mod step_result;

// Re-export commonly used types
pub use event::{EventConfig, EventInputs, STEP_CATALOG};
pub use ordered::OrderedMap;
pub use run::{RunRecord, RunStatus};
pub use step_result::{StepResult, StepStatus};
