//! Aggregate status of a run.

use crate::domain::{OrderedMap, RunStatus, StepResult, StepStatus};

/// Derive the overall run status from this run's step results.
///
/// An empty set is `Failed`: a run that did nothing did not succeed.
/// `Skipped` never counts as success.
pub fn aggregate(results: &OrderedMap<StepResult>) -> RunStatus {
    if results.is_empty() {
        return RunStatus::Failed;
    }

    let successes = results
        .values()
        .filter(|r| r.status == StepStatus::Success)
        .count();

    if successes == results.len() {
        RunStatus::Success
    } else if successes > 0 {
        RunStatus::Partial
    } else {
        RunStatus::Failed
    }
}
