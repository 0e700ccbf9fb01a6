//! Reuse of prior step results.
//!
//! A successful result is memoized per (event, step). `force` invalidates it.

use crate::domain::StepResult;

/// Return the prior result if it may stand in for executing the step again.
///
/// Only a `success` result is reusable, and never when `force` is set.
/// Failed and skipped results always re-enter execution.
pub fn reuse_prior(prior: Option<StepResult>, force: bool) -> Option<StepResult> {
    if force {
        return None;
    }
    prior.filter(StepResult::is_success)
}
