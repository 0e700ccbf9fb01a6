//! Handlers for steps whose integration is not wired up yet.
//!
//! They succeed with a fixed message so an event's run can be exercised end
//! to end. Configure a command under `steps:` to replace one.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::core::{StepContext, StepHandler};
use crate::domain::StepResult;

pub struct PlaceholderHandler {
    name: String,
    message: String,
}

impl PlaceholderHandler {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl StepHandler for PlaceholderHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        info!(event_id = %ctx.event_id, step = %self.name, "Placeholder step");
        Ok(StepResult::success(self.message.clone()).with_output("placeholder", true))
    }
}
