//! Steps backed by an external command from configuration.
//!
//! Arguments may reference `{event_id}`, `{event_dir}`, `{output_dir}` and
//! `{force}`; these are substituted before the process is spawned. The event
//! id is also exported as `MEDIARUN_EVENT_ID`.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::tail;
use crate::core::{StepContext, StepHandler};
use crate::domain::StepResult;

/// Characters of stdout/stderr kept in a result
const OUTPUT_TAIL: usize = 2000;

pub struct CommandHandler {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandHandler {
    pub fn new(name: String, program: String, args: Vec<String>) -> Self {
        Self {
            name,
            program,
            args,
        }
    }

    fn expand_args(&self, ctx: &StepContext) -> Vec<String> {
        let event_dir = ctx.event_dir().display().to_string();
        let output_dir = ctx.output_dir().display().to_string();
        let force = ctx.force.to_string();

        self.args
            .iter()
            .map(|arg| {
                arg.replace("{event_id}", &ctx.event_id)
                    .replace("{event_dir}", &event_dir)
                    .replace("{output_dir}", &output_dir)
                    .replace("{force}", &force)
            })
            .collect()
    }
}

#[async_trait]
impl StepHandler for CommandHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        let args = self.expand_args(ctx);
        debug!(step = %self.name, program = %self.program, ?args, "Spawning step command");

        let output = Command::new(&self.program)
            .args(&args)
            .env("MEDIARUN_EVENT_ID", &ctx.event_id)
            .current_dir(ctx.event_dir())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn '{}' for step '{}'", self.program, self.name))?;

        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(StepResult::failed(format!(
                "'{}' exited with code {}: {}",
                self.program,
                exit_code,
                tail(&stderr, OUTPUT_TAIL)
            ))
            .with_output("exit_code", exit_code));
        }

        info!(step = %self.name, exit_code, "Step command finished");

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(StepResult::success(format!("{} completed", self.name))
            .with_output("exit_code", exit_code)
            .with_output("stdout", tail(&stdout, OUTPUT_TAIL)))
    }
}
