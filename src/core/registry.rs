//! Step registry: step name -> handler.
//!
//! Adding a step means registering a handler; the executor never changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::adapters::{
    ArchiveHandler, CommandHandler, PlaceholderHandler, ThumbnailComposeHandler, WhisperHandler,
};
use crate::config::ResolvedConfig;
use crate::domain::{EventConfig, StepResult};

/// Everything a handler gets to see about the run it is part of
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Event being processed
    pub event_id: String,

    /// Snapshot of the event configuration taken at run start
    pub event: EventConfig,

    /// Whether the run was forced
    pub force: bool,

    /// The event's working directory
    pub event_dir: PathBuf,
}

impl StepContext {
    /// Directory handlers write their products into
    pub fn output_dir(&self) -> PathBuf {
        self.event_dir.join("output")
    }

    pub fn event_dir(&self) -> &Path {
        &self.event_dir
    }
}

/// Executable logic bound to a step name.
///
/// Returning `Err` is a step fault: the executor records it as a failed
/// result and moves on to the next step.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Step name this handler is registered under
    fn name(&self) -> &str;

    /// Run the step for one event
    async fn run(&self, ctx: &StepContext) -> Result<StepResult>;
}

/// Lookup from step name to handler
#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in catalog, plus any commands from configuration.
    ///
    /// Configured commands override built-in handlers of the same name.
    pub fn builtin(config: &ResolvedConfig) -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(PlaceholderHandler::new(
            "thumbnail_ai",
            "AI thumbnail generated",
        )));
        registry.register(Arc::new(ThumbnailComposeHandler::new(config.assets_dir.clone())));
        registry.register(Arc::new(WhisperHandler::new(config.whisper.clone())));
        registry.register(Arc::new(PlaceholderHandler::new(
            "publish_youtube",
            "Published to YouTube",
        )));
        registry.register(Arc::new(PlaceholderHandler::new(
            "publish_website",
            "Published to website",
        )));
        registry.register(Arc::new(ArchiveHandler::new(config.archive_root.clone())));

        for (name, command) in &config.steps {
            registry.register(Arc::new(CommandHandler::new(
                name.clone(),
                command.program.clone(),
                command.args.clone(),
            )));
        }

        registry
    }

    /// Register a handler under its own name, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    /// Look up the handler for a step name
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered step names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.names())
            .finish()
    }
}
