//! mediarun - per-event media pipeline runner
//!
//! Runs the steps of a recorded event (a sermon, a service, a talk) through a
//! fixed media pipeline: thumbnails, subtitles, publishing, archiving.
//!
//! # Architecture
//!
//! Every step outcome is recorded in a per-event result ledger:
//! - Steps run in the order the event declares them
//! - A step that already succeeded is not run again unless forced
//! - A failing step never stops the steps after it
//! - Each run ends with a run record and an aggregate status
//!
//! # Modules
//!
//! - `adapters`: Built-in step handlers (whisper, archive, commands)
//! - `core`: Run orchestration (Executor, Ledger, Registry, Repository)
//! - `domain`: Data structures (EventConfig, StepResult, RunRecord)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Create an event and attach its recording
//! mediarun create --title "Grace Abounds" --speaker "Pastor Kim"
//! mediarun attach 2026-01-26_0900_grace-abounds service.mp4
//!
//! # Run it, then re-run only what failed
//! mediarun run 2026-01-26_0900_grace-abounds
//! mediarun run 2026-01-26_0900_grace-abounds
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{Executor, FileEventRepository, FileLedger, RunError, StepHandler, StepRegistry};
pub use domain::{EventConfig, RunRecord, RunStatus, StepResult, StepStatus};
