//! Core run orchestration.
//!
//! This module contains:
//! - Ledger: durable per-step results and run records
//! - Registry: step name -> handler lookup
//! - Repository: event configuration source
//! - Executor: the run loop
//! - Aggregate / memo: pure status and skip policies

pub mod aggregate;
pub mod executor;
pub mod ledger;
pub mod memo;
pub mod registry;
pub mod repository;

// Re-export commonly used types
pub use aggregate::aggregate;
pub use executor::{Executor, RunError};
pub use ledger::{FileLedger, Ledger, LedgerError, RunLease};
pub use memo::reuse_prior;
pub use registry::{StepContext, StepHandler, StepRegistry};
pub use repository::{EventRepository, FileEventRepository, NewEvent};
