//! Run executor.
//!
//! Runs an event's enabled steps one after another, in declared order,
//! reusing prior successes, isolating handler faults, and recording every
//! outcome in the ledger as it happens.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use thiserror::Error;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, instrument, warn, Dispatch};
use uuid::Uuid;

use crate::domain::{OrderedMap, RunRecord, StepResult, StepStatus};

use super::aggregate::aggregate;
use super::ledger::{Ledger, LedgerError};
use super::memo::reuse_prior;
use super::registry::{StepContext, StepRegistry};
use super::repository::EventRepository;

/// Structural failures of a run.
///
/// Step failures are not errors: they are recorded in the returned
/// [`RunRecord`] and reflected in its overall status.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Failed to load event {event_id}: {source:#}")]
    Repository {
        event_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to persist results for event {event_id}{}: {source}", .step.as_ref().map(|s| format!(" (step '{}')", s)).unwrap_or_default())]
    Persistence {
        event_id: String,
        step: Option<String>,
        #[source]
        source: LedgerError,
    },

    #[error("A run is already in progress for event {0}")]
    Busy(String),
}

impl RunError {
    fn persistence(event_id: &str, step: Option<&str>, source: LedgerError) -> Self {
        match source {
            LedgerError::Busy(id) => Self::Busy(id),
            source => Self::Persistence {
                event_id: event_id.to_string(),
                step: step.map(str::to_string),
                source,
            },
        }
    }
}

/// Main run executor
pub struct Executor {
    repository: Arc<dyn EventRepository>,
    ledger: Arc<dyn Ledger>,
    registry: StepRegistry,

    /// Log sink for runs; the ambient subscriber when `None`
    dispatch: Option<Dispatch>,

    /// One async mutex per event id, serializing runs of the same event.
    /// Entries live only while some run holds or awaits them.
    event_locks: EventLocks,
}

type EventLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Shared handle on one event's mutex; removes the map entry when the last
/// handle goes away
struct EventLock<'a> {
    locks: &'a EventLocks,
    event_id: String,
    mutex: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for EventLock<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Handles are only cloned under the map lock, so the count is stable here
        if Arc::strong_count(&self.mutex) == 2 {
            locks.remove(&self.event_id);
        }
    }
}

impl Executor {
    /// Create an executor over a repository, a ledger and a registry
    pub fn new(
        repository: Arc<dyn EventRepository>,
        ledger: Arc<dyn Ledger>,
        registry: StepRegistry,
    ) -> Self {
        Self {
            repository,
            ledger,
            registry,
            dispatch: None,
            event_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Send this executor's logs to `dispatch` instead of the global subscriber
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Run every enabled step of an event and record the outcome.
    ///
    /// Without `force`, steps whose last recorded result is `success` are not
    /// executed again; their prior result is reused as-is. A returned record
    /// does not mean every step succeeded: check `overall_status`.
    pub async fn run_event(&self, event_id: &str, force: bool) -> Result<RunRecord, RunError> {
        match &self.dispatch {
            Some(dispatch) => {
                self.run_serialized(event_id, force)
                    .with_subscriber(dispatch.clone())
                    .await
            }
            None => self.run_serialized(event_id, force).await,
        }
    }

    /// Last run record of an event
    pub async fn status(&self, event_id: &str) -> Result<Option<RunRecord>, RunError> {
        self.ledger
            .get_run_record(event_id)
            .await
            .map_err(|e| RunError::persistence(event_id, None, e))
    }

    async fn run_serialized(&self, event_id: &str, force: bool) -> Result<RunRecord, RunError> {
        let lock = self.event_lock(event_id);
        let _guard = lock.mutex.lock().await;
        self.run_locked(event_id, force).await
    }

    fn event_lock(&self, event_id: &str) -> EventLock<'_> {
        let mut locks = self
            .event_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mutex = locks.entry(event_id.to_string()).or_default().clone();
        EventLock {
            locks: &self.event_locks,
            event_id: event_id.to_string(),
            mutex,
        }
    }

    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    async fn run_locked(&self, event_id: &str, force: bool) -> Result<RunRecord, RunError> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let event = self
            .repository
            .load(event_id)
            .await
            .map_err(|source| RunError::Repository {
                event_id: event_id.to_string(),
                source,
            })?
            .ok_or_else(|| RunError::EventNotFound(event_id.to_string()))?;

        let _lease = self
            .ledger
            .acquire_lease(event_id)
            .await
            .map_err(|e| RunError::persistence(event_id, None, e))?;

        let steps = event.enabled_steps();
        info!(steps = ?steps, "Starting run");

        let ctx = StepContext {
            event_id: event_id.to_string(),
            event,
            force,
            event_dir: self.repository.event_dir(event_id),
        };

        let started_at = Utc::now();
        let mut results: OrderedMap<StepResult> = OrderedMap::new();

        for step in &steps {
            if let Some(prior) = self.reusable_result(event_id, step, force).await? {
                info!(step = %step, "Step already succeeded, skipping");
                results.insert(step.clone(), prior);
                continue;
            }

            let result = self.execute_step(&ctx, step).await;

            self.ledger
                .put_step_result(event_id, step, &result)
                .await
                .map_err(|e| {
                    error!(step = %step, error = %e, "Failed to record step result, aborting run");
                    RunError::persistence(event_id, Some(step.as_str()), e)
                })?;

            results.insert(step.clone(), result);
        }

        let overall_status = aggregate(&results);
        let record = RunRecord {
            run_id,
            event_id: event_id.to_string(),
            forced: force,
            started_at,
            completed_at: Utc::now(),
            steps: results,
            overall_status,
        };

        self.ledger
            .put_run_record(event_id, &record)
            .await
            .map_err(|e| RunError::persistence(event_id, None, e))?;

        info!(
            status = %record.overall_status,
            succeeded = record.count(StepStatus::Success),
            failed = record.count(StepStatus::Failed),
            skipped = record.count(StepStatus::Skipped),
            "Run completed"
        );

        Ok(record)
    }

    /// Prior result that stands in for running the step, if any
    async fn reusable_result(
        &self,
        event_id: &str,
        step: &str,
        force: bool,
    ) -> Result<Option<StepResult>, RunError> {
        if force {
            return Ok(None);
        }

        let prior = match self.ledger.get_step_result(event_id, step).await {
            Ok(prior) => prior,
            Err(LedgerError::Corrupt { path, source }) => {
                warn!(step, path = %path.display(), error = %source, "Ignoring unreadable step result");
                None
            }
            Err(e) => return Err(RunError::persistence(event_id, Some(step), e)),
        };

        Ok(reuse_prior(prior, force))
    }

    /// Resolve and invoke the step's handler, converting every fault into a
    /// failed result.
    ///
    /// The handler runs inside this future, so cancelling a run stops the
    /// handler before the event lock and lease are released.
    async fn execute_step(&self, ctx: &StepContext, step: &str) -> StepResult {
        let Some(handler) = self.registry.resolve(step) else {
            warn!(step, "No handler registered for step");
            return StepResult::skipped(format!("Unknown step: {}", step));
        };

        info!(step, "Running step");
        let step_start = Instant::now();

        let result = match AssertUnwindSafe(handler.run(ctx)).catch_unwind().await {
            Ok(Ok(result)) if result.status == StepStatus::Skipped => {
                StepResult::failed(format!(
                    "Handler for '{}' returned a non-terminal 'skipped' status",
                    step
                ))
            }
            Ok(Ok(result)) => result,
            Ok(Err(e)) => StepResult::failed(format!("{:#}", e)),
            Err(payload) => StepResult::failed(panic_message(payload)),
        };

        let duration_ms = step_start.elapsed().as_millis() as u64;
        match result.status {
            StepStatus::Success => info!(step, duration_ms, "Step completed"),
            _ => error!(
                step,
                duration_ms,
                error = result.error.as_deref().unwrap_or(""),
                "Step failed"
            ),
        }

        result
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("Handler panicked: {}", detail)
}
