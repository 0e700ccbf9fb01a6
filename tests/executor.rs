//! Executor Integration Tests
//!
//! Runs events end to end against a real file ledger and repository, with
//! scripted handlers standing in for the media tools.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use mediarun::core::{
    Executor, FileEventRepository, FileLedger, Ledger, LedgerError, RunError, RunLease,
    StepContext, StepHandler, StepRegistry,
};
use mediarun::domain::{EventConfig, RunRecord, RunStatus, StepResult, StepStatus};
use tempfile::TempDir;

const EVENT: &str = "2026-01-26_0900_sunday-service";

/// What a scripted handler does when invoked
#[derive(Clone, Copy)]
enum Outcome {
    Succeed,
    Fail,
    Error,
    Panic,
    ReturnSkipped,
}

/// Handler that logs its invocations into a shared journal
struct ScriptedHandler {
    name: String,
    outcome: Outcome,
    journal: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl StepHandler for ScriptedHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        self.journal.lock().unwrap().push(self.name.clone());
        assert_eq!(ctx.event_id, EVENT);

        match self.outcome {
            Outcome::Succeed => Ok(StepResult::success(format!("{} done", self.name))),
            Outcome::Fail => Ok(StepResult::failed(format!("{} could not finish", self.name))),
            Outcome::Error => anyhow::bail!("{} lost its connection", self.name),
            Outcome::Panic => panic!("{} blew up", self.name),
            Outcome::ReturnSkipped => Ok(StepResult::skipped("nothing to do")),
        }
    }
}

struct Harness {
    temp: TempDir,
    journal: Arc<Mutex<Vec<String>>>,
    registry: StepRegistry,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("events")).unwrap();
        Self {
            temp,
            journal: Arc::new(Mutex::new(Vec::new())),
            registry: StepRegistry::new(),
        }
    }

    fn events_dir(&self) -> std::path::PathBuf {
        self.temp.path().join("events")
    }

    fn handler(mut self, name: &str, outcome: Outcome) -> Self {
        self.registry.register(Arc::new(ScriptedHandler {
            name: name.to_string(),
            outcome,
            journal: self.journal.clone(),
        }));
        self
    }

    /// Write an event whose modules are `steps`, in that order
    fn event(self, steps: &[(&str, bool)]) -> Self {
        let dir = self.events_dir().join(EVENT);
        std::fs::create_dir_all(&dir).unwrap();

        let mut event = EventConfig::new(EVENT, "Sunday Service", "Pastor Kim");
        event.modules = steps.iter().copied().collect();
        std::fs::write(dir.join("event.yaml"), serde_yaml::to_string(&event).unwrap()).unwrap();
        self
    }

    fn executor(&self) -> Executor {
        self.executor_with(Arc::new(FileLedger::new(self.events_dir())))
    }

    fn executor_with(&self, ledger: Arc<dyn Ledger>) -> Executor {
        Executor::new(
            Arc::new(FileEventRepository::new(self.events_dir())),
            ledger,
            self.registry.clone(),
        )
    }

    fn calls(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn clear_calls(&self) {
        self.journal.lock().unwrap().clear();
    }

    fn logs_dir(&self) -> std::path::PathBuf {
        self.events_dir().join(EVENT).join("logs")
    }
}

fn step_names(record: &RunRecord) -> Vec<&str> {
    record.steps.keys().collect()
}

#[tokio::test]
async fn test_runs_enabled_steps_in_declared_order() {
    let harness = Harness::new()
        .handler("subtitles", Outcome::Succeed)
        .handler("thumbnail_ai", Outcome::Succeed)
        .handler("archive", Outcome::Succeed)
        .event(&[("subtitles", true), ("thumbnail_ai", false), ("archive", true)]);

    let record = harness.executor().run_event(EVENT, false).await.unwrap();

    assert_eq!(harness.calls(), vec!["subtitles", "archive"]);
    assert_eq!(step_names(&record), vec!["subtitles", "archive"]);
    assert_eq!(record.overall_status, RunStatus::Success);
    assert!(!record.forced);

    // Every executed step and the run record are on disk
    assert!(harness.logs_dir().join("subtitles_result.json").is_file());
    assert!(harness.logs_dir().join("archive_result.json").is_file());
    assert!(!harness.logs_dir().join("thumbnail_ai_result.json").exists());

    let stored = harness.executor().status(EVENT).await.unwrap().unwrap();
    assert_eq!(stored, record);
    assert_eq!(step_names(&stored), vec!["subtitles", "archive"]);
}

#[tokio::test]
async fn test_declared_order_is_not_alphabetical() {
    let harness = Harness::new()
        .handler("zeta", Outcome::Succeed)
        .handler("alpha", Outcome::Succeed)
        .handler("mid", Outcome::Succeed)
        .event(&[("zeta", true), ("alpha", true), ("mid", true)]);

    let record = harness.executor().run_event(EVENT, false).await.unwrap();

    assert_eq!(harness.calls(), vec!["zeta", "alpha", "mid"]);
    assert_eq!(step_names(&record), vec!["zeta", "alpha", "mid"]);
}

#[tokio::test]
async fn test_second_run_reuses_successes_and_retries_failures() {
    let harness = Harness::new()
        .handler("subtitles", Outcome::Succeed)
        .handler("publish_youtube", Outcome::Fail)
        .event(&[("subtitles", true), ("publish_youtube", true)]);
    let executor = harness.executor();

    let first = executor.run_event(EVENT, false).await.unwrap();
    assert_eq!(first.overall_status, RunStatus::Partial);

    let success_path = harness.logs_dir().join("subtitles_result.json");
    let before = std::fs::read(&success_path).unwrap();
    harness.clear_calls();

    let second = executor.run_event(EVENT, false).await.unwrap();

    assert_eq!(harness.calls(), vec!["publish_youtube"]);
    assert_eq!(second.step("subtitles"), first.step("subtitles"));
    assert_eq!(second.overall_status, RunStatus::Partial);
    assert_ne!(second.run_id, first.run_id);

    // A reused success is not rewritten
    assert_eq!(std::fs::read(&success_path).unwrap(), before);
}

#[tokio::test]
async fn test_all_successful_rerun_executes_nothing() {
    let harness = Harness::new()
        .handler("subtitles", Outcome::Succeed)
        .handler("archive", Outcome::Succeed)
        .event(&[("subtitles", true), ("archive", true)]);
    let executor = harness.executor();

    let first = executor.run_event(EVENT, false).await.unwrap();
    harness.clear_calls();

    let second = executor.run_event(EVENT, false).await.unwrap();

    assert!(harness.calls().is_empty());
    assert_eq!(second.steps, first.steps);
    assert_eq!(second.overall_status, RunStatus::Success);
}

#[tokio::test]
async fn test_force_reexecutes_everything() {
    let harness = Harness::new()
        .handler("subtitles", Outcome::Succeed)
        .handler("archive", Outcome::Succeed)
        .event(&[("subtitles", true), ("archive", true)]);
    let executor = harness.executor();

    let first = executor.run_event(EVENT, false).await.unwrap();
    harness.clear_calls();

    let forced = executor.run_event(EVENT, true).await.unwrap();

    assert_eq!(harness.calls(), vec!["subtitles", "archive"]);
    assert!(forced.forced);
    assert!(forced.step("subtitles").unwrap().completed_at >= first.step("subtitles").unwrap().completed_at);
}

#[tokio::test]
async fn test_unknown_step_is_skipped_and_run_continues() {
    let harness = Harness::new()
        .handler("subtitles", Outcome::Succeed)
        .event(&[("transcode_4k", true), ("subtitles", true)]);

    let record = harness.executor().run_event(EVENT, false).await.unwrap();

    let unknown = record.step("transcode_4k").unwrap();
    assert_eq!(unknown.status, StepStatus::Skipped);
    assert_eq!(unknown.message, "Unknown step: transcode_4k");
    assert_eq!(harness.calls(), vec!["subtitles"]);
    assert_eq!(record.overall_status, RunStatus::Partial);

    // Skips are recorded too
    assert!(harness.logs_dir().join("transcode_4k_result.json").is_file());
}

#[tokio::test]
async fn test_step_names_with_spaces_are_recorded() {
    let harness = Harness::new()
        .handler("archive", Outcome::Succeed)
        .event(&[("Thumbnail AI", true), ("archive", true)]);

    let record = harness.executor().run_event(EVENT, false).await.unwrap();

    let unknown = record.step("Thumbnail AI").unwrap();
    assert_eq!(unknown.status, StepStatus::Skipped);
    assert_eq!(unknown.message, "Unknown step: Thumbnail AI");
    assert_eq!(record.step("archive").unwrap().status, StepStatus::Success);
    assert_eq!(harness.calls(), vec!["archive"]);
    assert_eq!(record.overall_status, RunStatus::Partial);

    assert!(harness.logs_dir().join("Thumbnail%20AI_result.json").is_file());
    let ledger = FileLedger::new(harness.events_dir());
    let stored = ledger.get_step_result(EVENT, "Thumbnail AI").await.unwrap().unwrap();
    assert_eq!(stored.status, StepStatus::Skipped);
}

#[tokio::test]
async fn test_handler_faults_are_isolated() {
    let harness = Harness::new()
        .handler("thumbnail_ai", Outcome::Error)
        .handler("subtitles", Outcome::Panic)
        .handler("publish_website", Outcome::ReturnSkipped)
        .handler("archive", Outcome::Succeed)
        .event(&[
            ("thumbnail_ai", true),
            ("subtitles", true),
            ("publish_website", true),
            ("archive", true),
        ]);

    let record = harness.executor().run_event(EVENT, false).await.unwrap();

    assert_eq!(
        harness.calls(),
        vec!["thumbnail_ai", "subtitles", "publish_website", "archive"]
    );

    let errored = record.step("thumbnail_ai").unwrap();
    assert_eq!(errored.status, StepStatus::Failed);
    assert!(errored.error.as_deref().unwrap().contains("lost its connection"));

    let panicked = record.step("subtitles").unwrap();
    assert_eq!(panicked.status, StepStatus::Failed);
    assert!(panicked.error.as_deref().unwrap().contains("subtitles blew up"));

    let skipped = record.step("publish_website").unwrap();
    assert_eq!(skipped.status, StepStatus::Failed);

    assert_eq!(record.step("archive").unwrap().status, StepStatus::Success);
    assert_eq!(record.overall_status, RunStatus::Partial);
}

#[tokio::test]
async fn test_all_failures_is_failed() {
    let harness = Harness::new()
        .handler("subtitles", Outcome::Fail)
        .event(&[("subtitles", true), ("not_registered", true)]);

    let record = harness.executor().run_event(EVENT, false).await.unwrap();

    assert_eq!(record.overall_status, RunStatus::Failed);
    assert_eq!(record.count(StepStatus::Failed), 1);
    assert_eq!(record.count(StepStatus::Skipped), 1);
}

#[tokio::test]
async fn test_no_enabled_steps_is_failed() {
    let harness = Harness::new()
        .handler("subtitles", Outcome::Succeed)
        .event(&[("subtitles", false)]);

    let record = harness.executor().run_event(EVENT, false).await.unwrap();

    assert!(record.steps.is_empty());
    assert_eq!(record.overall_status, RunStatus::Failed);
    assert!(harness.calls().is_empty());
    assert!(harness.logs_dir().join("workflow_state.json").is_file());
}

/// Ledger wrapper that counts writes
struct CountingLedger {
    inner: FileLedger,
    writes: AtomicUsize,
}

#[async_trait]
impl Ledger for CountingLedger {
    async fn put_step_result(&self, event_id: &str, step: &str, result: &StepResult) -> Result<(), LedgerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put_step_result(event_id, step, result).await
    }

    async fn get_step_result(&self, event_id: &str, step: &str) -> Result<Option<StepResult>, LedgerError> {
        self.inner.get_step_result(event_id, step).await
    }

    async fn put_run_record(&self, event_id: &str, record: &RunRecord) -> Result<(), LedgerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put_run_record(event_id, record).await
    }

    async fn get_run_record(&self, event_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        self.inner.get_run_record(event_id).await
    }
}

#[tokio::test]
async fn test_missing_event_writes_nothing() {
    let harness = Harness::new().handler("subtitles", Outcome::Succeed);
    let ledger = Arc::new(CountingLedger {
        inner: FileLedger::new(harness.events_dir()),
        writes: AtomicUsize::new(0),
    });
    let executor = harness.executor_with(ledger.clone());

    let err = executor.run_event("no-such-event", false).await.unwrap_err();

    assert!(matches!(err, RunError::EventNotFound(ref id) if id == "no-such-event"));
    assert_eq!(ledger.writes.load(Ordering::SeqCst), 0);
    assert!(harness.calls().is_empty());
    assert!(!harness.events_dir().join("no-such-event").exists());
}

#[tokio::test]
async fn test_malformed_event_is_a_repository_error() {
    let harness = Harness::new().handler("subtitles", Outcome::Succeed);
    let dir = harness.events_dir().join(EVENT);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("event.yaml"), "modules: [this, is, not, a, map]\n").unwrap();

    let err = harness.executor().run_event(EVENT, false).await.unwrap_err();

    assert!(matches!(err, RunError::Repository { .. }));
    assert!(harness.calls().is_empty());
}

/// Ledger that refuses to record one step
struct FailingLedger {
    inner: FileLedger,
    failing_step: &'static str,
}

#[async_trait]
impl Ledger for FailingLedger {
    async fn put_step_result(&self, event_id: &str, step: &str, result: &StepResult) -> Result<(), LedgerError> {
        if step == self.failing_step {
            return Err(LedgerError::Write {
                path: Path::new("/dev/full").to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.put_step_result(event_id, step, result).await
    }

    async fn get_step_result(&self, event_id: &str, step: &str) -> Result<Option<StepResult>, LedgerError> {
        self.inner.get_step_result(event_id, step).await
    }

    async fn put_run_record(&self, event_id: &str, record: &RunRecord) -> Result<(), LedgerError> {
        self.inner.put_run_record(event_id, record).await
    }

    async fn get_run_record(&self, event_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        self.inner.get_run_record(event_id).await
    }

    async fn acquire_lease(&self, event_id: &str) -> Result<RunLease, LedgerError> {
        self.inner.acquire_lease(event_id).await
    }
}

#[tokio::test]
async fn test_persistence_failure_aborts_run() {
    let harness = Harness::new()
        .handler("subtitles", Outcome::Succeed)
        .handler("publish_youtube", Outcome::Succeed)
        .handler("archive", Outcome::Succeed)
        .event(&[("subtitles", true), ("publish_youtube", true), ("archive", true)]);
    let executor = harness.executor_with(Arc::new(FailingLedger {
        inner: FileLedger::new(harness.events_dir()),
        failing_step: "publish_youtube",
    }));

    let err = executor.run_event(EVENT, false).await.unwrap_err();

    match err {
        RunError::Persistence { event_id, step, .. } => {
            assert_eq!(event_id, EVENT);
            assert_eq!(step.as_deref(), Some("publish_youtube"));
        }
        other => panic!("expected persistence error, got {:?}", other),
    }

    // The step after the failed write never ran, and no run record exists
    assert_eq!(harness.calls(), vec!["subtitles", "publish_youtube"]);
    assert!(harness.logs_dir().join("subtitles_result.json").is_file());
    assert!(!harness.logs_dir().join("workflow_state.json").exists());
}

#[tokio::test]
async fn test_corrupt_prior_result_is_reexecuted() {
    let harness = Harness::new()
        .handler("subtitles", Outcome::Succeed)
        .event(&[("subtitles", true)]);
    std::fs::create_dir_all(harness.logs_dir()).unwrap();
    std::fs::write(harness.logs_dir().join("subtitles_result.json"), "{ not json").unwrap();

    let record = harness.executor().run_event(EVENT, false).await.unwrap();

    assert_eq!(harness.calls(), vec!["subtitles"]);
    assert_eq!(record.overall_status, RunStatus::Success);
}

#[tokio::test]
async fn test_held_lease_makes_run_busy() {
    let harness = Harness::new()
        .handler("subtitles", Outcome::Succeed)
        .event(&[("subtitles", true)]);

    let other_process = FileLedger::new(harness.events_dir());
    let _lease = other_process.acquire_lease(EVENT).await.unwrap();

    let err = harness.executor().run_event(EVENT, false).await.unwrap_err();

    assert!(matches!(err, RunError::Busy(ref id) if id == EVENT));
    assert!(harness.calls().is_empty());
}

/// Handler that tracks how many invocations overlap
struct OverlapHandler {
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    finished: AtomicUsize,
}

impl OverlapHandler {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        })
    }
}

/// Leaves the active count when the invocation ends, including by cancellation
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StepHandler for OverlapHandler {
    fn name(&self) -> &str {
        "subtitles"
    }

    async fn run(&self, _ctx: &StepContext) -> Result<StepResult> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActiveGuard(&self.active);
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(StepResult::success("done"))
    }
}

#[tokio::test]
async fn test_concurrent_runs_of_one_event_are_serialized() {
    let mut harness = Harness::new().event(&[("subtitles", true)]);
    let handler = OverlapHandler::new(Duration::from_millis(50));
    harness.registry.register(handler.clone());
    let executor = harness.executor();

    let (a, b) = tokio::join!(executor.run_event(EVENT, true), executor.run_event(EVENT, true));

    assert_eq!(a.unwrap().overall_status, RunStatus::Success);
    assert_eq!(b.unwrap().overall_status, RunStatus::Success);
    assert_eq!(handler.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_run_stops_its_handler() {
    let mut harness = Harness::new().event(&[("subtitles", true)]);
    let handler = OverlapHandler::new(Duration::from_millis(300));
    harness.registry.register(handler.clone());
    let executor = harness.executor();

    let cancelled = tokio::time::timeout(Duration::from_millis(50), executor.run_event(EVENT, true)).await;
    assert!(cancelled.is_err());
    assert_eq!(handler.active.load(Ordering::SeqCst), 0);

    let record = executor.run_event(EVENT, true).await.unwrap();

    assert_eq!(record.overall_status, RunStatus::Success);
    assert_eq!(handler.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(handler.finished.load(Ordering::SeqCst), 1);

    // The cancelled handler never resumes
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(handler.finished.load(Ordering::SeqCst), 1);
}

/// In-memory sink for captured log output
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_logs_go_to_injected_dispatch() {
    let harness = Harness::new()
        .handler("subtitles", Outcome::Succeed)
        .handler("archive", Outcome::Fail)
        .event(&[("subtitles", true), ("archive", true)]);

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish();

    let executor = harness.executor().with_dispatch(tracing::Dispatch::new(subscriber));
    executor.run_event(EVENT, false).await.unwrap();

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("Starting run"));
    assert!(output.contains("Step failed"));
    assert!(output.contains("Run completed"));
    assert!(output.contains(EVENT));
}
