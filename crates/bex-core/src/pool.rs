//! Worker pool: dispatch, admission, and the retry loop.
//!
//! `submit` never blocks: it enqueues an execution in `Pending` state and
//! returns its id. A dispatcher task admits queued executions in FIFO
//! order, bounded by `max_concurrent_jobs` via a fair semaphore; each
//! admitted attempt runs on the blocking thread pool. The concurrency slot
//! is released during a retry delay and the execution re-enters the queue
//! at the tail once the delay elapses, so waiting retries never starve the
//! pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::collections::HashMap;
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::BexConfig;
use crate::control::CancelRegistry;
use crate::error::{ExecutionFailure, FailureKind};
use crate::execution::{Execution, ExecutionId, ExecutionState};
use crate::job::{JobSettings, JobSpec, SpecError};
use crate::preflight::{SpaceProbe, VolumeProbe};
use crate::progress::{Phase, ProgressSnapshot, ProgressTracker};
use crate::reserve::SpaceBudget;
use crate::retry::{classify, RetryDecision, RetryPolicy};
use crate::sink::StateSink;
use crate::transfer::Deadline;
use crate::worker::{run_attempt, AttemptEnv, AttemptState};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid job spec: {0}")]
    Invalid(#[from] SpecError),
    #[error("worker pool is shut down")]
    Shutdown,
}

/// One queued (or re-queued) execution, owned by whichever task currently
/// drives it.
struct Admission {
    id: ExecutionId,
    spec: Arc<JobSpec>,
    settings: JobSettings,
    abort: Arc<AtomicBool>,
    state: AttemptState,
    /// Set when the execution first enters `Running`; the wall-clock
    /// timeout spans retries and queue waits after that point.
    deadline: Option<Deadline>,
}

struct Shared {
    config: BexConfig,
    tracker: ProgressTracker,
    cancels: CancelRegistry,
    budget: SpaceBudget,
    executions: RwLock<HashMap<ExecutionId, Execution>>,
    sink: Arc<dyn StateSink>,
    probe: Arc<dyn SpaceProbe>,
    slots: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl Shared {
    fn is_terminal(&self, id: ExecutionId) -> bool {
        self.executions
            .read()
            .unwrap()
            .get(&id)
            .map(|e| e.state.is_terminal())
            .unwrap_or(true)
    }
}

fn cancelled_failure() -> ExecutionFailure {
    ExecutionFailure {
        kind: FailureKind::Cancelled,
        message: "cancelled by user".into(),
    }
}

/// The execution engine: owns the slot count, the space budget, and all
/// in-flight executions. Construct once per process with injected
/// configuration; must be created inside a tokio runtime.
pub struct WorkerPool {
    shared: Arc<Shared>,
    queue_tx: UnboundedSender<Admission>,
}

impl WorkerPool {
    pub fn new(config: BexConfig, sink: Arc<dyn StateSink>) -> Self {
        Self::with_probe(config, sink, Arc::new(VolumeProbe))
    }

    /// Like `new`, with an injected free-space probe (used by tests).
    pub fn with_probe(
        config: BexConfig,
        sink: Arc<dyn StateSink>,
        probe: Arc<dyn SpaceProbe>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        let shared = Arc::new(Shared {
            config,
            tracker: ProgressTracker::new(),
            cancels: CancelRegistry::new(),
            budget: SpaceBudget::new(),
            executions: RwLock::new(HashMap::new()),
            sink,
            probe,
            slots,
            next_id: AtomicU64::new(1),
        });
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        // The dispatcher keeps only a weak sender, so dropping the pool
        // (and any retry timers) closes the queue and ends the task.
        tokio::spawn(dispatch_loop(
            Arc::clone(&shared),
            queue_rx,
            queue_tx.downgrade(),
        ));
        Self { shared, queue_tx }
    }

    /// Enqueue an execution for the given job. Never blocks; the execution
    /// starts in `Pending` and is admitted when a slot frees up.
    pub fn submit(&self, spec: JobSpec) -> Result<ExecutionId, SubmitError> {
        spec.validate()?;
        let id = ExecutionId::from_raw(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let settings = spec.settings(&self.shared.config);

        let exec = Execution::new(id, spec.name.clone());
        self.shared
            .executions
            .write()
            .unwrap()
            .insert(id, exec.clone());
        self.shared.tracker.register(id);
        let abort = self.shared.cancels.register(id);
        self.shared.sink.persist_state(&exec);

        let admission = Admission {
            id,
            spec: Arc::new(spec),
            settings,
            abort,
            state: AttemptState::default(),
            deadline: None,
        };
        self.queue_tx
            .send(admission)
            .map_err(|_| SubmitError::Shutdown)?;
        tracing::debug!(execution = %id, job = %exec.job_name, "execution submitted");
        Ok(id)
    }

    /// Request cooperative cancellation. A pending execution terminates
    /// immediately without ever entering `Running`; a running one stops at
    /// the next chunk boundary. Returns false for unknown or already
    /// terminal executions.
    pub fn cancel(&self, id: ExecutionId) -> bool {
        if !self.shared.cancels.request_cancel(id) {
            return false;
        }
        let update = {
            let mut map = self.shared.executions.write().unwrap();
            match map.get_mut(&id) {
                Some(e) if e.state == ExecutionState::Pending => {
                    e.state = ExecutionState::Cancelled;
                    e.finished_at = Some(SystemTime::now());
                    e.error = Some(cancelled_failure());
                    Some((e.clone(), true))
                }
                Some(e)
                    if matches!(
                        e.state,
                        ExecutionState::Running | ExecutionState::Retrying
                    ) =>
                {
                    e.state = ExecutionState::Cancelling;
                    Some((e.clone(), false))
                }
                _ => None,
            }
        };
        if let Some((record, terminal)) = update {
            self.shared.sink.persist_state(&record);
            if terminal {
                self.shared.cancels.unregister(id);
                self.shared.sink.notify_outcome(&record);
                tracing::info!(execution = %id, "pending execution cancelled");
            }
        }
        true
    }

    /// Current progress snapshot; keeps answering after the execution is
    /// terminal so late pollers observe the final state.
    pub fn progress(&self, id: ExecutionId) -> Option<ProgressSnapshot> {
        self.shared.tracker.snapshot(id)
    }

    /// Current execution record (state, attempts, error).
    pub fn execution(&self, id: ExecutionId) -> Option<Execution> {
        self.shared.executions.read().unwrap().get(&id).cloned()
    }

    /// Poll until the execution reaches a terminal state.
    pub async fn wait(&self, id: ExecutionId) -> Option<Execution> {
        loop {
            let exec = self.execution(id)?;
            if exec.state.is_terminal() {
                return Some(exec);
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}

/// Admission loop: pops queued executions in submission order and admits
/// each once a slot is free. Acquiring the permit here, serially, is what
/// makes admission strictly FIFO.
async fn dispatch_loop(
    shared: Arc<Shared>,
    mut rx: UnboundedReceiver<Admission>,
    tx: WeakUnboundedSender<Admission>,
) {
    while let Some(adm) = rx.recv().await {
        if shared.is_terminal(adm.id) {
            // Cancelled while queued; already finalized.
            continue;
        }
        let permit = match Arc::clone(&shared.slots).acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        tokio::spawn(run_admitted(
            Arc::clone(&shared),
            adm,
            permit,
            tx.clone(),
        ));
    }
}

/// Drive one admitted attempt, then route the result: success, terminal
/// failure, or a delayed re-queue. The permit is dropped before any retry
/// delay starts.
async fn run_admitted(
    shared: Arc<Shared>,
    mut adm: Admission,
    permit: OwnedSemaphorePermit,
    tx: WeakUnboundedSender<Admission>,
) {
    let admitted = {
        let mut map = shared.executions.write().unwrap();
        match map.get_mut(&adm.id) {
            Some(e) if !e.state.is_terminal() => {
                e.state = ExecutionState::Running;
                e.attempts += 1;
                if e.started_at.is_none() {
                    e.started_at = Some(SystemTime::now());
                }
                Some(e.clone())
            }
            _ => None,
        }
    };
    let Some(record) = admitted else {
        drop(permit);
        return;
    };
    shared.sink.persist_state(&record);
    let attempts = record.attempts;
    let deadline = *adm
        .deadline
        .get_or_insert_with(|| Deadline::after(adm.settings.timeout));

    let shared_blocking = Arc::clone(&shared);
    let spec = Arc::clone(&adm.spec);
    let abort = Arc::clone(&adm.abort);
    let settings = adm.settings;
    let id = adm.id;
    let mut state = std::mem::take(&mut adm.state);
    let joined = tokio::task::spawn_blocking(move || {
        let env = AttemptEnv {
            exec_id: id,
            spec: &spec,
            settings,
            tracker: &shared_blocking.tracker,
            budget: &shared_blocking.budget,
            probe: shared_blocking.probe.as_ref(),
            abort: &abort,
            deadline,
        };
        let result = run_attempt(&env, &mut state);
        (state, result)
    })
    .await;
    drop(permit);

    let (state, result) = match joined {
        Ok(v) => v,
        Err(join_err) => {
            tracing::error!(execution = %adm.id, "attempt task failed: {join_err}");
            finalize(
                &shared,
                &adm,
                ExecutionState::Failed,
                Some(ExecutionFailure {
                    kind: FailureKind::Transfer,
                    message: format!("attempt task failed: {join_err}"),
                }),
            );
            return;
        }
    };
    adm.state = state;

    let err = match result {
        Ok(()) => {
            finalize(&shared, &adm, ExecutionState::Succeeded, None);
            return;
        }
        Err(e) => e,
    };
    let kind = classify(&err);
    let failure = ExecutionFailure::from_error(&err);

    match kind {
        FailureKind::Cancelled => {
            finalize(&shared, &adm, ExecutionState::Cancelled, Some(failure));
            return;
        }
        FailureKind::Timeout => {
            finalize(&shared, &adm, ExecutionState::TimedOut, Some(failure));
            return;
        }
        _ => {}
    }

    let policy = RetryPolicy {
        retry_attempts: adm.settings.retry_attempts,
        delay: adm.settings.retry_delay,
    };
    match policy.decide(kind, attempts) {
        RetryDecision::GiveUp => {
            finalize(&shared, &adm, ExecutionState::Failed, Some(failure));
        }
        RetryDecision::RetryAfter(delay) => {
            if kind == FailureKind::ResumeMismatch {
                adm.state.reset_resume();
            }
            let retrying = {
                let mut map = shared.executions.write().unwrap();
                map.get_mut(&adm.id).and_then(|e| {
                    if e.state.is_terminal() {
                        None
                    } else {
                        e.state = ExecutionState::Retrying;
                        Some(e.clone())
                    }
                })
            };
            let Some(record) = retrying else {
                return;
            };
            shared.tracker.set_phase(adm.id, Phase::Retrying);
            shared.sink.persist_state(&record);
            tracing::info!(
                execution = %adm.id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "attempt failed, retrying"
            );
            // The slot is already released; only a timer holds the
            // execution during the delay.
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if adm.abort.load(Ordering::Relaxed) {
                    finalize(
                        &shared,
                        &adm,
                        ExecutionState::Cancelled,
                        Some(cancelled_failure()),
                    );
                    return;
                }
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(adm);
                }
            });
        }
    }
}

/// Move an execution to a terminal state exactly once: release its space
/// reservation, drop its abort token, and hand the record to the sink.
fn finalize(
    shared: &Arc<Shared>,
    adm: &Admission,
    state: ExecutionState,
    failure: Option<ExecutionFailure>,
) {
    let record = {
        let mut map = shared.executions.write().unwrap();
        match map.get_mut(&adm.id) {
            Some(e) if !e.state.is_terminal() => {
                e.state = state;
                e.finished_at = Some(SystemTime::now());
                e.error = failure;
                Some(e.clone())
            }
            _ => None,
        }
    };
    let Some(record) = record else {
        return;
    };
    shared.budget.release(adm.state.reserved);
    shared.cancels.unregister(adm.id);
    shared.sink.persist_state(&record);
    shared.sink.notify_outcome(&record);
    tracing::info!(
        execution = %adm.id,
        job = %record.job_name,
        state = %record.state,
        attempts = record.attempts,
        "execution finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Sink that records every state transition for assertions.
    #[derive(Default)]
    struct TestSink {
        transitions: Mutex<Vec<(ExecutionId, ExecutionState)>>,
        running_now: Mutex<usize>,
        peak_running: Mutex<usize>,
    }

    impl StateSink for TestSink {
        fn persist_state(&self, exec: &Execution) {
            self.transitions
                .lock()
                .unwrap()
                .push((exec.id, exec.state));
            match exec.state {
                ExecutionState::Running => {
                    let mut now = self.running_now.lock().unwrap();
                    *now += 1;
                    let mut peak = self.peak_running.lock().unwrap();
                    *peak = (*peak).max(*now);
                }
                s if s.is_terminal() || s == ExecutionState::Retrying => {
                    let mut now = self.running_now.lock().unwrap();
                    *now = now.saturating_sub(1);
                }
                _ => {}
            }
        }

        fn notify_outcome(&self, _exec: &Execution) {}
    }

    impl TestSink {
        fn states_of(&self, id: ExecutionId) -> Vec<ExecutionState> {
            self.transitions
                .lock()
                .unwrap()
                .iter()
                .filter(|(i, _)| *i == id)
                .map(|(_, s)| *s)
                .collect()
        }
    }

    struct FixedProbe(u64);

    impl SpaceProbe for FixedProbe {
        fn free_bytes(&self, _path: &Path) -> std::io::Result<u64> {
            Ok(self.0)
        }
    }

    fn write_source(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        let data: Vec<u8> = (0..len).map(|i| (i % 241) as u8).collect();
        std::fs::write(&path, data).unwrap();
        path
    }

    fn spec_for(source: PathBuf, dest: PathBuf) -> JobSpec {
        let mut spec = JobSpec::new("test-job", vec![source], dest);
        spec.min_free_space = Some(0);
        spec
    }

    fn test_config() -> BexConfig {
        BexConfig {
            retry_delay_seconds: 0,
            ..BexConfig::default()
        }
    }

    #[tokio::test]
    async fn single_job_succeeds_with_full_byte_count() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "data.bin", 100_000);
        let sink = Arc::new(TestSink::default());
        let pool = WorkerPool::new(test_config(), sink.clone());

        let id = pool
            .submit(spec_for(source.clone(), dir.path().join("dst")))
            .unwrap();
        let exec = pool.wait(id).await.unwrap();

        assert_eq!(exec.state, ExecutionState::Succeeded);
        assert_eq!(exec.attempts, 1);
        assert!(exec.error.is_none());
        assert!(exec.started_at.is_some() && exec.finished_at.is_some());

        let snap = pool.progress(id).unwrap();
        assert_eq!(snap.bytes_done, 100_000);
        assert_eq!(snap.total_bytes, 100_000);
        assert_eq!(
            std::fs::read(dir.path().join("dst/data.bin")).unwrap(),
            std::fs::read(&source).unwrap()
        );
        assert_eq!(
            sink.states_of(id).first(),
            Some(&ExecutionState::Pending)
        );
    }

    #[tokio::test]
    async fn admission_is_fifo_with_a_single_slot() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(TestSink::default());
        let cfg = BexConfig {
            max_concurrent_jobs: 1,
            ..test_config()
        };
        let pool = WorkerPool::new(cfg, sink.clone());

        let mut ids = Vec::new();
        for i in 0..3 {
            let source = write_source(dir.path(), &format!("f{i}.bin"), 50_000);
            ids.push(
                pool.submit(spec_for(source, dir.path().join("dst")))
                    .unwrap(),
            );
        }
        for id in &ids {
            assert_eq!(
                pool.wait(*id).await.unwrap().state,
                ExecutionState::Succeeded
            );
        }

        let running_order: Vec<ExecutionId> = sink
            .transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| *s == ExecutionState::Running)
            .map(|(i, _)| *i)
            .collect();
        assert_eq!(running_order, ids);
        assert_eq!(*sink.peak_running.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_running_never_exceeds_the_cap() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(TestSink::default());
        let cfg = BexConfig {
            max_concurrent_jobs: 2,
            ..test_config()
        };
        let pool = WorkerPool::new(cfg, sink.clone());

        let mut ids = Vec::new();
        for i in 0..4 {
            let source = write_source(dir.path(), &format!("f{i}.bin"), 1_000_000);
            ids.push(
                pool.submit(spec_for(source, dir.path().join("dst")))
                    .unwrap(),
            );
        }
        for id in ids {
            assert_eq!(
                pool.wait(id).await.unwrap().state,
                ExecutionState::Succeeded
            );
        }
        assert!(*sink.peak_running.lock().unwrap() <= 2);
    }

    #[tokio::test]
    async fn cancelling_pending_never_enters_running() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(TestSink::default());
        let cfg = BexConfig {
            max_concurrent_jobs: 1,
            ..test_config()
        };
        let pool = WorkerPool::new(cfg, sink.clone());

        // Occupy the only slot with a sizable job, then cancel the queued one.
        let big = write_source(dir.path(), "big.bin", 32 * 1024 * 1024);
        let mut big_spec = spec_for(big, dir.path().join("dst"));
        big_spec.chunk_size = Some(8192);
        let first = pool.submit(big_spec).unwrap();

        let small = write_source(dir.path(), "small.bin", 100);
        let second = pool
            .submit(spec_for(small, dir.path().join("dst")))
            .unwrap();
        assert!(pool.cancel(second));

        let exec = pool.wait(second).await.unwrap();
        assert_eq!(exec.state, ExecutionState::Cancelled);
        assert_eq!(exec.attempts, 0);
        assert!(!sink
            .states_of(second)
            .contains(&ExecutionState::Running));

        assert_eq!(
            pool.wait(first).await.unwrap().state,
            ExecutionState::Succeeded
        );
    }

    #[tokio::test]
    async fn space_exhaustion_retries_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "data.bin", 1000);
        let sink = Arc::new(TestSink::default());
        // 500 MiB free against the default 1 GiB floor.
        let probe = Arc::new(FixedProbe(500 * 1024 * 1024));
        let pool = WorkerPool::with_probe(test_config(), sink.clone(), probe);

        let mut spec = JobSpec::new("full-disk", vec![source], dir.path().join("dst"));
        spec.retry_attempts = Some(3);
        let id = pool.submit(spec).unwrap();
        let exec = pool.wait(id).await.unwrap();

        assert_eq!(exec.state, ExecutionState::Failed);
        // First attempt plus three retries.
        assert_eq!(exec.attempts, 4);
        let failure = exec.error.unwrap();
        assert_eq!(failure.kind, FailureKind::SpaceExhausted);

        let states = sink.states_of(id);
        assert_eq!(
            states
                .iter()
                .filter(|s| **s == ExecutionState::Retrying)
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn zero_timeout_forces_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "data.bin", 1000);
        let sink = Arc::new(TestSink::default());
        let pool = WorkerPool::new(test_config(), sink);

        let mut spec = spec_for(source, dir.path().join("dst"));
        spec.execution_timeout_seconds = Some(0);
        let id = pool.submit(spec).unwrap();
        let exec = pool.wait(id).await.unwrap();

        assert_eq!(exec.state, ExecutionState::TimedOut);
        assert_eq!(exec.attempts, 1);
        assert_eq!(exec.error.unwrap().kind, FailureKind::Timeout);
    }

    #[tokio::test]
    async fn missing_source_fails_without_retries() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(TestSink::default());
        let pool = WorkerPool::new(test_config(), sink);

        let spec = spec_for(dir.path().join("absent"), dir.path().join("dst"));
        let id = pool.submit(spec).unwrap();
        let exec = pool.wait(id).await.unwrap();

        assert_eq!(exec.state, ExecutionState::Failed);
        assert_eq!(exec.attempts, 1);
        assert_eq!(exec.error.unwrap().kind, FailureKind::SourceUnreachable);
    }

    #[tokio::test]
    async fn invalid_spec_is_rejected_at_submission() {
        let sink = Arc::new(TestSink::default());
        let pool = WorkerPool::new(test_config(), sink);
        let spec = JobSpec::new("", vec![PathBuf::from("/x")], PathBuf::from("/y"));
        assert!(matches!(
            pool.submit(spec),
            Err(SubmitError::Invalid(SpecError::EmptyName))
        ));
    }

    #[tokio::test]
    async fn unknown_ids_answer_none_and_false() {
        let sink = Arc::new(TestSink::default());
        let pool = WorkerPool::new(test_config(), sink);
        let id = ExecutionId::from_raw(999);
        assert!(pool.progress(id).is_none());
        assert!(pool.execution(id).is_none());
        assert!(!pool.cancel(id));
    }
}
