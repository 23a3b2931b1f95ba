//! Progress tracking: aggregate chunk events into queryable snapshots.
//!
//! The tracker is shared between the execution workers (writers) and any
//! number of concurrent pollers (readers). Rate is computed over a
//! trailing window so the first chunk never produces a wild extrapolation;
//! ETA is reported as unknown (None) rather than zero or infinite when
//! the rate is zero. Snapshots of terminal executions stay queryable so
//! late pollers can observe the final state.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::execution::ExecutionId;
use crate::transfer::TransferUnit;

/// Trailing window for the rate estimate.
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// Phase of an execution as seen by progress pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Preflight,
    Transferring,
    Retrying,
    Finalizing,
}

/// Read-only view of one execution's progress.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub bytes_done: u64,
    pub total_bytes: u64,
    pub files_done: usize,
    pub files_total: usize,
    pub current_file: Option<PathBuf>,
    pub phase: Phase,
    /// Transfer rate in bytes per second over the trailing window.
    pub bytes_per_sec: f64,
}

impl ProgressSnapshot {
    /// Fraction complete in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.bytes_done as f64 / self.total_bytes as f64).min(1.0)
    }

    /// Estimated seconds remaining; None when the rate is zero and the
    /// transfer is not finished.
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.total_bytes.saturating_sub(self.bytes_done);
        if remaining == 0 {
            return Some(0.0);
        }
        if self.bytes_per_sec <= 0.0 {
            return None;
        }
        Some(remaining as f64 / self.bytes_per_sec)
    }
}

#[derive(Debug)]
struct ExecProgress {
    total_bytes: u64,
    files_total: usize,
    bytes_done: u64,
    files_done: usize,
    current_file: Option<PathBuf>,
    phase: Phase,
    /// (instant, cumulative bytes) samples; the front element anchors the
    /// trailing-window rate, falling back to the attempt start when fewer
    /// than `RATE_WINDOW` of samples exist.
    samples: VecDeque<(Instant, u64)>,
}

impl ExecProgress {
    fn new() -> Self {
        Self {
            total_bytes: 0,
            files_total: 0,
            bytes_done: 0,
            files_done: 0,
            current_file: None,
            phase: Phase::Pending,
            samples: VecDeque::new(),
        }
    }

    fn rate(&self, now: Instant) -> f64 {
        let Some(&(t0, b0)) = self.samples.front() else {
            return 0.0;
        };
        let dt = now.saturating_duration_since(t0).as_secs_f64();
        if dt <= 0.0 {
            return 0.0;
        }
        self.bytes_done.saturating_sub(b0) as f64 / dt
    }

    fn prune(&mut self, now: Instant) {
        // Keep one sample at or beyond the window edge as the rate anchor.
        while self.samples.len() >= 2 {
            let second = self.samples[1].0;
            if now.saturating_duration_since(second) >= RATE_WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Shared progress registry, one entry per execution.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    inner: RwLock<HashMap<ExecutionId, ExecProgress>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an execution at submission time so pollers see it while
    /// still pending.
    pub fn register(&self, id: ExecutionId) {
        self.inner.write().unwrap().insert(id, ExecProgress::new());
    }

    /// Install the totals once the transfer plan is known.
    pub fn set_totals(&self, id: ExecutionId, total_bytes: u64, files_total: usize) {
        if let Some(p) = self.inner.write().unwrap().get_mut(&id) {
            p.total_bytes = total_bytes;
            p.files_total = files_total;
        }
    }

    /// Start (or restart) an attempt: bytes reset to the durable resume
    /// floor, never below it, and the rate window restarts.
    pub fn begin_attempt(&self, id: ExecutionId, resume_bytes: u64, files_done: usize) {
        if let Some(p) = self.inner.write().unwrap().get_mut(&id) {
            p.bytes_done = resume_bytes;
            p.files_done = files_done;
            p.current_file = None;
            p.samples.clear();
            p.samples.push_back((Instant::now(), resume_bytes));
        }
    }

    pub fn set_phase(&self, id: ExecutionId, phase: Phase) {
        if let Some(p) = self.inner.write().unwrap().get_mut(&id) {
            p.phase = phase;
        }
    }

    pub fn file_started(&self, id: ExecutionId, path: &std::path::Path) {
        if let Some(p) = self.inner.write().unwrap().get_mut(&id) {
            p.current_file = Some(path.to_path_buf());
        }
    }

    pub fn file_done(&self, id: ExecutionId) {
        if let Some(p) = self.inner.write().unwrap().get_mut(&id) {
            p.files_done += 1;
            p.current_file = None;
        }
    }

    /// Apply one chunk event. Units arrive in emission order within an
    /// execution, so bytes_done is monotonically non-decreasing per attempt.
    pub fn record(&self, id: ExecutionId, unit: &TransferUnit) {
        let now = Instant::now();
        if let Some(p) = self.inner.write().unwrap().get_mut(&id) {
            p.bytes_done += unit.len;
            p.samples.push_back((now, p.bytes_done));
            p.prune(now);
        }
    }

    /// Current snapshot, or None for an unknown execution. Readers never
    /// observe a torn view: the whole snapshot is built under one lock.
    pub fn snapshot(&self, id: ExecutionId) -> Option<ProgressSnapshot> {
        let now = Instant::now();
        let inner = self.inner.read().unwrap();
        let p = inner.get(&id)?;
        Some(ProgressSnapshot {
            bytes_done: p.bytes_done,
            total_bytes: p.total_bytes,
            files_done: p.files_done,
            files_total: p.files_total,
            current_file: p.current_file.clone(),
            phase: p.phase,
            bytes_per_sec: p.rate(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(offset: u64, len: u64) -> TransferUnit {
        TransferUnit {
            offset,
            len,
            checksum: None,
        }
    }

    fn id(n: u64) -> ExecutionId {
        ExecutionId::from_raw(n)
    }

    #[test]
    fn bytes_done_accumulates_monotonically() {
        let t = ProgressTracker::new();
        t.register(id(1));
        t.set_totals(id(1), 100_000, 1);
        t.begin_attempt(id(1), 0, 0);

        let mut last = 0;
        for i in 0..5 {
            t.record(id(1), &unit(i * 8192, 8192));
            let snap = t.snapshot(id(1)).unwrap();
            assert!(snap.bytes_done >= last);
            last = snap.bytes_done;
        }
        assert_eq!(last, 5 * 8192);
    }

    #[test]
    fn chunk_lengths_above_four_gib_are_not_truncated() {
        let t = ProgressTracker::new();
        t.register(id(1));
        let five_gib = 5u64 * 1024 * 1024 * 1024;
        t.set_totals(id(1), five_gib, 1);
        t.begin_attempt(id(1), 0, 0);
        t.record(id(1), &unit(0, five_gib));
        assert_eq!(t.snapshot(id(1)).unwrap().bytes_done, five_gib);
    }

    #[test]
    fn eta_unknown_at_zero_rate_and_zero_when_done() {
        let t = ProgressTracker::new();
        t.register(id(1));
        t.set_totals(id(1), 1000, 1);
        t.begin_attempt(id(1), 0, 0);

        // No chunks yet: rate is zero, ETA must be unknown, not 0 or inf.
        let snap = t.snapshot(id(1)).unwrap();
        assert_eq!(snap.eta_secs(), None);

        for off in (0..1000).step_by(250) {
            t.record(id(1), &unit(off, 250));
        }
        let snap = t.snapshot(id(1)).unwrap();
        assert_eq!(snap.bytes_done, 1000);
        assert_eq!(snap.eta_secs(), Some(0.0));
        assert_eq!(snap.fraction(), 1.0);
    }

    #[test]
    fn retry_resets_to_resume_floor_not_zero() {
        let t = ProgressTracker::new();
        t.register(id(1));
        t.set_totals(id(1), 100_000, 1);
        t.begin_attempt(id(1), 0, 0);
        for i in 0..6 {
            t.record(id(1), &unit(i * 8192, 8192));
        }
        assert_eq!(t.snapshot(id(1)).unwrap().bytes_done, 6 * 8192);

        // Retry resumes from the durable offset, never below it.
        t.begin_attempt(id(1), 5 * 8192, 0);
        let snap = t.snapshot(id(1)).unwrap();
        assert_eq!(snap.bytes_done, 5 * 8192);
        assert_eq!(snap.bytes_per_sec, 0.0);
    }

    #[test]
    fn phase_and_file_counters_update() {
        let t = ProgressTracker::new();
        t.register(id(7));
        t.set_totals(id(7), 10, 2);
        assert_eq!(t.snapshot(id(7)).unwrap().phase, Phase::Pending);

        t.set_phase(id(7), Phase::Transferring);
        t.file_started(id(7), std::path::Path::new("/src/a"));
        let snap = t.snapshot(id(7)).unwrap();
        assert_eq!(snap.phase, Phase::Transferring);
        assert_eq!(snap.current_file.as_deref(), Some(std::path::Path::new("/src/a")));

        t.file_done(id(7));
        let snap = t.snapshot(id(7)).unwrap();
        assert_eq!(snap.files_done, 1);
        assert_eq!(snap.current_file, None);
    }

    #[test]
    fn unknown_execution_has_no_snapshot() {
        let t = ProgressTracker::new();
        assert!(t.snapshot(id(99)).is_none());
    }
}
