//! Execution records and the state machine vocabulary.

use std::time::SystemTime;

use crate::error::ExecutionFailure;

/// Identifier for one execution, unique within a `WorkerPool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(u64);

impl ExecutionId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one execution.
///
/// `Pending -> Running -> {Succeeded, Failed, Cancelled, TimedOut}`, with
/// `Retrying` between failed attempts and `Cancelling` once a cancel has
/// been requested against a running attempt. Terminal states are never
/// re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    Running,
    Retrying,
    Cancelling,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded
                | ExecutionState::Failed
                | ExecutionState::Cancelled
                | ExecutionState::TimedOut
        )
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Running => "running",
            ExecutionState::Retrying => "retrying",
            ExecutionState::Cancelling => "cancelling",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
            ExecutionState::Cancelled => "cancelled",
            ExecutionState::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// One run of a job. Mutated only by the worker that owns it; handed off
/// as an immutable record once terminal.
#[derive(Debug, Clone)]
pub struct Execution {
    pub id: ExecutionId,
    pub job_name: String,
    pub state: ExecutionState,
    /// Attempts entered so far; never exceeds `retry_attempts + 1`.
    pub attempts: u32,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
    pub error: Option<ExecutionFailure>,
}

impl Execution {
    pub fn new(id: ExecutionId, job_name: String) -> Self {
        Self {
            id,
            job_name,
            state: ExecutionState::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}
