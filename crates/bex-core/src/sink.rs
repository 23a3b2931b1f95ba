//! Outbound collaborator seam: persistence and outcome notification.
//!
//! The engine does not persist executions or deliver notifications itself;
//! it hands records across this trait on every state transition. Real
//! implementations (database, webhook, email) live outside the crate.

use crate::execution::Execution;

/// Receives execution state transitions and terminal outcomes.
pub trait StateSink: Send + Sync {
    /// Called on every state transition with the updated record.
    fn persist_state(&self, exec: &Execution);

    /// Called exactly once per execution, when it reaches a terminal state.
    fn notify_outcome(&self, exec: &Execution);
}

/// Default sink: logs transitions, persists nothing.
#[derive(Debug, Default)]
pub struct LogSink;

impl StateSink for LogSink {
    fn persist_state(&self, exec: &Execution) {
        tracing::debug!(
            execution = %exec.id,
            job = %exec.job_name,
            state = %exec.state,
            attempts = exec.attempts,
            "execution state"
        );
    }

    fn notify_outcome(&self, exec: &Execution) {
        match &exec.error {
            Some(err) => tracing::warn!(
                execution = %exec.id,
                job = %exec.job_name,
                state = %exec.state,
                attempts = exec.attempts,
                error = %err,
                "execution finished"
            ),
            None => tracing::info!(
                execution = %exec.id,
                job = %exec.job_name,
                state = %exec.state,
                attempts = exec.attempts,
                "execution finished"
            ),
        }
    }
}
