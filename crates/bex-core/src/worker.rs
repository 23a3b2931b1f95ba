//! One execution attempt, end to end: preflight, transfer plan, copy
//! loop, optional checksum verification.
//!
//! The worker knows nothing about sibling executions or the slot count;
//! it only consumes the shared space budget through preflight and reports
//! a typed error for the pool to classify and retry.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::BexError;
use crate::execution::ExecutionId;
use crate::job::{JobSettings, JobSpec};
use crate::preflight::{self, SpaceProbe};
use crate::progress::{Phase, ProgressTracker};
use crate::reserve::SpaceBudget;
use crate::scan::{self, TransferPlan};
use crate::transfer::{self, Deadline, TransferRequest};

/// Mutable per-execution state carried across attempts.
#[derive(Debug, Default)]
pub(crate) struct AttemptState {
    /// Resolved plan; built on the first attempt and reused afterwards so
    /// resume offsets stay aligned.
    pub plan: Option<TransferPlan>,
    /// Durable bytes per plan entry (the resume offsets).
    pub resume: Vec<u64>,
    /// Entries fully copied (distinct from resume so zero-length files
    /// are created exactly once).
    pub completed: Vec<bool>,
    /// Bytes reserved in the shared budget; 0 until the first preflight
    /// pass, then held until the execution terminates.
    pub reserved: u64,
}

impl AttemptState {
    pub fn durable_bytes(&self) -> u64 {
        self.resume.iter().sum()
    }

    pub fn files_done(&self) -> usize {
        self.completed.iter().filter(|c| **c).count()
    }

    /// Forget all progress; the next attempt restarts from offset zero.
    /// Used after a resume mismatch.
    pub fn reset_resume(&mut self) {
        self.resume.iter_mut().for_each(|r| *r = 0);
        self.completed.iter_mut().for_each(|c| *c = false);
    }
}

/// Everything one attempt needs, borrowed from the pool.
pub(crate) struct AttemptEnv<'a> {
    pub exec_id: ExecutionId,
    pub spec: &'a JobSpec,
    pub settings: JobSettings,
    pub tracker: &'a ProgressTracker,
    pub budget: &'a SpaceBudget,
    pub probe: &'a dyn SpaceProbe,
    pub abort: &'a AtomicBool,
    pub deadline: Deadline,
}

impl AttemptEnv<'_> {
    fn check_interrupts(&self) -> Result<(), BexError> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(BexError::Cancelled);
        }
        if self.deadline.exceeded() {
            return Err(self.deadline.as_error());
        }
        Ok(())
    }
}

/// Run one attempt. Blocking; the pool calls this from `spawn_blocking`.
pub(crate) fn run_attempt(env: &AttemptEnv<'_>, state: &mut AttemptState) -> Result<(), BexError> {
    env.check_interrupts()?;
    env.tracker.set_phase(env.exec_id, Phase::Preflight);

    if state.plan.is_none() {
        let plan = scan::build_plan(env.spec)?;
        state.resume = vec![0; plan.entries.len()];
        state.completed = vec![false; plan.entries.len()];
        env.tracker
            .set_totals(env.exec_id, plan.total_bytes, plan.entries.len());
        state.plan = Some(plan);
    }
    let plan = state.plan.as_ref().expect("plan built above");

    // Sources can vanish between attempts; every incomplete entry must
    // still be readable before the destination is touched.
    for (i, entry) in plan.entries.iter().enumerate() {
        if state.completed[i] {
            continue;
        }
        std::fs::metadata(&entry.source).map_err(|e| BexError::SourceUnreachable {
            path: entry.source.clone(),
            source: e,
        })?;
    }

    preflight::check_destination_writable(&env.spec.destination)?;
    let remaining = plan.total_bytes.saturating_sub(state.durable_bytes());
    let reserved_by_others = env.budget.reserved().saturating_sub(state.reserved);
    preflight::check_space(
        env.probe,
        &env.spec.destination,
        remaining,
        env.settings.min_free_space,
        reserved_by_others,
    )?;
    if state.reserved == 0 && plan.total_bytes > 0 {
        env.budget.reserve(plan.total_bytes);
        state.reserved = plan.total_bytes;
    }

    env.check_interrupts()?;
    env.tracker.set_phase(env.exec_id, Phase::Transferring);
    env.tracker
        .begin_attempt(env.exec_id, state.durable_bytes(), state.files_done());

    for i in 0..plan.entries.len() {
        if state.completed[i] {
            continue;
        }
        let entry = &plan.entries[i];
        env.tracker.file_started(env.exec_id, &entry.source);

        let req = TransferRequest {
            source: &entry.source,
            dest: &entry.dest,
            chunk_size: env.settings.chunk_size,
            resume_offset: state.resume[i],
            checksum_chunks: env.spec.verify_checksums,
        };
        let copied = transfer::copy_chunks(req, env.abort, Some(env.deadline), |unit| {
            env.tracker.record(env.exec_id, unit)
        })
        .map_err(|tf| {
            state.resume[i] = tf.flushed;
            tf.error
        })?;

        if copied != entry.len {
            // Source changed size under us; restart this file next attempt.
            state.resume[i] = 0;
            return Err(BexError::Transfer {
                offset: copied,
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "source size changed during copy: {} (copied {copied} of {} bytes)",
                        entry.source.display(),
                        entry.len
                    ),
                ),
            });
        }

        state.resume[i] = entry.len;
        state.completed[i] = true;
        env.tracker.file_done(env.exec_id);
    }

    env.tracker.set_phase(env.exec_id, Phase::Finalizing);
    if env.spec.verify_checksums {
        for i in 0..plan.entries.len() {
            env.check_interrupts()?;
            let entry = &plan.entries[i];
            crate::checksum::verify_copy(&entry.source, &entry.dest).map_err(|e| {
                state.resume[i] = 0;
                state.completed[i] = false;
                e
            })?;
        }
    }

    Ok(())
}
