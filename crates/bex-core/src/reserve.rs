//! Shared free-space reservation counter.
//!
//! Each admitted execution reserves its expected total size here before
//! writing anything, so two concurrent jobs cannot both pass preflight
//! against space only one of them can actually use. The reservation is
//! released when the execution reaches a terminal state.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bytes reserved by currently running executions. The counter is the only
/// cross-execution shared mutable state besides the slot count.
#[derive(Debug, Default)]
pub struct SpaceBudget {
    reserved: AtomicU64,
}

impl SpaceBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently reserved across all executions.
    pub fn reserved(&self) -> u64 {
        self.reserved.load(Ordering::Relaxed)
    }

    /// Reserve `bytes` for an execution. Caller must `release` the same
    /// amount when the execution terminates.
    pub fn reserve(&self, bytes: u64) {
        self.reserved.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Release `bytes` back. Clamps at zero so double-release cannot wrap.
    pub fn release(&self, bytes: u64) {
        let mut current = self.reserved.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self.reserved.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release() {
        let budget = SpaceBudget::new();
        assert_eq!(budget.reserved(), 0);
        budget.reserve(1000);
        budget.reserve(500);
        assert_eq!(budget.reserved(), 1500);
        budget.release(1000);
        assert_eq!(budget.reserved(), 500);
        budget.release(500);
        assert_eq!(budget.reserved(), 0);
    }

    #[test]
    fn release_clamps_at_zero() {
        let budget = SpaceBudget::new();
        budget.reserve(100);
        budget.release(1000);
        assert_eq!(budget.reserved(), 0);
    }
}
