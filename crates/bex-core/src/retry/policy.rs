use std::time::Duration;

use crate::error::FailureKind;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry; surface the failure as terminal.
    GiveUp,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Fixed-delay retry policy.
///
/// Deliberately not exponential: the configuration exposes a single
/// `retry_delay_seconds`, and space or transient I/O failures are retried
/// at that fixed spacing. Keeping `delay` a plain field leaves room to
/// split it per failure kind later.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub retry_attempts: u32,
    /// Fixed delay before each retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Whether a failure of this kind may be retried at all.
    ///
    /// Resume mismatches are retryable but force a restart from offset
    /// zero; permission and unreachable failures never self-resolve within
    /// seconds, and cancellation/timeout are terminal by definition.
    pub fn retryable(kind: FailureKind) -> bool {
        matches!(
            kind,
            FailureKind::Transfer | FailureKind::ResumeMismatch | FailureKind::SpaceExhausted
        )
    }

    /// Decide what to do after a failed attempt. `attempts_used` is the
    /// number of attempts completed so far (1 = the first attempt just
    /// failed); total attempts never exceed `retry_attempts + 1`.
    pub fn decide(&self, kind: FailureKind, attempts_used: u32) -> RetryDecision {
        if !Self::retryable(kind) {
            return RetryDecision::GiveUp;
        }
        if attempts_used > self.retry_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_retry_at_fixed_delay() {
        let p = RetryPolicy::default();
        for kind in [
            FailureKind::Transfer,
            FailureKind::ResumeMismatch,
            FailureKind::SpaceExhausted,
        ] {
            assert_eq!(
                p.decide(kind, 1),
                RetryDecision::RetryAfter(Duration::from_secs(5))
            );
            // Fixed, not exponential: same delay on a later attempt.
            assert_eq!(
                p.decide(kind, 3),
                RetryDecision::RetryAfter(Duration::from_secs(5))
            );
        }
    }

    #[test]
    fn terminal_kinds_never_retry() {
        let p = RetryPolicy::default();
        for kind in [
            FailureKind::Cancelled,
            FailureKind::Timeout,
            FailureKind::PermissionDenied,
            FailureKind::SourceUnreachable,
        ] {
            assert_eq!(p.decide(kind, 1), RetryDecision::GiveUp);
        }
    }

    #[test]
    fn gives_up_when_retries_exhausted() {
        let p = RetryPolicy {
            retry_attempts: 3,
            delay: Duration::from_secs(5),
        };
        assert!(matches!(
            p.decide(FailureKind::Transfer, 3),
            RetryDecision::RetryAfter(_)
        ));
        // Fourth failure means 3 retries are spent.
        assert_eq!(p.decide(FailureKind::Transfer, 4), RetryDecision::GiveUp);
    }

    #[test]
    fn zero_retries_fails_immediately() {
        let p = RetryPolicy {
            retry_attempts: 0,
            delay: Duration::ZERO,
        };
        assert_eq!(p.decide(FailureKind::Transfer, 1), RetryDecision::GiveUp);
    }
}
