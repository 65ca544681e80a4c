//! Retry policy for failed scrape jobs.
//!
//! One pure function decides every retry: given the job's retry state and the
//! failure kind, either schedule another attempt after an exponential backoff
//! or declare the job exhausted. Workers apply the decision; they never
//! compute delays themselves.

use std::time::Duration;

/// Classified failure reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network error, timeout, or non-2xx without a body.
    Transport,
    /// Upstream answered with a login page; session was re-ensured.
    AuthExpired,
    /// Upstream throttling (429 or a null first page).
    RateLimited,
    /// JSON shape mismatch.
    Decode,
    /// Malformed payload or unknown target; retrying cannot help.
    Fatal,
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay.
    Retry { delay: Duration },
    /// Stop retrying; mark the job exhausted.
    Exhaust,
}

/// Decode failures get a tighter attempt budget than transient failures: a
/// shape mismatch that survives a few retries is upstream drift, not noise.
const DECODE_RETRY_CAP: i32 = 3;

/// Rate-limited retries never come back faster than this.
const RATE_LIMITED_FLOOR: Duration = Duration::from_secs(2 * 60);

/// Exponential backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First retry delay; doubles on each subsequent retry.
    pub base: Duration,
    /// Upper bound on any computed delay.
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Decide what to do after a failure.
    ///
    /// `retry_count` is the job's count *before* this failure; the delay for
    /// attempt `r` is `base * 2^r` clamped to the cap.
    pub fn decide(&self, retry_count: i32, max_retries: i32, kind: FailureKind) -> RetryDecision {
        if kind == FailureKind::Fatal {
            return RetryDecision::Exhaust;
        }

        let effective_max = if kind == FailureKind::Decode {
            max_retries.min(DECODE_RETRY_CAP)
        } else {
            max_retries
        };

        if retry_count >= effective_max {
            return RetryDecision::Exhaust;
        }

        let exponent = u32::try_from(retry_count).unwrap_or(0).min(20);
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap);

        let delay = if kind == FailureKind::RateLimited {
            delay.max(RATE_LIMITED_FLOOR).min(self.cap)
        } else {
            delay
        };

        RetryDecision::Retry { delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(30), Duration::from_secs(30 * 60))
    }

    #[test]
    fn delay_doubles_per_retry() {
        let p = policy();
        for (count, expected_secs) in [(0, 30), (1, 60), (2, 120), (3, 240)] {
            match p.decide(count, 5, FailureKind::Transport) {
                RetryDecision::Retry { delay } => assert_eq!(delay.as_secs(), expected_secs),
                RetryDecision::Exhaust => panic!("unexpected exhaust at retry {count}"),
            }
        }
    }

    #[test]
    fn delay_clamped_to_cap() {
        let p = policy();
        // 30s * 2^10 would be far past the 30 minute cap
        match p.decide(10, 20, FailureKind::Transport) {
            RetryDecision::Retry { delay } => assert_eq!(delay, p.cap),
            RetryDecision::Exhaust => panic!("unexpected exhaust"),
        }
    }

    #[test]
    fn delay_bounds_hold_for_all_counts() {
        let p = policy();
        for count in 0..20 {
            if let RetryDecision::Retry { delay } = p.decide(count, 25, FailureKind::Transport) {
                let lower = p
                    .base
                    .checked_mul(1u32 << count.min(20) as u32)
                    .unwrap_or(p.cap)
                    .min(p.cap);
                assert!(delay >= lower.min(p.cap));
                assert!(delay <= p.cap);
            }
        }
    }

    #[test]
    fn exhaust_at_max_retries() {
        let p = policy();
        assert_eq!(
            p.decide(5, 5, FailureKind::Transport),
            RetryDecision::Exhaust
        );
        assert_eq!(
            p.decide(6, 5, FailureKind::Transport),
            RetryDecision::Exhaust
        );
    }

    #[test]
    fn fatal_exhausts_immediately() {
        let p = policy();
        assert_eq!(p.decide(0, 5, FailureKind::Fatal), RetryDecision::Exhaust);
    }

    #[test]
    fn decode_retries_capped() {
        let p = policy();
        assert!(matches!(
            p.decide(2, 10, FailureKind::Decode),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(p.decide(3, 10, FailureKind::Decode), RetryDecision::Exhaust);
    }

    #[test]
    fn rate_limited_has_floor() {
        let p = policy();
        match p.decide(0, 5, FailureKind::RateLimited) {
            RetryDecision::Retry { delay } => {
                assert!(delay >= Duration::from_secs(2 * 60));
                assert!(delay <= p.cap);
            }
            RetryDecision::Exhaust => panic!("unexpected exhaust"),
        }
    }

    #[test]
    fn third_retry_is_two_minutes() {
        // base=30s, retry_count=2 before the failure: next delay is 4 * 30s.
        let p = policy();
        match p.decide(2, 5, FailureKind::Transport) {
            RetryDecision::Retry { delay } => assert_eq!(delay, Duration::from_secs(120)),
            RetryDecision::Exhaust => panic!("unexpected exhaust"),
        }
    }
}
