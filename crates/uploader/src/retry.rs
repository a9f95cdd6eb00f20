//! Retry classification and backoff.

use std::time::Duration;

use crate::error::SendFailure;

/// HTTP statuses worth retrying: timeouts, throttling, and transient
/// server-side failures.
const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Exponential backoff with a hard cap and bounded jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Ceiling on any single delay.
    pub cap: Duration,
    /// Total attempts per chunk (first try included).
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Whether a failed send should be retried at all.
    pub fn is_retryable(&self, failure: &SendFailure) -> bool {
        match failure {
            SendFailure::Transport(_) | SendFailure::Timeout => true,
            SendFailure::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            SendFailure::Cancelled => false,
        }
    }

    /// Delay before retry `attempt` (0-based): `base * 2^attempt` plus
    /// up to 10% jitter, capped at `cap`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.base.as_secs_f64() * 2f64.powi(attempt.min(63) as i32);
        let with_jitter = backoff * (1.0 + 0.1 * jitter_fraction());
        Duration::from_secs_f64(with_jitter.min(self.cap.as_secs_f64()))
    }
}

/// Uniform-ish fraction in `[0, 1)` derived from the clock's subsecond
/// nanos; good enough to de-synchronize retry storms without a rand
/// dependency.
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos) / f64::from(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> SendFailure {
        SendFailure::Status {
            status: code,
            message: String::new(),
        }
    }

    #[test]
    fn transport_and_timeout_are_retryable() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&SendFailure::Transport("reset".into())));
        assert!(policy.is_retryable(&SendFailure::Timeout));
    }

    #[test]
    fn retryable_status_set() {
        let policy = RetryPolicy::default();
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(policy.is_retryable(&status(code)), "code {code}");
        }
        for code in [400, 401, 403, 404, 413, 415] {
            assert!(!policy.is_retryable(&status(code)), "code {code}");
        }
    }

    #[test]
    fn cancellation_never_retries() {
        assert!(!RetryPolicy::default().is_retryable(&SendFailure::Cancelled));
    }

    #[test]
    fn delay_is_within_ten_percent_of_exponential() {
        let policy = RetryPolicy {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(30),
            max_attempts: 10,
        };
        for k in 0..8u32 {
            let expected = 0.1 * f64::from(1u32 << k);
            let delay = policy.delay_for(k).as_secs_f64();
            assert!(
                delay >= expected && delay <= expected * 1.1 + 1e-9,
                "attempt {k}: {delay:.4}s not in [{expected:.4}, {:.4}]",
                expected * 1.1
            );
        }
    }

    #[test]
    fn delay_never_exceeds_cap() {
        let policy = RetryPolicy::default();
        for k in 0..32u32 {
            assert!(policy.delay_for(k) <= Duration::from_secs(30), "attempt {k}");
        }
    }

    #[test]
    fn large_attempt_numbers_do_not_overflow() {
        let policy = RetryPolicy::default();
        let d = policy.delay_for(u32::MAX);
        assert!(d <= policy.cap);
    }
}
