//! Retry pacing policies.
//!
//! Each provider declares how long to pause when throttled and how to back
//! off on transient failures. Policies are data, not behavior, so the
//! executor applies them uniformly.

use std::time::Duration;

/// Backoff schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same pause on every attempt
    Fixed(Duration),
    /// `base * 2^attempt`, capped
    Exponential {
        /// Pause before the first retry
        base: Duration,
        /// Upper bound on any single pause
        cap: Duration,
    },
}

/// Retry pacing for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause after an in-band or HTTP throttle signal
    pub rate_limit_pause: Duration,
    /// Backoff schedule for transient errors
    pub transient_backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed pauses for both throttling and transient errors.
    pub fn fixed(rate_limit_pause: Duration, transient_pause: Duration) -> Self {
        Self {
            rate_limit_pause,
            transient_backoff: Backoff::Fixed(transient_pause),
        }
    }

    /// Exponential transient backoff with the given base and cap.
    pub fn exponential(rate_limit_pause: Duration, base: Duration, cap: Duration) -> Self {
        Self {
            rate_limit_pause,
            transient_backoff: Backoff::Exponential { base, cap },
        }
    }

    /// Pause before retrying the `attempt`-th transient failure
    /// (zero-based).
    pub fn transient_delay(&self, attempt: u32) -> Duration {
        match self.transient_backoff {
            Backoff::Fixed(pause) => pause,
            Backoff::Exponential { base, cap } => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                base.checked_mul(factor).map_or(cap, |d| d.min(cap))
            }
        }
    }
}
