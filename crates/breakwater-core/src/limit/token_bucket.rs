//! Token-bucket rate limiter with a fixed-window fallback.

use super::{Decision, DenialReason};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Span of the fallback fixed window.
const FALLBACK_WINDOW: Duration = Duration::from_secs(1);

/// Bucket of `burst_size` tokens refilled continuously at
/// `requests_per_minute / 60_000` tokens per millisecond.
///
/// `allow` consumes a token when one is available. When the bucket is empty it
/// falls back to a fixed one-second window check against the per-second share
/// of the configured rate, denying only when both are exhausted. Every
/// admission is logged in the fallback window so a drained bucket cannot be
/// bypassed through the fallback path.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    burst_size: u32,
    /// Tokens added per elapsed millisecond.
    refill_per_ms: f64,
    /// Per-second cap used by the fallback window.
    per_second: u32,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    /// Admission timestamps within the fallback window.
    window: VecDeque<Instant>,
}

impl TokenBucketLimiter {
    #[must_use]
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self {
            burst_size,
            refill_per_ms: f64::from(requests_per_minute) / 60_000.0,
            per_second: (requests_per_minute / 60).max(1),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst_size),
                last_refill: Instant::now(),
                window: VecDeque::new(),
            }),
        }
    }

    /// Admits while at least one token is available, consuming it; otherwise
    /// consults the fallback window.
    #[must_use]
    pub fn allow(&self) -> Decision {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        Self::prune(&mut state.window, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.window.push_back(now);
            return Decision::Allowed;
        }

        // Bucket drained: admit through the fixed window only while the
        // trailing second is below the steady-state rate.
        if (state.window.len() as u32) < self.per_second {
            state.window.push_back(now);
            return Decision::Allowed;
        }

        let millis_until_token = ((1.0 - state.tokens) / self.refill_per_ms).ceil().max(1.0);
        Decision::Denied {
            reason: DenialReason::BucketExhausted,
            retry_after: Duration::from_millis(millis_until_token as u64),
        }
    }

    /// Bookkeeping hook for symmetry with the other strategies; consumption
    /// already happened at `allow`.
    pub fn record(&self) {}

    /// Fraction of the bucket currently drained.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        1.0 - (state.tokens / f64::from(self.burst_size.max(1))).clamp(0.0, 1.0)
    }

    /// Tokens currently available (for tests and dashboards).
    #[must_use]
    pub fn available_tokens(&self) -> f64 {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(state.last_refill).as_secs_f64() * 1_000.0;
        if elapsed_ms > 0.0 {
            state.tokens =
                (state.tokens + elapsed_ms * self.refill_per_ms).min(f64::from(self.burst_size));
            state.last_refill = now;
        }
    }

    fn prune(window: &mut VecDeque<Instant>, now: Instant) {
        let floor = now.checked_sub(FALLBACK_WINDOW).unwrap_or(now);
        while let Some(&front) = window.front() {
            if front <= floor {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_size_bounds_consecutive_admissions() {
        // 10 rps steady state, burst of 20. A tight loop of 25 attempts must
        // admit exactly the burst and deny the rest with a nonzero retry.
        let limiter = TokenBucketLimiter::new(600, 20);

        let mut admitted = 0u32;
        let mut denied = 0u32;
        for _ in 0..25 {
            match limiter.allow() {
                Decision::Allowed => admitted += 1,
                Decision::Denied { reason, retry_after } => {
                    denied += 1;
                    assert_eq!(reason, DenialReason::BucketExhausted);
                    assert!(retry_after > Duration::ZERO);
                }
            }
        }

        assert_eq!(admitted, 20);
        assert_eq!(denied, 5);
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        // 600 rpm = 10 tokens per second.
        let limiter = TokenBucketLimiter::new(600, 5);

        for _ in 0..5 {
            assert!(limiter.allow().is_allowed());
        }
        // Bucket empty and window holds 5 admissions; per-second share is 10,
        // so the fallback still admits a handful before denying.
        for _ in 0..5 {
            let _ = limiter.allow();
        }
        assert!(!limiter.allow().is_allowed());

        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert!(limiter.allow().is_allowed());
    }

    #[test]
    fn fallback_window_counts_every_admission() {
        // Steady-state 1 rps with a burst of 2: after the burst drains, the
        // fallback window already holds 2 admissions and must deny.
        let limiter = TokenBucketLimiter::new(60, 2);

        assert!(limiter.allow().is_allowed());
        assert!(limiter.allow().is_allowed());
        assert!(!limiter.allow().is_allowed());
    }

    #[test]
    fn utilization_reflects_drain() {
        let limiter = TokenBucketLimiter::new(60, 10);
        assert!(limiter.utilization() < 0.01);

        for _ in 0..5 {
            let _ = limiter.allow();
        }
        let utilization = limiter.utilization();
        assert!((0.4..=0.6).contains(&utilization), "got {utilization}");
    }
}
