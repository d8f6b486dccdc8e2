//! Sliding-window rate limiter.

use super::{until_utc_midnight, Decision, DenialReason};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Span of the per-second window.
const SECOND_WINDOW: Duration = Duration::from_secs(1);

/// Span of the burst window.
const BURST_WINDOW: Duration = Duration::from_secs(10);

/// Timestamp-log limiter with three caps: requests in the last second,
/// requests in the last ten seconds, and requests since the last UTC
/// midnight.
///
/// The log is pruned on every operation so memory stays bounded by the burst
/// cap regardless of traffic shape. `allow` is a pure admission check; the
/// executor books admitted requests with [`record`](Self::record) once they
/// succeed.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    requests_per_second: u32,
    burst_limit: u32,
    daily_limit: Option<u64>,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    /// Timestamps of recorded requests, oldest first; pruned to the burst
    /// window span.
    log: VecDeque<Instant>,
    /// Requests recorded since the last UTC midnight reset.
    daily_count: u64,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(requests_per_second: u32, burst_limit: u32, daily_limit: Option<u64>) -> Self {
        Self {
            requests_per_second,
            burst_limit,
            daily_limit,
            state: Mutex::new(WindowState {
                log: VecDeque::with_capacity(burst_limit as usize),
                daily_count: 0,
            }),
        }
    }

    /// Checks all three caps, returning the earliest time a slot frees up on
    /// denial.
    #[must_use]
    pub fn allow(&self) -> Decision {
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::prune(&mut state.log, now);

        if let Some(daily_limit) = self.daily_limit {
            if state.daily_count >= daily_limit {
                return Decision::Denied {
                    reason: DenialReason::DailyQuota,
                    retry_after: until_utc_midnight(chrono::Utc::now()),
                };
            }
        }

        let second_floor = now.checked_sub(SECOND_WINDOW).unwrap_or(now);
        let in_last_second =
            state.log.iter().rev().take_while(|&&ts| ts > second_floor).count() as u32;
        if in_last_second >= self.requests_per_second {
            // The oldest request inside the one-second window frees a slot
            // when it ages out.
            let oldest_in_second = state
                .log
                .iter()
                .find(|&&ts| ts > second_floor)
                .copied()
                .unwrap_or(now);
            return Decision::Denied {
                reason: DenialReason::PerSecondCap,
                retry_after: (oldest_in_second + SECOND_WINDOW).saturating_duration_since(now),
            };
        }

        if state.log.len() as u32 >= self.burst_limit {
            let oldest = state.log.front().copied().unwrap_or(now);
            return Decision::Denied {
                reason: DenialReason::BurstCap,
                retry_after: (oldest + BURST_WINDOW).saturating_duration_since(now),
            };
        }

        Decision::Allowed
    }

    /// Books one executed request.
    pub fn record(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::prune(&mut state.log, now);
        state.log.push_back(now);
        state.daily_count = state.daily_count.saturating_add(1);
    }

    /// Fraction of the per-second cap currently consumed.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        let now = Instant::now();
        let state = self.state.lock();
        let second_floor = now.checked_sub(SECOND_WINDOW).unwrap_or(now);
        let in_last_second = state.log.iter().rev().take_while(|&&ts| ts > second_floor).count();
        (in_last_second as f64 / f64::from(self.requests_per_second.max(1))).min(1.0)
    }

    /// Requests recorded since the last daily reset.
    #[must_use]
    pub fn daily_count(&self) -> u64 {
        self.state.lock().daily_count
    }

    /// Clears the daily counter. Called at UTC midnight by the client's
    /// scheduler; holds the window lock so it cannot race `record`.
    pub fn reset_daily(&self) {
        self.state.lock().daily_count = 0;
    }

    fn prune(log: &mut VecDeque<Instant>, now: Instant) {
        let floor = now.checked_sub(BURST_WINDOW).unwrap_or(now);
        while let Some(&front) = log.front() {
            if front <= floor {
                log.pop_front();
            } else {
                break;
            }
        }
    }
}
