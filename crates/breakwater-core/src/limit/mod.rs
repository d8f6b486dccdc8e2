//! Per-provider request rate limiting.
//!
//! Three interchangeable strategies, selected by the provider profile:
//!
//! - [`SlidingWindowLimiter`]: timestamp log with per-second, burst (10 s),
//!   and UTC-daily caps. Suits providers that publish plain request quotas.
//! - [`TokenBucketLimiter`]: continuously refilled bucket with a fixed-window
//!   fallback. Suits high-throughput providers where short bursts are fine.
//! - [`ComputeUnitLimiter`]: per-method unit costs against a per-second unit
//!   budget, independent of raw request count. Suits metered providers.
//!
//! Every strategy is safe under concurrent `allow`/`record` from multiple
//! in-flight requests: each limiter owns a single mutex-guarded window
//! structure, and the scheduled daily reset takes the same lock so it cannot
//! race concurrent records.
//!
//! The `allow`/`record` split follows the call flow in
//! [`crate::provider::RpcExecutor`]: `allow` is the admission check before a
//! request is sent, `record` books the request once it succeeds. The token
//! bucket is the exception and consumes its token at `allow`, since its
//! contract is "admit while at least one token is available".

mod compute_units;
mod sliding_window;
mod token_bucket;

pub use compute_units::ComputeUnitLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

use crate::config::RateLimitConfig;
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Why a request was denied admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The per-second request cap is met.
    PerSecondCap,
    /// The burst-window request cap is met.
    BurstCap,
    /// The daily quota is exhausted until the next UTC midnight.
    DailyQuota,
    /// The token bucket and its fallback window are both exhausted.
    BucketExhausted,
    /// Admitting the request would exceed the compute-unit budget.
    UnitBudget,
}

impl DenialReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerSecondCap => "per_second_cap",
            Self::BurstCap => "burst_cap",
            Self::DailyQuota => "daily_quota",
            Self::BucketExhausted => "bucket_exhausted",
            Self::UnitBudget => "unit_budget",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission decision returned by [`RateLimiter::allow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Denied, with the earliest duration after which a slot frees up.
    Denied { reason: DenialReason, retry_after: Duration },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Strategy-dispatching rate limiter, one instance per provider.
///
/// Never shared across providers: the client constructs one limiter per
/// configured profile.
#[derive(Debug)]
pub enum RateLimiter {
    SlidingWindow(SlidingWindowLimiter),
    TokenBucket(TokenBucketLimiter),
    ComputeUnits(ComputeUnitLimiter),
}

impl RateLimiter {
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        match config {
            RateLimitConfig::SlidingWindow { requests_per_second, burst_limit, daily_limit } => {
                Self::SlidingWindow(SlidingWindowLimiter::new(
                    *requests_per_second,
                    *burst_limit,
                    *daily_limit,
                ))
            }
            RateLimitConfig::TokenBucket { requests_per_minute, burst_size } => {
                Self::TokenBucket(TokenBucketLimiter::new(*requests_per_minute, *burst_size))
            }
            RateLimitConfig::ComputeUnits { units_per_second, method_costs, default_cost } => {
                Self::ComputeUnits(ComputeUnitLimiter::new(
                    *units_per_second,
                    method_costs.clone(),
                    *default_cost,
                ))
            }
        }
    }

    /// Checks whether a call of `method` may be admitted right now.
    #[must_use]
    pub fn allow(&self, method: &str) -> Decision {
        match self {
            Self::SlidingWindow(limiter) => limiter.allow(),
            Self::TokenBucket(limiter) => limiter.allow(),
            Self::ComputeUnits(limiter) => limiter.allow(method),
        }
    }

    /// Books a successfully executed call of `method`.
    pub fn record(&self, method: &str) {
        match self {
            Self::SlidingWindow(limiter) => limiter.record(),
            Self::TokenBucket(limiter) => limiter.record(),
            Self::ComputeUnits(limiter) => limiter.record(method),
        }
    }

    /// Unit cost a call of `method` will be charged (1 for strategies that
    /// meter raw request counts).
    #[must_use]
    pub fn cost_of(&self, method: &str) -> u64 {
        match self {
            Self::SlidingWindow(_) | Self::TokenBucket(_) => 1,
            Self::ComputeUnits(limiter) => limiter.cost_of(method),
        }
    }

    /// Fraction of the steady-state budget currently consumed, in `0.0..=1.0`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        match self {
            Self::SlidingWindow(limiter) => limiter.utilization(),
            Self::TokenBucket(limiter) => limiter.utilization(),
            Self::ComputeUnits(limiter) => limiter.utilization(),
        }
    }

    /// Resets daily counters. Driven by the client's UTC-midnight timer; takes
    /// the same lock as `record` so the reset cannot race in-flight bookings.
    pub fn reset_daily(&self) {
        if let Self::SlidingWindow(limiter) = self {
            limiter.reset_daily();
        }
    }
}

/// Time remaining until the next UTC midnight, used both for daily-quota
/// `retry_after` values and to schedule the reset timer.
#[must_use]
pub fn until_utc_midnight(now: DateTime<Utc>) -> Duration {
    let next = now
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive));
    match next {
        Some(midnight) => (midnight - now).to_std().unwrap_or_default(),
        // Unreachable before the end of the representable calendar.
        None => Duration::from_secs(86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn from_config_selects_strategy() {
        let sliding = RateLimiter::from_config(&RateLimitConfig::SlidingWindow {
            requests_per_second: 10,
            burst_limit: 50,
            daily_limit: None,
        });
        assert!(matches!(sliding, RateLimiter::SlidingWindow(_)));
        assert_eq!(sliding.cost_of("eth_call"), 1);

        let bucket = RateLimiter::from_config(&RateLimitConfig::TokenBucket {
            requests_per_minute: 600,
            burst_size: 20,
        });
        assert!(matches!(bucket, RateLimiter::TokenBucket(_)));

        let mut costs = HashMap::new();
        costs.insert("eth_getLogs".to_string(), 75);
        let units = RateLimiter::from_config(&RateLimitConfig::ComputeUnits {
            units_per_second: 700,
            method_costs: costs,
            default_cost: 20,
        });
        assert_eq!(units.cost_of("eth_getLogs"), 75);
        assert_eq!(units.cost_of("eth_chainId"), 20);
    }

    #[test]
    fn utc_midnight_arithmetic() {
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 23, 59, 0).unwrap();
        assert_eq!(until_utc_midnight(now), Duration::from_secs(60));

        let start_of_day = Utc.with_ymd_and_hms(2026, 8, 7, 0, 0, 0).unwrap();
        assert_eq!(until_utc_midnight(start_of_day), Duration::from_secs(86_400));
    }
}
