//! Compute-unit budgeting for metered providers.

use super::{Decision, DenialReason};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Span of one budgeting bucket.
const BUCKET_WINDOW: Duration = Duration::from_secs(1);

/// Meters request cost in provider-defined compute units rather than raw
/// request counts.
///
/// Each method has a fixed unit cost from the profile's lookup table, with a
/// default for unknown methods. `allow` denies when the units already recorded
/// in the current one-second bucket plus the incoming cost would exceed the
/// per-second budget.
#[derive(Debug)]
pub struct ComputeUnitLimiter {
    units_per_second: u64,
    costs: AHashMap<String, u64>,
    default_cost: u64,
    state: Mutex<UnitState>,
}

#[derive(Debug)]
struct UnitState {
    bucket_start: Instant,
    used: u64,
}

impl ComputeUnitLimiter {
    #[must_use]
    pub fn new(units_per_second: u64, costs: HashMap<String, u64>, default_cost: u64) -> Self {
        Self {
            units_per_second,
            costs: costs.into_iter().collect(),
            default_cost,
            state: Mutex::new(UnitState { bucket_start: Instant::now(), used: 0 }),
        }
    }

    /// Unit cost charged for `method`.
    #[must_use]
    pub fn cost_of(&self, method: &str) -> u64 {
        self.costs.get(method).copied().unwrap_or(self.default_cost)
    }

    /// Admits unless the incoming cost would overflow the current bucket.
    ///
    /// A single method costing more than the whole budget is still admitted
    /// into an empty bucket; otherwise it could never run at all.
    #[must_use]
    pub fn allow(&self, method: &str) -> Decision {
        let cost = self.cost_of(method);
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::roll(&mut state, now);

        if state.used > 0 && state.used.saturating_add(cost) > self.units_per_second {
            return Decision::Denied {
                reason: DenialReason::UnitBudget,
                retry_after: (state.bucket_start + BUCKET_WINDOW).saturating_duration_since(now),
            };
        }

        Decision::Allowed
    }

    /// Books the unit cost of an executed call into the current bucket.
    pub fn record(&self, method: &str) {
        let cost = self.cost_of(method);
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::roll(&mut state, now);
        state.used = state.used.saturating_add(cost);
    }

    /// Fraction of the current bucket's budget consumed.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::roll(&mut state, now);
        (state.used as f64 / self.units_per_second.max(1) as f64).min(1.0)
    }

    fn roll(state: &mut UnitState, now: Instant) {
        if now.saturating_duration_since(state.bucket_start) >= BUCKET_WINDOW {
            state.bucket_start = now;
            state.used = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(budget: u64) -> ComputeUnitLimiter {
        let mut costs = HashMap::new();
        costs.insert("eth_getLogs".to_string(), 75);
        costs.insert("eth_chainId".to_string(), 1);
        ComputeUnitLimiter::new(budget, costs, 20)
    }

    #[test]
    fn budget_counts_units_not_requests() {
        // Budget of 100: one eth_getLogs (75) plus one default-cost call (20)
        // fits; a second default call (total 115) does not.
        let limiter = limiter(100);

        assert!(limiter.allow("eth_getLogs").is_allowed());
        limiter.record("eth_getLogs");

        assert!(limiter.allow("eth_getBalance").is_allowed());
        limiter.record("eth_getBalance");

        match limiter.allow("eth_getBalance") {
            Decision::Denied { reason, retry_after } => {
                assert_eq!(reason, DenialReason::UnitBudget);
                assert!(retry_after <= BUCKET_WINDOW);
            }
            Decision::Allowed => panic!("unit budget must deny"),
        }

        // Cheap methods still fit in the remaining 5 units.
        assert!(limiter.allow("eth_chainId").is_allowed());
    }

    #[test]
    fn unknown_methods_use_default_cost() {
        let limiter = limiter(1_000);
        assert_eq!(limiter.cost_of("eth_call"), 20);
        assert_eq!(limiter.cost_of("eth_getLogs"), 75);
    }

    #[test]
    fn oversized_method_admitted_into_empty_bucket() {
        let limiter = limiter(50);
        // 75 > 50, but the bucket is empty.
        assert!(limiter.allow("eth_getLogs").is_allowed());
        limiter.record("eth_getLogs");
        // Bucket is now past budget; everything else waits for the roll.
        assert!(!limiter.allow("eth_chainId").is_allowed());
    }

    #[tokio::test]
    async fn bucket_rolls_after_a_second() {
        let limiter = limiter(40);
        limiter.record("eth_getBalance");
        limiter.record("eth_getBalance");
        assert!(!limiter.allow("eth_getBalance").is_allowed());

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert!(limiter.allow("eth_getBalance").is_allowed());
        assert!(limiter.utilization() < f64::EPSILON);
    }
}
