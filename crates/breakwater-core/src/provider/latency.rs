//! Rolling latency statistics per provider.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Lock-free ring buffer of recent latency samples.
///
/// `record` is called on every successful request from multiple tasks
/// concurrently, so the buffer uses atomics throughout; readers compute
/// averages and percentiles on demand from a snapshot of the slots.
/// Approximate values are acceptable here - the numbers feed health
/// snapshots and dashboards, not control flow with hard invariants.
#[derive(Debug)]
pub struct LatencyTracker {
    /// Sample slots; zero means "never written".
    samples: Box<[AtomicU64]>,
    max_samples: usize,
    /// Next write position; wraps at `max_samples`.
    write_index: AtomicUsize,
    /// Number of valid samples, capped at `max_samples`.
    count: AtomicUsize,
}

impl LatencyTracker {
    #[must_use]
    pub fn new(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        let samples = (0..max_samples).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();
        Self {
            samples: samples.into_boxed_slice(),
            max_samples,
            write_index: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        }
    }

    /// Records one latency sample in milliseconds.
    ///
    /// Zero samples are clamped to 1 so a sub-millisecond response is not
    /// mistaken for an empty slot.
    pub fn record(&self, latency_ms: u64) {
        let index = self.write_index.fetch_add(1, Ordering::Relaxed) % self.max_samples;
        let old = self.samples[index].swap(latency_ms.max(1), Ordering::Relaxed);
        if old == 0 {
            self.count
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                    Some(c.saturating_add(1).min(self.max_samples))
                })
                .ok();
        }
    }

    /// Rolling average over the current window, or `None` with no samples.
    #[must_use]
    pub fn average(&self) -> Option<u64> {
        let values = self.snapshot();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<u64>() / values.len() as u64)
    }

    /// Percentile in `0.0..=1.0` over the current window.
    #[must_use]
    pub fn percentile(&self, quantile: f64) -> Option<u64> {
        if !(0.0..=1.0).contains(&quantile) {
            return None;
        }
        let mut values = self.snapshot();
        if values.is_empty() {
            return None;
        }
        values.sort_unstable();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = ((values.len() as f64 - 1.0) * quantile) as usize;
        Some(values[index])
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> Vec<u64> {
        let count = self.count.load(Ordering::Relaxed);
        self.samples
            .iter()
            .take(count)
            .map(|slot| slot.load(Ordering::Relaxed))
            .filter(|&v| v > 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_over_samples() {
        let tracker = LatencyTracker::new(100);
        tracker.record(100);
        tracker.record(200);
        tracker.record(300);

        assert_eq!(tracker.sample_count(), 3);
        assert_eq!(tracker.average(), Some(200));
    }

    #[test]
    fn percentiles() {
        let tracker = LatencyTracker::new(100);
        for i in 1..=100 {
            tracker.record(i);
        }

        assert_eq!(tracker.percentile(0.50), Some(50));
        assert_eq!(tracker.percentile(0.95), Some(95));
        assert_eq!(tracker.percentile(0.99), Some(99));
        assert_eq!(tracker.percentile(1.5), None);
    }

    #[test]
    fn window_slides_over_old_samples() {
        let tracker = LatencyTracker::new(10);
        for i in 1..=10 {
            tracker.record(i);
        }
        tracker.record(1_000);
        tracker.record(2_000);

        assert_eq!(tracker.sample_count(), 10);
        assert!(tracker.average().unwrap() > 10);
    }

    #[test]
    fn empty_tracker_reports_none() {
        let tracker = LatencyTracker::new(10);
        assert_eq!(tracker.average(), None);
        assert_eq!(tracker.percentile(0.5), None);
    }
}
