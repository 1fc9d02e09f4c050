//! Adaptive RTT histogram that derives the stall timeout for outbound calls
//! (spec.md §4.6). Grounded in the percentile-over-sorted-samples style of
//! the teacher's `DHTPerformanceMonitor` (`lib-network::dht::monitoring`),
//! adapted to a fixed-width bin histogram with exponential decay instead of
//! a sliding window of raw samples.

use std::time::Duration;

use crate::constants::{
    HISTOGRAM_DECAY, RECOMPUTE_EVERY, RPC_CALL_TIMEOUT_MAX, TIMEOUT_BASELINE_MIN,
    TIMEOUT_BIN_COUNT, TIMEOUT_BIN_WIDTH,
};

#[derive(Debug, Clone)]
pub struct TimeoutSampler {
    bins: Vec<f64>,
    updates_since_recompute: u32,
    p10: Duration,
    p90: Duration,
}

impl TimeoutSampler {
    pub fn new() -> Self {
        // Bias toward the maximum at startup: conservative until real RTTs
        // are observed (spec.md §4.6).
        let mut bins = vec![0.0; TIMEOUT_BIN_COUNT];
        *bins.last_mut().unwrap() = 1.0;
        TimeoutSampler {
            bins,
            updates_since_recompute: 0,
            p10: RPC_CALL_TIMEOUT_MAX,
            p90: RPC_CALL_TIMEOUT_MAX,
        }
    }

    fn bin_index(&self, rtt: Duration) -> usize {
        let clamped = rtt.min(RPC_CALL_TIMEOUT_MAX);
        let idx = clamped.as_millis() / TIMEOUT_BIN_WIDTH.as_millis();
        (idx as usize).min(self.bins.len() - 1)
    }

    /// Record a completed call's round-trip time.
    pub fn on_rtt(&mut self, rtt: Duration) {
        let idx = self.bin_index(rtt);
        self.bins[idx] += 1.0;
        self.updates_since_recompute += 1;
        if self.updates_since_recompute >= RECOMPUTE_EVERY {
            self.recompute();
        }
    }

    /// The bins divided by their sum — the §8 "sampler snapshot" percentile
    /// statistics are derived from. Sums to 1 (within float tolerance) as
    /// long as at least one sample has ever been recorded; an untouched
    /// sampler with all-zero bins returns all zeros instead of dividing by 0.
    pub fn normalized_snapshot(&self) -> Vec<f64> {
        let total: f64 = self.bins.iter().sum();
        if total <= 0.0 {
            return vec![0.0; self.bins.len()];
        }
        self.bins.iter().map(|count| count / total).collect()
    }

    fn recompute(&mut self) {
        self.updates_since_recompute = 0;
        let snapshot = self.normalized_snapshot();
        if snapshot.iter().sum::<f64>() > 0.0 {
            self.p10 = Self::percentile(&snapshot, 0.10);
            self.p90 = Self::percentile(&snapshot, 0.90);
        }
        for bin in &mut self.bins {
            *bin *= HISTOGRAM_DECAY;
        }
    }

    /// `snapshot` is normalized (sums to 1), so the target fraction *is* the
    /// cumulative share to reach — no separate `total` multiplier needed.
    fn percentile(snapshot: &[f64], fraction: f64) -> Duration {
        let mut cumulative = 0.0;
        for (i, share) in snapshot.iter().enumerate() {
            cumulative += share;
            if cumulative >= fraction {
                let millis = (i as u64 + 1) * TIMEOUT_BIN_WIDTH.as_millis() as u64;
                return Duration::from_millis(millis).min(RPC_CALL_TIMEOUT_MAX);
            }
        }
        RPC_CALL_TIMEOUT_MAX
    }

    /// `max(p10 + TIMEOUT_BASELINE_MIN, p90)` clamped to the histogram's
    /// ceiling (spec.md §4.6).
    pub fn stall_timeout(&self) -> Duration {
        (self.p10 + TIMEOUT_BASELINE_MIN)
            .max(self.p90)
            .min(RPC_CALL_TIMEOUT_MAX)
    }
}

impl Default for TimeoutSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_conservative_at_the_ceiling() {
        let sampler = TimeoutSampler::new();
        assert_eq!(sampler.stall_timeout(), RPC_CALL_TIMEOUT_MAX);
    }

    #[test]
    fn converges_toward_observed_rtts() {
        let mut sampler = TimeoutSampler::new();
        for _ in 0..64 {
            sampler.on_rtt(Duration::from_millis(120));
        }
        assert!(sampler.stall_timeout() < RPC_CALL_TIMEOUT_MAX);
    }

    #[test]
    fn recomputes_only_every_16_updates() {
        let mut sampler = TimeoutSampler::new();
        for _ in 0..15 {
            sampler.on_rtt(Duration::from_millis(50));
        }
        // Stats haven't been recomputed yet, still at the conservative default.
        assert_eq!(sampler.stall_timeout(), RPC_CALL_TIMEOUT_MAX);
        sampler.on_rtt(Duration::from_millis(50));
        assert!(sampler.stall_timeout() < RPC_CALL_TIMEOUT_MAX);
    }

    #[test]
    fn normalized_snapshot_sums_to_one_after_every_recomputation() {
        let mut sampler = TimeoutSampler::new();
        for i in 0..RECOMPUTE_EVERY * 3 {
            sampler.on_rtt(Duration::from_millis(20 + i as u64 % 200));
            if (i + 1) % RECOMPUTE_EVERY == 0 {
                let sum: f64 = sampler.normalized_snapshot().iter().sum();
                assert!((sum - 1.0).abs() < 1e-9, "sum was {sum}");
            }
        }
    }
}
