//! Pause-time histogram (ambient statistics, not one of the seven core
//! components but the kind of observability surface the host expects
//! alongside them).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Logarithmic-bucket histogram of STW pause durations, in microseconds.
pub struct PauseHistogram {
    buckets: Mutex<BTreeMap<u64, u64>>,
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl PauseHistogram {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    pub fn record(&self, value_us: u64) {
        let bucket = Self::bucket_for(value_us);
        if let Ok(mut buckets) = self.buckets.lock() {
            *buckets.entry(bucket).or_insert(0) += 1;
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_us, Ordering::Relaxed);
        crate::util::atomic::fetch_max_u64(&self.max, value_us);

        let mut current_min = self.min.load(Ordering::Relaxed);
        while value_us < current_min {
            match self.min.compare_exchange_weak(
                current_min,
                value_us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_min = actual,
            }
        }
    }

    fn bucket_for(value: u64) -> u64 {
        if value == 0 {
            0
        } else {
            64 - value.leading_zeros() as u64
        }
    }

    pub fn percentile(&self, p: f64) -> u64 {
        let buckets = match self.buckets.lock() {
            Ok(b) => b,
            Err(_) => return 0,
        };
        let total = self.count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        let target = (total as f64 * p) as u64;
        let mut cumulative = 0;
        for (&bucket, &count) in buckets.iter() {
            cumulative += count;
            if cumulative >= target {
                return bucket;
            }
        }
        buckets.keys().next_back().copied().unwrap_or(0)
    }

    pub fn p50(&self) -> u64 {
        self.percentile(0.50)
    }
    pub fn p95(&self) -> u64 {
        self.percentile(0.95)
    }
    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }

    pub fn mean(&self) -> u64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            0
        } else {
            self.sum.load(Ordering::Relaxed) / count
        }
    }

    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        if let Ok(mut buckets) = self.buckets.lock() {
            buckets.clear();
        }
        self.count.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.min.store(u64::MAX, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }
}

impl Default for PauseHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_track_recorded_values() {
        let h = PauseHistogram::new();
        for v in [1, 2, 4, 8, 16, 32, 64] {
            h.record(v);
        }
        assert!(h.p50() <= h.p95());
        assert!(h.p95() <= h.p99());
        assert_eq!(h.max(), 64);
    }
}
