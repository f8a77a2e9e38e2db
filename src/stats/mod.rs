//! Allocation statistics: large-object frequency top-k and free-chunk
//! size-class histogram.
//!
//! A single [`AllocationStats`] is shared by every allocating thread. The
//! space-saving ranking tracks which large-object sizes recur most often
//! (useful for tuning region layout and TLH sizing); the free-entry
//! histogram classifies the sweep/free-list's chunks by size so a caller can
//! see how fragmented the heap has become without scanning it.

pub mod histogram;
pub mod metrics;
pub mod pause_histogram;
pub mod spacesaving;
pub mod timer;

pub use histogram::FreeEntrySizeClassHistogram;
pub use metrics::{GcMetrics, MetricValue};
pub use pause_histogram::PauseHistogram;
pub use spacesaving::SpaceSaving;
pub use timer::{GcTimer, ScopedTimer};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::GcSubstrateConfig;

/// Builds `count` ascending size-class boundaries between `min` and `max`
/// (inclusive of `min`), roughly doubling at each step and always landing
/// exactly on `max` for the final boundary.
fn default_size_class_boundaries(count: usize, min: usize, max: usize) -> Vec<usize> {
    assert!(count >= 1);
    if count == 1 {
        return vec![min.max(1)];
    }
    let min = min.max(1);
    let max = max.max(min + count - 1);
    let ratio = (max as f64 / min as f64).powf(1.0 / (count - 1) as f64);
    let mut boundaries = Vec::with_capacity(count);
    let mut prev = 0usize;
    for i in 0..count {
        let raw = (min as f64 * ratio.powi(i as i32)).round() as usize;
        let next = if i == count - 1 { max } else { raw };
        let next = next.max(prev + 1);
        boundaries.push(next);
        prev = next;
    }
    boundaries
}

/// Central allocation-statistics collector for the substrate.
pub struct AllocationStats {
    object_size_ranking: Mutex<SpaceSaving<usize>>,
    free_entries: FreeEntrySizeClassHistogram,
    pause_times: PauseHistogram,
    bytes_allocated: AtomicU64,
    objects_allocated: AtomicU64,
    sampling_rate: u8,
    sample_counter: AtomicU64,
}

impl AllocationStats {
    pub fn new(config: &GcSubstrateConfig) -> Self {
        let very_large = config.large_object_allocation_profiling_very_large_object_size_class;
        let boundaries =
            default_size_class_boundaries(config.free_entry_size_classes, config.object_alignment, very_large);
        Self {
            object_size_ranking: Mutex::new(SpaceSaving::new(config.space_saving_capacity)),
            free_entries: FreeEntrySizeClassHistogram::new(boundaries, very_large, config.space_saving_capacity),
            pause_times: PauseHistogram::new(),
            bytes_allocated: AtomicU64::new(0),
            objects_allocated: AtomicU64::new(0),
            sampling_rate: config.frequent_object_allocation_sampling_rate.max(1),
            sample_counter: AtomicU64::new(0),
        }
    }

    /// Records one object allocation of `size` bytes. Sampled at
    /// `1/sampling_rate` for the space-saving ranking to bound overhead on
    /// the hot allocation path; byte/object totals are always exact.
    pub fn record_allocation(&self, size: usize) {
        self.bytes_allocated.fetch_add(size as u64, Ordering::Relaxed);
        self.objects_allocated.fetch_add(1, Ordering::Relaxed);

        let sample = self.sample_counter.fetch_add(1, Ordering::Relaxed);
        if sample % self.sampling_rate as u64 == 0 {
            if let Ok(mut ranking) = self.object_size_ranking.lock() {
                ranking.update(size, 1);
            }
        }
    }

    pub fn record_free_entry(&self, size: usize) {
        self.free_entries.record(size);
    }

    pub fn remove_free_entry(&self, size: usize) {
        self.free_entries.remove(size);
    }

    pub fn record_pause(&self, duration_us: u64) {
        self.pause_times.record(duration_us);
    }

    /// The `k` most frequently allocated object sizes, descending.
    pub fn top_allocation_sizes(&self, k: usize) -> Vec<(usize, u64)> {
        self.object_size_ranking
            .lock()
            .map(|r| r.kth_highest(k))
            .unwrap_or_default()
    }

    pub fn free_entry_histogram(&self) -> &FreeEntrySizeClassHistogram {
        &self.free_entries
    }

    pub fn pause_histogram(&self) -> &PauseHistogram {
        &self.pause_times
    }

    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    pub fn objects_allocated(&self) -> u64 {
        self.objects_allocated.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> AllocationStatsSnapshot {
        let capacity = self.object_size_ranking.lock().map(|r| r.capacity()).unwrap_or(0);
        AllocationStatsSnapshot {
            bytes_allocated: self.bytes_allocated(),
            objects_allocated: self.objects_allocated(),
            top_sizes: self.top_allocation_sizes(capacity),
            pause_p50_us: self.pause_times.p50(),
            pause_p99_us: self.pause_times.p99(),
        }
    }

    /// Renders the current counters (and top allocation sizes) into a
    /// [`GcMetrics`] exporter, for hosts that surface GC stats to Prometheus
    /// or similar without reading `snapshot()` directly.
    pub fn export_metrics(&self) -> GcMetrics {
        let metrics = GcMetrics::new();
        let _ = metrics.add("gc_bytes_allocated".into(), MetricValue::Counter(self.bytes_allocated()));
        let _ = metrics.add("gc_objects_allocated".into(), MetricValue::Counter(self.objects_allocated()));
        let _ = metrics.add("gc_pause_p50_us".into(), MetricValue::Gauge(self.pause_times.p50() as f64));
        let _ = metrics.add("gc_pause_p99_us".into(), MetricValue::Gauge(self.pause_times.p99() as f64));
        for (size, count) in self.top_allocation_sizes(1) {
            let _ = metrics.add(format!("gc_top_allocation_size_{size}"), MetricValue::Counter(count));
        }
        metrics
    }

    pub fn reset(&self) {
        self.bytes_allocated.store(0, Ordering::Relaxed);
        self.objects_allocated.store(0, Ordering::Relaxed);
        self.sample_counter.store(0, Ordering::Relaxed);
        if let Ok(mut ranking) = self.object_size_ranking.lock() {
            ranking.clear();
        }
        self.free_entries.clear();
        self.pause_times.clear();
    }
}

#[derive(Debug, Clone, Default)]
pub struct AllocationStatsSnapshot {
    pub bytes_allocated: u64,
    pub objects_allocated: u64,
    pub top_sizes: Vec<(usize, u64)>,
    pub pause_p50_us: u64,
    pub pause_p99_us: u64,
}
