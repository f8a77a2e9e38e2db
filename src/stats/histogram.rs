//! Free-entry size-class histogram with a frequent-exact-size overlay.
//!
//! The sweep/free-list walk classifies every free chunk into one of a fixed
//! set of size classes (the boundaries configured by
//! [`crate::config::GcSubstrateConfig::free_entry_size_classes`]) and bumps a
//! per-class counter. Above a configurable threshold, "very large" chunks are
//! additionally tracked at their exact size in an overlay so a caller can ask
//! "how many free chunks of exactly N bytes do I have" instead of only
//! "how many free chunks in size range [N, M)". The overlay is capacity
//! bounded: entries are held in a `BTreeMap` (so iteration is naturally
//! strictly increasing in size) and entries whose count drops to zero are
//! dropped, returning that slot to capacity.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Size-class boundaries plus an overlay capacity for very-large exact sizes.
pub struct FreeEntrySizeClassHistogram {
    /// Ascending boundaries; class `i` covers `[boundaries[i], boundaries[i+1])`,
    /// the last class covers `[boundaries[last], infinity)`.
    boundaries: Vec<usize>,
    class_counts: Vec<AtomicU64>,
    class_bytes: Vec<AtomicU64>,
    very_large_threshold: usize,
    overlay_capacity: usize,
    overlay: Mutex<BTreeMap<usize, u64>>,
}

impl FreeEntrySizeClassHistogram {
    pub fn new(boundaries: Vec<usize>, very_large_threshold: usize, overlay_capacity: usize) -> Self {
        assert!(!boundaries.is_empty(), "need at least one size class");
        assert!(
            boundaries.windows(2).all(|w| w[0] < w[1]),
            "size class boundaries must be strictly increasing"
        );
        let n = boundaries.len();
        Self {
            boundaries,
            class_counts: (0..n).map(|_| AtomicU64::new(0)).collect(),
            class_bytes: (0..n).map(|_| AtomicU64::new(0)).collect(),
            very_large_threshold,
            overlay_capacity,
            overlay: Mutex::new(BTreeMap::new()),
        }
    }

    fn class_index(&self, size: usize) -> usize {
        match self.boundaries.binary_search(&size) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }

    /// Records one free chunk of `size` bytes.
    pub fn record(&self, size: usize) {
        let idx = self.class_index(size);
        self.class_counts[idx].fetch_add(1, Ordering::Relaxed);
        self.class_bytes[idx].fetch_add(size as u64, Ordering::Relaxed);

        if size >= self.very_large_threshold {
            self.record_overlay(size);
        }
    }

    /// Removes one free chunk of `size` bytes (a chunk was reused or merged).
    pub fn remove(&self, size: usize) {
        let idx = self.class_index(size);
        self.class_counts[idx]
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some(c.saturating_sub(1)))
            .ok();
        self.class_bytes[idx]
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| {
                Some(b.saturating_sub(size as u64))
            })
            .ok();

        if size >= self.very_large_threshold {
            self.remove_overlay(size);
        }
    }

    fn record_overlay(&self, size: usize) {
        let Ok(mut overlay) = self.overlay.lock() else { return };
        if let Some(count) = overlay.get_mut(&size) {
            *count += 1;
            return;
        }
        if overlay.len() >= self.overlay_capacity {
            // Evict the entry with the smallest exact size to make room; the
            // class histogram above still accounts for this chunk by range.
            if let Some(&smallest) = overlay.keys().next() {
                overlay.remove(&smallest);
            }
        }
        overlay.insert(size, 1);
    }

    fn remove_overlay(&self, size: usize) {
        let Ok(mut overlay) = self.overlay.lock() else { return };
        if let Some(count) = overlay.get_mut(&size) {
            *count -= 1;
            if *count == 0 {
                overlay.remove(&size);
            }
        }
    }

    pub fn class_count(&self, idx: usize) -> u64 {
        self.class_counts[idx].load(Ordering::Relaxed)
    }

    pub fn class_bytes(&self, idx: usize) -> u64 {
        self.class_bytes[idx].load(Ordering::Relaxed)
    }

    pub fn num_classes(&self) -> usize {
        self.boundaries.len()
    }

    /// Exact-size overlay entries, strictly increasing in size.
    pub fn overlay_entries(&self) -> Vec<(usize, u64)> {
        self.overlay
            .lock()
            .map(|o| o.iter().map(|(&k, &v)| (k, v)).collect())
            .unwrap_or_default()
    }

    pub fn overlay_len(&self) -> usize {
        self.overlay.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        for c in &self.class_counts {
            c.store(0, Ordering::Relaxed);
        }
        for b in &self.class_bytes {
            b.store(0, Ordering::Relaxed);
        }
        if let Ok(mut overlay) = self.overlay.lock() {
            overlay.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram() -> FreeEntrySizeClassHistogram {
        FreeEntrySizeClassHistogram::new(vec![16, 64, 256, 1024], 1024, 4)
    }

    #[test]
    fn classifies_into_correct_bucket() {
        let h = histogram();
        h.record(16);
        h.record(63);
        h.record(64);
        h.record(2048);
        assert_eq!(h.class_count(0), 2);
        assert_eq!(h.class_count(1), 1);
        assert_eq!(h.class_count(3), 1);
    }

    #[test]
    fn below_first_boundary_falls_into_class_zero() {
        let h = histogram();
        h.record(4);
        assert_eq!(h.class_count(0), 1);
    }

    #[test]
    fn very_large_entries_tracked_exactly_in_overlay() {
        let h = histogram();
        h.record(2048);
        h.record(2048);
        h.record(4096);
        let entries = h.overlay_entries();
        assert_eq!(entries, vec![(2048, 2), (4096, 1)]);
    }

    #[test]
    fn overlay_entries_strictly_increasing_and_capacity_bounded() {
        let h = histogram();
        for size in [1024, 2048, 3072, 4096, 5120] {
            h.record(size);
        }
        let entries = h.overlay_entries();
        assert!(entries.len() <= 4);
        assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn remove_drops_zero_count_overlay_entry() {
        let h = histogram();
        h.record(2048);
        h.remove(2048);
        assert_eq!(h.overlay_len(), 0);
        assert_eq!(h.class_count(3), 0);
    }
}
