//! Heap Region Manager & Descriptor Table (§4.1).
//!
//! Owns the address-ordered table of fixed-size regions plus a secondary
//! list of auxiliary regions (added later, e.g. to grow the heap without
//! relocating the original table). Everything else in the substrate reaches
//! a region only through this manager or through a [`HeapRegionIterator`]
//! it hands out.

pub mod region;

pub use region::{Region, RegionMask, RegionType};

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::error::Result;
use crate::logging::{log_event, GcEvent};

/// Owns the region table and excludes topology mutation from concurrent
/// iteration.
pub struct HeapRegionManager {
    region_size: usize,
    table_regions: RwLock<Vec<Arc<Region>>>,
    auxiliary_regions: RwLock<Vec<Arc<Region>>>,
    topology_lock: Mutex<()>,
}

impl HeapRegionManager {
    /// Builds the initial table by carving `[heap_base, heap_base + heap_size)`
    /// into `Free` regions of `region_size` bytes. Any remainder smaller than
    /// a full region is dropped, matching a heap reserved in region-size
    /// multiples.
    pub fn new(heap_base: usize, heap_size: usize, region_size: usize) -> Result<Self> {
        let count = heap_size / region_size;
        let mut table_regions = Vec::with_capacity(count);
        for i in 0..count {
            let low = heap_base + i * region_size;
            table_regions.push(Arc::new(Region::new(low, low + region_size, RegionType::Free, 0, 0)?));
        }
        Ok(Self {
            region_size,
            table_regions: RwLock::new(table_regions),
            auxiliary_regions: RwLock::new(Vec::new()),
            topology_lock: Mutex::new(()),
        })
    }

    pub fn region_size(&self) -> usize {
        self.region_size
    }

    pub fn table_region_count(&self) -> usize {
        self.table_regions.read().len()
    }

    /// Appends a new region to the auxiliary list (e.g. heap growth outside
    /// the original table). Callers should hold [`lock`](Self::lock) while
    /// doing so if an iterator might be walking concurrently.
    pub fn add_auxiliary_region(&self, region: Arc<Region>) {
        self.auxiliary_regions.write().push(region);
    }

    /// The first region in the table list, address order, or `None` if the
    /// table is empty (safe to call during early startup or late shutdown).
    pub fn first_table_region(&self) -> Option<Arc<Region>> {
        self.table_regions.read().first().cloned()
    }

    /// The table region immediately following `region` in address order, or
    /// `None` if `region` is the last (or not a table region at all).
    pub fn next_table_region(&self, region: &Region) -> Option<Arc<Region>> {
        let table = self.table_regions.read();
        let idx = table.iter().position(|r| r.low() == region.low())?;
        table.get(idx + 1).cloned()
    }

    pub fn first_auxiliary_region(&self) -> Option<Arc<Region>> {
        self.auxiliary_regions.read().first().cloned()
    }

    pub fn next_auxiliary_region(&self, region: &Region) -> Option<Arc<Region>> {
        let aux = self.auxiliary_regions.read();
        let idx = aux.iter().position(|r| r.low() == region.low())?;
        aux.get(idx + 1).cloned()
    }

    /// Excludes topology mutation (table/auxiliary list growth) for as long
    /// as the returned guard lives. Dropping the guard is the "unlock".
    pub fn lock(&self) -> HeapRegionManagerLock<'_> {
        HeapRegionManagerLock {
            _guard: self.topology_lock.lock(),
        }
    }

    pub fn commit_region(&self, region: &Region) {
        region.set_committed(true);
        log_event(GcEvent::RegionCommit {
            region_index: self.index_of(region),
            committed: true,
        });
    }

    pub fn decommit_region(&self, region: &Region) {
        region.set_committed(false);
        log_event(GcEvent::RegionCommit {
            region_index: self.index_of(region),
            committed: false,
        });
    }

    fn index_of(&self, region: &Region) -> usize {
        self.table_regions
            .read()
            .iter()
            .position(|r| r.low() == region.low())
            .unwrap_or(usize::MAX)
    }

    /// An address-ordered iterator merging the table and auxiliary lists,
    /// filtered by `mask` and, if given, restricted to `subspace_id`.
    pub fn iter(&self, mask: RegionMask, subspace_id: Option<usize>) -> HeapRegionIterator {
        let mut regions: Vec<Arc<Region>> = self
            .table_regions
            .read()
            .iter()
            .cloned()
            .chain(self.auxiliary_regions.read().iter().cloned())
            .filter(|r| mask.matches(r))
            .filter(|r| subspace_id.map_or(true, |id| r.subspace_id() == id))
            .collect();
        regions.sort_by_key(|r| r.low());
        HeapRegionIterator { regions, cursor: 0 }
    }
}

/// RAII guard returned by [`HeapRegionManager::lock`]; dropping it unlocks.
pub struct HeapRegionManagerLock<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Address-ordered walk over a manager's regions, merging the table and
/// auxiliary lists the way `GC_HeapRegionIterator` does.
///
/// Safe against an empty table or auxiliary list (both are valid at early
/// startup and late shutdown).
pub struct HeapRegionIterator {
    regions: Vec<Arc<Region>>,
    cursor: usize,
}

impl Iterator for HeapRegionIterator {
    type Item = Arc<Region>;

    fn next(&mut self) -> Option<Self::Item> {
        let region = self.regions.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(region)
    }
}

/// Aggregate occupancy view over every table region, recomputed on demand.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStats {
    pub region_count: usize,
    pub committed_regions: usize,
    pub free_regions: usize,
}

impl HeapRegionManager {
    pub fn stats(&self) -> HeapStats {
        let table = self.table_regions.read();
        let mut stats = HeapStats {
            region_count: table.len(),
            ..Default::default()
        };
        for region in table.iter() {
            if region.is_committed() {
                stats.committed_regions += 1;
            }
            if region.region_type() == RegionType::Free {
                stats.free_regions += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> HeapRegionManager {
        HeapRegionManager::new(0x10_0000, 4 * 64 * 1024, 64 * 1024).unwrap()
    }

    #[test]
    fn builds_table_in_address_order() {
        let manager = manager();
        assert_eq!(manager.table_region_count(), 4);
        let first = manager.first_table_region().unwrap();
        assert_eq!(first.low(), 0x10_0000);
        let second = manager.next_table_region(&first).unwrap();
        assert_eq!(second.low(), 0x10_0000 + 64 * 1024);
        let region_after_last = manager.next_table_region(&manager.iter(RegionMask::ALL, None).last().unwrap());
        assert!(region_after_last.is_none());
    }

    #[test]
    fn empty_auxiliary_list_iterates_safely() {
        let manager = manager();
        assert!(manager.first_auxiliary_region().is_none());
        let all: Vec<_> = manager.iter(RegionMask::ALL, None).collect();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn mask_with_no_match_yields_nothing() {
        let manager = manager();
        let committed_only: Vec<_> = manager.iter(RegionMask::COMMITTED, None).collect();
        assert!(committed_only.is_empty());
    }

    #[test]
    fn iterator_merges_table_and_auxiliary_in_address_order() {
        let manager = manager();
        let aux_low = 0x10_0000 + 10 * 64 * 1024;
        let aux = Arc::new(Region::new(aux_low, aux_low + 64 * 1024, RegionType::BumpAllocated, 0, 0).unwrap());
        manager.add_auxiliary_region(aux.clone());

        let merged: Vec<_> = manager.iter(RegionMask::ALL, None).collect();
        assert_eq!(merged.len(), 5);
        assert_eq!(merged.last().unwrap().low(), aux_low);
    }

    #[test]
    fn lock_excludes_concurrent_topology_mutation() {
        let manager = manager();
        let guard = manager.lock();
        // Holding the guard does not itself block reads through `iter`;
        // it only documents the exclusion contract for topology mutators.
        assert_eq!(manager.iter(RegionMask::ALL, None).count(), 4);
        drop(guard);
    }

    #[test]
    fn commit_and_decommit_update_region_and_stats() {
        let manager = manager();
        let region = manager.first_table_region().unwrap();
        manager.commit_region(&region);
        assert!(region.is_committed());
        assert_eq!(manager.stats().committed_regions, 1);
        manager.decommit_region(&region);
        assert_eq!(manager.stats().committed_regions, 0);
    }
}
