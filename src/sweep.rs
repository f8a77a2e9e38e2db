//! C5 (part 2): partitioning sweepable regions into evenly-sized chunks for
//! parallel work distribution (§4.5 "Sweep chunking").
//!
//! Chunk descriptors are arena-allocated in one contiguous `Vec` and linked
//! head-to-tail via indices into it rather than pointers, so the whole table
//! can grow without invalidating earlier descriptors' cross-references.

use std::sync::Arc;

use crate::dispatcher::{GcTask, WorkUnitClaim};
use crate::heap::{HeapRegionManager, RegionMask};
use crate::logging::{log_event, GcEvent};

/// One contiguous, same-pool sub-range of a region, sized to (at most) the
/// configured chunk size.
#[derive(Debug, Clone, Copy)]
pub struct ChunkDescriptor {
    pub base: usize,
    pub top: usize,
    pub pool_id: usize,
    pub prev: Option<usize>,
    pub next: Option<usize>,
    /// False for the first chunk of a region: it cannot coalesce with the
    /// tail chunk of the previous region.
    pub coalesce_candidate: bool,
}

impl ChunkDescriptor {
    pub fn size(&self) -> usize {
        self.top - self.base
    }
}

/// The full set of chunks built for one sweep-capable cycle, doubly linked
/// head-to-tail and indexable by position (the position *is* the work-unit
/// index the dispatcher claims against).
#[derive(Debug, Default)]
pub struct SweepChunkTable {
    chunks: Vec<ChunkDescriptor>,
}

impl SweepChunkTable {
    /// Walks `manager`'s sweepable regions in address order and partitions
    /// each into `chunk_size`-byte chunks, never crossing a region (and
    /// hence memory-pool) boundary. Never shrinks an existing table; callers
    /// rebuild a fresh one per cycle.
    pub fn build(manager: &HeapRegionManager, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut chunks = Vec::new();

        for region in manager.iter(RegionMask::SWEEPABLE, None) {
            let pool_id = region.subspace_id();
            let mut addr = region.low();
            let mut first_in_region = true;
            while addr < region.high() {
                let top = (addr + chunk_size).min(region.high());
                let index = chunks.len();
                let prev = if first_in_region { None } else { Some(index - 1) };
                chunks.push(ChunkDescriptor {
                    base: addr,
                    top,
                    pool_id,
                    prev,
                    next: None,
                    coalesce_candidate: !first_in_region,
                });
                if let Some(prev_index) = prev {
                    chunks[prev_index].next = Some(index);
                }
                addr = top;
                first_in_region = false;
            }
        }

        log_event(GcEvent::SweepChunksBuilt { chunk_count: chunks.len(), chunk_size });
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ChunkDescriptor> {
        self.chunks.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkDescriptor> {
        self.chunks.iter()
    }
}

/// Estimates the chunk count a heap of `max_heap_bytes` will need at
/// `chunk_size`, for pre-sizing the descriptor arena (§4.5 step 1-2).
pub fn estimate_chunk_count(max_heap_bytes: usize, chunk_size: usize) -> usize {
    (max_heap_bytes + chunk_size.max(1) - 1) / chunk_size.max(1)
}

/// A [`GcTask`] that dispatches `callback` once per chunk, claiming indices
/// from the shared [`WorkUnitClaim`] the way the mark-map parallel clear
/// does. `callback` receives the chunk's `(base, top)` span.
pub struct SweepTask<F: Fn(usize, usize) + Send + Sync> {
    table: Arc<SweepChunkTable>,
    callback: F,
}

impl<F: Fn(usize, usize) + Send + Sync> SweepTask<F> {
    pub fn new(table: Arc<SweepChunkTable>, callback: F) -> Self {
        Self { table, callback }
    }
}

impl<F: Fn(usize, usize) + Send + Sync> GcTask for SweepTask<F> {
    fn run(&self, claim: &WorkUnitClaim) {
        while let Some(index) = claim.next() {
            if let Some(chunk) = self.table.get(index) {
                (self.callback)(chunk.base, chunk.top);
            }
        }
    }

    fn work_unit_count(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager_with_region(region_type: crate::heap::RegionType, low: usize, high: usize) -> HeapRegionManager {
        let manager = HeapRegionManager::new(low, high - low, high - low).unwrap();
        let region = manager.first_table_region().unwrap();
        region.set_region_type(region_type);
        region.set_committed(true);
        manager
    }

    #[test]
    fn builds_chunks_within_region_bounds() {
        let manager = manager_with_region(crate::heap::RegionType::AddressOrdered, 0x10_0000, 0x10_0000 + 1024);
        let table = SweepChunkTable::build(&manager, 256);
        assert_eq!(table.len(), 4);
        assert_eq!(table.get(0).unwrap().base, 0x10_0000);
        assert_eq!(table.get(3).unwrap().top, 0x10_0000 + 1024);
    }

    #[test]
    fn first_chunk_of_region_is_not_coalesce_candidate() {
        let manager = manager_with_region(crate::heap::RegionType::AddressOrdered, 0x10_0000, 0x10_0000 + 512);
        let table = SweepChunkTable::build(&manager, 256);
        assert!(!table.get(0).unwrap().coalesce_candidate);
        assert!(table.get(1).unwrap().coalesce_candidate);
    }

    #[test]
    fn non_sweepable_regions_are_excluded() {
        let manager = manager_with_region(crate::heap::RegionType::Free, 0x10_0000, 0x10_0000 + 512);
        let table = SweepChunkTable::build(&manager, 256);
        assert!(table.is_empty());
    }

    #[test]
    fn sweep_task_visits_every_chunk_exactly_once() {
        let manager = manager_with_region(crate::heap::RegionType::AddressOrdered, 0x10_0000, 0x10_0000 + 1024);
        let table = Arc::new(SweepChunkTable::build(&manager, 256));
        let visited = Arc::new(AtomicUsize::new(0));
        let visited_clone = visited.clone();
        let task = SweepTask::new(table, move |_base, _top| {
            visited_clone.fetch_add(1, Ordering::SeqCst);
        });
        let claim = WorkUnitClaim::new(task.work_unit_count());
        task.run(&claim);
        assert_eq!(visited.load(Ordering::SeqCst), 4);
    }
}
