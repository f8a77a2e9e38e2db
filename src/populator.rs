//! C5 (part 1): buffered object iteration over a region, dispatched by
//! [`RegionType`] to a *populator* strategy (§4.5, §9 "Dynamic dispatch in
//! region populators").
//!
//! Rather than a trait object per populator kind — the usual way to get
//! subclass-style polymorphism here — this crate uses a tagged `enum`
//! dispatched once when the iterator is built; a dispatch table indexed
//! by region type is behaviorally equivalent and avoids a vtable
//! indirection per object.

use std::sync::Arc;

use crate::heap::{Region, RegionType};
use crate::markmap::MarkMap;
use crate::objectmodel::ObjectModel;
use crate::util::alignment::align_up;

/// How many object pointers a [`BufferedObjectIterator`] holds before it
/// needs to ask its populator to refill.
pub const BUFFER_CAPACITY: usize = 256;

/// Opaque cursor state a populator advances between fills. `scratch` exists
/// for populator variants (segregated cell stepping) that need more than a
/// single cursor word.
#[derive(Debug, Clone, Copy, Default)]
struct PopulatorState {
    cursor: usize,
    skip_first: bool,
    scratch: [usize; 4],
}

/// Strategy bound to a [`RegionType`] that refills a [`BufferedObjectIterator`]'s
/// buffer. Chosen once, by [`Populator::for_region_type`], when the iterator
/// is constructed.
#[derive(Clone, Copy)]
enum Populator {
    /// Free-list-interleaved walk; consults `is_dead_object` to skip fillers.
    AddressOrdered,
    /// Stops at the region's live bump-allocation high-water.
    BumpAllocated,
    /// Emits only mark-map-set addresses, skipping each object's interior.
    MarkedObject,
    /// Fixed-cell-width walk (small classes) or single-object yield (large).
    SegregatedList,
    /// Free, reserved, and arraylet-leaf regions never contain objects.
    EmptyList,
}

impl Populator {
    fn for_region_type(region_type: RegionType) -> Self {
        match region_type {
            RegionType::AddressOrdered => Populator::AddressOrdered,
            RegionType::BumpAllocated => Populator::BumpAllocated,
            RegionType::AddressOrderedMarked => Populator::MarkedObject,
            RegionType::SegregatedSmall | RegionType::SegregatedLarge => Populator::SegregatedList,
            RegionType::Free | RegionType::ArrayletLeaf => Populator::EmptyList,
        }
    }

    /// Fills `buffer` starting from `state.cursor`, returning the number of
    /// entries written (0 signals the region is exhausted).
    fn populate(
        &self,
        region: &Region,
        state: &mut PopulatorState,
        object_model: &dyn ObjectModel,
        mark_map: Option<&MarkMap>,
        buffer: &mut [usize],
    ) -> usize {
        match self {
            Populator::EmptyList => 0,
            Populator::BumpAllocated => {
                let high_water = region.alloc();
                let mut n = 0;
                let mut addr = state.cursor.max(region.low());
                while addr < high_water && n < buffer.len() {
                    buffer[n] = addr;
                    n += 1;
                    let consumed = object_model.consumed_size_in_bytes(addr).max(object_model.minimum_object_size());
                    addr += align_up(consumed, object_model.minimum_object_size().max(1));
                }
                state.cursor = addr;
                n
            }
            Populator::AddressOrdered => {
                let mut n = 0;
                let mut addr = state.cursor.max(region.low());
                while addr < region.high() && n < buffer.len() {
                    if object_model.is_dead_object(addr) {
                        let dead_size = object_model.size_in_bytes_dead_object(addr).max(1);
                        addr += align_up(dead_size, object_model.minimum_object_size().max(1));
                        continue;
                    }
                    buffer[n] = addr;
                    n += 1;
                    let consumed = object_model.consumed_size_in_bytes(addr).max(object_model.minimum_object_size());
                    addr += align_up(consumed, object_model.minimum_object_size().max(1));
                }
                state.cursor = addr;
                n
            }
            Populator::MarkedObject => {
                let Some(map) = mark_map else { return 0 };
                let start = state.cursor.max(region.low());
                if start >= region.high() {
                    return 0;
                }
                let mut n = 0;
                let mut last = start;
                for addr in map.iterate_range(start, region.high(), object_model) {
                    if n >= buffer.len() {
                        break;
                    }
                    buffer[n] = addr;
                    n += 1;
                    last = addr + object_model.minimum_object_size().max(1);
                }
                state.cursor = if n == 0 { region.high() } else { last };
                n
            }
            Populator::SegregatedList => {
                if region.region_type() == RegionType::SegregatedLarge {
                    if state.skip_first {
                        return 0;
                    }
                    state.skip_first = true;
                    buffer[0] = region.low();
                    return 1;
                }
                let cell_size = region.cell_size().max(1);
                let mut n = 0;
                let mut addr = state.cursor.max(region.low());
                while addr + cell_size <= region.high() && n < buffer.len() {
                    if !object_model.is_dead_object(addr) {
                        buffer[n] = addr;
                        n += 1;
                    }
                    addr += cell_size;
                }
                state.cursor = addr;
                n
            }
        }
    }
}

/// Re-fillable iterator over the live objects of one region, draining a
/// small fixed-capacity buffer and asking the populator to refill it on
/// exhaustion.
pub struct BufferedObjectIterator {
    region: Arc<Region>,
    populator: Populator,
    state: PopulatorState,
    object_model: Arc<dyn ObjectModel>,
    mark_map: Option<Arc<MarkMap>>,
    buffer: [usize; BUFFER_CAPACITY],
    filled: usize,
    index: usize,
    exhausted: bool,
}

impl BufferedObjectIterator {
    /// Builds an iterator for `region`, dispatching to the populator that
    /// matches its current [`RegionType`]. `mark_map` is required only for
    /// `AddressOrderedMarked` regions.
    pub fn new(
        region: Arc<Region>,
        object_model: Arc<dyn ObjectModel>,
        mark_map: Option<Arc<MarkMap>>,
    ) -> Self {
        let populator = Populator::for_region_type(region.region_type());
        Self {
            region,
            populator,
            state: PopulatorState::default(),
            object_model,
            mark_map,
            buffer: [0; BUFFER_CAPACITY],
            filled: 0,
            index: 0,
            exhausted: false,
        }
    }
}

impl Iterator for BufferedObjectIterator {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.index >= self.filled {
            if self.exhausted {
                return None;
            }
            self.filled = self.populator.populate(
                &self.region,
                &mut self.state,
                self.object_model.as_ref(),
                self.mark_map.as_deref(),
                &mut self.buffer,
            );
            self.index = 0;
            if self.filled == 0 {
                self.exhausted = true;
                return None;
            }
        }
        let addr = self.buffer[self.index];
        self.index += 1;
        Some(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectmodel::testkit::FixedSizeObjectModel;

    fn region(region_type: RegionType, low: usize, high: usize) -> Arc<Region> {
        Arc::new(Region::new(low, high, region_type, 0, 0).unwrap())
    }

    #[test]
    fn empty_list_populator_yields_nothing() {
        let r = region(RegionType::Free, 0x1000, 0x2000);
        let model: Arc<dyn ObjectModel> = Arc::new(FixedSizeObjectModel::new(16));
        let iter = BufferedObjectIterator::new(r, model, None);
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn bump_allocated_populator_stops_at_high_water() {
        let r = region(RegionType::BumpAllocated, 0x1000, 0x1000 + 256);
        r.bump_allocate(64).unwrap();
        let model: Arc<dyn ObjectModel> = Arc::new(FixedSizeObjectModel::new(16));
        let iter = BufferedObjectIterator::new(r, model, None);
        let found: Vec<usize> = iter.collect();
        assert_eq!(found, vec![0x1000, 0x1000 + 16, 0x1000 + 32, 0x1000 + 48]);
    }

    #[test]
    fn segregated_large_region_yields_exactly_one_object() {
        let r = region(RegionType::SegregatedLarge, 0x2000, 0x2000 + 8192);
        let model: Arc<dyn ObjectModel> = Arc::new(FixedSizeObjectModel::new(16));
        let iter = BufferedObjectIterator::new(r, model, None);
        assert_eq!(iter.collect::<Vec<_>>(), vec![0x2000]);
    }

    #[test]
    fn segregated_small_region_walks_fixed_cells() {
        let r = Arc::new(Region::new(0x3000, 0x3000 + 64, RegionType::SegregatedSmall, 16, 0).unwrap());
        let model: Arc<dyn ObjectModel> = Arc::new(FixedSizeObjectModel::new(16));
        let iter = BufferedObjectIterator::new(r, model, None);
        assert_eq!(iter.collect::<Vec<_>>(), vec![0x3000, 0x3000 + 16, 0x3000 + 32, 0x3000 + 48]);
    }

    #[test]
    fn marked_object_populator_uses_mark_map() {
        let r = region(RegionType::AddressOrderedMarked, 0x4000, 0x4000 + 64);
        let map = Arc::new(MarkMap::new(0x4000, 64, 16));
        map.set_bit(0x4000);
        map.set_bit(0x4000 + 32);
        let model: Arc<dyn ObjectModel> = Arc::new(FixedSizeObjectModel::new(16));
        let iter = BufferedObjectIterator::new(r, model, Some(map));
        assert_eq!(iter.collect::<Vec<_>>(), vec![0x4000, 0x4000 + 32]);
    }
}
