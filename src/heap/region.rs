//! Region descriptors and the type taxonomy a populator dispatches on (§3, §4.1).

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{GcError, Result};

/// Classifies a region's current backing allocator/iteration strategy.
///
/// A region's type mutates across GC phases (e.g. `BumpAllocated` during
/// mutation, `AddressOrderedMarked` mid-sweep) but its `[low, high)` span is
/// fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionType {
    /// Uncommitted or committed-but-unused; contains no objects.
    Free,
    /// Free-list-interleaved objects walked via dead-object markers.
    AddressOrdered,
    /// Objects packed from `low` up to a monotonically advancing high-water.
    BumpAllocated,
    /// Fixed-size-cell small-object segregated space.
    SegregatedSmall,
    /// Single-object-per-region large allocations.
    SegregatedLarge,
    /// Leaf region of a discontiguous (arraylet) array.
    ArrayletLeaf,
    /// `AddressOrdered`, but iteration should consult the mark map rather
    /// than the free list (set during sweep/compaction handoff).
    AddressOrderedMarked,
}

/// Bitmask of region properties a [`super::HeapRegionIterator`] filters on,
/// mirroring the `RegionProperties` bitmap the original region descriptor
/// exposes to its iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionMask(u32);

impl RegionMask {
    pub const CONTAINS_OBJECTS: RegionMask = RegionMask(1 << 0);
    pub const SWEEPABLE: RegionMask = RegionMask(1 << 1);
    pub const COMMITTED: RegionMask = RegionMask(1 << 2);
    /// No filtering; every region matches.
    pub const ALL: RegionMask = RegionMask(u32::MAX);

    pub const fn union(self, other: RegionMask) -> RegionMask {
        RegionMask(self.0 | other.0)
    }

    fn properties_of(region: &Region) -> RegionMask {
        let mut bits = 0u32;
        if region.region_type() != RegionType::Free {
            bits |= Self::CONTAINS_OBJECTS.0;
        }
        if matches!(
            region.region_type(),
            RegionType::AddressOrdered
                | RegionType::AddressOrderedMarked
                | RegionType::SegregatedSmall
                | RegionType::SegregatedLarge
        ) {
            bits |= Self::SWEEPABLE.0;
        }
        if region.is_committed() {
            bits |= Self::COMMITTED.0;
        }
        RegionMask(bits)
    }

    /// Whether `region` carries every bit set in `self`.
    pub fn matches(self, region: &Region) -> bool {
        let have = Self::properties_of(region);
        self.0 & have.0 == self.0
    }
}

/// A contiguous, fixed-size span of heap, classified by [`RegionType`].
///
/// Regions are allocated once at heap initialization and never destroyed;
/// only their type and internal cursors change across GC phases. The
/// `subspace_id` is an opaque back-reference the host assigns (we never
/// dereference it, only compare it for equality when filtering by memory
/// space).
#[derive(Debug)]
pub struct Region {
    low: usize,
    high: usize,
    committed: std::sync::atomic::AtomicBool,
    region_type: parking_lot::RwLock<RegionType>,
    /// Current bump-allocation high-water; only meaningful for
    /// `BumpAllocated` regions. Invariant: `low <= alloc <= high`.
    alloc: AtomicUsize,
    /// Fixed-size-cell width for segregated-small regions; 0 otherwise.
    cell_size: usize,
    subspace_id: usize,
}

impl Region {
    pub fn new(
        low: usize,
        high: usize,
        region_type: RegionType,
        cell_size: usize,
        subspace_id: usize,
    ) -> Result<Self> {
        if high < low {
            return Err(GcError::InvalidArgument(format!(
                "region high {high:#x} precedes low {low:#x}"
            )));
        }
        Ok(Self {
            low,
            high,
            committed: std::sync::atomic::AtomicBool::new(false),
            region_type: parking_lot::RwLock::new(region_type),
            alloc: AtomicUsize::new(low),
            cell_size,
            subspace_id,
        })
    }

    pub fn low(&self) -> usize {
        self.low
    }

    pub fn high(&self) -> usize {
        self.high
    }

    pub fn size(&self) -> usize {
        self.high - self.low
    }

    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    pub fn subspace_id(&self) -> usize {
        self.subspace_id
    }

    pub fn region_type(&self) -> RegionType {
        *self.region_type.read()
    }

    pub fn set_region_type(&self, region_type: RegionType) {
        *self.region_type.write() = region_type;
        if region_type == RegionType::BumpAllocated {
            self.alloc.store(self.low, Ordering::Relaxed);
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    pub fn set_committed(&self, committed: bool) {
        self.committed.store(committed, Ordering::Release);
    }

    /// Current bump-pointer high-water for a `BumpAllocated` region.
    pub fn alloc(&self) -> usize {
        self.alloc.load(Ordering::Acquire)
    }

    /// Advances the bump pointer by `bytes`, returning the address it
    /// occupied before the advance, or `None` if that would cross `high`.
    pub fn bump_allocate(&self, bytes: usize) -> Option<usize> {
        loop {
            let current = self.alloc.load(Ordering::Acquire);
            let next = current.checked_add(bytes)?;
            if next > self.high {
                return None;
            }
            match self.alloc.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(current),
                Err(_) => continue,
            }
        }
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.low && addr < self.high
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocate_respects_high_water() {
        let region = Region::new(0x1000, 0x1000 + 64, RegionType::BumpAllocated, 0, 0).unwrap();
        assert_eq!(region.bump_allocate(32), Some(0x1000));
        assert_eq!(region.bump_allocate(32), Some(0x1020));
        assert_eq!(region.bump_allocate(1), None);
    }

    #[test]
    fn region_mask_filters_by_committed_and_type() {
        let free = Region::new(0, 0x1000, RegionType::Free, 0, 0).unwrap();
        let bump = Region::new(0x1000, 0x2000, RegionType::BumpAllocated, 0, 0).unwrap();
        bump.set_committed(true);

        assert!(!RegionMask::CONTAINS_OBJECTS.matches(&free));
        assert!(RegionMask::CONTAINS_OBJECTS.matches(&bump));
        assert!(RegionMask::COMMITTED.matches(&bump));
        assert!(!RegionMask::COMMITTED.matches(&free));
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        assert!(Region::new(0x2000, 0x1000, RegionType::Free, 0, 0).is_err());
    }
}
