//! External interfaces the substrate consumes from its host (§6).
//!
//! The core never hardcodes an object layout, a pool allocation strategy, or
//! a native allocator; it is handed trait objects implementing these seams
//! and calls through them. A host VM provides real implementations; this
//! crate's tests use the `testkit` implementations below.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Consulted by marked-object iteration and free-list walking to size and
/// classify objects without the core knowing their header layout.
pub trait ObjectModel: Send + Sync {
    /// Byte length (including header) of a live object at `addr`.
    fn consumed_size_in_bytes(&self, addr: usize) -> usize;

    /// Writes a minimum-valid-object header at `addr` so a TLH reservation
    /// window or an abandoned remainder remains walkable as a real object.
    fn initialize_minimum_size_object(&self, addr: usize);

    /// The smallest object this model can legally write, in bytes. Drives
    /// the reservation-window dummy-object size in the TLH cache.
    fn minimum_object_size(&self) -> usize;

    /// Whether `addr` holds a dead-object filler rather than a live object.
    fn is_dead_object(&self, addr: usize) -> bool;

    /// Size of a dead-object filler at `addr`, valid only if
    /// [`is_dead_object`](Self::is_dead_object) returned true.
    fn size_in_bytes_dead_object(&self, addr: usize) -> usize;

    /// True if references are stored compressed (4 bytes); informational,
    /// used only to size the mark map's bit-to-address ratio.
    fn compress_object_references(&self) -> bool;
}

/// Backing store a TLH refreshes from and returns remainders to.
pub trait MemoryPool: Send + Sync {
    /// Acquires a TLH-sized span `[base, top)`, or `None` if exhausted.
    fn allocate_tlh(&self, size: usize) -> Option<(usize, usize)>;

    /// Recycles a TLH remainder `[base, top)` back into the pool's free list.
    fn abandon_tlh_heap_chunk(&self, base: usize, top: usize);
}

/// Fallback allocation surface for requests too large for a TLH.
pub trait MemorySubSpace: Send + Sync {
    /// Allocates a standalone object outside any TLH.
    fn allocate_object(&self, size: usize) -> Option<usize>;

    /// Allocates a single arraylet leaf of `size` bytes.
    fn allocate_arraylet_leaf(&self, size: usize) -> Option<usize>;
}

/// Collector-wide policy the TLH cache and dispatcher consult.
pub trait GlobalCollector: Send + Sync {
    /// Size in bytes of the trailing reservation window a concurrent write
    /// barrier needs at the end of every TLH.
    fn reserved_for_gc_alloc_cache_size(&self) -> usize;

    /// Notifies the collector before a TLH is abandoned, so a concurrent
    /// barrier can observe the last live object the TLH contained.
    fn pre_alloc_cache_flush(&self, base: usize, last_object: Option<usize>);
}

/// Category-tagged native allocation for the substrate's own bookkeeping
/// (dispatcher tables, chunk descriptor arrays, region descriptors).
pub trait Forge: Send + Sync {
    fn allocate(&self, bytes: usize) -> Option<usize>;
    fn free(&self, addr: usize, bytes: usize);
}

/// Reference implementations used by this crate's own tests. Not part of
/// the public contract a host VM must satisfy, but a working substrate in
/// its own right for unit and integration testing.
pub mod testkit {
    use super::*;

    /// An `ObjectModel` with a fixed minimum object size and no real header
    /// encoding — every address is treated as a live object of that size.
    pub struct FixedSizeObjectModel {
        min_size: usize,
    }

    impl FixedSizeObjectModel {
        pub fn new(min_size: usize) -> Self {
            Self { min_size }
        }
    }

    impl ObjectModel for FixedSizeObjectModel {
        fn consumed_size_in_bytes(&self, _addr: usize) -> usize {
            self.min_size
        }

        fn initialize_minimum_size_object(&self, _addr: usize) {
            // No real header to write in the testkit model.
        }

        fn minimum_object_size(&self) -> usize {
            self.min_size
        }

        fn is_dead_object(&self, _addr: usize) -> bool {
            false
        }

        fn size_in_bytes_dead_object(&self, _addr: usize) -> usize {
            0
        }

        fn compress_object_references(&self) -> bool {
            false
        }
    }

    /// A bump-pointer memory pool backed by a fixed address range, useful
    /// for exercising TLH refresh/abandon/reuse without a real heap.
    pub struct BumpMemoryPool {
        base: usize,
        limit: usize,
        cursor: AtomicUsize,
    }

    impl BumpMemoryPool {
        pub fn new(base: usize, size: usize) -> Self {
            Self {
                base,
                limit: base + size,
                cursor: AtomicUsize::new(base),
            }
        }
    }

    impl MemoryPool for BumpMemoryPool {
        fn allocate_tlh(&self, size: usize) -> Option<(usize, usize)> {
            let mut current = self.cursor.load(Ordering::Relaxed);
            loop {
                let next = current.checked_add(size)?;
                if next > self.limit {
                    return None;
                }
                match self.cursor.compare_exchange_weak(
                    current,
                    next,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return Some((current, next)),
                    Err(actual) => current = actual,
                }
            }
        }

        fn abandon_tlh_heap_chunk(&self, _base: usize, _top: usize) {
            // The testkit pool never reclaims; it exists to exercise the
            // TLH's own abandon/reuse bookkeeping, not pool-level recycling.
        }
    }

    impl BumpMemoryPool {
        pub fn base(&self) -> usize {
            self.base
        }
    }

    /// A `GlobalCollector` with a configurable reservation window and no
    /// real barrier to notify.
    pub struct NoopCollector {
        reservation: usize,
    }

    impl NoopCollector {
        pub fn new(reservation: usize) -> Self {
            Self { reservation }
        }
    }

    impl GlobalCollector for NoopCollector {
        fn reserved_for_gc_alloc_cache_size(&self) -> usize {
            self.reservation
        }

        fn pre_alloc_cache_flush(&self, _base: usize, _last_object: Option<usize>) {}
    }
}
