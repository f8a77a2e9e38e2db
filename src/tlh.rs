//! Thread-local heap allocation cache (C4).
//!
//! Each mutator thread owns one [`TlhCache`]. The fast path is a lock-free
//! bump allocation between `cursor` and `limit`; `limit` sits
//! [`GlobalCollector::reserved_for_gc_alloc_cache_size`] bytes short of the
//! TLH's real end so a concurrent write barrier always has a materialized
//! dummy object to scan past. When the fast path is exhausted,
//! [`TlhCache::refresh`] first tries to reuse a same-or-larger remainder an
//! earlier refresh abandoned (first-fit over a small bounded list) before
//! asking the backing [`MemoryPool`] for a fresh span, growing the refresh
//! size geometrically up to a configured maximum.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::GcSubstrateConfig;
use crate::error::{GcError, Result};
use crate::logging::{log_event, GcEvent};
use crate::objectmodel::{GlobalCollector, MemoryPool, ObjectModel};

/// Upper bound on how many abandoned remainders one cache keeps before
/// spilling the smallest back to the pool outright. Unbounded growth would
/// let a cache that allocates many different sizes hoard memory the pool
/// could otherwise serve to other threads.
const MAX_ABANDONED_ENTRIES: usize = 8;

struct AbandonedSpan {
    base: usize,
    top: usize,
}

impl AbandonedSpan {
    fn size(&self) -> usize {
        self.top - self.base
    }
}

/// A thread's private bump-allocation window into the heap.
pub struct TlhCache {
    object_model: Arc<dyn ObjectModel>,
    pool: Arc<dyn MemoryPool>,
    collector: Arc<dyn GlobalCollector>,

    initial_size: usize,
    increment_size: usize,
    maximum_size: usize,
    minimum_size: usize,

    /// Size the next refresh will request, grown geometrically on repeated
    /// refreshes and reset to `initial_size` after a flush.
    next_refresh_size: AtomicUsize,

    base: AtomicUsize,
    cursor: AtomicUsize,
    /// Allocatable limit: `real_top - reservation`.
    limit: AtomicUsize,
    real_top: AtomicUsize,

    abandoned: Mutex<Vec<AbandonedSpan>>,
}

impl TlhCache {
    pub fn new(
        config: &GcSubstrateConfig,
        object_model: Arc<dyn ObjectModel>,
        pool: Arc<dyn MemoryPool>,
        collector: Arc<dyn GlobalCollector>,
    ) -> Self {
        Self {
            object_model,
            pool,
            collector,
            initial_size: config.tlh_initial_size,
            increment_size: config.tlh_increment_size,
            maximum_size: config.tlh_maximum_size,
            minimum_size: config.tlh_minimum_size,
            next_refresh_size: AtomicUsize::new(config.tlh_initial_size),
            base: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
            limit: AtomicUsize::new(0),
            real_top: AtomicUsize::new(0),
            abandoned: Mutex::new(Vec::new()),
        }
    }

    /// Bytes available before the reservation boundary.
    pub fn remaining(&self) -> usize {
        let limit = self.limit.load(Ordering::Relaxed);
        let cursor = self.cursor.load(Ordering::Relaxed);
        limit.saturating_sub(cursor)
    }

    pub fn is_empty(&self) -> bool {
        self.base.load(Ordering::Relaxed) == 0
    }

    /// Fast-path allocation: bumps `cursor` if `size` fits before `limit`.
    /// Returns `None` when the cache needs [`refresh`](Self::refresh).
    pub fn allocate(&self, size: usize) -> Option<usize> {
        let mut current = self.cursor.load(Ordering::Relaxed);
        loop {
            let next = current.checked_add(size)?;
            if next > self.limit.load(Ordering::Relaxed) {
                return None;
            }
            match self
                .cursor
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(addr) => return Some(addr),
                Err(actual) => current = actual,
            }
        }
    }

    /// The size above which a refresh is skipped entirely and the caller is
    /// told to fall back to a direct (non-TLH) allocation: `max(tlhMinimum,
    /// refreshSize / 2)`, per §4.4 step 1-2.
    fn abandon_threshold(&self) -> usize {
        let half_refresh = self.next_refresh_size.load(Ordering::Relaxed) / 2;
        half_refresh.max(self.minimum_size)
    }

    /// Allocates `size` bytes, refreshing the cache on exhaustion as many
    /// times as necessary. If `size` exceeds the current abandon threshold,
    /// no refresh is attempted at all — the cache is left untouched and
    /// [`GcError::TooLargeForTlh`] is returned so the caller falls back to
    /// [`crate::objectmodel::MemorySubSpace`] directly, per §4.4 step 2.
    /// `next_refresh_size` still grows by the tuning increment so later,
    /// smaller requests get a larger TLH.
    pub fn allocate_with_refresh(&self, size: usize) -> Result<usize> {
        if let Some(addr) = self.allocate(size) {
            return Ok(addr);
        }
        let threshold = self.abandon_threshold();
        if size > threshold {
            self.grow_next_refresh_size();
            return Err(GcError::TooLargeForTlh {
                requested: size,
                threshold,
            });
        }
        self.refresh(size)?;
        self.allocate(size).ok_or(GcError::OutOfMemory {
            requested: size,
            available: self.limit.load(Ordering::Relaxed).saturating_sub(self.cursor.load(Ordering::Relaxed)),
        })
    }

    /// Discards the current remainder, then installs a fresh span at least
    /// `needed` bytes long (reused from the abandoned list when possible,
    /// otherwise acquired from the pool).
    pub fn refresh(&self, needed: usize) -> Result<()> {
        self.discard_remainder();

        let target = self
            .next_refresh_size
            .load(Ordering::Relaxed)
            .max(needed)
            .min(self.maximum_size);

        if let Some((base, top)) = self.take_abandoned_fit(target) {
            self.install_span(base, top, true);
            self.grow_next_refresh_size();
            return Ok(());
        }

        let mut request = target;
        loop {
            if let Some((base, top)) = self.pool.allocate_tlh(request) {
                self.install_span(base, top, false);
                self.grow_next_refresh_size();
                return Ok(());
            }
            if request <= self.minimum_size {
                return Err(GcError::OutOfMemory {
                    requested: request,
                    available: 0,
                });
            }
            request = (request / 2).max(self.minimum_size);
        }
    }

    fn grow_next_refresh_size(&self) {
        let mut current = self.next_refresh_size.load(Ordering::Relaxed);
        loop {
            let next = (current + self.increment_size).min(self.maximum_size);
            match self.next_refresh_size.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn install_span(&self, base: usize, top: usize, reused: bool) {
        let reservation = self.collector.reserved_for_gc_alloc_cache_size();
        let limit = top.saturating_sub(reservation).max(base);

        self.object_model.initialize_minimum_size_object(base);
        self.base.store(base, Ordering::SeqCst);
        self.cursor.store(base, Ordering::SeqCst);
        self.limit.store(limit, Ordering::SeqCst);
        self.real_top.store(top, Ordering::SeqCst);

        log_event(GcEvent::TlhRefresh {
            refresh_size: top - base,
            reused,
        });
    }

    /// First-fit search over the abandoned list for a span at least
    /// `needed` bytes, removing and returning it if found.
    fn take_abandoned_fit(&self, needed: usize) -> Option<(usize, usize)> {
        let mut abandoned = self.abandoned.lock().ok()?;
        let idx = abandoned.iter().position(|span| span.size() >= needed)?;
        let span = abandoned.remove(idx);
        Some((span.base, span.top))
    }

    /// Retires the current span: below `minimum_size` remaining it is filled
    /// with a dummy object and handed back to the pool outright; otherwise
    /// it is kept in the abandoned list for a future refresh to reuse.
    fn discard_remainder(&self) {
        let base = self.base.load(Ordering::SeqCst);
        if base == 0 {
            return;
        }
        let cursor = self.cursor.load(Ordering::SeqCst);
        let real_top = self.real_top.load(Ordering::SeqCst);
        let remainder = real_top.saturating_sub(cursor);

        if remainder == 0 {
            self.clear_span();
            return;
        }

        let last_object = if cursor > base { Some(cursor - self.object_model.minimum_object_size()) } else { None };
        self.collector.pre_alloc_cache_flush(base, last_object);
        self.object_model.initialize_minimum_size_object(cursor);

        if remainder < self.minimum_size {
            self.pool.abandon_tlh_heap_chunk(cursor, real_top);
            log_event(GcEvent::TlhDiscard { discarded_bytes: remainder, abandoned: false });
        } else {
            let mut keep_in_pool = false;
            if let Ok(mut list) = self.abandoned.lock() {
                if list.len() >= MAX_ABANDONED_ENTRIES {
                    // Spill the globally smallest entry (including the
                    // candidate) back to the pool rather than growing
                    // without bound.
                    if let Some((smallest_idx, _)) = list
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, span)| span.size())
                    {
                        if list[smallest_idx].size() < remainder {
                            let evicted = list.swap_remove(smallest_idx);
                            self.pool.abandon_tlh_heap_chunk(evicted.base, evicted.top);
                            list.push(AbandonedSpan { base: cursor, top: real_top });
                        } else {
                            keep_in_pool = true;
                        }
                    }
                } else {
                    list.push(AbandonedSpan { base: cursor, top: real_top });
                }
            } else {
                keep_in_pool = true;
            }
            if keep_in_pool {
                self.pool.abandon_tlh_heap_chunk(cursor, real_top);
            }
            log_event(GcEvent::TlhDiscard { discarded_bytes: remainder, abandoned: !keep_in_pool });
        }

        self.clear_span();
    }

    fn clear_span(&self) {
        self.base.store(0, Ordering::SeqCst);
        self.cursor.store(0, Ordering::SeqCst);
        self.limit.store(0, Ordering::SeqCst);
        self.real_top.store(0, Ordering::SeqCst);
    }

    /// Materializes a dummy object across the trailing reservation window
    /// once the allocatable limit has been reached but the real TLH extends
    /// further, so a concurrent barrier always finds a walkable object.
    pub fn restore_reservation(&self) {
        let limit = self.limit.load(Ordering::SeqCst);
        let real_top = self.real_top.load(Ordering::SeqCst);
        if limit == 0 || limit >= real_top {
            return;
        }
        self.collector.pre_alloc_cache_flush(self.base.load(Ordering::SeqCst), Some(limit));
        self.object_model.initialize_minimum_size_object(limit);
    }

    /// Discards any live remainder unconditionally and resets growth back to
    /// the initial refresh size. Called at safepoints (thread exit, GC
    /// cycle boundary) where the cache must not straddle the boundary.
    pub fn flush(&self) {
        self.discard_remainder();
        self.next_refresh_size.store(self.initial_size, Ordering::Relaxed);
    }
}
