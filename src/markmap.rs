//! C2: Mark Map (heap bitmap).
//!
//! One bit per `objectAlignment`-sized slot of the heap. §4.2 fixes the
//! address-to-bit mapping from the alignment alone:
//!
//! ```text
//! offset  = objectPtr - mapBase
//! slot    = offset >> indexShift      (which u64 word)
//! bitIdx  = (offset & bitMask) >> bitShift   (which bit within the word)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::dispatcher::{GcTask, ParallelDispatcher};
use crate::error::{GcError, Result};
use crate::logging::{log_event, GcEvent};
use crate::objectmodel::ObjectModel;

const BITS_PER_WORD: usize = 64;
/// Work-unit multiplier from the original clear routine: with more than one
/// worker, each gets ~32 work units for load balancing (§8 scenario 3).
const PARALLEL_MULTIPLIER: usize = 32;

/// A live (committed) heap span the mark map needs bits for; the region
/// manager hands these in for range commit and parallel clear.
#[derive(Debug, Clone, Copy)]
pub struct HeapSpan {
    pub base: usize,
    pub size: usize,
}

/// A bitmap covering `[base_address, base_address + max_heap_size)`.
pub struct MarkMap {
    base_address: usize,
    max_heap_size: usize,
    object_alignment: usize,
    words: Vec<AtomicU64>,
}

impl MarkMap {
    /// Allocates a zeroed bitmap sized for `max_heap_size` bytes of heap at
    /// `object_alignment`-byte granularity. `object_alignment` must be a
    /// power of two (validated by [`GcSubstrateConfig::validate`][cfg]).
    ///
    /// [cfg]: crate::config::GcSubstrateConfig::validate
    pub fn new(base_address: usize, max_heap_size: usize, object_alignment: usize) -> Self {
        let bits_needed = (max_heap_size + object_alignment - 1) / object_alignment;
        let words_needed = (bits_needed + BITS_PER_WORD - 1) / BITS_PER_WORD;
        let mut words = Vec::with_capacity(words_needed.max(1));
        words.resize_with(words_needed.max(1), || AtomicU64::new(0));

        Self {
            base_address,
            max_heap_size,
            object_alignment,
            words,
        }
    }

    fn slot_and_bit(&self, addr: usize) -> (usize, u32) {
        let offset = addr - self.base_address;
        let unit = offset / self.object_alignment;
        (unit / BITS_PER_WORD, (unit % BITS_PER_WORD) as u32)
    }

    fn check_bounds(&self, addr: usize) -> Result<()> {
        if addr < self.base_address || addr >= self.base_address + self.max_heap_size {
            return Err(GcError::InvalidAddress { address: addr });
        }
        Ok(())
    }

    /// Lock-free read of the bit covering `addr`.
    pub fn test_bit(&self, addr: usize) -> bool {
        let (word, bit) = self.slot_and_bit(addr);
        self.words[word].load(Ordering::Acquire) & (1u64 << bit) != 0
    }

    /// CAS loop that sets the bit. Returns `true` iff this call transitioned
    /// the bit from 0 to 1 — the signal a concurrent marker uses to know it
    /// is the thread that claimed the object for scanning.
    pub fn set_bit_atomic(&self, addr: usize) -> bool {
        let (word, bit) = self.slot_and_bit(addr);
        let mask = 1u64 << bit;
        let prev = self.words[word].fetch_or(mask, Ordering::AcqRel);
        prev & mask == 0
    }

    /// Single-threaded-phase variant of `set_bit_atomic` that doesn't report
    /// whether the bit changed.
    pub fn set_bit(&self, addr: usize) {
        let (word, bit) = self.slot_and_bit(addr);
        self.words[word].fetch_or(1u64 << bit, Ordering::Release);
    }

    /// Single-threaded-phase bit clear.
    pub fn clear_bit(&self, addr: usize) {
        let (word, bit) = self.slot_and_bit(addr);
        self.words[word].fetch_and(!(1u64 << bit), Ordering::Release);
    }

    /// Merges `bits` into the word at `slot_index` via CAS.
    pub fn set_slot_atomic(&self, slot_index: usize, bits: u64) {
        self.words[slot_index].fetch_or(bits, Ordering::AcqRel);
    }

    /// Zeroes the bitmap range covering `[lo, hi)`. `lo == hi` is a no-op.
    pub fn clear_range(&self, lo: usize, hi: usize) {
        if lo >= hi {
            return;
        }
        let (lo_word, lo_bit) = self.slot_and_bit(lo);
        let (hi_word, hi_bit) = self.slot_and_bit(hi - self.object_alignment);
        for w in lo_word..=hi_word {
            let mask = Self::range_mask(w, lo_word, lo_bit, hi_word, hi_bit);
            self.words[w].fetch_and(!mask, Ordering::Release);
        }
    }

    /// Sets every bit covering `[lo, hi)`.
    pub fn set_range(&self, lo: usize, hi: usize) {
        if lo >= hi {
            return;
        }
        let (lo_word, lo_bit) = self.slot_and_bit(lo);
        let (hi_word, hi_bit) = self.slot_and_bit(hi - self.object_alignment);
        for w in lo_word..=hi_word {
            let mask = Self::range_mask(w, lo_word, lo_bit, hi_word, hi_bit);
            self.words[w].fetch_or(mask, Ordering::Release);
        }
    }

    fn range_mask(word: usize, lo_word: usize, lo_bit: u32, hi_word: usize, hi_bit: u32) -> u64 {
        let from_bit = if word == lo_word { lo_bit } else { 0 };
        let to_bit = if word == hi_word { hi_bit } else { BITS_PER_WORD as u32 - 1 };
        let width = to_bit - from_bit + 1;
        let block = if width == BITS_PER_WORD as u32 {
            u64::MAX
        } else {
            ((1u64 << width) - 1) << from_bit
        };
        block
    }

    /// Acknowledges that `[lo, hi)` just became committed heap; the
    /// bitmap itself is already fully allocated, so this only validates
    /// bounds and reports the event (real paged bitmaps would mprotect the
    /// backing pages here).
    pub fn heap_add_range(&self, lo: usize, hi: usize) -> Result<()> {
        self.check_bounds(lo)?;
        if hi > self.base_address + self.max_heap_size {
            return Err(GcError::InvalidAddress { address: hi });
        }
        Ok(())
    }

    /// Yields the address of every set bit in `[lo, hi)` in ascending order,
    /// using `object_model` to skip over an object's interior so a large
    /// object's body doesn't get revisited as spurious set bits.
    pub fn iterate_range<'a>(
        &'a self,
        lo: usize,
        hi: usize,
        object_model: &'a dyn ObjectModel,
    ) -> MarkMapIterator<'a> {
        MarkMapIterator {
            map: self,
            object_model,
            cursor: lo,
            end: hi,
        }
    }

    /// How many bits cover one heap byte — used by callers sizing buffers.
    pub fn object_alignment(&self) -> usize {
        self.object_alignment
    }

    #[cfg(test)]
    fn count_marked(&self, lo: usize, hi: usize) -> usize {
        let mut count = 0;
        let mut addr = lo;
        while addr < hi {
            if self.test_bit(addr) {
                count += 1;
            }
            addr += self.object_alignment;
        }
        count
    }

    /// Parallel range clear (§8 scenario 3 / `MarkMap.cpp::initializeMarkMap`).
    ///
    /// Computes `heapClearUnitSize = heapSize / (threadCount==1 ? 1 : threadCount*32)`,
    /// rounds it up to `heap_alignment`, then walks each committed span in
    /// chunks of that size, dispatching one work unit per chunk to
    /// `dispatcher`. With a 64 MiB heap, 4 workers, and the default
    /// multiplier this yields exactly 128 work units of 512 KiB each.
    pub fn clear_committed_parallel(
        self: &Arc<Self>,
        dispatcher: &ParallelDispatcher,
        spans: &[HeapSpan],
        thread_count: usize,
        heap_alignment: usize,
    ) {
        let factor = if thread_count <= 1 { 1 } else { thread_count * PARALLEL_MULTIPLIER };
        let total_heap_size: usize = spans.iter().map(|s| s.size).sum();
        if total_heap_size == 0 {
            return;
        }
        let raw_unit = total_heap_size / factor.max(1);
        let unit_size = crate::util::alignment::align_up(raw_unit.max(1), heap_alignment);

        let mut chunks = Vec::new();
        for span in spans {
            let mut remaining = span.size;
            let mut addr = span.base;
            while remaining > 0 {
                let this_chunk = unit_size.min(remaining);
                chunks.push((addr, this_chunk));
                addr += this_chunk;
                remaining -= this_chunk;
            }
        }

        let work_units = chunks.len();
        let task = ClearTask { map: self.clone(), chunks };
        dispatcher.run(task, thread_count.max(1));

        log_event(GcEvent::MarkMapClear { work_units, bytes_cleared: total_heap_size });
    }
}

struct ClearTask {
    map: Arc<MarkMap>,
    chunks: Vec<(usize, usize)>,
}

impl GcTask for ClearTask {
    fn run(&self, claim: &crate::dispatcher::WorkUnitClaim) {
        while let Some(index) = claim.next() {
            if let Some(&(base, size)) = self.chunks.get(index) {
                self.map.clear_range(base, base + size);
            }
        }
    }

    fn work_unit_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Iterator over set bits in a mark map range, object-model-aware so large
/// objects are skipped rather than rescanned bit by bit.
pub struct MarkMapIterator<'a> {
    map: &'a MarkMap,
    object_model: &'a dyn ObjectModel,
    cursor: usize,
    end: usize,
}

impl<'a> Iterator for MarkMapIterator<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.cursor < self.end {
            let addr = self.cursor;
            if self.map.test_bit(addr) {
                let consumed = self.object_model.consumed_size_in_bytes(addr).max(self.map.object_alignment);
                self.cursor = addr + crate::util::alignment::align_up(consumed, self.map.object_alignment);
                return Some(addr);
            }
            self.cursor += self.map.object_alignment;
        }
        None
    }
}
