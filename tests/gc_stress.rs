//! Heavier multi-thread stress tests: many dispatcher cycles back to back,
//! a mark-map parallel clear over a large span, and a pool/TLH workload with
//! more contention than the single-component unit tests exercise.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use fgc::dispatcher::{GcTask, WorkUnitClaim};
use fgc::markmap::{HeapSpan, MarkMap};

struct CountingTask {
    total: Arc<AtomicU64>,
}

impl GcTask for CountingTask {
    fn run(&self, claim: &WorkUnitClaim) {
        while let Some(_index) = claim.next() {
            self.total.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn work_unit_count(&self) -> usize {
        1000
    }
}

/// Running many back-to-back tasks on one dispatcher never loses or
/// double-counts a work unit, and every worker returns to `waiting` between
/// runs (§5's "once `run()` has returned, all workers have observed
/// `waiting` again").
#[test]
fn many_sequential_dispatcher_cycles_claim_every_work_unit_exactly_once() {
    let dispatcher = common::start_dispatcher(6);
    let total = Arc::new(AtomicU64::new(0));

    for _ in 0..50 {
        dispatcher.run(CountingTask { total: total.clone() }, 6);
        assert_eq!(dispatcher.active_thread_count(), 0, "no slot should remain active between cycles");
    }

    assert_eq!(total.load(Ordering::Relaxed), 50 * 1000);
    dispatcher.shutdown();
}

/// §8 scenario 3 at a larger scale: a 256 MiB heap cleared in parallel by an
/// 8-worker dispatcher leaves the bitmap entirely zero, regardless of how
/// many work units that requires.
#[test]
fn large_parallel_mark_map_clear_zeroes_everything() {
    let heap_size = 256 * 1024 * 1024;
    let map = Arc::new(MarkMap::new(0, heap_size, 8));
    map.set_range(0, heap_size);

    let dispatcher = common::start_dispatcher(8);
    let span = HeapSpan { base: 0, size: heap_size };
    map.clear_committed_parallel(&dispatcher, &[span], 8, 8);

    // Sample across the whole range rather than just the front, since a
    // work-unit indexing bug could leave a non-first chunk unclean.
    let mut addr = 0;
    while addr < heap_size {
        assert!(!map.test_bit(addr), "bit at {addr:#x} was not cleared by the parallel sweep");
        addr += 1024 * 1024;
    }

    dispatcher.shutdown();
}

/// Many mutator threads hammering independent `TlhCache`s over one pool,
/// each validating its own bump-pointer invariants (`base <= cursor <= top
/// <= real_top` is internal, but externally observable as "no two threads
/// ever see the same address and each thread's own addresses only grow").
#[test]
fn many_threads_allocate_concurrently_without_corruption() {
    let config = Arc::new(fgc::config::GcSubstrateConfig {
        tlh_initial_size: 2048,
        tlh_increment_size: 2048,
        tlh_maximum_size: 8192,
        tlh_minimum_size: 256,
        object_alignment: 8,
        ..fgc::config::GcSubstrateConfig::default()
    });
    let pool = Arc::new(fgc::objectmodel::testkit::BumpMemoryPool::new(0x4000_0000, 64 * 1024 * 1024));
    let model = Arc::new(fgc::objectmodel::testkit::FixedSizeObjectModel::new(8));
    let collector = Arc::new(fgc::objectmodel::testkit::NoopCollector::new(0));

    const THREADS: usize = 16;
    const ALLOCATIONS: usize = 200;

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let config = config.clone();
            let pool: Arc<dyn fgc::objectmodel::MemoryPool> = pool.clone();
            let model: Arc<dyn fgc::objectmodel::ObjectModel> = model.clone();
            let collector: Arc<dyn fgc::objectmodel::GlobalCollector> = collector.clone();
            thread::spawn(move || {
                let cache = fgc::tlh::TlhCache::new(&config, model, pool, collector);
                let mut addresses = Vec::with_capacity(ALLOCATIONS);
                for _ in 0..ALLOCATIONS {
                    addresses.push(cache.allocate_with_refresh(24).unwrap());
                }
                addresses
            })
        })
        .collect();

    let mut all = Vec::with_capacity(THREADS * ALLOCATIONS);
    for handle in handles {
        all.extend(handle.join().unwrap());
    }

    all.sort_unstable();
    let before = all.len();
    all.dedup();
    assert_eq!(all.len(), before, "no address should be handed out to two threads");
}
