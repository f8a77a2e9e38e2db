//! Shared fixtures for the integration test suite.
//!
//! Mirrors the unit tests' `objectmodel::testkit` usage, but assembles whole
//! multi-component setups (a region manager plus a mark map over the same
//! address range, a TLH cache backed by a real `BumpMemoryPool`, a started
//! dispatcher) the way a host would wire the substrate together rather than
//! exercising one component in isolation.

use std::sync::Arc;

use fgc::config::GcSubstrateConfig;
use fgc::dispatcher::{DispatcherConfig, ParallelDispatcher};
use fgc::heap::HeapRegionManager;
use fgc::markmap::MarkMap;
use fgc::objectmodel::testkit::{BumpMemoryPool, FixedSizeObjectModel, NoopCollector};
use fgc::objectmodel::{GlobalCollector, MemoryPool, ObjectModel};
use fgc::tlh::TlhCache;

pub const DEFAULT_HEAP_BASE: usize = 0x1_0000_0000;
pub const DEFAULT_OBJECT_ALIGNMENT: usize = 16;

/// A heap region manager and a mark map covering the same address range,
/// the pairing every populator and sweep test in this suite needs.
pub struct HeapFixture {
    pub manager: HeapRegionManager,
    pub mark_map: Arc<MarkMap>,
}

impl HeapFixture {
    pub fn new(heap_size: usize, region_size: usize) -> Self {
        let manager = HeapRegionManager::new(DEFAULT_HEAP_BASE, heap_size, region_size)
            .expect("region manager should build from a valid heap range");
        let mark_map = Arc::new(MarkMap::new(DEFAULT_HEAP_BASE, heap_size, DEFAULT_OBJECT_ALIGNMENT));
        Self { manager, mark_map }
    }
}

/// A TLH cache wired to a real bump-pointer pool, for tests that need to
/// observe refresh/abandon/reuse against an actual backing allocator rather
/// than stubbing `MemoryPool` per test.
pub fn tlh_cache_with_pool(
    config: &GcSubstrateConfig,
    pool_size: usize,
) -> (TlhCache, Arc<BumpMemoryPool>) {
    let pool = Arc::new(BumpMemoryPool::new(DEFAULT_HEAP_BASE, pool_size));
    let model: Arc<dyn ObjectModel> = Arc::new(FixedSizeObjectModel::new(config.object_alignment));
    let collector: Arc<dyn GlobalCollector> = Arc::new(NoopCollector::new(0));
    let cache = TlhCache::new(config, model, pool.clone() as Arc<dyn MemoryPool>, collector);
    (cache, pool)
}

pub fn small_tlh_config() -> GcSubstrateConfig {
    GcSubstrateConfig {
        tlh_initial_size: 4096,
        tlh_increment_size: 4096,
        tlh_maximum_size: 16384,
        tlh_minimum_size: 512,
        object_alignment: 8,
        ..GcSubstrateConfig::default()
    }
}

/// Starts a dispatcher with the given capacity, panicking (like the host
/// would abort) if startup fails.
pub fn start_dispatcher(thread_count_maximum: usize) -> ParallelDispatcher {
    ParallelDispatcher::start(DispatcherConfig {
        thread_count_maximum,
        ..Default::default()
    })
    .expect("dispatcher should start with a fresh worker pool")
}
