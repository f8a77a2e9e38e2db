//! Integration tests for thread-local allocation (§4.4, §8 scenario 1) and
//! concurrent TLH usage across several mutator threads sharing one backing
//! pool.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use fgc::config::GcSubstrateConfig;
use fgc::tlh::TlhCache;

/// §8 scenario 1: with `tlhInitial=4096`, `tlhIncrement=4096`, `tlhMax=16384`,
/// ten 256-byte objects allocated between refreshes, `refreshSize` grows by
/// 4096 on each refresh and clamps at 16384 after hitting the cap.
///
/// `refresh` (not `flush`) is the operation that grows the schedule —
/// `flush` resets it back to `tlh_initial_size` per §4.4's flush contract, so
/// each call below is a direct `refresh`, standing in for the TLH being
/// exhausted by ten 256-byte allocations between each one.
#[test]
fn tlh_growth_scenario_hits_configured_cap() {
    let config = common::small_tlh_config();
    let (cache, _pool) = common::tlh_cache_with_pool(&config, 8 * 1024 * 1024);

    cache.refresh(256).unwrap();
    assert_eq!(cache.remaining(), 4096, "first refresh should use tlh_initial_size");

    cache.refresh(256).unwrap();
    assert_eq!(cache.remaining(), 8192, "second refresh should grow by tlh_increment_size");

    cache.refresh(256).unwrap();
    assert_eq!(cache.remaining(), 12288);

    cache.refresh(256).unwrap();
    assert_eq!(cache.remaining(), 16384, "fourth refresh should hit the configured cap");

    for _ in 0..4 {
        cache.refresh(256).unwrap();
        assert_eq!(cache.remaining(), 16384, "refresh size must never exceed tlh_maximum_size");
    }
}

/// Every allocation out of one cache between refreshes lands at a strictly
/// increasing address (the bump-pointer invariant from §3: `alloc` advances
/// monotonically within a refresh).
#[test]
fn allocations_within_one_refresh_are_monotonic_and_unique() {
    let config = common::small_tlh_config();
    let (cache, _pool) = common::tlh_cache_with_pool(&config, 1024 * 1024);
    cache.allocate_with_refresh(64).unwrap();

    let mut addresses = Vec::new();
    for _ in 0..50 {
        addresses.push(cache.allocate_with_refresh(64).unwrap());
    }

    assert!(addresses.windows(2).all(|w| w[0] < w[1]), "bump pointer must only advance");
    let unique: HashSet<_> = addresses.iter().collect();
    assert_eq!(unique.len(), addresses.len(), "duplicate address handed out by one TLH");
}

/// Several mutator threads, each owning its own `TlhCache` over a shared
/// pool, never observe overlapping spans — the pool's own atomic
/// compare-exchange is the only cross-thread synchronization in play.
#[test]
fn concurrent_tlh_caches_over_shared_pool_never_overlap() {
    let config = Arc::new(GcSubstrateConfig {
        tlh_initial_size: 1024,
        tlh_increment_size: 1024,
        tlh_maximum_size: 4096,
        tlh_minimum_size: 128,
        object_alignment: 8,
        ..GcSubstrateConfig::default()
    });
    let pool = Arc::new(fgc::objectmodel::testkit::BumpMemoryPool::new(0x2000_0000, 16 * 1024 * 1024));
    let model = Arc::new(fgc::objectmodel::testkit::FixedSizeObjectModel::new(8));
    let collector = Arc::new(fgc::objectmodel::testkit::NoopCollector::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let config = config.clone();
            let pool: Arc<dyn fgc::objectmodel::MemoryPool> = pool.clone();
            let model: Arc<dyn fgc::objectmodel::ObjectModel> = model.clone();
            let collector: Arc<dyn fgc::objectmodel::GlobalCollector> = collector.clone();
            thread::spawn(move || {
                let cache = TlhCache::new(&config, model, pool, collector);
                let mut addresses = Vec::with_capacity(64);
                for _ in 0..64 {
                    addresses.push(cache.allocate_with_refresh(32).unwrap());
                }
                addresses
            })
        })
        .collect();

    let mut all_addresses = Vec::new();
    for handle in handles {
        all_addresses.extend(handle.join().expect("allocating thread should not panic"));
    }

    let unique: HashSet<_> = all_addresses.iter().collect();
    assert_eq!(
        unique.len(),
        all_addresses.len(),
        "concurrent TLHs over a shared pool handed out overlapping addresses"
    );
}

/// §8 scenario 2, exercised against the real `BumpMemoryPool` rather than
/// the unit test's inline fixture: allocating past the abandon threshold
/// still gets an abandoned remainder reused by a later, smaller refresh.
#[test]
fn abandoned_remainder_is_reused_across_refreshes() {
    let config = GcSubstrateConfig {
        tlh_initial_size: 4096,
        tlh_increment_size: 0,
        tlh_maximum_size: 4096,
        tlh_minimum_size: 512,
        object_alignment: 8,
        ..GcSubstrateConfig::default()
    };
    let (cache, _pool) = common::tlh_cache_with_pool(&config, 1 << 20);

    cache.refresh(4096).unwrap();
    cache.allocate(3000).unwrap();
    // Remainder is 1096 bytes, above tlh_minimum (512), so it's abandoned
    // rather than returned outright.
    cache.refresh(1500).unwrap();
    assert_eq!(cache.remaining(), 4096, "1500-byte request should bypass the too-small 1096 remainder");

    cache.refresh(512).unwrap();
    assert_eq!(cache.remaining(), 1096, "512-byte request should reuse the earlier abandoned remainder");
}
