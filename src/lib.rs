//! # fgc - a managed-runtime garbage collection substrate
//!
//! `fgc` provides the region-based heap bookkeeping a managed runtime's
//! garbage collector is built on top of, modeled closely on the OMR/OpenJ9
//! collector framework: a heap region manager and descriptor table, a
//! per-object mark bitmap, allocation statistics (large-object frequency
//! ranking and free-chunk size-class histograms), a thread-local heap (TLH)
//! allocation cache, region iteration and sweep chunking, a parallel task
//! dispatcher, and the main GC thread's state machine tying STW and
//! concurrent phases together.
//!
//! This crate does not implement a mark/sweep/compact *policy* — no root
//! scanning, no object graph walking, no write barriers. It is the
//! substrate a host collector is written against: the host supplies an
//! [`objectmodel::ObjectModel`] (how to measure and walk objects) and a
//! [`controller::GcDriver`] (what a collection cycle actually does), and this
//! crate supplies the region layout, concurrency, and statistics plumbing
//! around it.
//!
//! ## Components
//!
//! - [`heap`]: heap region manager and descriptor table (regions, masks,
//!   address-ordered and auxiliary region lists).
//! - [`markmap`]: the heap bitmap used to mark live objects and drive
//!   mark-map-based region population.
//! - [`stats`]: allocation statistics — large-object size-class ranking via
//!   space-saving, free-entry size-class histograms, pause-time histograms,
//!   and a small metrics exporter.
//! - [`tlh`]: thread-local heap allocation cache, including refresh,
//!   discard-to-abandoned-list, and reservation restore.
//! - [`populator`] and [`sweep`]: buffered per-region object iteration
//!   dispatched by region type, and sweep chunking for parallel sweep work.
//! - [`dispatcher`]: the parallel worker-thread pool GC tasks run on,
//!   including checkpoint/restart pool resizing.
//! - [`controller`]: the main GC thread's state machine, mediating STW
//!   requests against concurrent collection phases.
//! - [`config`]: substrate tuning parameters, with environment-variable
//!   overrides and validation.
//! - [`objectmodel`]: the traits a host implements to describe its object
//!   layout, memory pools, and collection driver.
//! - [`error`]: the substrate's error type.
//! - [`logging`]: structured GC event logging shared by all seven
//!   components.
//! - [`util`]: alignment and atomic helpers used throughout.
//!
//! ## Example
//!
//! ```rust
//! use fgc::config::GcSubstrateConfig;
//! use fgc::heap::{HeapRegionManager, RegionMask};
//!
//! let config = GcSubstrateConfig::default();
//! config.validate().unwrap();
//!
//! let manager = HeapRegionManager::new(0x1_0000_0000, config.min_heap_size, config.region_size).unwrap();
//! let committed = manager.iter(RegionMask::COMMITTED, None).count();
//! assert_eq!(committed, 0);
//! ```

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod heap;
pub mod logging;
pub mod markmap;
pub mod objectmodel;
pub mod populator;
pub mod stats;
pub mod sweep;
pub mod tlh;
pub mod util;

pub use config::GcSubstrateConfig;
pub use error::{GcError, Result};

/// Crate version string, from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = GcSubstrateConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn version_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
