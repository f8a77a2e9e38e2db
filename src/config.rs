//! Configuration Module - substrate tuning parameters
//!
//! Every option the seven components consume from a host VM (§6 of the
//! design) lives here as a single struct, the way the host would assemble it
//! once at startup and hand out `Arc<GcSubstrateConfig>` clones.

const KB: usize = 1024;
const MB: usize = 1024 * 1024;
const GB: usize = 1024 * 1024 * 1024;

/// Configuration for the GC substrate.
///
/// Most fields have sensible defaults computed from the host's CPU count
/// and physical memory; override only what your embedding needs tuned.
#[derive(Debug, Clone)]
pub struct GcSubstrateConfig {
    /// Maximum heap size in bytes. Hard limit for region growth.
    pub max_heap_size: usize,
    /// Minimum heap size in bytes; the region manager never releases below this.
    pub min_heap_size: usize,
    /// Object alignment in bytes; fixes the mark map's bit-to-address ratio.
    pub object_alignment: usize,
    /// Fixed size of a single heap region.
    pub region_size: usize,

    /// Dispatcher pool capacity. `None` auto-detects from CPU count.
    pub gc_thread_count: Option<usize>,
    /// Disables heap-size and CPU clamping of the active thread count when true.
    pub gc_thread_count_forced: bool,
    /// Heap-size clamp divisor for active thread count (default 2 MiB/thread).
    pub minimum_heap_per_thread: usize,
    /// Notify-individually vs. broadcast threshold for the dispatcher.
    pub dispatcher_hybrid_notify_thread_bound: usize,

    /// Initial TLH refresh size.
    pub tlh_initial_size: usize,
    /// Maximum TLH refresh size; growth never exceeds this.
    pub tlh_maximum_size: usize,
    /// Amount `refreshSize` grows by when a too-large request bypasses refresh.
    pub tlh_increment_size: usize,
    /// Floor below which a TLH remainder is returned to the pool instead of abandoned.
    pub tlh_minimum_size: usize,
    /// Zero an entire TLH span eagerly on fresh acquisition vs. lazily.
    pub batch_clear_tlh: bool,

    /// Sweep chunk size in bytes. `0` auto-computes from heap size and thread count.
    pub par_sweep_chunk_size: usize,
    /// Size class above which overlay pool entries get a dedicated (non-shared) pool.
    pub large_object_allocation_profiling_very_large_object_size_class: usize,
    /// Percentage (0-100) of a TLH walked for frequent-object sampling.
    pub frequent_object_allocation_sampling_rate: u8,

    /// Capacity of the space-saving top-k ranking.
    pub space_saving_capacity: usize,
    /// Number of free-entry size classes tracked by the histogram.
    pub free_entry_size_classes: usize,

    /// Enables verbose GC event logging via the `log` crate.
    pub verbose: bool,
}

impl Default for GcSubstrateConfig {
    /// Defaults scaled from host CPU count and physical memory, matching the
    /// shape (if not the exact numbers) of a production embedding's defaults.
    fn default() -> Self {
        let cpus = num_cpus::get();
        let total_memory = total_physical_memory();
        let max_heap = default_max_heap(total_memory);

        GcSubstrateConfig {
            max_heap_size: max_heap,
            min_heap_size: (max_heap / 4).max(16 * MB),
            object_alignment: 8,
            region_size: 2 * MB,

            gc_thread_count: Some(cpus.max(1)),
            gc_thread_count_forced: false,
            minimum_heap_per_thread: 2 * MB,
            dispatcher_hybrid_notify_thread_bound: 8,

            tlh_initial_size: 4 * KB,
            tlh_maximum_size: 1 * MB,
            tlh_increment_size: 4 * KB,
            tlh_minimum_size: 512,
            batch_clear_tlh: true,

            par_sweep_chunk_size: 0,
            large_object_allocation_profiling_very_large_object_size_class: 64 * KB,
            frequent_object_allocation_sampling_rate: 10,

            space_saving_capacity: 32,
            free_entry_size_classes: 64,

            verbose: false,
        }
    }
}

impl GcSubstrateConfig {
    /// Validates that every range invariant the components rely on holds.
    ///
    /// Every component that trusts one of these fields (the dispatcher's
    /// thread-count fields, the TLH's growth schedule, the region manager's
    /// sizing) assumes `validate()` was called once at startup; none of them
    /// re-check it per-operation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_heap_size == 0 {
            return Err(ConfigError::InvalidHeapSize("max_heap_size must be > 0".into()));
        }
        if self.min_heap_size > self.max_heap_size {
            return Err(ConfigError::InvalidHeapSize(
                "min_heap_size cannot exceed max_heap_size".into(),
            ));
        }
        if self.region_size == 0 || self.region_size > self.max_heap_size {
            return Err(ConfigError::InvalidRegionSize(
                "region_size must be > 0 and <= max_heap_size".into(),
            ));
        }
        if !self.object_alignment.is_power_of_two() {
            return Err(ConfigError::InvalidAlignment(
                "object_alignment must be a power of two".into(),
            ));
        }

        if let Some(threads) = self.gc_thread_count {
            if threads == 0 {
                return Err(ConfigError::InvalidThreadCount("gc_thread_count must be > 0".into()));
            }
        }
        if self.minimum_heap_per_thread == 0 {
            return Err(ConfigError::InvalidThreadCount(
                "minimum_heap_per_thread must be > 0".into(),
            ));
        }

        if self.tlh_minimum_size == 0 {
            return Err(ConfigError::InvalidTlhSize("tlh_minimum_size must be > 0".into()));
        }
        if self.tlh_initial_size < self.tlh_minimum_size {
            return Err(ConfigError::InvalidTlhSize(
                "tlh_initial_size must be >= tlh_minimum_size".into(),
            ));
        }
        if self.tlh_initial_size > self.tlh_maximum_size {
            return Err(ConfigError::InvalidTlhSize(
                "tlh_initial_size must be <= tlh_maximum_size".into(),
            ));
        }
        // Open question (§9): a reservation window that doesn't fit inside
        // the smallest TLH would make every refresh immediately re-trigger.
        if self.tlh_minimum_size < 2 * self.object_alignment {
            return Err(ConfigError::InvalidTlhSize(
                "tlh_minimum_size must hold at least a reservation-window dummy object".into(),
            ));
        }

        if self.space_saving_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "space_saving_capacity must be > 0".into(),
            ));
        }
        if self.free_entry_size_classes == 0 {
            return Err(ConfigError::InvalidConfig(
                "free_entry_size_classes must be > 0".into(),
            ));
        }
        if self.frequent_object_allocation_sampling_rate > 100 {
            return Err(ConfigError::InvalidConfig(
                "frequent_object_allocation_sampling_rate must be a percentage (0-100)".into(),
            ));
        }

        Ok(())
    }

    /// Builds configuration overrides from environment variables, falling
    /// back to [`Default::default`] for anything unset or unparsable.
    ///
    /// Recognizes `GCSUB_MAX_HEAP`, `GCSUB_MIN_HEAP`, `GCSUB_GC_THREADS`,
    /// `GCSUB_TLH_INITIAL`, `GCSUB_VERBOSE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_usize("GCSUB_MAX_HEAP") {
            config.max_heap_size = v;
        }
        if let Some(v) = env_usize("GCSUB_MIN_HEAP") {
            config.min_heap_size = v;
        }
        if let Some(v) = env_usize("GCSUB_GC_THREADS") {
            config.gc_thread_count = Some(v);
        }
        if let Some(v) = env_usize("GCSUB_TLH_INITIAL") {
            config.tlh_initial_size = v;
        }
        if let Ok(val) = std::env::var("GCSUB_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Effective sweep chunk size: the configured value, or an auto-tuned
    /// `maxHeap / (threadCount * 32)` rounded up to 256 KiB granularity (§4.5).
    pub fn effective_sweep_chunk_size(&self, thread_count: usize) -> usize {
        if self.par_sweep_chunk_size != 0 {
            return self.par_sweep_chunk_size;
        }
        let threads = thread_count.max(1);
        let raw = self.max_heap_size / (threads * 32).max(1);
        let granularity = 256 * KB;
        crate::util::alignment::align_up(raw.max(granularity), granularity)
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn total_physical_memory() -> usize {
    #[cfg(target_os = "linux")]
    {
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            for line in meminfo.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:") {
                    if let Some(kb) = rest.split_whitespace().next().and_then(|s| s.parse::<usize>().ok()) {
                        return kb * KB;
                    }
                }
            }
        }
    }
    8 * GB
}

fn default_max_heap(total_memory: usize) -> usize {
    let ratio = if total_memory < 4 * GB {
        0.5
    } else if total_memory < 16 * GB {
        0.4
    } else {
        0.3
    };
    ((total_memory as f64 * ratio) as usize).min(32 * GB)
}

/// Errors returned by [`GcSubstrateConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid heap size: {0}")]
    InvalidHeapSize(String),
    #[error("invalid region size: {0}")]
    InvalidRegionSize(String),
    #[error("invalid alignment: {0}")]
    InvalidAlignment(String),
    #[error("invalid thread count: {0}")]
    InvalidThreadCount(String),
    #[error("invalid TLH size: {0}")]
    InvalidTlhSize(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
