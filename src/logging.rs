//! Structured GC event logging.
//!
//! The seven components emit [`GcEvent`]s instead of calling `log::` macros
//! directly; a single [`GcLogger`] decides the level, keeps a ring of recent
//! events for diagnostics, and renders to the `log` crate as either
//! human-readable lines or a JSON object per event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use log::Level;

/// GC event categories, one per component that wants to report progress.
#[derive(Debug, Clone)]
pub enum GcEvent {
    /// C7: main thread state transition.
    StateTransition { from: String, to: String },
    /// C7: an STW cycle ran under exclusive VM access.
    StwCycle { cycle: u64, duration_us: u64 },
    /// C7: a concurrent phase completed (or was asked to finish early).
    ConcurrentPhase {
        bytes_scanned: u64,
        terminated_early: bool,
    },
    /// C6: a task was dispatched to the worker pool.
    TaskDispatched { active_threads: usize, notified_individually: bool },
    /// C6: the pool shrank or grew across a checkpoint/restart boundary.
    PoolResized { old_capacity: usize, new_capacity: usize },
    /// C4: a TLH was refreshed; `reused` distinguishes abandoned-list reuse
    /// from a fresh acquisition.
    TlhRefresh { refresh_size: usize, reused: bool },
    /// C4: a TLH remainder was discarded (abandoned to the list or returned
    /// to the pool, per `abandoned`).
    TlhDiscard { discarded_bytes: usize, abandoned: bool },
    /// C2: a mark-map range clear dispatched `work_units` chunks.
    MarkMapClear { work_units: usize, bytes_cleared: usize },
    /// C3: the space-saving ranking evicted its current minimum.
    SpaceSavingEvict { inherited_count: u64 },
    /// C1: a region was committed or decommitted.
    RegionCommit { region_index: usize, committed: bool },
    /// C5: sweep chunking finished partitioning the heap.
    SweepChunksBuilt { chunk_count: usize, chunk_size: usize },
    /// Any component's allocation or resource-exhaustion failure.
    AllocationFailure { size: usize, heap_used: usize },
}

impl GcEvent {
    fn level(&self) -> Level {
        match self {
            GcEvent::AllocationFailure { .. } => Level::Warn,
            GcEvent::StateTransition { .. }
            | GcEvent::StwCycle { .. }
            | GcEvent::PoolResized { .. } => Level::Info,
            GcEvent::ConcurrentPhase { .. }
            | GcEvent::TaskDispatched { .. }
            | GcEvent::MarkMapClear { .. }
            | GcEvent::SweepChunksBuilt { .. } => Level::Debug,
            GcEvent::TlhRefresh { .. }
            | GcEvent::TlhDiscard { .. }
            | GcEvent::SpaceSavingEvict { .. }
            | GcEvent::RegionCommit { .. } => Level::Trace,
        }
    }

    fn human(&self) -> String {
        match self {
            GcEvent::StateTransition { from, to } => format!("main thread {from} -> {to}"),
            GcEvent::StwCycle { cycle, duration_us } => {
                format!("STW cycle {cycle} completed in {duration_us}us")
            }
            GcEvent::ConcurrentPhase { bytes_scanned, terminated_early } => format!(
                "concurrent phase scanned {bytes_scanned} bytes (terminated_early={terminated_early})"
            ),
            GcEvent::TaskDispatched { active_threads, notified_individually } => format!(
                "dispatched task to {active_threads} threads (individual notify={notified_individually})"
            ),
            GcEvent::PoolResized { old_capacity, new_capacity } => {
                format!("dispatcher pool resized {old_capacity} -> {new_capacity}")
            }
            GcEvent::TlhRefresh { refresh_size, reused } => {
                format!("TLH refreshed to {refresh_size} bytes (reused={reused})")
            }
            GcEvent::TlhDiscard { discarded_bytes, abandoned } => {
                format!("TLH discarded {discarded_bytes} bytes (abandoned={abandoned})")
            }
            GcEvent::MarkMapClear { work_units, bytes_cleared } => {
                format!("mark map clear: {work_units} work units, {bytes_cleared} bytes")
            }
            GcEvent::SpaceSavingEvict { inherited_count } => {
                format!("space-saving evicted minimum, newcomer inherits count {inherited_count}")
            }
            GcEvent::RegionCommit { region_index, committed } => {
                format!("region {region_index} commit={committed}")
            }
            GcEvent::SweepChunksBuilt { chunk_count, chunk_size } => {
                format!("built {chunk_count} sweep chunks of {chunk_size} bytes")
            }
            GcEvent::AllocationFailure { size, heap_used } => {
                format!("allocation failure: requested {size} bytes, heap used {heap_used}")
            }
        }
    }

    fn json(&self) -> serde_json::Value {
        serde_json::to_value(format!("{:?}", self)).unwrap_or(serde_json::Value::Null)
    }
}

/// Output format for [`GcLogger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

/// Logger configuration.
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    pub format: LogFormat,
    pub timestamps: bool,
    /// How many recent events to retain for [`GcLogger::recent_events`].
    pub history_capacity: usize,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Human,
            timestamps: true,
            history_capacity: 256,
        }
    }
}

/// Routes [`GcEvent`]s to the `log` crate and keeps a bounded history.
pub struct GcLogger {
    config: GcLoggerConfig,
    history: Mutex<Vec<(Instant, GcEvent)>>,
    enabled: AtomicBool,
}

impl GcLogger {
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            config,
            history: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Records `event`, emitting it through the `log` crate at its level.
    pub fn log(&self, event: GcEvent) {
        if !self.is_enabled() {
            return;
        }

        let level = event.level();
        match self.config.format {
            LogFormat::Human => log::log!(level, "{}", event.human()),
            LogFormat::Json => log::log!(level, "{}", event.json()),
        }

        if let Ok(mut history) = self.history.lock() {
            history.push((Instant::now(), event));
            let cap = self.config.history_capacity;
            if history.len() > cap {
                let overflow = history.len() - cap;
                history.drain(0..overflow);
            }
        }
    }

    pub fn recent_events(&self) -> Vec<(Instant, GcEvent)> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn clear_history(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }

    pub fn event_count(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(GcLoggerConfig::default())
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: Mutex<GcLogger> = Mutex::new(GcLogger::default());
}

/// Logs `event` through the process-wide logger.
pub fn log_event(event: GcEvent) {
    if let Ok(logger) = GLOBAL_LOGGER.lock() {
        logger.log(event);
    }
}

/// Replaces the process-wide logger's configuration.
pub fn configure_logger(config: GcLoggerConfig) {
    if let Ok(mut logger) = GLOBAL_LOGGER.lock() {
        *logger = GcLogger::new(config);
    }
}
