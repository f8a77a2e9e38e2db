//! C7: Main GC Thread Controller (§4.7).
//!
//! A single dedicated GC thread multiplexing stop-the-world (STW) cycle
//! requests from mutators with background concurrent work, or (if
//! `disabled`) handing every collection straight back to the requester. The
//! concrete marking/sweeping/relocation policy behind [`GcDriver`] is a host
//! responsibility; this controller only owns the state machine and the
//! exclusive-access handoff protocol around it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::error::{GcError, Result};
use crate::logging::{log_event, GcEvent};
use crate::stats::{AllocationStats, GcTimer};

/// Lifecycle states from §3 "Main thread state" / the transition table in §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Starting,
    Waiting,
    GcRequested,
    RunningConcurrent,
    TerminationRequested,
    Terminated,
    Error,
    Disabled,
}

impl ControllerState {
    fn label(self) -> &'static str {
        match self {
            ControllerState::Starting => "starting",
            ControllerState::Waiting => "waiting",
            ControllerState::GcRequested => "gc-requested",
            ControllerState::RunningConcurrent => "running-concurrent",
            ControllerState::TerminationRequested => "termination-requested",
            ControllerState::Terminated => "terminated",
            ControllerState::Error => "error",
            ControllerState::Disabled => "disabled",
        }
    }
}

/// Description of the allocation that triggered a `garbageCollect` request;
/// opaque to the controller beyond its size, which a driver may use to pick
/// a collection strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationDescription {
    pub requested_bytes: usize,
}

/// Outcome of one concurrent-phase iteration.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrentPhaseResult {
    pub bytes_scanned: u64,
    /// Whether the collector still has concurrent work to do.
    pub more_work: bool,
}

/// The concrete collection policy the controller drives. Implemented by the
/// host; this crate's tests use a scripted fake (see the test module below).
pub trait GcDriver: Send + Sync {
    /// Runs one STW cycle under exclusive VM access.
    fn main_thread_garbage_collect(&self, description: AllocationDescription);

    /// Runs one concurrent-phase iteration.
    fn main_thread_concurrent_collect(&self) -> ConcurrentPhaseResult;

    /// Whether the collector currently has concurrent work available.
    fn concurrent_work_available(&self) -> bool;
}

struct Inner {
    state: Mutex<ControllerState>,
    cond: Condvar,
    driver: Arc<dyn GcDriver>,
    stats: Arc<AllocationStats>,
    implicit_mode: bool,
    terminate_concurrent: AtomicBool,
    main_thread_present: AtomicBool,
    pending_description: StdMutex<Option<AllocationDescription>>,
    cycle_counter: AtomicU64,
    bytes_scanned_last: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Runs one STW cycle through `driver`, measuring its real wall-clock
/// duration with a [`GcTimer`] and feeding it into `stats`' pause histogram
/// rather than the dispatcher-visible `GcEvent` alone.
fn run_stw_cycle(driver: &dyn GcDriver, stats: &AllocationStats, description: AllocationDescription, cycle: u64) {
    let timer = GcTimer::new();
    driver.main_thread_garbage_collect(description);
    let duration_us = timer.elapsed_us();
    stats.record_pause(duration_us);
    log_event(GcEvent::StwCycle { cycle, duration_us });
}

/// Owns the dedicated GC thread and its state machine.
pub struct MainGcThreadController {
    inner: Arc<Inner>,
}

impl MainGcThreadController {
    /// Spawns the main GC thread and blocks until it either reaches
    /// `waiting` (attach succeeded) or `error` (attach failed).
    ///
    /// `stats` receives the wall-clock duration of every STW cycle this
    /// controller drives, via [`AllocationStats::record_pause`].
    pub fn start(driver: Arc<dyn GcDriver>, stats: Arc<AllocationStats>, implicit_mode: bool) -> Result<Self> {
        let inner = Arc::new(Inner {
            state: Mutex::new(ControllerState::Starting),
            cond: Condvar::new(),
            driver,
            stats,
            implicit_mode,
            terminate_concurrent: AtomicBool::new(false),
            main_thread_present: AtomicBool::new(true),
            pending_description: StdMutex::new(None),
            cycle_counter: AtomicU64::new(0),
            bytes_scanned_last: AtomicU64::new(0),
            handle: Mutex::new(None),
        });

        let loop_inner = inner.clone();
        let handle = std::thread::Builder::new()
            .name("gc-main".into())
            .spawn(move || main_loop(loop_inner))
            .map_err(|e| GcError::WorkerStartupFailed(format!("main GC thread failed to start: {e}")))?;
        *inner.handle.lock() = Some(handle);

        {
            let mut state = inner.state.lock();
            while *state == ControllerState::Starting {
                inner.cond.wait(&mut state);
            }
            if *state == ControllerState::Error {
                return Err(GcError::WorkerStartupFailed("main GC thread attach failed".into()));
            }
        }

        Ok(Self { inner })
    }

    /// A controller with no dedicated thread: every collection runs inline
    /// on the requesting mutator. Matches the "disabled" state and the
    /// null-main-thread edge case (§4.7).
    pub fn disabled(driver: Arc<dyn GcDriver>, stats: Arc<AllocationStats>) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(ControllerState::Disabled),
            cond: Condvar::new(),
            driver,
            stats,
            implicit_mode: true,
            terminate_concurrent: AtomicBool::new(false),
            main_thread_present: AtomicBool::new(false),
            pending_description: StdMutex::new(None),
            cycle_counter: AtomicU64::new(0),
            bytes_scanned_last: AtomicU64::new(0),
            handle: Mutex::new(None),
        });
        Self { inner }
    }

    pub fn state(&self) -> ControllerState {
        *self.inner.state.lock()
    }

    /// Mutator entry point: request a stop-the-world collection.
    ///
    /// - Disabled / no main thread: runs `description` inline, synchronously.
    /// - Implicit mode: the collection still runs inline on the calling
    ///   mutator, but the main thread is poked afterward to resume concurrent
    ///   work if any remains.
    /// - Otherwise: asks the main thread to run it, forcing any in-flight
    ///   concurrent phase to finish early, and blocks until it returns to
    ///   `waiting`.
    pub fn garbage_collect(&self, description: AllocationDescription) -> Result<()> {
        if self.inner.state.lock().eq(&ControllerState::Disabled)
            || !self.inner.main_thread_present.load(Ordering::Acquire)
        {
            let cycle = self.inner.cycle_counter.fetch_add(1, Ordering::Relaxed);
            run_stw_cycle(&*self.inner.driver, &self.inner.stats, description, cycle);
            return Ok(());
        }

        if self.inner.implicit_mode {
            self.force_concurrent_finish();
            let cycle = self.inner.cycle_counter.fetch_add(1, Ordering::Relaxed);
            run_stw_cycle(&*self.inner.driver, &self.inner.stats, description, cycle);
            // Poke the main thread in case concurrent work remains.
            self.inner.cond.notify_all();
            return Ok(());
        }

        {
            let mut state = self.inner.state.lock();
            if matches!(*state, ControllerState::Terminated | ControllerState::Error) {
                return Err(GcError::InvalidState {
                    expected: "waiting or running-concurrent".into(),
                    actual: state.label().into(),
                });
            }
            if *state == ControllerState::RunningConcurrent {
                self.inner.terminate_concurrent.store(true, Ordering::SeqCst);
            }
            *self.inner.pending_description.lock().unwrap() = Some(description);
            transition(&mut state, ControllerState::GcRequested);
            self.inner.cond.notify_all();

            while *state == ControllerState::GcRequested || *state == ControllerState::RunningConcurrent {
                self.inner.cond.wait(&mut state);
            }
        }
        Ok(())
    }

    /// Forces an in-flight concurrent phase to exit promptly. Idempotent and
    /// safe to call when no concurrent phase is running.
    pub fn force_concurrent_finish(&self) {
        self.inner.terminate_concurrent.store(true, Ordering::SeqCst);
        self.inner.cond.notify_all();
    }

    /// Bytes scanned during the most recently completed (or force-finished)
    /// concurrent phase.
    pub fn last_concurrent_bytes_scanned(&self) -> u64 {
        self.inner.bytes_scanned_last.load(Ordering::Relaxed)
    }

    /// Requests shutdown and blocks until the main thread exits.
    pub fn shutdown(&self) {
        self.inner.main_thread_present.store(false, Ordering::Release);
        {
            let mut state = self.inner.state.lock();
            if !matches!(*state, ControllerState::Terminated | ControllerState::Error | ControllerState::Disabled) {
                transition(&mut state, ControllerState::TerminationRequested);
            }
        }
        self.inner.cond.notify_all();

        if let Some(handle) = self.inner.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

fn transition(state: &mut ControllerState, to: ControllerState) {
    if *state == to {
        return;
    }
    log_event(GcEvent::StateTransition { from: state.label().to_string(), to: to.label().to_string() });
    *state = to;
}

fn main_loop(inner: Arc<Inner>) {
    {
        let mut state = inner.state.lock();
        transition(&mut state, ControllerState::Waiting);
        inner.cond.notify_all();
    }

    loop {
        let mut state = inner.state.lock();
        match *state {
            ControllerState::Waiting => {
                if inner.driver.concurrent_work_available() {
                    transition(&mut state, ControllerState::RunningConcurrent);
                    continue;
                }
                inner.cond.wait(&mut state);
            }
            ControllerState::GcRequested => {
                let description = inner.pending_description.lock().unwrap().take().unwrap_or_default();
                drop(state);
                let cycle = inner.cycle_counter.fetch_add(1, Ordering::Relaxed);
                run_stw_cycle(&*inner.driver, &inner.stats, description, cycle);
                let mut state = inner.state.lock();
                transition(&mut state, ControllerState::Waiting);
                inner.cond.notify_all();
            }
            ControllerState::RunningConcurrent => {
                drop(state);
                let result = inner.driver.main_thread_concurrent_collect();
                inner.bytes_scanned_last.store(result.bytes_scanned, Ordering::Relaxed);
                let terminated_early = inner.terminate_concurrent.swap(false, Ordering::SeqCst);
                log_event(GcEvent::ConcurrentPhase {
                    bytes_scanned: result.bytes_scanned,
                    terminated_early,
                });

                let mut state = inner.state.lock();
                if *state != ControllerState::RunningConcurrent {
                    // A GC request already moved us on; don't clobber it.
                    continue;
                }
                if terminated_early || !result.more_work {
                    transition(&mut state, ControllerState::Waiting);
                    inner.cond.notify_all();
                }
                // else: stay RunningConcurrent and loop for another phase.
            }
            ControllerState::TerminationRequested => {
                transition(&mut state, ControllerState::Terminated);
                inner.cond.notify_all();
                return;
            }
            ControllerState::Terminated | ControllerState::Error | ControllerState::Disabled => return,
            ControllerState::Starting => unreachable!("attach already completed before entering the loop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcSubstrateConfig;
    use std::sync::atomic::AtomicUsize;

    fn stats() -> Arc<AllocationStats> {
        Arc::new(AllocationStats::new(&GcSubstrateConfig::default()))
    }

    struct ScriptedDriver {
        stw_count: AtomicUsize,
        concurrent_available: AtomicBool,
        concurrent_calls: AtomicUsize,
    }

    impl GcDriver for ScriptedDriver {
        fn main_thread_garbage_collect(&self, _description: AllocationDescription) {
            self.stw_count.fetch_add(1, Ordering::SeqCst);
        }

        fn main_thread_concurrent_collect(&self) -> ConcurrentPhaseResult {
            self.concurrent_calls.fetch_add(1, Ordering::SeqCst);
            ConcurrentPhaseResult { bytes_scanned: 4096, more_work: false }
        }

        fn concurrent_work_available(&self) -> bool {
            self.concurrent_available.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn starts_into_waiting_state() {
        let driver = Arc::new(ScriptedDriver {
            stw_count: AtomicUsize::new(0),
            concurrent_available: AtomicBool::new(false),
            concurrent_calls: AtomicUsize::new(0),
        });
        let controller = MainGcThreadController::start(driver, stats(), false).unwrap();
        assert_eq!(controller.state(), ControllerState::Waiting);
        controller.shutdown();
    }

    #[test]
    fn explicit_gc_request_runs_stw_and_returns_to_waiting() {
        let driver = Arc::new(ScriptedDriver {
            stw_count: AtomicUsize::new(0),
            concurrent_available: AtomicBool::new(false),
            concurrent_calls: AtomicUsize::new(0),
        });
        let stats = stats();
        let controller = MainGcThreadController::start(driver.clone(), stats.clone(), false).unwrap();
        controller.garbage_collect(AllocationDescription { requested_bytes: 128 }).unwrap();
        assert_eq!(driver.stw_count.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), ControllerState::Waiting);
        assert_eq!(stats.pause_histogram().count(), 1);
        controller.shutdown();
    }

    #[test]
    fn concurrent_work_runs_automatically_and_returns_to_waiting() {
        let driver = Arc::new(ScriptedDriver {
            stw_count: AtomicUsize::new(0),
            concurrent_available: AtomicBool::new(true),
            concurrent_calls: AtomicUsize::new(0),
        });
        let controller = MainGcThreadController::start(driver.clone(), stats(), false).unwrap();
        // `more_work: false` in the scripted driver guarantees a single
        // concurrent phase runs before it settles back to waiting.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while driver.concurrent_calls.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::yield_now();
        }
        assert!(driver.concurrent_calls.load(Ordering::SeqCst) >= 1);
        controller.shutdown();
    }

    #[test]
    fn disabled_controller_runs_every_collection_inline() {
        let driver = Arc::new(ScriptedDriver {
            stw_count: AtomicUsize::new(0),
            concurrent_available: AtomicBool::new(false),
            concurrent_calls: AtomicUsize::new(0),
        });
        let stats = stats();
        let controller = MainGcThreadController::disabled(driver.clone(), stats.clone());
        controller.garbage_collect(AllocationDescription::default()).unwrap();
        assert_eq!(driver.stw_count.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), ControllerState::Disabled);
        assert_eq!(stats.pause_histogram().count(), 1);
    }

    #[test]
    fn implicit_mode_runs_inline_but_still_notifies_main_thread() {
        let driver = Arc::new(ScriptedDriver {
            stw_count: AtomicUsize::new(0),
            concurrent_available: AtomicBool::new(false),
            concurrent_calls: AtomicUsize::new(0),
        });
        let stats = stats();
        let controller = MainGcThreadController::start(driver.clone(), stats.clone(), true).unwrap();
        controller.garbage_collect(AllocationDescription { requested_bytes: 64 }).unwrap();
        assert_eq!(driver.stw_count.load(Ordering::SeqCst), 1);
        assert_eq!(stats.pause_histogram().count(), 1);
        controller.shutdown();
    }
}
