//! C6: Parallel GC Dispatcher.
//!
//! A fixed-capacity pool of worker threads plus a slot reserved for the main
//! GC thread (§4.6). One shared mutex covers the per-slot status table and
//! the `workers_reserved_for_gc` / `threads_to_reserve` pair, matching the
//! single-dispatcher-mutex resource policy in §5.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::error::{GcError, Result};
use crate::logging::{log_event, GcEvent};

/// Per-worker slot state (§3 "Dispatcher thread state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Inactive,
    Waiting,
    Reserved,
    Active,
    Dying,
}

/// A unit of parallel GC work, admitted to the dispatcher via [`ParallelDispatcher::run`].
pub trait GcTask: Send + Sync {
    /// Invoked once on every reserved slot (main thread included). Claims
    /// work units from `claim` until it returns `None`.
    fn run(&self, claim: &WorkUnitClaim);

    /// Total number of claimable work units, if the task is partitioned
    /// that way. Tasks that don't use work-unit claiming can leave this 0.
    fn work_unit_count(&self) -> usize {
        0
    }

    /// Optional hint the adaptive-threading recommendation in §4.6 consults
    /// to cap the active thread count below the heap/CPU-derived base.
    fn recommended_working_threads(&self) -> Option<usize> {
        None
    }
}

/// Shared claim counter handed to every reserved slot running a task; each
/// call to [`next`](Self::next) atomically claims the next work-unit index.
#[derive(Clone)]
pub struct WorkUnitClaim {
    counter: Arc<AtomicUsize>,
    total: usize,
}

impl WorkUnitClaim {
    pub(crate) fn new(total: usize) -> Self {
        Self { counter: Arc::new(AtomicUsize::new(0)), total }
    }

    /// Returns the next unclaimed work-unit index, or `None` once all
    /// `total` units have been claimed.
    pub fn next(&self) -> Option<usize> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed);
        if index < self.total {
            Some(index)
        } else {
            None
        }
    }
}

/// Dispatcher tuning, mirroring the relevant subset of §6's options table.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub thread_count_maximum: usize,
    pub gc_thread_count_forced: bool,
    pub minimum_heap_per_thread: usize,
    pub dispatcher_hybrid_notify_thread_bound: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_count_maximum: num_cpus::get().max(1),
            gc_thread_count_forced: false,
            minimum_heap_per_thread: 2 * 1024 * 1024,
            dispatcher_hybrid_notify_thread_bound: 8,
        }
    }
}

struct SharedState {
    statuses: Vec<WorkerState>,
    workers_reserved_for_gc: bool,
    threads_to_reserve: usize,
    in_shutdown: bool,
    task: Option<Arc<dyn GcTask>>,
    claim: Option<WorkUnitClaim>,
}

struct Inner {
    config: DispatcherConfig,
    state: Mutex<SharedState>,
    cond: Condvar,
    thread_shutdown_count: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Worker-pool dispatcher. Slot `0` represents the main GC thread and is
/// never backed by a real OS thread; slots `1..thread_count_maximum`
/// correspond to spawned worker threads.
pub struct ParallelDispatcher {
    inner: Arc<Inner>,
}

impl ParallelDispatcher {
    /// Starts `thread_count_maximum - 1` workers. Startup is all-or-nothing:
    /// if any worker fails to spawn, every worker already started is shut
    /// down and the failure propagates.
    pub fn start(config: DispatcherConfig) -> Result<Self> {
        let slot_count = config.thread_count_maximum.max(1);
        let inner = Arc::new(Inner {
            config,
            state: Mutex::new(SharedState {
                statuses: vec![WorkerState::Inactive; slot_count],
                workers_reserved_for_gc: false,
                threads_to_reserve: 0,
                in_shutdown: false,
                task: None,
                claim: None,
            }),
            cond: Condvar::new(),
            thread_shutdown_count: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
        });

        {
            let mut state = inner.state.lock();
            state.statuses[0] = WorkerState::Waiting; // main thread's slot
        }

        let dispatcher = ParallelDispatcher { inner: inner.clone() };
        for slot in 1..slot_count {
            if let Err(e) = dispatcher.spawn_worker(slot) {
                dispatcher.shutdown();
                return Err(GcError::WorkerStartupFailed(format!(
                    "worker slot {slot} failed to start: {e}"
                )));
            }
        }
        Ok(dispatcher)
    }

    fn spawn_worker(&self, slot: usize) -> std::io::Result<()> {
        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name(format!("gc-worker-{slot}"))
            .spawn(move || worker_loop(inner, slot))?;

        let mut state = self.inner.state.lock();
        state.statuses[slot] = WorkerState::Waiting;
        self.inner.thread_shutdown_count.fetch_add(1, Ordering::SeqCst);
        drop(state);
        self.inner.handles.lock().push(handle);
        Ok(())
    }

    /// Heap/CPU-clamped active-thread-count recommendation (§4.6 "Active
    /// thread count"), before any per-task hint is applied.
    pub fn recommended_thread_count(&self, active_heap_bytes: usize) -> usize {
        let cfg = &self.inner.config;
        if cfg.gc_thread_count_forced {
            return cfg.thread_count_maximum.max(1);
        }
        let cpu_based = cfg.thread_count_maximum.min(num_cpus::get().max(1));
        let heap_based = (active_heap_bytes / cfg.minimum_heap_per_thread.max(1)).max(1);
        cpu_based.min(heap_based).max(1)
    }

    /// Runs `task` across `requested_threads` slots (clamped to pool
    /// capacity and the task's own hint), blocking until every reserved
    /// slot — main thread included — has returned to `Waiting`.
    pub fn run<T: GcTask + 'static>(&self, task: T, requested_threads: usize) {
        let task: Arc<dyn GcTask> = Arc::new(task);
        self.run_boxed(task, requested_threads);
    }

    fn run_boxed(&self, task: Arc<dyn GcTask>, requested_threads: usize) {
        let max = self.inner.config.thread_count_maximum.max(1);
        let mut active = requested_threads.min(max).max(1);
        if let Some(hint) = task.recommended_working_threads() {
            if !self.inner.config.gc_thread_count_forced {
                active = active.min(hint.max(1));
            }
        }

        let claim = WorkUnitClaim::new(task.work_unit_count());
        let threads_to_reserve;
        let notified_individually;
        {
            let mut state = self.inner.state.lock();
            state.task = Some(task.clone());
            state.claim = Some(claim.clone());
            state.workers_reserved_for_gc = true;
            state.statuses[0] = WorkerState::Active; // main reserves itself
            threads_to_reserve = active.saturating_sub(1);
            state.threads_to_reserve = threads_to_reserve;
            notified_individually = self.wake_up_threads(threads_to_reserve);
        }

        log_event(GcEvent::TaskDispatched {
            active_threads: active,
            notified_individually,
        });

        task.run(&claim);

        {
            let mut state = self.inner.state.lock();
            state.statuses[0] = WorkerState::Waiting;
        }
        self.inner.cond.notify_all();
        self.wait_for_completion();

        let mut state = self.inner.state.lock();
        state.workers_reserved_for_gc = false;
        state.task = None;
        state.claim = None;
        assert_eq!(state.threads_to_reserve, 0, "dispatcher completed with unclaimed reservations");
    }

    /// Hybrid notify policy (§4.6): individual notifies below the
    /// configured bound, a single broadcast otherwise. Must be called with
    /// `state` already locked. Returns whether it notified individually.
    fn wake_up_threads(&self, count: usize) -> bool {
        let cfg = &self.inner.config;
        let threshold = (cfg.thread_count_maximum / 2).min(cfg.dispatcher_hybrid_notify_thread_bound);
        if count < threshold {
            for _ in 0..count {
                self.inner.cond.notify_one();
            }
            true
        } else {
            self.inner.cond.notify_all();
            false
        }
    }

    fn wait_for_completion(&self) {
        let mut state = self.inner.state.lock();
        while state.statuses.iter().any(|s| matches!(s, WorkerState::Reserved | WorkerState::Active)) {
            self.inner.cond.wait(&mut state);
        }
    }

    /// Waits for any in-flight task, retires every worker slot, and blocks
    /// until all worker threads have detached (§4.6 "Shutdown").
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            while state.workers_reserved_for_gc {
                self.inner.cond.wait(&mut state);
            }
            state.in_shutdown = true;
            for s in state.statuses.iter_mut().skip(1) {
                *s = WorkerState::Dying;
            }
        }
        self.inner.cond.notify_all();

        for handle in self.inner.handles.lock().drain(..) {
            let _ = handle.join();
        }

        let mut state = self.inner.state.lock();
        while self.inner.thread_shutdown_count.load(Ordering::SeqCst) != 0 {
            self.inner.cond.wait(&mut state);
        }
    }

    /// Permanently shrinks pool capacity to `new_capacity`, marking tail
    /// slots dying and waiting for them to detach. Part of the CRIU-style
    /// checkpoint contract (§4.6).
    pub fn contract_thread_pool(&self, new_capacity: usize) {
        let old_capacity;
        {
            let mut state = self.inner.state.lock();
            old_capacity = state.statuses.len();
            if new_capacity >= old_capacity {
                return;
            }
            for s in state.statuses.iter_mut().skip(new_capacity.max(1)) {
                *s = WorkerState::Dying;
            }
        }
        self.inner.cond.notify_all();

        let target_remaining = old_capacity.saturating_sub(new_capacity.max(1));
        loop {
            if self.inner.handles.lock().len() <= target_remaining {
                break;
            }
            std::thread::yield_now();
        }

        let mut state = self.inner.state.lock();
        state.statuses.truncate(new_capacity.max(1));
        log_event(GcEvent::PoolResized { old_capacity, new_capacity });
    }

    /// Grows pool capacity to `new_capacity`, reallocating the per-slot
    /// tables (the existing prefix is preserved) and starting additional
    /// worker threads up to the new capacity. Part of the checkpoint/restart
    /// contract (§4.6). A partial startup failure leaves the pool at
    /// whatever threads actually started rather than rolling back.
    pub fn expand_thread_pool(&self, new_capacity: usize) -> Result<()> {
        let old_capacity = {
            let mut state = self.inner.state.lock();
            let old_capacity = state.statuses.len();
            if new_capacity <= old_capacity {
                return Ok(());
            }
            state.statuses.resize(new_capacity, WorkerState::Inactive);
            old_capacity
        };

        for slot in old_capacity..new_capacity {
            if let Err(e) = self.spawn_worker(slot) {
                let mut state = self.inner.state.lock();
                let started = state.statuses.iter().take_while(|s| **s != WorkerState::Inactive).count();
                state.statuses.truncate(started.max(old_capacity));
                return Err(GcError::WorkerStartupFailed(format!(
                    "worker slot {slot} failed to start during expansion: {e}"
                )));
            }
        }

        log_event(GcEvent::PoolResized { old_capacity, new_capacity });
        Ok(())
    }

    pub fn thread_count_maximum(&self) -> usize {
        self.inner.state.lock().statuses.len()
    }

    pub fn active_thread_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .statuses
            .iter()
            .filter(|s| matches!(s, WorkerState::Active | WorkerState::Reserved))
            .count()
    }
}

fn worker_loop(inner: Arc<Inner>, slot: usize) {
    loop {
        let (task, claim) = {
            let mut state = inner.state.lock();
            loop {
                if state.statuses[slot] == WorkerState::Dying {
                    drop(state);
                    inner.thread_shutdown_count.fetch_sub(1, Ordering::SeqCst);
                    inner.cond.notify_all();
                    return;
                }
                if state.workers_reserved_for_gc && state.threads_to_reserve > 0 {
                    state.threads_to_reserve -= 1;
                    state.statuses[slot] = WorkerState::Active;
                    break;
                }
                inner.cond.wait(&mut state);
            }
            (state.task.clone(), state.claim.clone())
        };

        if let (Some(task), Some(claim)) = (task, claim) {
            task.run(&claim);
        }

        let mut state = inner.state.lock();
        state.statuses[slot] = WorkerState::Waiting;
        drop(state);
        inner.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct CountingTask {
        counter: Arc<AtomicU64>,
    }

    impl GcTask for CountingTask {
        fn run(&self, _claim: &WorkUnitClaim) {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn run_invokes_task_once_per_reserved_slot() {
        let dispatcher = ParallelDispatcher::start(DispatcherConfig {
            thread_count_maximum: 4,
            ..Default::default()
        })
        .unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        dispatcher.run(CountingTask { counter: counter.clone() }, 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        dispatcher.shutdown();
    }

    #[test]
    fn run_respects_requested_thread_count_below_capacity() {
        let dispatcher = ParallelDispatcher::start(DispatcherConfig {
            thread_count_maximum: 8,
            ..Default::default()
        })
        .unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        dispatcher.run(CountingTask { counter: counter.clone() }, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        dispatcher.shutdown();
    }

    #[test]
    fn notify_policy_matches_hybrid_threshold() {
        // thread_count_maximum=64, bound=8 -> threshold=min(32,8)=8.
        let dispatcher = ParallelDispatcher::start(DispatcherConfig {
            thread_count_maximum: 64,
            dispatcher_hybrid_notify_thread_bound: 8,
            ..Default::default()
        })
        .unwrap();
        // active=4 -> threads_to_reserve=3 < 8 -> individual notify.
        assert!(dispatcher.wake_up_threads(3));
        // active=40 -> threads_to_reserve=39 >= 8 -> broadcast.
        assert!(!dispatcher.wake_up_threads(39));
        dispatcher.shutdown();
    }

    #[test]
    fn work_unit_claim_hands_out_each_index_once() {
        let claim = WorkUnitClaim::new(5);
        let mut seen = Vec::new();
        while let Some(i) = claim.next() {
            seen.push(i);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn contract_then_expand_restores_capacity_and_pool_stays_usable() {
        let dispatcher = ParallelDispatcher::start(DispatcherConfig {
            thread_count_maximum: 4,
            ..Default::default()
        })
        .unwrap();
        dispatcher.contract_thread_pool(2);
        assert_eq!(dispatcher.thread_count_maximum(), 2);

        dispatcher.expand_thread_pool(4).unwrap();
        assert_eq!(dispatcher.thread_count_maximum(), 4);

        let counter = Arc::new(AtomicU64::new(0));
        dispatcher.run(CountingTask { counter: counter.clone() }, 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        dispatcher.shutdown();
    }

    #[test]
    fn expand_below_current_capacity_is_a_no_op() {
        let dispatcher = ParallelDispatcher::start(DispatcherConfig {
            thread_count_maximum: 4,
            ..Default::default()
        })
        .unwrap();
        dispatcher.expand_thread_pool(2).unwrap();
        assert_eq!(dispatcher.thread_count_maximum(), 4);
        dispatcher.shutdown();
    }
}
