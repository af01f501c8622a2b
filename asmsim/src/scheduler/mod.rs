use crate::cache::StateCache;
use crate::cfg::ControlFlowModel;
use crate::config::SimulatorConfig;
use crate::engine::BoundedExecutionEngine;
use crate::liveness::LivenessConfig;
use crate::state::{Position, SymbolicState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};

mod queue;

pub use queue::PendingQueue;
use queue::PendingWork;

/// Shared handle to the model a session currently simulates
pub type SharedModel = Arc<RwLock<Arc<ControlFlowModel>>>;

/// Decides when states get computed: synchronously on request, or by a single background
/// worker draining the pending queues.
///
/// At most one engine run happens at a time. Cache lookups never wait for it.
pub struct SimulationScheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    engine: Mutex<BoundedExecutionEngine>,
    busy: AtomicBool,
    work: Mutex<PendingWork>,
    work_ready: Condvar,
    idle: Condvar,
    model: SharedModel,
    cache: Arc<StateCache>,
    sync_steps: usize,
    background_steps: usize,
}

/// Exclusive use of the engine. Released when dropped.
struct CriticalSection<'a> {
    engine: MutexGuard<'a, BoundedExecutionEngine>,
    busy: &'a AtomicBool,
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

impl Shared {
    fn enter(&self) -> CriticalSection<'_> {
        let engine = self.engine.lock().unwrap_or_else(|e| e.into_inner());
        self.busy.store(true, Ordering::Release);
        CriticalSection {
            engine,
            busy: &self.busy,
        }
    }

    fn work(&self) -> MutexGuard<'_, PendingWork> {
        self.work.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn model(&self) -> Arc<ControlFlowModel> {
        self.model.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Runs the engine against the current model and stores the result. Nothing is stored
    /// when the engine has no answer or the model moved on while it ran.
    fn compute(
        &self,
        section: &mut CriticalSection<'_>,
        line: usize,
        which: Position,
        steps: usize,
    ) -> Option<Arc<SymbolicState>> {
        let model = self.model();
        let last = model.last_line()?;
        let liveness = LivenessConfig::compute(&model, 0, last);
        match section
            .engine
            .run_backward(&model, line, steps, &liveness, which)
        {
            Ok(Some(state)) => {
                let state = Arc::new(state);
                self.cache
                    .put(line, which, state.clone())
                    .then_some(state)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("simulation of {which} line {line} failed: {e}");
                None
            }
        }
    }

    fn worker_loop(&self) {
        loop {
            {
                let mut work = self.work();
                while !work.has_work() && !work.shutdown {
                    work = self.work_ready.wait(work).unwrap_or_else(|e| e.into_inner());
                }
                if work.shutdown {
                    return;
                }
            }

            let mut section = self.enter();
            let job = {
                let mut work = self.work();
                if work.shutdown {
                    return;
                }
                let job = work.next();
                work.in_flight = job.is_some();
                job
            };

            if let Some((line, which)) = job {
                if self.cache.contains(line, which) {
                    tracing::debug!("{which} line {line} already cached");
                } else {
                    tracing::debug!("background simulation of {which} line {line}");
                    self.compute(&mut section, line, which, self.background_steps);
                }
            }
            drop(section);

            let mut work = self.work();
            work.in_flight = false;
            if work.is_idle() {
                self.idle.notify_all();
            }
        }
    }
}

impl SimulationScheduler {
    pub fn new(config: &SimulatorConfig, model: SharedModel, cache: Arc<StateCache>) -> Self {
        let shared = Arc::new(Shared {
            engine: Mutex::new(BoundedExecutionEngine::new(config)),
            busy: AtomicBool::new(false),
            work: Mutex::new(PendingWork::default()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            model,
            cache,
            sync_steps: config.sync_steps,
            background_steps: config.background_steps,
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("asmsim-worker".to_string())
            .spawn(move || worker_shared.worker_loop());
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("could not start the background worker: {e}");
                None
            }
        };
        Self { shared, worker }
    }

    pub fn cache(&self) -> &Arc<StateCache> {
        &self.shared.cache
    }

    pub fn get_after(&self, line: usize, allow_background: bool) -> Option<Arc<SymbolicState>> {
        self.get(line, Position::After, allow_background)
    }

    pub fn get_before(&self, line: usize, allow_background: bool) -> Option<Arc<SymbolicState>> {
        self.get(line, Position::Before, allow_background)
    }

    /// The cached state, if any. On a miss the line is queued for the background worker when
    /// `allow_background` is set.
    pub fn get(
        &self,
        line: usize,
        which: Position,
        allow_background: bool,
    ) -> Option<Arc<SymbolicState>> {
        if let Some(state) = self.shared.cache.get(line, which) {
            return Some(state);
        }
        if allow_background && self.worker.is_some() {
            let mut work = self.shared.work();
            if work.queue(which).push(line) {
                tracing::info!("scheduled {which} line {line}");
                self.shared.work_ready.notify_one();
            }
        }
        None
    }

    pub fn create_after(&self, line: usize) -> Option<Arc<SymbolicState>> {
        self.create(line, Position::After)
    }

    pub fn create_before(&self, line: usize) -> Option<Arc<SymbolicState>> {
        self.create(line, Position::Before)
    }

    /// Computes the state right away, waiting for a running background job to finish first.
    pub fn create(&self, line: usize, which: Position) -> Option<Arc<SymbolicState>> {
        if let Some(state) = self.shared.cache.get(line, which) {
            return Some(state);
        }
        let mut section = self.shared.enter();
        {
            let mut work = self.shared.work();
            work.before.remove(line);
            work.after.remove(line);
            if work.is_idle() {
                self.shared.idle.notify_all();
            }
        }
        if let Some(state) = self.shared.cache.get(line, which) {
            return Some(state);
        }
        self.shared
            .compute(&mut section, line, which, self.shared.sync_steps)
    }

    /// Whether an engine run is in progress
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    pub fn pending_after(&self) -> Vec<usize> {
        self.shared.work().after.lines()
    }

    pub fn pending_before(&self) -> Vec<usize> {
        self.shared.work().before.lines()
    }

    /// Blocks until both queues are empty and no background job is running
    pub fn wait_idle(&self) {
        if self.worker.is_none() {
            return;
        }
        let mut work = self.shared.work();
        while !work.is_idle() {
            work = self.shared.idle.wait(work).unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Drop for SimulationScheduler {
    fn drop(&mut self) {
        self.shared.work().shutdown = true;
        self.shared.work_ready.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("background worker panicked");
            }
        }
    }
}
