//! Oracle back-end: ideal speculation over fractal time.
//!
//! A single worker drains a stack of priority queues, one per live
//! virtual-time domain. `deepen` opens a child domain keyed by the
//! running task's timestamp; a domain closes automatically when it runs
//! dry, notifying the machine model. Every enqueue receives a monotone
//! UID so the model can reconstruct the task creation tree.
//!
//! The run loop executes on a dedicated worker thread with its own
//! stack, so the driver thread's frames never appear beneath a task and
//! the machine model sees a clean, task-only stack.

use crate::sched::domain::DomainStack;
use crate::sched::{run_task, set_current, Backend, RuntimeGuard};
use crate::sim::{NullSim, SimBackend};
use crate::task::{EnqFlags, Task, Timestamp, NO_TIMESTAMP};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Worker count the oracle reports.
///
/// The oracle models unbounded parallelism; this constant is what sizes
/// grain formulas and per-worker intermediate arrays, so it is large
/// but finite.
pub const ORACLE_VIRTUAL_THREADS: u32 = 512;

/// Stack size for the oracle's worker thread.
const WORKER_STACK_BYTES: usize = 8 << 20;

struct OracleState {
    domains: DomainStack,
    uid_counter: u64,
    cur_uid: u64,
    cur_ts: Timestamp,
}

struct OracleInner {
    state: Mutex<OracleState>,
    sim: Arc<dyn SimBackend>,
}

/// The oracle runtime.
#[derive(Clone)]
pub struct OracleRuntime {
    inner: Arc<OracleInner>,
}

impl OracleRuntime {
    /// Creates an oracle runtime with no simulator attached.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sim(Arc::new(NullSim))
    }

    /// Creates an oracle runtime reporting to `sim`.
    #[must_use]
    pub fn with_sim(sim: Arc<dyn SimBackend>) -> Self {
        Self {
            inner: Arc::new(OracleInner {
                state: Mutex::new(OracleState {
                    domains: DomainStack::new(),
                    uid_counter: 0,
                    cur_uid: 0,
                    cur_ts: NO_TIMESTAMP,
                }),
                sim,
            }),
        }
    }

    /// Installs this runtime on the current thread.
    #[must_use]
    pub fn enter(&self) -> RuntimeGuard {
        set_current(self.inner.clone())
    }

    /// Runs until every domain has drained and closed.
    ///
    /// # Panics
    ///
    /// Panics if the worker thread cannot be spawned or itself panics.
    pub fn run(&self) {
        let inner = Arc::clone(&self.inner);
        let worker = std::thread::Builder::new()
            .name("fractime-oracle".into())
            .stack_size(WORKER_STACK_BYTES)
            .spawn(move || {
                let _guard = set_current(inner.clone() as Arc<dyn Backend>);
                inner.run_loop();
            })
            .expect("spawning the oracle worker thread");
        worker.join().expect("oracle worker panicked");
    }
}

impl Default for OracleRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl OracleInner {
    fn run_loop(&self) {
        self.sim.roi_begin();
        let mut executed = 0u64;
        loop {
            let next = {
                let mut state = self.state.lock();
                if let Some(task) = state.domains.top().pop_top() {
                    state.cur_uid = task.uid();
                    state.cur_ts = task.ts();
                    Some(task)
                } else {
                    // The current domain drained: close it and tell the
                    // machine model.
                    state
                        .domains
                        .pop_domain()
                        .expect("a drained domain always closes");
                    self.sim.undeepen_notify();
                    if state.domains.is_exhausted() {
                        // Re-arm the root so the runtime can be reused.
                        state.domains.push_domain(NO_TIMESTAMP);
                        state.cur_ts = NO_TIMESTAMP;
                        None
                    } else {
                        continue;
                    }
                }
            };
            let Some(task) = next else { break };
            let uid = task.uid();
            self.sim.task_begin(uid);
            run_task(task);
            self.sim.task_end(uid);
            executed += 1;
        }
        self.sim.roi_end();
        debug!(executed, "oracle run drained every domain");
    }
}

impl Backend for OracleInner {
    fn submit(&self, mut task: Task) {
        let mut state = self.state.lock();
        state.uid_counter += 1;
        let uid = state.uid_counter;
        task.set_uid(uid);
        self.sim.task_created(state.cur_uid, uid, task.ts());

        if task.flags().intersects(EnqFlags::PARENTDOMAIN) {
            state
                .domains
                .parent()
                .unwrap_or_else(|e| panic!("{e}"))
                .push(task);
        } else {
            state.domains.top().push(task);
        }
    }

    fn num_threads(&self) -> u32 {
        ORACLE_VIRTUAL_THREADS
    }

    fn tid(&self) -> u32 {
        0
    }

    fn super_timestamp(&self) -> Timestamp {
        self.state.lock().domains.super_timestamp()
    }

    fn deepen(&self, max_ts: Timestamp) {
        if max_ts != NO_TIMESTAMP {
            warn!(max_ts, "deepen bound is not enforced by the oracle; ignoring");
        }
        let mut state = self.state.lock();
        let cur_ts = state.cur_ts;
        state.domains.push_domain(cur_ts);
    }

    fn undeepen(&self) {
        // Domains close automatically when they drain; an explicit pop
        // of a live domain is a contract violation.
        panic!("undeepen() on the oracle runtime: domains close when they drain");
    }

    fn set_gvt(&self, ts: Timestamp) {
        self.sim.set_gvt(ts);
    }

    fn serialize(&self) {
        self.sim.serialize();
    }

    fn clear_read_set(&self) {
        self.sim.clear_read_set();
    }

    fn record_as_aborted(&self) {
        self.sim.record_as_aborted();
    }

    fn domains_supported(&self) -> bool {
        true
    }
}
