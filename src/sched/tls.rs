//! TLS / parallel back-end.
//!
//! Thread-level speculation over a software priority queue: N workers
//! each repeatedly pull the heap top and run it. The queue is one
//! logical object behind a mutex; the observable contract is only that
//! a pop returns one of the currently-minimal-timestamp tasks.
//!
//! Each worker publishes `min_ts`, a conservative lower bound on the
//! timestamp of any task it may dequeue next. The bound is refreshed
//! *before* invoking a popped task, so a concurrent "does this
//! timestamp precede in-flight work?" check never sees a stale, too
//! large value; the enqueue path additionally lowers the enqueuing
//! worker's bound when the new task's timestamp is smaller. The bounds
//! are cache-line padded, written and read relaxed (they are hints).
//!
//! Fractal time is not implemented on this back-end.

use crate::config::RuntimeConfig;
use crate::sched::queue::TimestampHeap;
use crate::sched::{run_task, set_current, Backend, RuntimeGuard};
use crate::sim::{NullSim, SimBackend};
use crate::task::{Task, Timestamp, NO_TIMESTAMP};
use crate::util::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

thread_local! {
    /// Worker index of the current thread, if it is a TLS worker.
    static WORKER_ID: Cell<Option<u32>> = const { Cell::new(None) };
}

struct TlsShared {
    heap: TimestampHeap,
    in_flight: u32,
}

struct TlsInner {
    shared: Mutex<TlsShared>,
    idle: Condvar,
    min_ts: Vec<CachePadded<AtomicU64>>,
    workers: u32,
    sim: Arc<dyn SimBackend>,
}

/// The parallel runtime.
#[derive(Clone)]
pub struct TlsRuntime {
    inner: Arc<TlsInner>,
}

impl TlsRuntime {
    /// Creates a parallel runtime with the given worker count.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self::with_sim(config, Arc::new(NullSim))
    }

    /// Creates a parallel runtime reporting to `sim`.
    ///
    /// # Panics
    ///
    /// Panics if the configuration requests zero workers.
    #[must_use]
    pub fn with_sim(config: &RuntimeConfig, sim: Arc<dyn SimBackend>) -> Self {
        assert!(config.workers >= 1, "the parallel runtime needs a worker");
        #[allow(clippy::cast_possible_truncation)]
        let workers = config.workers as u32;
        let min_ts = (0..workers)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect();
        Self {
            inner: Arc::new(TlsInner {
                shared: Mutex::new(TlsShared {
                    heap: TimestampHeap::new(),
                    in_flight: 0,
                }),
                idle: Condvar::new(),
                min_ts,
                workers,
                sim,
            }),
        }
    }

    /// Installs this runtime on the current thread.
    #[must_use]
    pub fn enter(&self) -> RuntimeGuard {
        set_current(self.inner.clone())
    }

    /// Runs until the queue is empty and no task is in flight. The
    /// calling thread participates as worker 0.
    ///
    /// # Panics
    ///
    /// Panics if a worker thread cannot be spawned or a task panics.
    pub fn run(&self) {
        let inner = &self.inner;
        inner.sim.roi_begin();
        std::thread::scope(|scope| {
            for wid in 1..inner.workers {
                let inner = Arc::clone(inner);
                std::thread::Builder::new()
                    .name(format!("fractime-worker-{wid}"))
                    .spawn_scoped(scope, move || TlsInner::worker_loop(&inner, wid))
                    .expect("spawning a parallel worker thread");
            }
            TlsInner::worker_loop(inner, 0);
        });
        inner.sim.roi_end();
        debug!(workers = inner.workers, "parallel run quiesced");
    }

    /// The current `min_ts` bound published by `worker`.
    #[must_use]
    pub fn min_ts(&self, worker: u32) -> Timestamp {
        self.inner.min_ts[worker as usize].load(Ordering::Relaxed)
    }
}

impl TlsInner {
    fn worker_loop(this: &Arc<Self>, wid: u32) {
        let _guard = set_current(Arc::clone(this) as Arc<dyn Backend>);
        let prev_wid = WORKER_ID.with(|w| w.replace(Some(wid)));

        {
            let shared = this.shared.lock();
            let start = shared.heap.peek_min_ts().unwrap_or(0);
            this.min_ts[wid as usize].store(start, Ordering::Relaxed);
        }

        loop {
            let mut shared = this.shared.lock();
            if let Some(task) = shared.heap.pop_top() {
                shared.in_flight += 1;
                // Publish the bound before running: the next candidate
                // is either the new heap head or, on an empty heap,
                // nothing earlier than the task we just took.
                let bound = shared.heap.peek_min_ts().unwrap_or_else(|| task.ts());
                this.min_ts[wid as usize].store(bound, Ordering::Relaxed);
                drop(shared);

                trace!(wid, ts = task.ts(), "worker dequeued a task");
                run_task(task);

                let mut shared = this.shared.lock();
                shared.in_flight -= 1;
                if shared.heap.is_empty() && shared.in_flight == 0 {
                    this.idle.notify_all();
                }
            } else if shared.in_flight == 0 {
                this.idle.notify_all();
                break;
            } else {
                // Tasks are running elsewhere and may refill the heap.
                this.idle.wait(&mut shared);
            }
        }

        WORKER_ID.with(|w| w.set(prev_wid));
    }
}

impl Backend for TlsInner {
    fn submit(&self, task: Task) {
        // A newly enqueued earlier task lowers this worker's own bound.
        if let Some(wid) = WORKER_ID.with(Cell::get) {
            let slot = &self.min_ts[wid as usize];
            if task.ts() < slot.load(Ordering::Relaxed) {
                slot.store(task.ts(), Ordering::Relaxed);
            }
        }
        let mut shared = self.shared.lock();
        shared.heap.push(task);
        drop(shared);
        self.idle.notify_one();
    }

    fn num_threads(&self) -> u32 {
        self.workers
    }

    fn tid(&self) -> u32 {
        WORKER_ID.with(Cell::get).unwrap_or(0)
    }

    fn super_timestamp(&self) -> Timestamp {
        NO_TIMESTAMP
    }

    fn deepen(&self, _max_ts: Timestamp) {
        panic!("deepen() is unimplemented on the parallel runtime");
    }

    fn undeepen(&self) {
        panic!("undeepen() is unimplemented on the parallel runtime");
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{enqueue_lambda, num_threads, tid, timestamp};
    use crate::task::EnqFlags;
    use crate::test_utils::init_test_logging;
    use parking_lot::Mutex as PlMutex;
    use std::collections::HashSet;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn runtime(workers: usize) -> TlsRuntime {
        TlsRuntime::new(&RuntimeConfig::new().workers(workers))
    }

    #[test]
    fn every_task_runs_exactly_once() {
        init_test("every_task_runs_exactly_once");
        let rt = runtime(4);
        let seen = Arc::new(PlMutex::new(Vec::new()));
        {
            let _g = rt.enter();
            for i in 0..500u64 {
                let seen = Arc::clone(&seen);
                enqueue_lambda(move |_| seen.lock().push(i), i % 17, EnqFlags::NOHINT);
            }
        }
        rt.run();
        let seen = seen.lock();
        assert_eq!(seen.len(), 500);
        assert_eq!(seen.iter().copied().collect::<HashSet<_>>().len(), 500);
        crate::test_complete!("every_task_runs_exactly_once");
    }

    #[test]
    fn single_worker_preserves_timestamp_order() {
        init_test("single_worker_preserves_timestamp_order");
        let rt = runtime(1);
        let log = Arc::new(PlMutex::new(Vec::new()));
        {
            let _g = rt.enter();
            for ts in [8u64, 2, 5, 2, 0] {
                let log = Arc::clone(&log);
                enqueue_lambda(move |ts| log.lock().push(ts), ts, EnqFlags::NOHINT);
            }
        }
        rt.run();
        assert_eq!(*log.lock(), vec![0, 2, 2, 5, 8]);
        crate::test_complete!("single_worker_preserves_timestamp_order");
    }

    #[test]
    fn tasks_spawned_by_tasks_complete_before_quiesce() {
        init_test("tasks_spawned_by_tasks_complete_before_quiesce");
        let rt = runtime(3);
        let count = Arc::new(AtomicU64::new(0));
        {
            let _g = rt.enter();
            for i in 0..20u64 {
                let count = Arc::clone(&count);
                enqueue_lambda(
                    move |ts| {
                        count.fetch_add(1, Ordering::SeqCst);
                        let inner = Arc::clone(&count);
                        enqueue_lambda(
                            move |_| {
                                inner.fetch_add(1, Ordering::SeqCst);
                            },
                            ts + 1,
                            EnqFlags::NOHINT,
                        );
                    },
                    i,
                    EnqFlags::NOHINT,
                );
            }
        }
        rt.run();
        assert_eq!(count.load(Ordering::SeqCst), 40);
        crate::test_complete!("tasks_spawned_by_tasks_complete_before_quiesce");
    }

    #[test]
    fn tid_stays_in_range_and_timestamp_is_exact() {
        init_test("tid_stays_in_range_and_timestamp_is_exact");
        let rt = runtime(4);
        let ok = Arc::new(AtomicU64::new(0));
        {
            let _g = rt.enter();
            for i in 0..64u64 {
                let ok = Arc::clone(&ok);
                enqueue_lambda(
                    move |_| {
                        let in_range = tid() < num_threads();
                        let exact = timestamp() == i;
                        if in_range && exact {
                            ok.fetch_add(1, Ordering::SeqCst);
                        }
                    },
                    i,
                    EnqFlags::NOHINT,
                );
            }
        }
        rt.run();
        assert_eq!(ok.load(Ordering::SeqCst), 64);
        crate::test_complete!("tid_stays_in_range_and_timestamp_is_exact");
    }

    #[test]
    fn min_ts_is_a_conservative_bound_at_dequeue() {
        init_test("min_ts_is_a_conservative_bound_at_dequeue");
        // One worker: after run, the published bound equals the last
        // task's timestamp (heap drained before each invoke).
        let rt = runtime(1);
        let bounds = Arc::new(PlMutex::new(Vec::new()));
        {
            let _g = rt.enter();
            let rt2 = rt.clone();
            for ts in [4u64, 9] {
                let bounds = Arc::clone(&bounds);
                let rt3 = rt2.clone();
                enqueue_lambda(
                    move |ts| bounds.lock().push((ts, rt3.min_ts(0))),
                    ts,
                    EnqFlags::NOHINT,
                );
            }
        }
        rt.run();
        // While ts-4 ran, ts-9 was still queued: bound 9 is not yet
        // published, the bound was the remaining heap head.
        assert_eq!(*bounds.lock(), vec![(4, 9), (9, 9)]);
        crate::test_complete!("min_ts_is_a_conservative_bound_at_dequeue");
    }

    #[test]
    fn enqueue_of_earlier_task_lowers_own_bound() {
        init_test("enqueue_of_earlier_task_lowers_own_bound");
        let rt = runtime(1);
        let observed = Arc::new(AtomicU64::new(u64::MAX));
        {
            let _g = rt.enter();
            let rt2 = rt.clone();
            let observed2 = Arc::clone(&observed);
            enqueue_lambda(
                move |_| {
                    // Heap is empty: our bound is 50. Enqueueing ts 10
                    // must drag it down before we return.
                    enqueue_lambda(|_| {}, 10, EnqFlags::NOHINT);
                    observed2.store(rt2.min_ts(0), Ordering::SeqCst);
                },
                50,
                EnqFlags::NOHINT,
            );
        }
        rt.run();
        assert_eq!(observed.load(Ordering::SeqCst), 10);
        crate::test_complete!("enqueue_of_earlier_task_lowers_own_bound");
    }

    #[test]
    #[should_panic(expected = "unimplemented on the parallel runtime")]
    fn deepen_aborts() {
        let rt = runtime(1);
        let _g = rt.enter();
        crate::sched::deepen(NO_TIMESTAMP);
    }
}
