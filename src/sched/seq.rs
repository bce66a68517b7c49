//! Sequential back-end.
//!
//! One worker, one priority queue: pop the top, run it, repeat until
//! empty. With the FIFO tie-break in [`crate::sched::queue`], execution
//! order is exactly non-decreasing `(timestamp, insertion index)`.
//!
//! Fractal time is not implemented here; `deepen`/`undeepen` abort with
//! a diagnostic.

use crate::sched::queue::TimestampHeap;
use crate::sched::{run_task, set_current, Backend, RuntimeGuard};
use crate::sim::{NullSim, SimBackend};
use crate::task::{Task, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

struct SeqInner {
    heap: Mutex<TimestampHeap>,
    sim: Arc<dyn SimBackend>,
}

/// The single-threaded runtime.
#[derive(Clone)]
pub struct SeqRuntime {
    inner: Arc<SeqInner>,
}

impl SeqRuntime {
    /// Creates a sequential runtime with no simulator attached.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sim(Arc::new(NullSim))
    }

    /// Creates a sequential runtime forwarding speculation-layer calls
    /// to `sim`.
    #[must_use]
    pub fn with_sim(sim: Arc<dyn SimBackend>) -> Self {
        Self {
            inner: Arc::new(SeqInner {
                heap: Mutex::new(TimestampHeap::new()),
                sim,
            }),
        }
    }

    /// Installs this runtime on the current thread.
    #[must_use]
    pub fn enter(&self) -> RuntimeGuard {
        set_current(self.inner.clone())
    }

    /// Runs until the queue is empty. Tasks enqueued by running tasks
    /// are dispatched in the same pass.
    pub fn run(&self) {
        let _guard = self.enter();
        self.inner.sim.roi_begin();
        let mut executed = 0u64;
        loop {
            let task = self.inner.heap.lock().pop_top();
            let Some(task) = task else { break };
            run_task(task);
            executed += 1;
        }
        self.inner.sim.roi_end();
        debug!(executed, "sequential run drained the queue");
    }

    /// Number of queued tasks; test instrumentation.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.heap.lock().len()
    }
}

impl Default for SeqRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for SeqInner {
    fn submit(&self, task: Task) {
        self.heap.lock().push(task);
    }

    fn num_threads(&self) -> u32 {
        1
    }

    fn tid(&self) -> u32 {
        0
    }

    fn super_timestamp(&self) -> Timestamp {
        crate::task::NO_TIMESTAMP
    }

    fn deepen(&self, _max_ts: Timestamp) {
        panic!("deepen() is unimplemented on the sequential runtime");
    }

    fn undeepen(&self) {
        panic!("undeepen() is unimplemented on the sequential runtime");
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
    use crate::sched::{enqueue, enqueue_lambda, num_threads, tid, timestamp};
    use crate::task::EnqFlags;
    use crate::test_utils::init_test_logging;
    use parking_lot::Mutex as PlMutex;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn runs_in_timestamp_order() {
        init_test("runs_in_timestamp_order");
        let rt = SeqRuntime::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        {
            let _g = rt.enter();
            for ts in [3u64, 1, 2, 0] {
                let log = Arc::clone(&log);
                enqueue_lambda(move |ts| log.lock().push(ts), ts, EnqFlags::NOHINT);
            }
        }
        rt.run();
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
        crate::test_complete!("runs_in_timestamp_order");
    }

    #[test]
    fn equal_timestamps_run_in_insertion_order() {
        init_test("equal_timestamps_run_in_insertion_order");
        let rt = SeqRuntime::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        {
            let _g = rt.enter();
            for tag in 0..10u64 {
                let log = Arc::clone(&log);
                enqueue_lambda(move |_| log.lock().push(tag), 5, EnqFlags::NOHINT);
            }
        }
        rt.run();
        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
        crate::test_complete!("equal_timestamps_run_in_insertion_order");
    }

    #[test]
    fn tasks_enqueued_by_tasks_are_dispatched() {
        init_test("tasks_enqueued_by_tasks_are_dispatched");
        let rt = SeqRuntime::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        {
            let _g = rt.enter();
            let log2 = Arc::clone(&log);
            enqueue_lambda(
                move |ts| {
                    log2.lock().push(ts);
                    let log3 = Arc::clone(&log2);
                    enqueue_lambda(move |ts| log3.lock().push(ts), ts + 2, EnqFlags::NOHINT);
                },
                1,
                EnqFlags::NOHINT,
            );
        }
        rt.run();
        assert_eq!(*log.lock(), vec![1, 3]);
        crate::test_complete!("tasks_enqueued_by_tasks_are_dispatched");
    }

    #[test]
    fn timestamp_inside_task_matches_enqueue() {
        init_test("timestamp_inside_task_matches_enqueue");
        let rt = SeqRuntime::new();
        {
            let _g = rt.enter();
            enqueue_lambda(
                |_| {
                    assert_eq!(timestamp(), 23);
                    assert_eq!(num_threads(), 1);
                    assert_eq!(tid(), 0);
                },
                23,
                EnqFlags::NOHINT,
            );
        }
        rt.run();
        crate::test_complete!("timestamp_inside_task_matches_enqueue");
    }

    #[test]
    fn frame_enqueue_round_trips_args() {
        init_test("frame_enqueue_round_trips_args");
        static OUT: PlMutex<(i64, u64)> = PlMutex::new((0, 0));

        fn body(ts: Timestamp, neg: i64, big: u64) {
            *OUT.lock() = (neg + ts as i64, big);
        }

        let rt = SeqRuntime::new();
        {
            let _g = rt.enter();
            enqueue(body, 4, EnqFlags::NOHINT, (-9i64, u64::MAX));
        }
        rt.run();
        assert_eq!(*OUT.lock(), (-5, u64::MAX));
        crate::test_complete!("frame_enqueue_round_trips_args");
    }

    #[test]
    #[should_panic(expected = "unimplemented on the sequential runtime")]
    fn deepen_aborts() {
        let rt = SeqRuntime::new();
        let _g = rt.enter();
        crate::sched::deepen(crate::task::NO_TIMESTAMP);
    }

    #[test]
    fn speculation_controls_forward_to_the_sim() {
        init_test("speculation_controls_forward_to_the_sim");
        use crate::sim::{magic, LoopbackSim};

        let sim = Arc::new(LoopbackSim::new(4));
        let rt = SeqRuntime::with_sim(sim.clone());
        {
            let _g = rt.enter();
            enqueue_lambda(
                |_| {
                    crate::sched::set_gvt(3);
                    crate::sched::serialize();
                    crate::sched::clear_read_set();
                    crate::sched::record_as_aborted();
                },
                0,
                EnqFlags::NOHINT,
            );
        }
        rt.run();
        let ops = sim.ops();
        for op in [
            magic::SET_GVT,
            magic::SERIALIZE,
            magic::CLEAR_READ_SET,
            magic::RECORD_AS_ABORTED,
        ] {
            assert!(ops.contains(&op), "opcode {op} missing from the sim log");
        }
        crate::test_complete!("speculation_controls_forward_to_the_sim");
    }
}
