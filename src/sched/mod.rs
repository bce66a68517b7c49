//! The timestamp-ordered task scheduler.
//!
//! One enqueue API, three interchangeable back-ends:
//!
//! - [`seq::SeqRuntime`] — one worker, one queue
//! - [`oracle::OracleRuntime`] — domain-aware single worker (fractal time)
//! - [`tls::TlsRuntime`] — N workers over a shared queue
//!
//! A runtime is installed on the current thread with `enter()`, which
//! returns an RAII guard; the free functions in this module ([`enqueue`],
//! [`timestamp`], [`deepen`], …) then address the installed runtime.
//! Back-end run loops install the runtime on their worker threads
//! themselves, so task bodies can always call back into the scheduler.

pub mod domain;
pub mod oracle;
pub mod queue;
pub mod seq;
pub mod tls;

use crate::task::{EnqFlags, Hint, RegisterArgs, Task, TaskFn, Timestamp, NO_TIMESTAMP};
use std::cell::{Cell, RefCell};
use std::sync::Arc;

/// The operations every back-end provides behind the enqueue API.
pub(crate) trait Backend: Send + Sync {
    /// Accepts a task whose `SAMETIME`/`SAMEHINT` flags are already
    /// resolved against the running task.
    fn submit(&self, task: Task);
    fn num_threads(&self) -> u32;
    fn tid(&self) -> u32;
    fn super_timestamp(&self) -> Timestamp;
    fn deepen(&self, max_ts: Timestamp);
    fn undeepen(&self);
    fn set_gvt(&self, ts: Timestamp);
    fn serialize(&self);
    fn clear_read_set(&self);
    fn record_as_aborted(&self);
    /// Whether `deepen`/`undeepen` are meaningful on this back-end.
    fn domains_supported(&self) -> bool {
        false
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn Backend>>> = const { RefCell::new(None) };
    /// `(timestamp, hint)` of the task running on this thread.
    static CUR_TASK: Cell<(Timestamp, u64)> = const { Cell::new((NO_TIMESTAMP, 0)) };
}

/// RAII guard returned by a runtime's `enter()`. Restores the previously
/// installed runtime (if any) on drop.
pub struct RuntimeGuard {
    prev: Option<Arc<dyn Backend>>,
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| *c.borrow_mut() = self.prev.take());
    }
}

pub(crate) fn set_current(backend: Arc<dyn Backend>) -> RuntimeGuard {
    let prev = CURRENT.with(|c| c.borrow_mut().replace(backend));
    RuntimeGuard { prev }
}

fn with_current<R>(f: impl FnOnce(&Arc<dyn Backend>) -> R) -> R {
    CURRENT.with(|c| {
        let borrow = c.borrow();
        let backend = borrow
            .as_ref()
            .expect("no fractime runtime is active on this thread; enter() one first");
        f(backend)
    })
}

/// Runs a task on this thread with the current-task context set, so
/// `timestamp()` and `SAMEHINT`/`SAMETIME` resolution see it.
pub(crate) fn run_task(task: Task) {
    let prev = CUR_TASK.with(|c| c.replace((task.ts(), task.hint())));
    task.invoke();
    CUR_TASK.with(|c| c.set(prev));
}

/// Resolves the context-borrowing flags against the running task.
fn resolve_context(task: &mut Task) {
    let (cur_ts, cur_hint) = CUR_TASK.with(Cell::get);
    if task.flags().intersects(EnqFlags::SAMETIME) && cur_ts != NO_TIMESTAMP {
        task.set_ts(cur_ts);
    }
    if task.flags().intersects(EnqFlags::SAMEHINT) {
        task.set_hint(cur_hint);
    }
}

pub(crate) fn submit(mut task: Task) {
    resolve_context(&mut task);
    with_current(|b| b.submit(task));
}

/// Enqueues a function through the scalar marshalling path: every
/// argument is bit-cast into a register word.
///
/// Arities above the register tile do not compile; pass such calls
/// through [`enqueue_heap`] or [`enqueue_lambda`].
pub fn enqueue<F, A>(f: F, ts: Timestamp, hint: impl Into<Hint>, args: A)
where
    F: TaskFn<A> + 'static,
    A: RegisterArgs,
{
    submit(Task::from_frame(f, ts, hint.into(), args));
}

/// Enqueues a function whose argument tuple moves to the heap.
pub fn enqueue_heap<F, A>(f: F, ts: Timestamp, hint: impl Into<Hint>, args: A)
where
    F: TaskFn<A> + 'static,
    A: Send + 'static,
{
    submit(Task::from_heap(f, ts, hint.into(), args));
}

/// Enqueues a closure; captures ride in the task record.
pub fn enqueue_lambda<L>(l: L, ts: Timestamp, hint: impl Into<Hint>)
where
    L: FnOnce(Timestamp) + Send + 'static,
{
    submit(Task::from_closure(l, ts, hint.into()));
}

/// Worker count of the active runtime.
#[must_use]
pub fn num_threads() -> u32 {
    with_current(|b| b.num_threads())
}

/// Worker index of the calling thread.
#[must_use]
pub fn tid() -> u32 {
    with_current(|b| b.tid())
}

/// Timestamp of the task running on this thread, or [`NO_TIMESTAMP`]
/// outside a task.
#[must_use]
pub fn timestamp() -> Timestamp {
    CUR_TASK.with(Cell::get).0
}

/// Timestamp of the current domain's creating task, or [`NO_TIMESTAMP`]
/// in the root domain.
#[must_use]
pub fn super_timestamp() -> Timestamp {
    with_current(|b| b.super_timestamp())
}

/// Enters a new virtual-time subdomain bounded by `max_ts`.
pub fn deepen(max_ts: Timestamp) {
    with_current(|b| b.deepen(max_ts));
}

/// Returns to the task's original domain.
pub fn undeepen() {
    with_current(|b| b.undeepen());
}

/// Lowers the current task's timestamp if it is the GVT task.
pub fn set_gvt(ts: Timestamp) {
    with_current(|b| b.set_gvt(ts));
}

/// Waits (by aborting) until the current task is the GVT task.
pub fn serialize() {
    with_current(|b| b.serialize());
}

/// Clears the read set of the current task.
pub fn clear_read_set() {
    with_current(|b| b.clear_read_set());
}

/// Records the current task as aborted even if it commits.
pub fn record_as_aborted() {
    with_current(|b| b.record_as_aborted());
}

pub(crate) fn domains_supported() -> bool {
    with_current(|b| b.domains_supported())
}

/// Emits a runtime diagnostic line through the structured logger.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn timestamp_outside_task_is_sentinel() {
        init_test("timestamp_outside_task_is_sentinel");
        assert_eq!(timestamp(), NO_TIMESTAMP);
        crate::test_complete!("timestamp_outside_task_is_sentinel");
    }

    #[test]
    #[should_panic(expected = "no fractime runtime is active")]
    fn free_enqueue_without_runtime_aborts() {
        enqueue_lambda(|_| {}, 0, 0u64);
    }

    #[test]
    fn run_task_scopes_current_context() {
        init_test("run_task_scopes_current_context");
        let task = Task::from_closure(
            |ts| {
                assert_eq!(timestamp(), 11);
                assert_eq!(ts, 11);
            },
            11,
            Hint::from(0u64),
        );
        run_task(task);
        assert_eq!(timestamp(), NO_TIMESTAMP);
        crate::test_complete!("run_task_scopes_current_context");
    }

    #[test]
    fn sametime_and_samehint_resolve_against_runner() {
        init_test("sametime_and_samehint_resolve_against_runner");
        let outer = Task::from_closure(
            |_| {
                let mut child = Task::from_closure(
                    |_| {},
                    999,
                    Hint::new(0, EnqFlags::SAMETIME | EnqFlags::SAMEHINT),
                );
                resolve_context(&mut child);
                assert_eq!(child.ts(), 21);
                assert_eq!(child.hint(), 77);
            },
            21,
            Hint::from(77u64),
        );
        run_task(outer);
        crate::test_complete!("sametime_and_samehint_resolve_against_runner");
    }
}
