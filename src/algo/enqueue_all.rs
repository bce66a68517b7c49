//! Bulk enqueue engines.
//!
//! Scheduler-parallel versions of a `for_each` whose body enqueues one
//! task per element. Serial below a threshold; above it, the work of calling
//! the enqueue lambda is itself spread across enqueuer tasks:
//!
//! - [`enqueue_all`] / [`enqueue_all_with`] — a complete k-ary tree of
//!   enqueuers (k ∈ {2, 4, 8} by range length);
//! - [`enqueue_all_strands`] — a bounded number of independent strands,
//!   each chaining through the range with a fixed stride;
//! - [`enqueue_all_progressive`] — one strand that widens by doubling,
//!   delivering the earliest tasks first and expanding parallel breadth
//!   up to the configured cap.
//!
//! All engines require constant-time range splitting, hence the
//! [`SplitIndex`] bound; counting ranges of the integer index types
//! implement it.

use crate::config::RuntimeConfig;
use crate::sched::{enqueue_lambda, num_threads, timestamp};
use crate::task::{EnqFlags, Hint, Timestamp};
use std::sync::Arc;

/// Maximum children of one enqueuer task (the hardware task fan-out).
pub const MAX_CHILDREN: u64 = 8;

/// An index type the engines can split in constant time.
pub trait SplitIndex: Copy + Send + Sync + Ord + 'static {
    /// Elements in `[lo, hi)`.
    fn distance(lo: Self, hi: Self) -> u64;
    /// The index `n` positions after `self`.
    #[must_use]
    fn advance(self, n: u64) -> Self;
}

macro_rules! split_index {
    ($($t:ty),*) => {$(
        impl SplitIndex for $t {
            #[inline]
            #[allow(clippy::cast_sign_loss)]
            fn distance(lo: Self, hi: Self) -> u64 {
                if hi <= lo { 0 } else { (hi - lo) as u64 }
            }
            #[inline]
            #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
            fn advance(self, n: u64) -> Self {
                self + n as $t
            }
        }
    )*};
}

split_index!(u32, u64, usize, i32, i64);

struct TreeCtx<I, E> {
    enq: E,
    tsl: Option<Box<dyn Fn(I) -> Timestamp + Send + Sync>>,
}

impl<I: SplitIndex, E: Fn(Timestamp, I) + Send + Sync + 'static> TreeCtx<I, E> {
    fn leaf_ts(&self, first: I, fallback: Timestamp) -> Timestamp {
        self.tsl.as_ref().map_or(fallback, |f| f(first))
    }

    fn for_each(&self, ts: Timestamp, first: I, last: I) {
        let mut i = first;
        while i < last {
            (self.enq)(ts, i);
            i = i.advance(1);
        }
    }
}

/// Fan-out for one expansion level: 8 for long ranges, narrowing to 2
/// near the leaves so leaf enqueuers still wrap several real tasks.
fn lg_fanout(len: u64) -> u32 {
    const T: u64 = MAX_CHILDREN * MAX_CHILDREN / 2;
    if len > T {
        3
    } else if len > T / 2 {
        2
    } else {
        1
    }
}

fn expand<I, E>(
    ctx: &Arc<TreeCtx<I, E>>,
    ts: Timestamp,
    first: I,
    last: I,
    flags: EnqFlags,
    max_base: u64,
)
where
    I: SplitIndex,
    E: Fn(Timestamp, I) + Send + Sync + 'static,
{
    let len = I::distance(first, last);
    if len <= max_base {
        ctx.for_each(ctx.leaf_ts(first, ts), first, last);
        return;
    }

    let fanout = 1u64 << lg_fanout(len);
    let child_flags = flags | EnqFlags::SAMETASK;
    let chunk = len >> lg_fanout(len);
    let mut start = first;
    for child in 0..fanout {
        let end = if child == fanout - 1 {
            last
        } else {
            start.advance(chunk)
        };
        // The left-most child stays on our tile; there is little to
        // gain from hopping for work that starts immediately.
        let f = if child == 0 {
            Hint::replace_no_with_same(child_flags)
        } else {
            child_flags
        };
        let ctx2 = Arc::clone(ctx);
        let child_ts = ctx.leaf_ts(start, ts);
        enqueue_lambda(
            move |ts| expand(&ctx2, ts, start, end, f, max_base),
            child_ts,
            Hint::new(0, f),
        );
        start = end;
    }
}

fn tree_root<I, E>(
    first: I,
    last: I,
    enq: E,
    ts: Timestamp,
    tsl: Option<Box<dyn Fn(I) -> Timestamp + Send + Sync>>,
    flags: EnqFlags,
)
where
    I: SplitIndex,
    E: Fn(Timestamp, I) + Send + Sync + 'static,
{
    assert!(
        !flags.intersects(EnqFlags::NOHASH),
        "NOHASH is unsupported for enqueuer trees"
    );
    assert!(
        !flags.intersects(EnqFlags::SAMETASK),
        "SAMETASK is derived for enqueuer descendants, not supplied"
    );
    if first >= last {
        return;
    }
    let ctx = Arc::new(TreeCtx { enq, tsl });
    expand(&ctx, ts, first, last, flags | EnqFlags::PRODUCER, MAX_CHILDREN);
}

/// Calls `enq` once per index in `[first, last)`, spreading the calls
/// over a tree of enqueuer tasks. All enqueuers share `ts`.
pub fn enqueue_all<I, E>(first: I, last: I, enq: E, ts: Timestamp, flags: EnqFlags)
where
    I: SplitIndex,
    E: Fn(I) + Send + Sync + 'static,
{
    tree_root(first, last, move |_, i| enq(i), ts, None, flags);
}

/// The timestamp-lambda variant: each sub-range's enqueuer runs at
/// `tsl(first of sub-range)`, and `enq` receives that timestamp.
/// Presumes the range enqueues in non-decreasing timestamp order.
pub fn enqueue_all_with<I, E, TS>(first: I, last: I, enq: E, tsl: TS, flags: EnqFlags)
where
    I: SplitIndex,
    E: Fn(Timestamp, I) + Send + Sync + 'static,
    TS: Fn(I) -> Timestamp + Send + Sync + 'static,
{
    if first >= last {
        return;
    }
    let root_ts = tsl(first);
    tree_root(first, last, enq, root_ts, Some(Box::new(tsl)), flags);
}

struct StrandEngine<I, E, TS, H> {
    el: E,
    tsl: TS,
    hl: H,
    stride: u64,
    per_task: u64,
    last: I,
}

impl<I, E, TS, H> StrandEngine<I, E, TS, H>
where
    I: SplitIndex,
    E: Fn(Timestamp, I) + Send + Sync + 'static,
    TS: Fn(I) -> Timestamp + Send + Sync + 'static,
    H: Fn(I) -> Hint + Send + Sync + 'static,
{
    fn run(this: &Arc<Self>, ts: Timestamp, begin: I) {
        let end = begin.advance(this.per_task).min(this.last);
        let mut i = begin;
        while i < end {
            (this.el)(ts, i);
            i = i.advance(1);
        }
        let next = begin.advance(this.stride);
        if next < this.last {
            let h = (this.hl)(next);
            let me = Arc::clone(this);
            enqueue_lambda(
                move |ts| Self::run(&me, ts, next),
                (this.tsl)(next),
                Hint::new(h.hint, h.flags | EnqFlags::PRODUCER | EnqFlags::SAMETASK),
            );
        } else if end == this.last {
            // This is the last strand slice of the iterable; its
            // timestamp bounds every other slice. The +1 covers fully
            // unordered instances. The task exists to drop the shared
            // engine after all strands are done with it.
            let me = Arc::clone(this);
            enqueue_lambda(
                move |_| drop(me),
                ts + 1,
                Hint::new(0, EnqFlags::SAMEHINT | EnqFlags::MAYSPEC),
            );
        }
    }
}

/// Strand-parallel bulk enqueue: up to `strand_factor · num_threads`
/// (capped by `max_strands`) independent chains, each enqueuing
/// `enqueues_per_task` consecutive elements per task. Falls back to the
/// tree engine when the range is too short to feed every strand.
pub fn enqueue_all_strands<I, E, TS, H>(
    first: I,
    last: I,
    el: E,
    tsl: TS,
    hl: H,
    config: &RuntimeConfig,
)
where
    I: SplitIndex,
    E: Fn(Timestamp, I) + Send + Sync + 'static,
    TS: Fn(I) -> Timestamp + Send + Sync + 'static,
    H: Fn(I) -> Hint + Send + Sync + 'static,
{
    let len = I::distance(first, last);
    if len == 0 {
        return;
    }
    if len <= MAX_CHILDREN {
        let ts = tsl(first);
        let mut i = first;
        while i < last {
            el(ts, i);
            i = i.advance(1);
        }
        return;
    }

    let per_task = u64::from(config.enqueues_per_task);
    let max_strands =
        u64::from(config.max_strands.min(config.strand_factor * num_threads()));
    let strands = len / per_task;
    if strands < max_strands {
        // Too short for the strand engine; a tree gets it done. Borrow
        // MAYSPEC from the first element's hint if it is there.
        let flags = if hl(first).flags.contains(EnqFlags::MAYSPEC) {
            EnqFlags::NOHINT | EnqFlags::MAYSPEC
        } else {
            EnqFlags::NOHINT
        };
        enqueue_all_with(first, last, el, tsl, flags);
        return;
    }

    let engine = Arc::new(StrandEngine {
        el,
        tsl,
        hl,
        stride: max_strands * per_task,
        per_task,
        last,
    });
    let launch_ts = (engine.tsl)(first);
    enqueue_all(
        0u64,
        max_strands,
        {
            let engine = Arc::clone(&engine);
            move |s: u64| {
                let sbegin = first.advance(s * engine.per_task);
                let h = (engine.hl)(sbegin);
                let me = Arc::clone(&engine);
                enqueue_lambda(
                    move |ts| StrandEngine::run(&me, ts, sbegin),
                    (engine.tsl)(sbegin),
                    Hint::new(h.hint, h.flags | EnqFlags::PRODUCER),
                );
            }
        },
        launch_ts,
        EnqFlags::NOHINT | EnqFlags::MAYSPEC,
    );
}

struct ProgressiveEngine<I, E, TS, H> {
    el: E,
    tsl: TS,
    hl: H,
    max_stride: u64,
    per_task: u64,
    last: I,
}

impl<I, E, TS, H> ProgressiveEngine<I, E, TS, H>
where
    I: SplitIndex,
    E: Fn(Timestamp, I) + Send + Sync + 'static,
    TS: Fn(I) -> Timestamp + Send + Sync + 'static,
    H: Fn(I) -> Hint + Send + Sync + 'static,
{
    fn run(this: &Arc<Self>, ts: Timestamp, begin: I, stride: u64) {
        let end = begin.advance(this.per_task).min(this.last);
        let mut i = begin;
        while i < end {
            (this.el)(ts, i);
            i = i.advance(1);
        }
        let left = begin.advance(stride);
        let right = begin.advance(2 * stride);
        if left < this.last {
            if right < this.last && stride < this.max_stride {
                Self::reenqueue(this, left, 2 * stride);
                Self::reenqueue(this, right, 2 * stride);
            } else {
                Self::reenqueue(this, left, stride);
            }
        } else if end == this.last {
            let me = Arc::clone(this);
            enqueue_lambda(
                move |_| drop(me),
                timestamp() + 1,
                Hint::new(0, EnqFlags::SAMEHINT | EnqFlags::MAYSPEC),
            );
        }
    }

    fn reenqueue(this: &Arc<Self>, begin: I, stride: u64) {
        let h = (this.hl)(begin);
        let me = Arc::clone(this);
        enqueue_lambda(
            move |ts| Self::run(&me, ts, begin, stride),
            (this.tsl)(begin),
            Hint::new(h.hint, h.flags | EnqFlags::PRODUCER | EnqFlags::SAMETASK),
        );
    }
}

/// Progressive bulk enqueue: starts with one strand so the earliest
/// real tasks appear immediately, then widens by doubling until the
/// strand count reaches the configured cap.
pub fn enqueue_all_progressive<I, E, TS, H>(
    first: I,
    last: I,
    el: E,
    tsl: TS,
    hl: H,
    config: &RuntimeConfig,
)
where
    I: SplitIndex,
    E: Fn(Timestamp, I) + Send + Sync + 'static,
    TS: Fn(I) -> Timestamp + Send + Sync + 'static,
    H: Fn(I) -> Hint + Send + Sync + 'static,
{
    let len = I::distance(first, last);
    if len == 0 {
        return;
    }
    if len <= MAX_CHILDREN {
        let ts = tsl(first);
        let mut i = first;
        while i < last {
            el(ts, i);
            i = i.advance(1);
        }
        return;
    }

    let per_task = u64::from(config.enqueues_per_task);
    let max_strands =
        u64::from(config.max_strands.min(config.strand_factor * num_threads()));
    let engine = Arc::new(ProgressiveEngine {
        el,
        tsl,
        hl,
        max_stride: max_strands * per_task,
        per_task,
        last,
    });
    let h = (engine.hl)(first);
    let launch_ts = (engine.tsl)(first);
    let me = Arc::clone(&engine);
    let stride = per_task;
    enqueue_lambda(
        move |ts| ProgressiveEngine::run(&me, ts, first, stride),
        launch_ts,
        Hint::new(h.hint, h.flags | EnqFlags::PRODUCER),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::seq::SeqRuntime;
    use crate::test_utils::init_test_logging;
    use parking_lot::Mutex as PlMutex;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn counting_run(n: u64, body: impl FnOnce(Arc<PlMutex<Vec<u64>>>)) -> Vec<u64> {
        let rt = SeqRuntime::new();
        let hits = Arc::new(PlMutex::new(vec![0u64; n as usize]));
        {
            let _g = rt.enter();
            body(Arc::clone(&hits));
        }
        rt.run();
        let hits = hits.lock();
        hits.clone()
    }

    #[test]
    fn tree_calls_enq_exactly_once_per_index() {
        init_test("tree_calls_enq_exactly_once_per_index");
        let hits = counting_run(1000, |hits| {
            enqueue_all(
                0u64,
                1000,
                move |i| hits.lock()[i as usize] += 1,
                5,
                EnqFlags::NOHINT,
            );
        });
        assert!(hits.iter().all(|&h| h == 1));
        crate::test_complete!("tree_calls_enq_exactly_once_per_index");
    }

    #[test]
    fn empty_range_never_calls_enq() {
        init_test("empty_range_never_calls_enq");
        let hits = counting_run(1, |hits| {
            enqueue_all(7u64, 7, move |_| hits.lock()[0] += 1, 0, EnqFlags::NOHINT);
        });
        assert_eq!(hits[0], 0);
        crate::test_complete!("empty_range_never_calls_enq");
    }

    #[test]
    fn single_element_behaves_as_direct_call() {
        init_test("single_element_behaves_as_direct_call");
        let rt = SeqRuntime::new();
        let hit = Arc::new(PlMutex::new(0u64));
        {
            let _g = rt.enter();
            let hit2 = Arc::clone(&hit);
            enqueue_all(0u64, 1, move |i| *hit2.lock() += i + 1, 0, EnqFlags::NOHINT);
            // Below the serial threshold the call happens inline.
            assert_eq!(*hit.lock(), 1);
        }
        rt.run();
        assert_eq!(*hit.lock(), 1);
        crate::test_complete!("single_element_behaves_as_direct_call");
    }

    #[test]
    fn small_ranges_run_serially_in_order() {
        init_test("small_ranges_run_serially_in_order");
        let rt = SeqRuntime::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        {
            let _g = rt.enter();
            let log2 = Arc::clone(&log);
            enqueue_all(0u64, 8, move |i| log2.lock().push(i), 0, EnqFlags::NOHINT);
        }
        rt.run();
        assert_eq!(*log.lock(), (0..8).collect::<Vec<_>>());
        crate::test_complete!("small_ranges_run_serially_in_order");
    }

    #[test]
    fn signed_and_usize_ranges_split() {
        init_test("signed_and_usize_ranges_split");
        let rt = SeqRuntime::new();
        let count = Arc::new(PlMutex::new(0i64));
        {
            let _g = rt.enter();
            let c2 = Arc::clone(&count);
            enqueue_all(-50i64, 50, move |_| *c2.lock() += 1, 0, EnqFlags::NOHINT);
        }
        rt.run();
        assert_eq!(*count.lock(), 100);
        crate::test_complete!("signed_and_usize_ranges_split");
    }

    #[test]
    fn ts_lambda_variant_carries_per_range_timestamps() {
        init_test("ts_lambda_variant_carries_per_range_timestamps");
        let rt = SeqRuntime::new();
        let seen = Arc::new(PlMutex::new(Vec::new()));
        {
            let _g = rt.enter();
            let seen2 = Arc::clone(&seen);
            enqueue_all_with(
                0u64,
                100,
                move |ts, i| seen2.lock().push((ts, i)),
                |i| i * 10,
                EnqFlags::NOHINT,
            );
        }
        rt.run();
        let seen = seen.lock();
        assert_eq!(seen.len(), 100);
        for &(ts, i) in seen.iter() {
            // The enqueue lambda receives its leaf range's timestamp:
            // derived from the leaf's first element, never above the
            // element's own timestamp, and non-decreasing along the
            // iterator.
            assert!(ts <= i * 10, "leaf ts {ts} exceeds element ts for {i}");
        }
        // Every index appears exactly once.
        let mut idx: Vec<u64> = seen.iter().map(|&(_, i)| i).collect();
        idx.sort_unstable();
        assert_eq!(idx, (0..100).collect::<Vec<_>>());
        crate::test_complete!("ts_lambda_variant_carries_per_range_timestamps");
    }

    #[test]
    fn strand_engine_covers_range_exactly_once() {
        init_test("strand_engine_covers_range_exactly_once");
        let cfg = RuntimeConfig::new().workers(1);
        let hits = counting_run(500, |hits| {
            enqueue_all_strands(
                0u64,
                500,
                move |_, i| hits.lock()[i as usize] += 1,
                |_| 3,
                |_| Hint::new(0, EnqFlags::NOHINT),
                &cfg,
            );
        });
        assert!(hits.iter().all(|&h| h == 1));
        crate::test_complete!("strand_engine_covers_range_exactly_once");
    }

    #[test]
    fn strand_fallback_to_tree_for_short_ranges() {
        init_test("strand_fallback_to_tree_for_short_ranges");
        // 12 elements at 4 per task feed only 3 strands, fewer than the
        // 4-strand cap on one worker: the tree engine takes over.
        let cfg = RuntimeConfig::new().workers(1);
        let hits = counting_run(12, |hits| {
            enqueue_all_strands(
                0u64,
                12,
                move |_, i| hits.lock()[i as usize] += 1,
                |_| 0,
                |_| Hint::new(0, EnqFlags::NOHINT | EnqFlags::MAYSPEC),
                &cfg,
            );
        });
        assert!(hits.iter().all(|&h| h == 1));
        crate::test_complete!("strand_fallback_to_tree_for_short_ranges");
    }

    #[test]
    fn progressive_engine_covers_range_exactly_once() {
        init_test("progressive_engine_covers_range_exactly_once");
        let cfg = RuntimeConfig::new().workers(2);
        let hits = counting_run(333, |hits| {
            enqueue_all_progressive(
                0u64,
                333,
                move |_, i| hits.lock()[i as usize] += 1,
                |_| 1,
                |_| Hint::new(0, EnqFlags::NOHINT),
                &cfg,
            );
        });
        assert!(hits.iter().all(|&h| h == 1));
        crate::test_complete!("progressive_engine_covers_range_exactly_once");
    }

    #[test]
    fn progressive_delivers_earliest_elements_first() {
        init_test("progressive_delivers_earliest_elements_first");
        let rt = SeqRuntime::new();
        let order = Arc::new(PlMutex::new(Vec::new()));
        let cfg = RuntimeConfig::new().workers(1).enqueues_per_task(4);
        {
            let _g = rt.enter();
            let order2 = Arc::clone(&order);
            enqueue_all_progressive(
                0u64,
                64,
                move |_, i| order2.lock().push(i),
                |_| 0,
                |_| Hint::new(0, EnqFlags::NOHINT),
                &cfg,
            );
        }
        rt.run();
        let order = order.lock();
        assert_eq!(order.len(), 64);
        // The first slice of the range is enqueued by the very first
        // strand task, before any widening happens.
        assert_eq!(&order[..4], &[0, 1, 2, 3]);
        crate::test_complete!("progressive_delivers_earliest_elements_first");
    }
}
