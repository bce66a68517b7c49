//! Continuation-passing loop primitives.
//!
//! The runtime has no blocking join: a loop that must do something
//! "afterwards" threads a continuation through its strands instead.
//! This module provides the standard shapes:
//!
//! - [`continuation`] — break straight-line code into a task
//! - [`forall`] — strand-parallel loop with a shared finish counter
//! - [`forallcc`] — same, with an explicit per-iteration continuation
//!   for bodies that are themselves asynchronous
//! - [`forall_ts`] — counter-free variant; termination runs at `ts + 1`
//! - [`forallred`] — tree-structured parallel reduction
//! - [`callcc`] / [`getcc`] — one-shot continuations carrying a value
//! - [`loopcc`] — sequential loop driven by `next`/`done`
//!
//! Continuation objects are single-shot: each is invoked at most once
//! and freed by its invoker, so no reference counting beyond the `Arc`s
//! that share loop state is needed.

use crate::algo::enqueue_all::{enqueue_all, SplitIndex};
use crate::sched::{enqueue_lambda, num_threads};
use crate::task::{EnqFlags, Hint, Timestamp};
use crate::util::CachePadded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Enqueues `l` as a continuation task at `(ts, hint)`.
pub fn continuation<L>(ts: Timestamp, hint: impl Into<Hint>, l: L)
where
    L: FnOnce(Timestamp) + Send + 'static,
{
    enqueue_lambda(l, ts, hint);
}

fn line_key<T>(shared: &Arc<T>) -> u64 {
    Hint::cache_line(Arc::as_ptr(shared) as usize)
}

struct ForallData<I, H, B, T> {
    hl: H,
    bl: B,
    sup: I,
    stride: u64,
    tl: Mutex<Option<T>>,
    strands_finished: CachePadded<AtomicU64>,
}

fn forall_strand<I, H, B, T>(data: &Arc<ForallData<I, H, B, T>>, ts: Timestamp, i: I)
where
    I: SplitIndex,
    H: Fn(I) -> Hint + Send + Sync + 'static,
    B: Fn(Timestamp, I) + Send + Sync + 'static,
    T: FnOnce(Timestamp) + Send + 'static,
{
    (data.bl)(ts, i);
    let next = i.advance(data.stride);
    if next < data.sup {
        let h = (data.hl)(next);
        let me = Arc::clone(data);
        enqueue_lambda(
            move |ts| forall_strand(&me, ts, next),
            ts,
            Hint::new(h.hint, h.flags | EnqFlags::SAMETASK),
        );
    } else {
        // Count this strand out in a task hinted at the counter's line.
        let me = Arc::clone(data);
        let key = line_key(data);
        enqueue_lambda(
            move |ts| {
                let done = me.strands_finished.fetch_add(1, Ordering::SeqCst) + 1;
                if done == me.stride {
                    // The termination lambda may touch anything, so it
                    // gets its own unhinted task.
                    let me2 = Arc::clone(&me);
                    enqueue_lambda(
                        move |ts| {
                            let tl = me2.tl.lock().take().expect("termination runs once");
                            tl(ts);
                        },
                        ts,
                        EnqFlags::NOHINT,
                    );
                }
            },
            ts,
            Hint::new(key, EnqFlags::MAYSPEC),
        );
    }
}

/// Strand-parallel `for i in [first, sup)`: `bl(ts, i)` per iteration,
/// `hl(i)` supplies per-iteration hints, and `tl(ts)` runs once after
/// the last strand finishes.
pub fn forall<I, H, B, T>(ts: Timestamp, first: I, sup: I, hl: H, bl: B, tl: T)
where
    I: SplitIndex,
    H: Fn(I) -> Hint + Send + Sync + 'static,
    B: Fn(Timestamp, I) + Send + Sync + 'static,
    T: FnOnce(Timestamp) + Send + 'static,
{
    assert!(sup >= first, "degenerate loop bounds");
    if sup == first {
        tl(ts);
        return;
    }

    let stride = I::distance(first, sup).min(u64::from(num_threads()) * 4);
    let data = Arc::new(ForallData {
        hl,
        bl,
        sup,
        stride,
        tl: Mutex::new(Some(tl)),
        strands_finished: CachePadded::new(AtomicU64::new(0)),
    });
    let launcher = Arc::clone(&data);
    enqueue_all(
        0u64,
        stride,
        move |s| {
            let i = first.advance(s);
            let h = (launcher.hl)(i);
            let me = Arc::clone(&launcher);
            enqueue_lambda(move |ts| forall_strand(&me, ts, i), ts, h);
        },
        ts,
        EnqFlags::NOHINT | EnqFlags::MAYSPEC,
    );
}

/// A single-shot continuation: advance the strand that handed it out.
pub trait Continuation: Send {
    /// Resumes the strand at `ts`. Consumes the continuation.
    fn run(self: Box<Self>, ts: Timestamp);
}

struct CcData<I, H, B, T> {
    hl: H,
    bl: B,
    sup: I,
    stride: u64,
    tl: Mutex<Option<T>>,
    strands_finished: CachePadded<AtomicU64>,
}

struct CcStrand<I, H, B, T> {
    data: Arc<CcData<I, H, B, T>>,
    i: I,
}

impl<I, H, B, T> CcStrand<I, H, B, T>
where
    I: SplitIndex,
    H: Fn(I) -> Hint + Send + Sync + 'static,
    B: Fn(Timestamp, Box<dyn Continuation>, I) + Send + Sync + 'static,
    T: FnOnce(Timestamp) + Send + 'static,
{
    fn invoke(self: Box<Self>, ts: Timestamp) {
        let i = self.i;
        let data = Arc::clone(&self.data);
        (data.bl)(ts, self, i);
    }
}

impl<I, H, B, T> Continuation for CcStrand<I, H, B, T>
where
    I: SplitIndex,
    H: Fn(I) -> Hint + Send + Sync + 'static,
    B: Fn(Timestamp, Box<dyn Continuation>, I) + Send + Sync + 'static,
    T: FnOnce(Timestamp) + Send + 'static,
{
    fn run(mut self: Box<Self>, ts: Timestamp) {
        self.i = self.i.advance(self.data.stride);
        if self.i < self.data.sup {
            let h = (self.data.hl)(self.i);
            enqueue_lambda(move |ts| self.invoke(ts), ts, h);
        } else {
            let me = Arc::clone(&self.data);
            let key = line_key(&self.data);
            enqueue_lambda(
                move |ts| {
                    let done = me.strands_finished.fetch_add(1, Ordering::SeqCst) + 1;
                    if done == me.stride {
                        let me2 = Arc::clone(&me);
                        enqueue_lambda(
                            move |ts| {
                                let tl = me2.tl.lock().take().expect("termination runs once");
                                tl(ts);
                            },
                            ts,
                            EnqFlags::NOHINT,
                        );
                    }
                },
                ts,
                Hint::new(key, EnqFlags::MAYSPEC),
            );
        }
    }
}

/// [`forall`] with an exposed per-iteration continuation, for loop
/// bodies that finish asynchronously: the body receives a
/// [`Continuation`] and the strand only advances when it is run.
pub fn forallcc<I, H, B, T>(ts: Timestamp, first: I, sup: I, hl: H, bl: B, tl: T)
where
    I: SplitIndex,
    H: Fn(I) -> Hint + Send + Sync + 'static,
    B: Fn(Timestamp, Box<dyn Continuation>, I) + Send + Sync + 'static,
    T: FnOnce(Timestamp) + Send + 'static,
{
    assert!(sup >= first, "degenerate loop bounds");
    if sup == first {
        tl(ts);
        return;
    }

    let stride = I::distance(first, sup).min(u64::from(num_threads()) * 4);
    let data = Arc::new(CcData {
        hl,
        bl,
        sup,
        stride,
        tl: Mutex::new(Some(tl)),
        strands_finished: CachePadded::new(AtomicU64::new(0)),
    });
    let launcher = Arc::clone(&data);
    enqueue_all(
        0u64,
        stride,
        move |s| {
            let i = first.advance(s);
            let h = (launcher.hl)(i);
            let strand = Box::new(CcStrand {
                data: Arc::clone(&launcher),
                i,
            });
            enqueue_lambda(move |ts| strand.invoke(ts), ts, h);
        },
        ts,
        EnqFlags::NOHINT | EnqFlags::MAYSPEC,
    );
}

struct TsData<I, H, B, TH, T> {
    hl: H,
    bl: B,
    sup: I,
    stride: u64,
    tlhl: TH,
    tl: Mutex<Option<T>>,
}

fn forall_ts_strand<I, H, B, TH, T>(data: &Arc<TsData<I, H, B, TH, T>>, ts: Timestamp, i: I)
where
    I: SplitIndex,
    H: Fn(I) -> Hint + Send + Sync + 'static,
    B: Fn(Timestamp, I) + Send + Sync + 'static,
    TH: Fn() -> Hint + Send + Sync + 'static,
    T: FnOnce(Timestamp) + Send + 'static,
{
    (data.bl)(ts, i);
    let next = i.advance(data.stride);
    if next < data.sup {
        let h = (data.hl)(next);
        let me = Arc::clone(data);
        enqueue_lambda(
            move |ts| forall_ts_strand(&me, ts, next),
            ts,
            Hint::new(h.hint, h.flags | EnqFlags::SAMETASK),
        );
    } else if next == data.sup {
        // Exactly one strand lands here: the one whose final index is
        // sup - stride. No shared counter needed.
        let th = (data.tlhl)();
        let me = Arc::clone(data);
        enqueue_lambda(
            move |ts| {
                let tl = me.tl.lock().take().expect("termination runs once");
                tl(ts);
            },
            ts + 1,
            th,
        );
    }
}

/// Forall where every body runs at `ts` and the termination lambda at
/// `ts + 1`, under the hint `tlhl()` — the strided pattern without the
/// global finish counter.
pub fn forall_ts<I, H, B, TH, T>(ts: Timestamp, first: I, sup: I, hl: H, bl: B, tlhl: TH, tl: T)
where
    I: SplitIndex,
    H: Fn(I) -> Hint + Send + Sync + 'static,
    B: Fn(Timestamp, I) + Send + Sync + 'static,
    TH: Fn() -> Hint + Send + Sync + 'static,
    T: FnOnce(Timestamp) + Send + 'static,
{
    assert!(sup >= first, "degenerate loop bounds");
    if sup == first {
        tl(ts + 1);
        return;
    }

    // Short loops are likely inner loops; few strands bound the cost
    // of termination.
    let d = I::distance(first, sup);
    let stride = (d / 4 + 1).min(u64::from(num_threads()) * 4);
    let data = Arc::new(TsData {
        hl,
        bl,
        sup,
        stride,
        tlhl,
        tl: Mutex::new(Some(tl)),
    });
    let launcher = Arc::clone(&data);
    enqueue_all(
        0u64,
        stride,
        move |s| {
            let i = first.advance(s);
            let h = (launcher.hl)(i);
            let me = Arc::clone(&launcher);
            enqueue_lambda(move |ts| forall_ts_strand(&me, ts, i), ts, h);
        },
        ts,
        EnqFlags::NOHINT | EnqFlags::MAYSPEC,
    );
}

/// Receiver of one leaf's reduction contribution.
///
/// Every leaf body must call [`RedSink::complete`] exactly once on the
/// handle it was given.
pub trait RedSink<R>: Send + Sync {
    /// Merges `value` into the node; the last merge propagates upward.
    fn complete(self: Arc<Self>, ts: Timestamp, value: R);
}

struct RedCore<I, R, H, B, RL, TL> {
    hl: H,
    bl: B,
    rl: RL,
    tl: Mutex<Option<TL>>,
    initial: R,
    _marker: std::marker::PhantomData<fn(I)>,
}

struct RedNode<I, R, H, B, RL, TL> {
    core: Arc<RedCore<I, R, H, B, RL, TL>>,
    parent: Option<Arc<RedNode<I, R, H, B, RL, TL>>>,
    accum: CachePadded<Mutex<Option<R>>>,
    syncs_left: AtomicU64,
}

impl<I, R, H, B, RL, TL> RedNode<I, R, H, B, RL, TL>
where
    I: SplitIndex,
    R: Clone + Send + Sync + 'static,
    H: Fn(I) -> Hint + Send + Sync + 'static,
    B: Fn(Timestamp, I, Arc<dyn RedSink<R>>) + Send + Sync + 'static,
    RL: Fn(&mut R, R) + Send + Sync + 'static,
    TL: FnOnce(Timestamp, R) + Send + 'static,
{
    fn fresh(
        core: &Arc<RedCore<I, R, H, B, RL, TL>>,
        parent: Option<Arc<Self>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: Arc::clone(core),
            parent,
            accum: CachePadded::new(Mutex::new(Some(core.initial.clone()))),
            syncs_left: AtomicU64::new(0),
        })
    }

    /// Expansion; runs right after creation.
    fn expand(this: &Arc<Self>, ts: Timestamp, first: I, sup: I) {
        let iters = I::distance(first, sup);
        debug_assert!(iters > 0);
        if iters == 1 {
            this.syncs_left.store(1, Ordering::SeqCst);
            (this.core.bl)(ts, first, Arc::clone(this) as Arc<dyn RedSink<R>>);
        } else if iters <= 8 {
            this.syncs_left.store(iters, Ordering::SeqCst);
            let mut i = first;
            while i < sup {
                let h = (this.core.hl)(i);
                let sink = Arc::clone(this);
                enqueue_lambda(
                    move |ts| (sink.core.bl)(ts, i, Arc::clone(&sink) as Arc<dyn RedSink<R>>),
                    ts,
                    h,
                );
                i = i.advance(1);
            }
        } else {
            // Variable radix: make the leaves as wide as possible;
            // leaves dominate, so wide leaves minimise allocations.
            let radix = 8u64.min((iters + 7) / 8);
            this.syncs_left.store(radix, Ordering::SeqCst);
            for r in 0..radix {
                let f = first.advance(r * iters / radix);
                let s = first.advance((r + 1) * iters / radix);
                let child = Self::fresh(&this.core, Some(Arc::clone(this)));
                let key = line_key(&child);
                enqueue_lambda(
                    move |ts| Self::expand(&child, ts, f, s),
                    ts,
                    Hint::new(key, EnqFlags::NOFLAGS),
                );
            }
        }
    }
}

impl<I, R, H, B, RL, TL> RedSink<R> for RedNode<I, R, H, B, RL, TL>
where
    I: SplitIndex,
    R: Clone + Send + Sync + 'static,
    H: Fn(I) -> Hint + Send + Sync + 'static,
    B: Fn(Timestamp, I, Arc<dyn RedSink<R>>) + Send + Sync + 'static,
    RL: Fn(&mut R, R) + Send + Sync + 'static,
    TL: FnOnce(Timestamp, R) + Send + 'static,
{
    fn complete(self: Arc<Self>, ts: Timestamp, value: R) {
        let key = line_key(&self);
        enqueue_lambda(
            move |ts| {
                {
                    let mut acc = self.accum.lock();
                    (self.core.rl)(acc.as_mut().expect("accumulator live"), value);
                }
                if self.syncs_left.fetch_sub(1, Ordering::SeqCst) == 1 {
                    let result = self.accum.lock().take().expect("accumulator live");
                    match &self.parent {
                        Some(p) => Arc::clone(p).complete(ts, result),
                        None => {
                            let tl = self.core.tl.lock().take().expect("termination runs once");
                            tl(ts, result);
                        }
                    }
                }
            },
            ts,
            Hint::new(key, EnqFlags::MAYSPEC),
        );
    }
}

/// Forall with tree reductions: bodies deposit one value each through
/// their [`RedSink`]; values merge through `rl` up a radix-8 node tree;
/// `tl(ts, result)` runs once with the folded result.
pub fn forallred<I, R, H, B, RL, TL>(
    ts: Timestamp,
    first: I,
    sup: I,
    hl: H,
    bl: B,
    initial: R,
    rl: RL,
    tl: TL,
)
where
    I: SplitIndex,
    R: Clone + Send + Sync + 'static,
    H: Fn(I) -> Hint + Send + Sync + 'static,
    B: Fn(Timestamp, I, Arc<dyn RedSink<R>>) + Send + Sync + 'static,
    RL: Fn(&mut R, R) + Send + Sync + 'static,
    TL: FnOnce(Timestamp, R) + Send + 'static,
{
    assert!(sup >= first, "degenerate loop bounds");
    if sup == first {
        tl(ts, initial);
        return;
    }

    let core = Arc::new(RedCore {
        hl,
        bl,
        rl,
        tl: Mutex::new(Some(tl)),
        initial,
        _marker: std::marker::PhantomData,
    });
    let root = RedNode::fresh(&core, None);
    RedNode::expand(&root, ts, first, sup);
}

/// A one-shot continuation carrying a call's return value.
pub trait CallCont<R>: Send {
    /// Delivers the result, scheduling the continuation body.
    fn resume(self: Box<Self>, ts: Timestamp, value: R);
}

/// Enqueues `f(ts, cc, arg)` at `(ts, hint)` with a one-shot
/// continuation `cc`; when the callee resumes it with a result, `cont`
/// runs in its own task at `cont_hint`.
pub fn callcc<R, A, F, C>(
    f: F,
    ts: Timestamp,
    hint: impl Into<Hint>,
    arg: A,
    cont_hint: impl Into<Hint>,
    cont: C,
)
where
    R: Send + 'static,
    A: Send + 'static,
    F: FnOnce(Timestamp, Box<dyn CallCont<R>>, A) + Send + 'static,
    C: FnOnce(Timestamp, R) + Send + 'static,
{
    struct Cont<C> {
        l: C,
        h: Hint,
    }

    impl<R, C> CallCont<R> for Cont<C>
    where
        R: Send + 'static,
        C: FnOnce(Timestamp, R) + Send + 'static,
    {
        fn resume(self: Box<Self>, ts: Timestamp, value: R) {
            let l = self.l;
            enqueue_lambda(move |ts| l(ts, value), ts, self.h);
        }
    }

    let cc: Box<dyn CallCont<R>> = Box::new(Cont {
        l: cont,
        h: cont_hint.into(),
    });
    enqueue_lambda(move |ts| f(ts, cc, arg), ts, hint);
}

/// A materialised continuation with no task of its own.
pub trait RawCont<R>: Send {
    /// Delivers the value to the fallthrough body.
    fn run(self: Box<Self>, value: R);
}

/// Materialises a continuation across control flow: `bl` receives a
/// [`RawCont`] it may invoke from any branch (or hand to a task);
/// `tl` is the fallthrough. No tasks are created here.
pub fn getcc<R, B, T>(bl: B, tl: T)
where
    R: Send + 'static,
    B: FnOnce(Box<dyn RawCont<R>>),
    T: FnOnce(R) + Send + 'static,
{
    struct Cont<T> {
        tl: T,
    }

    impl<R, T> RawCont<R> for Cont<T>
    where
        R: Send + 'static,
        T: FnOnce(R) + Send + 'static,
    {
        fn run(self: Box<Self>, value: R) {
            (self.tl)(value);
        }
    }

    bl(Box::new(Cont { tl }));
}

/// Driver handle for a sequential continuation loop.
pub trait LoopCont: Send + Sync {
    /// Schedules the next loop body task at `(ts, hint)`.
    fn next(self: Arc<Self>, ts: Timestamp, hint: Hint);
    /// Schedules the termination lambda and retires the loop.
    fn done(self: Arc<Self>, ts: Timestamp, hint: Hint);
}

struct SeqLoop<B, T> {
    bl: B,
    tl: Mutex<Option<T>>,
}

impl<B, T> LoopCont for SeqLoop<B, T>
where
    B: Fn(Timestamp, Arc<dyn LoopCont>) + Send + Sync + 'static,
    T: FnOnce(Timestamp) + Send + 'static,
{
    fn next(self: Arc<Self>, ts: Timestamp, hint: Hint) {
        let me = Arc::clone(&self);
        enqueue_lambda(
            move |ts| (me.bl)(ts, Arc::clone(&me) as Arc<dyn LoopCont>),
            ts,
            hint,
        );
    }

    fn done(self: Arc<Self>, ts: Timestamp, hint: Hint) {
        let tl = self.tl.lock().take().expect("loop terminates once");
        enqueue_lambda(move |ts| tl(ts), ts, hint);
    }
}

/// Sequential loop in continuation style: each body invocation calls
/// `cc.next(..)` to continue or `cc.done(..)` to finish.
pub fn loopcc<B, T>(ts: Timestamp, initial_hint: impl Into<Hint>, bl: B, tl: T)
where
    B: Fn(Timestamp, Arc<dyn LoopCont>) + Send + Sync + 'static,
    T: FnOnce(Timestamp) + Send + 'static,
{
    let l: Arc<dyn LoopCont> = Arc::new(SeqLoop {
        bl,
        tl: Mutex::new(Some(tl)),
    });
    l.next(ts, initial_hint.into());
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

    fn nohint(_: u64) -> Hint {
        Hint::new(0, EnqFlags::NOHINT)
    }

    #[test]
    fn forall_visits_every_index_then_terminates() {
        init_test("forall_visits_every_index_then_terminates");
        let rt = SeqRuntime::new();
        let hits = Arc::new(PlMutex::new(vec![0u32; 100]));
        let finished = Arc::new(PlMutex::new(0u32));
        {
            let _g = rt.enter();
            let hits2 = Arc::clone(&hits);
            let fin2 = Arc::clone(&finished);
            forall(
                3,
                0u64,
                100,
                nohint,
                move |_, i| hits2.lock()[i as usize] += 1,
                move |_| *fin2.lock() += 1,
            );
        }
        rt.run();
        assert!(hits.lock().iter().all(|&h| h == 1));
        assert_eq!(*finished.lock(), 1, "termination ran exactly once");
        crate::test_complete!("forall_visits_every_index_then_terminates");
    }

    #[test]
    fn forall_empty_range_terminates_immediately() {
        init_test("forall_empty_range_terminates_immediately");
        let rt = SeqRuntime::new();
        let finished = Arc::new(PlMutex::new(0u32));
        {
            let _g = rt.enter();
            let fin2 = Arc::clone(&finished);
            forall(9, 5u64, 5, nohint, |_, _| {}, move |_| *fin2.lock() += 1);
            assert_eq!(*finished.lock(), 1, "empty loop terminates inline");
        }
        rt.run();
        crate::test_complete!("forall_empty_range_terminates_immediately");
    }

    #[test]
    fn forallcc_advances_only_when_continuation_runs() {
        init_test("forallcc_advances_only_when_continuation_runs");
        let rt = SeqRuntime::new();
        let hits = Arc::new(PlMutex::new(vec![0u32; 40]));
        let finished = Arc::new(PlMutex::new(false));
        {
            let _g = rt.enter();
            let hits2 = Arc::clone(&hits);
            let fin2 = Arc::clone(&finished);
            forallcc(
                0,
                0u64,
                40,
                nohint,
                move |ts, cc, i| {
                    hits2.lock()[i as usize] += 1;
                    // Resume from a nested task, as an async body would.
                    enqueue_lambda(move |ts| cc.run(ts), ts, EnqFlags::NOHINT);
                },
                move |_| *fin2.lock() = true,
            );
        }
        rt.run();
        assert!(hits.lock().iter().all(|&h| h == 1));
        assert!(*finished.lock());
        crate::test_complete!("forallcc_advances_only_when_continuation_runs");
    }

    #[test]
    fn forall_ts_terminates_at_ts_plus_one() {
        init_test("forall_ts_terminates_at_ts_plus_one");
        let rt = SeqRuntime::new();
        let hits = Arc::new(PlMutex::new(vec![0u32; 30]));
        let term_ts = Arc::new(PlMutex::new(0u64));
        {
            let _g = rt.enter();
            let hits2 = Arc::clone(&hits);
            let term2 = Arc::clone(&term_ts);
            forall_ts(
                7,
                0u64,
                30,
                nohint,
                move |ts, i| {
                    assert_eq!(ts, 7);
                    hits2.lock()[i as usize] += 1;
                },
                || Hint::new(0, EnqFlags::NOHINT | EnqFlags::MAYSPEC),
                move |ts| *term2.lock() = ts,
            );
        }
        rt.run();
        assert!(hits.lock().iter().all(|&h| h == 1));
        assert_eq!(*term_ts.lock(), 8);
        crate::test_complete!("forall_ts_terminates_at_ts_plus_one");
    }

    #[test]
    fn forall_ts_empty_range_runs_termination_at_ts_plus_one() {
        init_test("forall_ts_empty_range_runs_termination_at_ts_plus_one");
        let rt = SeqRuntime::new();
        let term_ts = Arc::new(PlMutex::new(0u64));
        {
            let _g = rt.enter();
            let term2 = Arc::clone(&term_ts);
            forall_ts(
                4,
                2u64,
                2,
                nohint,
                |_, _| {},
                || Hint::new(0, EnqFlags::NOHINT),
                move |ts| *term2.lock() = ts,
            );
            assert_eq!(*term_ts.lock(), 5);
        }
        rt.run();
        crate::test_complete!("forall_ts_empty_range_runs_termination_at_ts_plus_one");
    }

    #[test]
    fn forallred_folds_the_range() {
        init_test("forallred_folds_the_range");
        let rt = SeqRuntime::new();
        let result = Arc::new(PlMutex::new(0u64));
        {
            let _g = rt.enter();
            let res2 = Arc::clone(&result);
            forallred(
                0,
                1u64,
                101,
                nohint,
                |ts, i, sink: Arc<dyn RedSink<u64>>| sink.complete(ts, i),
                0u64,
                |acc: &mut u64, v| *acc += v,
                move |_, total| *res2.lock() = total,
            );
        }
        rt.run();
        assert_eq!(*result.lock(), (1..=100).sum::<u64>());
        crate::test_complete!("forallred_folds_the_range");
    }

    #[test]
    fn forallred_empty_range_yields_initial() {
        init_test("forallred_empty_range_yields_initial");
        let rt = SeqRuntime::new();
        let result = Arc::new(PlMutex::new(0u64));
        {
            let _g = rt.enter();
            let res2 = Arc::clone(&result);
            forallred(
                0,
                3u64,
                3,
                nohint,
                |ts, i, sink: Arc<dyn RedSink<u64>>| sink.complete(ts, i),
                41u64,
                |acc: &mut u64, v| *acc += v,
                move |_, total| *res2.lock() = total + 1,
            );
            assert_eq!(*result.lock(), 42);
        }
        rt.run();
        crate::test_complete!("forallred_empty_range_yields_initial");
    }

    #[test]
    fn callcc_delivers_the_result_to_the_continuation() {
        init_test("callcc_delivers_the_result_to_the_continuation");
        let rt = SeqRuntime::new();
        let out = Arc::new(PlMutex::new((0u64, 0i64)));
        {
            let _g = rt.enter();
            let out2 = Arc::clone(&out);
            callcc(
                |ts, cc: Box<dyn CallCont<i64>>, arg: i64| {
                    cc.resume(ts, arg * 2);
                },
                6,
                EnqFlags::NOHINT,
                21i64,
                EnqFlags::NOHINT,
                move |ts, res| *out2.lock() = (ts, res),
            );
        }
        rt.run();
        assert_eq!(*out.lock(), (6, 42));
        crate::test_complete!("callcc_delivers_the_result_to_the_continuation");
    }

    #[test]
    fn getcc_creates_no_tasks() {
        init_test("getcc_creates_no_tasks");
        let taken = Arc::new(PlMutex::new(0u64));
        let taken2 = Arc::clone(&taken);
        getcc(
            |cc: Box<dyn RawCont<u64>>| {
                // Invoke from a branch; no runtime involved at all.
                cc.run(17);
            },
            move |v| *taken2.lock() = v,
        );
        assert_eq!(*taken.lock(), 17);
        crate::test_complete!("getcc_creates_no_tasks");
    }

    #[test]
    fn loopcc_chains_until_done() {
        init_test("loopcc_chains_until_done");
        let rt = SeqRuntime::new();
        let steps = Arc::new(PlMutex::new(Vec::new()));
        let finished = Arc::new(PlMutex::new(false));
        {
            let _g = rt.enter();
            let steps2 = Arc::clone(&steps);
            let fin2 = Arc::clone(&finished);
            loopcc(
                0,
                EnqFlags::NOHINT,
                move |ts, cc| {
                    steps2.lock().push(ts);
                    if ts < 3 {
                        cc.next(ts + 1, Hint::new(0, EnqFlags::NOHINT));
                    } else {
                        cc.done(ts, Hint::new(0, EnqFlags::NOHINT));
                    }
                },
                move |_| *fin2.lock() = true,
            );
        }
        rt.run();
        assert_eq!(*steps.lock(), vec![0, 1, 2, 3]);
        assert!(*finished.lock());
        crate::test_complete!("loopcc_chains_until_done");
    }
}
