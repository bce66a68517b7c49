//! Parallel reduction.
//!
//! A reduction runs as per-block accumulate tasks that each fold one
//! cache-line-sized slice and merge the result into the running
//! worker's private intermediate; when the last block lands, a collapse
//! task folds the intermediates and hands the result to the caller's
//! callback at the reduction's own timestamp.
//!
//! Completion is tracked with a remaining-blocks counter, so the
//! protocol needs no timestamp tricks and is correct on back-ends
//! without fractal time. On a domain-capable back-end the whole
//! reduction additionally runs inside a `deepen`ed sub-domain, making
//! it atomic relative to the caller, and the callback escapes through a
//! `PARENTDOMAIN` enqueue.

use crate::algo::block::GrainBuf;
use crate::sched::{deepen, domains_supported, enqueue_lambda, num_threads, tid};
use crate::task::{EnqFlags, Hint, Timestamp, NO_TIMESTAMP};
use crate::util::CachePadded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Reducer<T, O, C> {
    buf: Arc<GrainBuf<T>>,
    first: usize,
    last: usize,
    block_elems: usize,
    identity: T,
    op: O,
    cb_ts: Timestamp,
    cb: Mutex<Option<C>>,
    intermediates: Vec<CachePadded<Mutex<T>>>,
    remaining: AtomicU64,
    in_domain: bool,
}

impl<T, O, C> Reducer<T, O, C>
where
    T: Clone + Send + Sync + 'static,
    O: Fn(T, T) -> T + Send + Sync + 'static,
    C: FnOnce(Timestamp, T) + Send + 'static,
{
    fn accumulate(this: &Arc<Self>, ts: Timestamp, block: u64) {
        let lo = this.first + block as usize * this.block_elems;
        let hi = this.last.min(lo + this.block_elems);
        let value = this
            .buf
            .fold_range(lo, hi, this.identity.clone(), |a, b| (this.op)(a, b));
        Self::update_intermediate(this, value);
        if this.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            let me = Arc::clone(this);
            enqueue_lambda(
                move |ts| Self::collapse(&me, ts),
                ts,
                Hint::new(0, EnqFlags::NOHINT | EnqFlags::CANTSPEC),
            );
        }
    }

    fn update_intermediate(this: &Arc<Self>, value: T) {
        let slot = &this.intermediates[tid() as usize];
        let mut held = slot.lock();
        let merged = (this.op)(held.clone(), value);
        *held = merged;
    }

    fn collapse(this: &Arc<Self>, ts: Timestamp) {
        // Fold the per-worker intermediates in fixed-width batches so
        // the loads are not serialised on one accumulator dependence.
        const INFLIGHT: usize = 12;
        let values: Vec<T> = this
            .intermediates
            .iter()
            .map(|slot| slot.lock().clone())
            .collect();
        let mut acc = this.identity.clone();
        let mut chunks = values.chunks_exact(INFLIGHT);
        for chunk in chunks.by_ref() {
            let batch: Vec<T> = chunk.to_vec();
            acc = batch.into_iter().fold(acc, |a, v| (this.op)(a, v));
        }
        for v in chunks.remainder() {
            acc = (this.op)(acc, v.clone());
        }
        Self::finish(this, ts, acc);
    }

    fn finish(this: &Arc<Self>, _ts: Timestamp, result: T) {
        let cb = this.cb.lock().take().expect("callback fires once");
        let flags = if this.in_domain {
            EnqFlags::NOHINT | EnqFlags::PARENTDOMAIN
        } else {
            EnqFlags::NOHINT
        };
        enqueue_lambda(move |ts| cb(ts, result), this.cb_ts, Hint::new(0, flags));
    }
}

/// Reduces `buf[first..last)` with the associative `op` over `identity`
/// and calls `cb(ts, result)` in a task at timestamp `ts`.
///
/// An empty range calls back with `identity`.
///
/// # Panics
///
/// Panics if the range is out of bounds.
pub fn reduce<T, O, C>(
    buf: &Arc<GrainBuf<T>>,
    first: usize,
    last: usize,
    identity: T,
    op: O,
    ts: Timestamp,
    cb: C,
)
where
    T: Clone + Send + Sync + 'static,
    O: Fn(T, T) -> T + Send + Sync + 'static,
    C: FnOnce(Timestamp, T) + Send + 'static,
{
    assert!(first <= last && last <= buf.len(), "range out of bounds");
    if first == last {
        enqueue_lambda(move |ts| cb(ts, identity), ts, EnqFlags::NOHINT);
        return;
    }

    let block_elems = buf.elems_per_line().max(2);
    let num_tasks = 1 + (last - first - 1) / block_elems;
    let first_line = (first / buf.elems_per_line()) as u64;
    let buf = Arc::clone(buf);

    enqueue_lambda(
        move |ts| {
            if num_tasks == 1 {
                let r = buf.fold_range(first, last, identity, |a, b| op(a, b));
                enqueue_lambda(
                    move |ts| cb(ts, r),
                    ts,
                    Hint::new(0, EnqFlags::SAMEHINT),
                );
                return;
            }

            let in_domain = domains_supported();
            if in_domain {
                deepen(NO_TIMESTAMP);
            }
            let inner_ts = if in_domain { 1 } else { ts };
            let red = Arc::new(Reducer {
                intermediates: (0..num_threads())
                    .map(|_| CachePadded::new(Mutex::new(identity.clone())))
                    .collect(),
                buf,
                first,
                last,
                block_elems,
                identity,
                op,
                cb_ts: ts,
                cb: Mutex::new(Some(cb)),
                remaining: AtomicU64::new(num_tasks as u64),
                in_domain,
            });
            crate::algo::enqueue_all::enqueue_all(
                0u64,
                num_tasks as u64,
                {
                    let red = Arc::clone(&red);
                    move |b| {
                        let lo = red.first + b as usize * red.block_elems;
                        let line = (lo / red.buf.elems_per_line()) as u64;
                        let me = Arc::clone(&red);
                        enqueue_lambda(
                            move |ts| Reducer::accumulate(&me, ts, b),
                            inner_ts,
                            Hint::new(line, EnqFlags::MAYSPEC),
                        );
                    }
                },
                inner_ts,
                EnqFlags::NOHINT | EnqFlags::MAYSPEC,
            );
        },
        ts,
        Hint::new(first_line, EnqFlags::MAYSPEC),
    );
}
