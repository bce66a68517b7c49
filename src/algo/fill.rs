//! Parallel fill.
//!
//! Recursively halves the target range, aligning each midpoint to a
//! cache-line boundary so sibling tasks never write the same line;
//! leaves fill serially once the range sits inside one grain block.

use crate::algo::block::{self, GrainBuf};
use crate::sched::{enqueue_lambda, num_threads};
use crate::task::{EnqFlags, Hint, Timestamp};
use std::sync::Arc;

fn filler<T>(
    buf: &Arc<GrainBuf<T>>,
    lines: u32,
    first: usize,
    last: usize,
    value: &T,
    flags: EnqFlags,
    ts: Timestamp,
)
where
    T: Clone + Send + Sync + 'static,
{
    if first == last {
        return;
    }
    let epl = buf.elems_per_line();
    if block::same_grain(epl, lines, first, last) {
        buf.fill_range(first, last, value);
        return;
    }

    let mid = first + (last - first) / 2;
    let aligned = mid - mid % epl;
    // An unaligned midpoint backs up to its line start; if that lands
    // on (or before) first, the range straddles exactly one boundary,
    // so cut there instead.
    let mid = if aligned <= first {
        (first / epl + 1) * epl
    } else {
        aligned
    };
    debug_assert!(mid > first && mid < last);

    let right_flags = flags | EnqFlags::SAMETASK;
    let left_flags = Hint::replace_no_with_same(right_flags);
    let (lbuf, lval) = (Arc::clone(buf), value.clone());
    enqueue_lambda(
        move |ts| filler(&lbuf, lines, first, mid, &lval, left_flags, ts),
        ts,
        Hint::new(0, left_flags),
    );
    let (rbuf, rval) = (Arc::clone(buf), value.clone());
    enqueue_lambda(
        move |ts| filler(&rbuf, lines, mid, last, &rval, right_flags, ts),
        ts,
        Hint::new(0, right_flags),
    );
}

/// Fills `buf[first..last)` with `value` at timestamp `ts`.
///
/// # Panics
///
/// Panics if the range is out of bounds or `flags` carries `SAMETASK`
/// or `NOHASH` (both are derived internally).
pub fn fill<T>(
    buf: &Arc<GrainBuf<T>>,
    first: usize,
    last: usize,
    value: T,
    ts: Timestamp,
    flags: EnqFlags,
)
where
    T: Clone + Send + Sync + 'static,
{
    assert!(
        !flags.intersects(EnqFlags::SAMETASK),
        "SAMETASK is derived for fill descendants, not supplied"
    );
    assert!(
        !flags.intersects(EnqFlags::NOHASH),
        "NOHASH defeats the fill decomposition"
    );
    assert!(first <= last && last <= buf.len(), "range out of bounds");
    if first == last {
        return;
    }

    let lines = block::grain_size(last - first, buf.elems_per_line(), num_threads()).min(16);
    let buf2 = Arc::clone(buf);
    enqueue_lambda(
        move |ts| filler(&buf2, lines, first, last, &value, flags, ts),
        ts,
        Hint::new(0, flags),
    );
}
