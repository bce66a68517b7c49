//! Parallel copy.
//!
//! Halves the work like fill, but splits on *destination* cache-line
//! boundaries: stores are what false-share, and the source side is only
//! read. Overlapping ranges within one buffer are rejected, like
//! `memcpy`.

use crate::algo::block::{self, GrainBuf};
use crate::sched::{enqueue_lambda, num_threads};
use crate::task::{EnqFlags, Hint, Timestamp};
use std::sync::Arc;

struct CopyJob<T> {
    src: Arc<GrainBuf<T>>,
    dst: Arc<GrainBuf<T>>,
    lines: u32,
}

fn copier<T>(
    job: &Arc<CopyJob<T>>,
    src_first: usize,
    dst_first: usize,
    count: usize,
    flags: EnqFlags,
    ts: Timestamp,
)
where
    T: Clone + Send + Sync + 'static,
{
    if count == 0 {
        return;
    }
    let epl = job.dst.elems_per_line();
    if block::same_grain(epl, job.lines, dst_first, dst_first + count) {
        let values = job.src.read_block(src_first, src_first + count);
        job.dst.write_block(dst_first, &values);
        return;
    }

    let mid = dst_first + count / 2;
    let aligned = mid - mid % epl;
    let cut = if aligned <= dst_first {
        (dst_first / epl + 1) * epl
    } else {
        aligned
    };
    let left = cut - dst_first;
    debug_assert!(left > 0 && left < count);

    let right_flags = flags | EnqFlags::SAMETASK;
    let left_flags = Hint::replace_no_with_same(right_flags);
    let ljob = Arc::clone(job);
    enqueue_lambda(
        move |ts| copier(&ljob, src_first, dst_first, left, left_flags, ts),
        ts,
        Hint::new(0, left_flags),
    );
    let rjob = Arc::clone(job);
    enqueue_lambda(
        move |ts| copier(&rjob, src_first + left, cut, count - left, right_flags, ts),
        ts,
        Hint::new(0, right_flags),
    );
}

/// Copies `count` elements from `src[src_first..]` into
/// `dst[dst_first..]` at timestamp `ts`.
///
/// # Panics
///
/// Panics on out-of-bounds ranges, on overlapping ranges within the
/// same buffer, or if `flags` carries `SAMETASK`/`NOHASH`.
pub fn copy<T>(
    src: &Arc<GrainBuf<T>>,
    src_first: usize,
    dst: &Arc<GrainBuf<T>>,
    dst_first: usize,
    count: usize,
    ts: Timestamp,
    flags: EnqFlags,
)
where
    T: Clone + Send + Sync + 'static,
{
    assert!(
        !flags.intersects(EnqFlags::SAMETASK),
        "SAMETASK is derived for copy descendants, not supplied"
    );
    assert!(
        !flags.intersects(EnqFlags::NOHASH),
        "NOHASH defeats the copy decomposition"
    );
    assert!(src_first + count <= src.len(), "source range out of bounds");
    assert!(
        dst_first + count <= dst.len(),
        "destination range out of bounds"
    );
    assert!(
        !(Arc::ptr_eq(src, dst)
            && src_first < dst_first + count
            && dst_first < src_first + count),
        "overlapping copy ranges"
    );
    if count == 0 {
        return;
    }

    let lines = block::grain_size(count, dst.elems_per_line(), num_threads()).min(16);
    let job = Arc::new(CopyJob {
        src: Arc::clone(src),
        dst: Arc::clone(dst),
        lines,
    });
    enqueue_lambda(
        move |ts| copier(&job, src_first, dst_first, count, flags, ts),
        ts,
        Hint::new(0, flags),
    );
}
