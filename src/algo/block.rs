//! Grain arithmetic and the grain-structured shared buffer.
//!
//! The parallel primitives decompose ranges along cache-line boundaries
//! so that child tasks never write the same line. Safe Rust cannot hand
//! overlapping `&mut` slices to dynamically-scheduled tasks, so the
//! buffer itself is split into *grains* — one cache line of elements
//! each, individually locked. Address arithmetic (same grain? align the
//! midpoint to a line) becomes index arithmetic over grains, and a leaf
//! task locks exactly one grain at a time.

use crate::util::{CachePadded, CACHE_LINE_SIZE};
use parking_lot::Mutex;

/// Elements of `T` that fit one cache line (at least 1).
#[must_use]
pub const fn elements_per_line<T>() -> usize {
    let size = std::mem::size_of::<T>();
    if size == 0 || size >= CACHE_LINE_SIZE {
        1
    } else {
        CACHE_LINE_SIZE / size
    }
}

/// Largest power of two at most `x`.
#[must_use]
pub const fn floor_pow2(x: u32) -> u32 {
    if x == 0 {
        1
    } else {
        1 << (31 - x.leading_zeros())
    }
}

/// Returns true if `[first, last)` lies within one block of
/// `lines_per_grain` cache lines.
#[must_use]
pub fn same_grain(elems_per_line: usize, lines_per_grain: u32, first: usize, last: usize) -> bool {
    debug_assert!(first < last);
    let block = elems_per_line * lines_per_grain as usize;
    first / block == (last - 1) / block
}

/// Picks the per-task grain in cache lines for a range of `elements`
/// items: roughly a quarter of the range per worker, rounded down to a
/// power of two, floored at one line.
#[must_use]
pub fn grain_size(elements: usize, elems_per_line: usize, num_threads: u32) -> u32 {
    let num_tasks = (4 * num_threads.max(1)) as usize;
    let elems_per_task = 1 + (elements.saturating_sub(1)) / num_tasks;
    let lines_per_task = (elems_per_task / elems_per_line.max(1)).max(1);
    floor_pow2(u32::try_from(lines_per_task).unwrap_or(u32::MAX))
}

/// A shared buffer carved into cache-line grains, each behind its own
/// lock.
///
/// Concurrent tasks writing disjoint grains never contend; concurrent
/// access to one grain serialises on its mutex. No operation holds two
/// grain locks at once.
pub struct GrainBuf<T> {
    grains: Vec<CachePadded<Mutex<Vec<T>>>>,
    elems_per_line: usize,
    len: usize,
}

impl<T: Clone + Send> GrainBuf<T> {
    /// Creates a buffer of `len` copies of `init`.
    #[must_use]
    pub fn new(len: usize, init: T) -> Self {
        Self::from_vec(vec![init; len])
    }

    /// Builds a buffer from existing contents.
    #[must_use]
    pub fn from_vec(values: Vec<T>) -> Self {
        let epl = elements_per_line::<T>();
        let len = values.len();
        let mut grains = Vec::with_capacity(len.div_ceil(epl.max(1)));
        let mut values = values.into_iter();
        while grains.len() * epl < len {
            let take = epl.min(len - grains.len() * epl);
            grains.push(CachePadded::new(Mutex::new(
                values.by_ref().take(take).collect(),
            )));
        }
        Self {
            grains,
            elems_per_line: epl,
            len,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements per cache-line grain.
    #[must_use]
    pub fn elems_per_line(&self) -> usize {
        self.elems_per_line
    }

    /// Reads one element.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    #[must_use]
    pub fn get(&self, idx: usize) -> T {
        assert!(idx < self.len, "index {idx} out of bounds ({})", self.len);
        self.grains[idx / self.elems_per_line].lock()[idx % self.elems_per_line].clone()
    }

    /// Writes one element.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    pub fn set(&self, idx: usize, value: T) {
        assert!(idx < self.len, "index {idx} out of bounds ({})", self.len);
        self.grains[idx / self.elems_per_line].lock()[idx % self.elems_per_line] = value;
    }

    /// Fills `[first, last)` with `value`, grain by grain.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn fill_range(&self, first: usize, last: usize, value: &T) {
        assert!(first <= last && last <= self.len, "range out of bounds");
        self.for_grain_runs(first, last, |grain, lo, hi| {
            let mut g = self.grains[grain].lock();
            for slot in &mut g[lo..hi] {
                *slot = value.clone();
            }
        });
    }

    /// Copies `[first, last)` out into a `Vec`, grain by grain.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    #[must_use]
    pub fn read_block(&self, first: usize, last: usize) -> Vec<T> {
        assert!(first <= last && last <= self.len, "range out of bounds");
        let mut out = Vec::with_capacity(last - first);
        self.for_grain_runs(first, last, |grain, lo, hi| {
            let g = self.grains[grain].lock();
            out.extend(g[lo..hi].iter().cloned());
        });
        out
    }

    /// Writes `values` starting at `first`, grain by grain.
    ///
    /// # Panics
    ///
    /// Panics if the run extends out of bounds.
    pub fn write_block(&self, first: usize, values: &[T]) {
        let last = first + values.len();
        assert!(last <= self.len, "range out of bounds");
        let mut consumed = 0;
        self.for_grain_runs(first, last, |grain, lo, hi| {
            let mut g = self.grains[grain].lock();
            let n = hi - lo;
            g[lo..hi].clone_from_slice(&values[consumed..consumed + n]);
            consumed += n;
        });
    }

    /// Folds `[first, last)` left-to-right with `op`, grain by grain.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    #[must_use]
    pub fn fold_range(&self, first: usize, last: usize, init: T, op: impl Fn(T, T) -> T) -> T {
        assert!(first <= last && last <= self.len, "range out of bounds");
        let mut acc = Some(init);
        self.for_grain_runs(first, last, |grain, lo, hi| {
            let g = self.grains[grain].lock();
            for v in &g[lo..hi] {
                let cur = acc.take().expect("accumulator present");
                acc = Some(op(cur, v.clone()));
            }
        });
        acc.expect("accumulator present")
    }

    /// Snapshot of the whole buffer.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.read_block(0, self.len)
    }

    /// Visits the `(grain index, in-grain range)` runs covering
    /// `[first, last)`, in order, locking nothing itself.
    fn for_grain_runs(&self, first: usize, last: usize, mut f: impl FnMut(usize, usize, usize)) {
        let epl = self.elems_per_line;
        let mut idx = first;
        while idx < last {
            let grain = idx / epl;
            let lo = idx % epl;
            let grain_len = epl.min(self.len - grain * epl);
            let hi = (lo + (last - idx)).min(grain_len);
            f(grain, lo, hi);
            idx += hi - lo;
        }
    }
}
