//! Parallel transform.
//!
//! A tiled forall over cache-line blocks of the destination: each block
//! task reads its slice of the source, applies the operation, and
//! writes one output line, hinted at that line. On a domain-capable
//! back-end the whole loop runs inside a sub-domain so it appears
//! atomic to the caller.

use crate::algo::block::GrainBuf;
use crate::cps::{continuation, forall_ts};
use crate::sched::{deepen, domains_supported};
use crate::task::{EnqFlags, Hint, Timestamp, NO_TIMESTAMP};
use std::sync::Arc;

/// Applies `op` to `src[src_first..src_first + count)`, writing results
/// to `dst[dst_first..)`, at timestamp `ts`.
///
/// # Panics
///
/// Panics if either range is out of bounds.
pub fn transform<T, U, O>(
    src: &Arc<GrainBuf<T>>,
    src_first: usize,
    dst: &Arc<GrainBuf<U>>,
    dst_first: usize,
    count: usize,
    op: O,
    ts: Timestamp,
)
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    O: Fn(&T) -> U + Send + Sync + 'static,
{
    assert!(src_first + count <= src.len(), "source range out of bounds");
    assert!(
        dst_first + count <= dst.len(),
        "destination range out of bounds"
    );

    let src = Arc::clone(src);
    let dst = Arc::clone(dst);
    continuation(ts, EnqFlags::NOHINT, move |ts| {
        if count == 0 {
            return;
        }
        let epl = dst.elems_per_line();
        let blocks = (1 + (count - 1) / epl) as u64;
        if domains_supported() {
            deepen(NO_TIMESTAMP);
        }

        let hl = {
            let line0 = (dst_first / epl) as u64;
            move |b: u64| Hint::new(line0 + b, EnqFlags::NOFLAGS)
        };
        let body = move |_ts: Timestamp, b: u64| {
            let lo = b as usize * epl;
            let hi = count.min(lo + epl);
            let values: Vec<U> = src
                .read_block(src_first + lo, src_first + hi)
                .iter()
                .map(|v| op(v))
                .collect();
            dst.write_block(dst_first + lo, &values);
        };
        forall_ts(
            ts,
            0u64,
            blocks,
            hl,
            body,
            || Hint::new(0, EnqFlags::NOHINT | EnqFlags::MAYSPEC),
            |_| {},
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::sched::oracle::OracleRuntime;
    use crate::sched::seq::SeqRuntime;
    use crate::sched::tls::TlsRuntime;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn applies_op_across_the_range() {
        init_test("applies_op_across_the_range");
        let rt = SeqRuntime::new();
        let src = Arc::new(GrainBuf::from_vec((0..300u64).collect()));
        let dst = Arc::new(GrainBuf::new(300, 0u64));
        {
            let _g = rt.enter();
            transform(&src, 0, &dst, 0, 300, |v| v * v, 0);
        }
        rt.run();
        assert_eq!(
            dst.snapshot(),
            (0..300u64).map(|v| v * v).collect::<Vec<_>>()
        );
        crate::test_complete!("applies_op_across_the_range");
    }

    #[test]
    fn type_changing_transform() {
        init_test("type_changing_transform");
        let rt = SeqRuntime::new();
        let src = Arc::new(GrainBuf::from_vec((0..100i64).collect()));
        let dst = Arc::new(GrainBuf::new(100, false));
        {
            let _g = rt.enter();
            transform(&src, 0, &dst, 0, 100, |v| v % 2 == 0, 0);
        }
        rt.run();
        for (i, v) in dst.snapshot().iter().enumerate() {
            assert_eq!(*v, i % 2 == 0);
        }
        crate::test_complete!("type_changing_transform");
    }

    #[test]
    fn offset_sub_ranges() {
        init_test("offset_sub_ranges");
        let rt = SeqRuntime::new();
        let src = Arc::new(GrainBuf::from_vec((0..100u64).collect()));
        let dst = Arc::new(GrainBuf::new(120, 0u64));
        {
            let _g = rt.enter();
            transform(&src, 10, &dst, 30, 50, |v| v + 1000, 0);
        }
        rt.run();
        let snap = dst.snapshot();
        for (i, &v) in snap.iter().enumerate() {
            let expect = if (30..80).contains(&i) {
                1000 + 10 + (i as u64 - 30)
            } else {
                0
            };
            assert_eq!(v, expect, "index {i}");
        }
        crate::test_complete!("offset_sub_ranges");
    }

    #[test]
    fn runs_inside_a_sub_domain_on_the_oracle() {
        init_test("runs_inside_a_sub_domain_on_the_oracle");
        let rt = OracleRuntime::new();
        let src = Arc::new(GrainBuf::from_vec((0..64u64).collect()));
        let dst = Arc::new(GrainBuf::new(64, 0u64));
        {
            let _g = rt.enter();
            transform(&src, 0, &dst, 0, 64, |v| v + 1, 5);
        }
        rt.run();
        assert_eq!(dst.snapshot(), (1..=64u64).collect::<Vec<_>>());
        crate::test_complete!("runs_inside_a_sub_domain_on_the_oracle");
    }

    #[test]
    fn parallel_transform_converges() {
        init_test("parallel_transform_converges");
        let rt = TlsRuntime::new(&RuntimeConfig::new().workers(4));
        let src = Arc::new(GrainBuf::from_vec((0..2048u64).collect()));
        let dst = Arc::new(GrainBuf::new(2048, 0u64));
        {
            let _g = rt.enter();
            transform(&src, 0, &dst, 0, 2048, |v| v ^ 0xFF, 0);
        }
        rt.run();
        assert_eq!(
            dst.snapshot(),
            (0..2048u64).map(|v| v ^ 0xFF).collect::<Vec<_>>()
        );
        crate::test_complete!("parallel_transform_converges");
    }
}
