//! End-to-end scenarios for the algorithm layer.

use fractime::algo::{
    copy, enqueue_all, enqueue_all_progressive, enqueue_all_strands, fill, reduce, transform,
    GrainBuf,
};
use fractime::test_utils::init_test_logging;
use fractime::{enqueue_lambda, EnqFlags, Hint, RuntimeConfig, SeqRuntime, TlsRuntime};
use parking_lot::Mutex;
use std::sync::Arc;

fn init_test(name: &str) {
    init_test_logging();
    fractime::test_phase!(name);
}

#[test]
fn thousand_wrapped_enqueues_all_at_one_timestamp() {
    init_test("thousand_wrapped_enqueues_all_at_one_timestamp");
    let rt = SeqRuntime::new();
    let bodies = Arc::new(Mutex::new(Vec::new()));
    {
        let _g = rt.enter();
        let bodies2 = Arc::clone(&bodies);
        enqueue_all(
            0u64,
            1000,
            move |i| {
                let bodies3 = Arc::clone(&bodies2);
                enqueue_lambda(
                    move |ts| bodies3.lock().push((ts, i)),
                    5,
                    EnqFlags::NOHINT,
                );
            },
            5,
            EnqFlags::NOHINT,
        );
    }
    rt.run();
    let bodies = bodies.lock();
    assert_eq!(bodies.len(), 1000, "exactly 1000 body invocations");
    assert!(bodies.iter().all(|&(ts, _)| ts == 5));
    let mut idx: Vec<u64> = bodies.iter().map(|&(_, i)| i).collect();
    idx.sort_unstable();
    assert_eq!(idx, (0..1000).collect::<Vec<_>>());
    fractime::test_complete!("thousand_wrapped_enqueues_all_at_one_timestamp");
}

#[test]
fn reduce_callback_receives_sum_at_its_timestamp() {
    init_test("reduce_callback_receives_sum_at_its_timestamp");
    let rt = SeqRuntime::new();
    let buf = Arc::new(GrainBuf::from_vec(vec![1u64, 2, 3, 4, 5]));
    let out = Arc::new(Mutex::new(None));
    {
        let _g = rt.enter();
        let out2 = Arc::clone(&out);
        reduce(&buf, 0, 5, 0, |a, b| a + b, 10, move |ts, r| {
            *out2.lock() = Some((ts, r));
        });
    }
    rt.run();
    assert_eq!(*out.lock(), Some((10, 15)));
    fractime::test_complete!("reduce_callback_receives_sum_at_its_timestamp");
}

#[test]
fn fill_postcondition_holds_for_later_readers() {
    init_test("fill_postcondition_holds_for_later_readers");
    let rt = SeqRuntime::new();
    let buf = Arc::new(GrainBuf::new(777, 0u32));
    let seen = Arc::new(Mutex::new(false));
    {
        let _g = rt.enter();
        fill(&buf, 0, 777, 3, 4, EnqFlags::NOHINT);
        // A reader far past the fill's completion observes the value
        // everywhere.
        let buf2 = Arc::clone(&buf);
        let seen2 = Arc::clone(&seen);
        enqueue_lambda(
            move |_| {
                assert!(buf2.snapshot().iter().all(|&v| v == 3));
                *seen2.lock() = true;
            },
            1000,
            EnqFlags::NOHINT,
        );
    }
    rt.run();
    assert!(*seen.lock());
    fractime::test_complete!("fill_postcondition_holds_for_later_readers");
}

#[test]
fn copy_then_transform_pipeline() {
    init_test("copy_then_transform_pipeline");
    let rt = SeqRuntime::new();
    let a = Arc::new(GrainBuf::from_vec((0..256u64).collect()));
    let b = Arc::new(GrainBuf::new(256, 0u64));
    let c = Arc::new(GrainBuf::new(256, 0u64));
    {
        let _g = rt.enter();
        copy(&a, 0, &b, 0, 256, 0, EnqFlags::NOHINT);
        transform(&b, 0, &c, 0, 256, |v| v * 3, 10);
    }
    rt.run();
    assert_eq!(
        c.snapshot(),
        (0..256u64).map(|v| v * 3).collect::<Vec<_>>()
    );
    fractime::test_complete!("copy_then_transform_pipeline");
}

#[test]
fn strand_and_progressive_engines_on_a_parallel_runtime() {
    init_test("strand_and_progressive_engines_on_a_parallel_runtime");
    let cfg = RuntimeConfig::new().workers(4);
    let rt = TlsRuntime::new(&cfg);
    let strand_hits = Arc::new(Mutex::new(vec![0u32; 2000]));
    let prog_hits = Arc::new(Mutex::new(vec![0u32; 2000]));
    {
        let _g = rt.enter();
        let sh = Arc::clone(&strand_hits);
        enqueue_all_strands(
            0u64,
            2000,
            move |_, i| sh.lock()[i as usize] += 1,
            |_| 1,
            |_| Hint::new(0, EnqFlags::NOHINT),
            &cfg,
        );
        let ph = Arc::clone(&prog_hits);
        enqueue_all_progressive(
            0u64,
            2000,
            move |_, i| ph.lock()[i as usize] += 1,
            |_| 2,
            |_| Hint::new(0, EnqFlags::NOHINT),
            &cfg,
        );
    }
    rt.run();
    assert!(strand_hits.lock().iter().all(|&h| h == 1));
    assert!(prog_hits.lock().iter().all(|&h| h == 1));
    fractime::test_complete!("strand_and_progressive_engines_on_a_parallel_runtime");
}

#[test]
fn reduce_of_product_is_schedule_independent() {
    init_test("reduce_of_product_is_schedule_independent");
    let rt = TlsRuntime::new(&RuntimeConfig::new().workers(3));
    // Product over a field where order cannot matter.
    let buf = Arc::new(GrainBuf::from_vec(vec![3u64; 64]));
    let out = Arc::new(Mutex::new(0u64));
    {
        let _g = rt.enter();
        let out2 = Arc::clone(&out);
        reduce(
            &buf,
            0,
            64,
            1,
            |a, b| a.wrapping_mul(b),
            0,
            move |_, r| *out2.lock() = r,
        );
    }
    rt.run();
    let expect = (0..64).fold(1u64, |a, _| a.wrapping_mul(3));
    assert_eq!(*out.lock(), expect);
    fractime::test_complete!("reduce_of_product_is_schedule_independent");
}
