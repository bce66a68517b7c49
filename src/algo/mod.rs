//! Parallel building blocks over the task scheduler.
//!
//! - [`enqueue_all`]: bulk enqueue engines (tree, strands, progressive)
//! - [`block`]: grain arithmetic and the lock-per-grain shared buffer
//! - [`fill`], [`copy`], [`transform`], [`reduce`]: data-parallel
//!   primitives decomposed along cache-line boundaries

pub mod block;
pub mod copy;
pub mod enqueue_all;
pub mod fill;
pub mod reduce;
pub mod transform;

pub use block::GrainBuf;
pub use copy::copy;
pub use enqueue_all::{
    enqueue_all, enqueue_all_progressive, enqueue_all_strands, enqueue_all_with, SplitIndex,
    MAX_CHILDREN,
};
pub use fill::fill;
pub use reduce::reduce;
pub use transform::transform;
