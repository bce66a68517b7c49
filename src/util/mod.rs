//! Internal utilities for the fractime runtime.
//!
//! These utilities are intentionally minimal and dependency-free so the
//! scheduler hot paths stay predictable.

pub mod cache;
pub mod det_rng;

pub use cache::{CachePadded, CACHE_LINE_SIZE};
pub use det_rng::DetRng;
