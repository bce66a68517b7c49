//! Fractime: a timestamp-ordered speculative task runtime.
//!
//! # Overview
//!
//! Applications express computation as a soup of small tasks, each
//! carrying a 64-bit virtual timestamp and an optional spatial hint. A
//! scheduler executes tasks in (apparent) timestamp order; the machine
//! model beneath — reached through a fixed magic-op seam — provides
//! speculation and conflict detection. The runtime itself never detects
//! conflicts or aborts tasks; it orders, marshals, spills and refills.
//!
//! # Back-ends
//!
//! - **Sequential** ([`SeqRuntime`]): one worker, one priority queue.
//! - **Oracle** ([`OracleRuntime`]): domain-aware single worker
//!   modelling ideal speculation over fractal virtual time.
//! - **Parallel / TLS** ([`TlsRuntime`]): N workers over a shared
//!   priority queue with per-worker progress bounds.
//!
//! All three sit behind one enqueue API: install a runtime with
//! `enter()`, then use the free functions ([`enqueue`],
//! [`enqueue_lambda`], [`timestamp`], [`deepen`], …) from driver code
//! and from inside tasks alike.
//!
//! # Module Structure
//!
//! - [`task`]: timestamps, flags, hints, marshalling, task records
//! - [`sched`]: the priority queue, domain stack, and the back-ends
//! - [`sim`]: the magic-op ABI, raw task images, spill/requeue protocol
//! - [`algo`]: parallel building blocks (`enqueue_all`, `fill`, `copy`,
//!   `transform`, `reduce`) over grain-structured shared buffers
//! - [`cps`]: continuation-passing loop primitives (`forall` and kin)
//! - [`config`]: runtime configuration
//! - [`error`]: error types
//! - [`util`]: cache padding, deterministic RNG
//!
//! # Example
//!
//! ```
//! use fractime::{enqueue_lambda, EnqFlags, SeqRuntime};
//! use std::sync::{Arc, Mutex};
//!
//! let rt = SeqRuntime::new();
//! let log = Arc::new(Mutex::new(Vec::new()));
//! {
//!     let _guard = rt.enter();
//!     for ts in [3u64, 1, 2, 0] {
//!         let log = Arc::clone(&log);
//!         enqueue_lambda(move |ts| log.lock().unwrap().push(ts), ts, EnqFlags::NOHINT);
//!     }
//! }
//! rt.run();
//! assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod algo;
pub mod config;
pub mod cps;
pub mod error;
pub mod sched;
pub mod sim;
pub mod task;
pub mod test_utils;
pub mod util;

pub use config::{ConfigError, RuntimeConfig};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use sched::oracle::{OracleRuntime, ORACLE_VIRTUAL_THREADS};
pub use sched::seq::SeqRuntime;
pub use sched::tls::TlsRuntime;
pub use sched::{
    clear_read_set, deepen, enqueue, enqueue_heap, enqueue_lambda, num_threads, record_as_aborted,
    serialize, set_gvt, super_timestamp, tid, timestamp, undeepen, RuntimeGuard,
};
pub use task::{
    EnqFlags, Hint, Task, Timestamp, Word, MAX_ENQUEUE_REGS, MAX_TASK_ARGS, NO_TIMESTAMP,
};
