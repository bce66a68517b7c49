//! Task representation: timestamps, flags, hints, marshalling, records.
//!
//! - [`flags`]: enqueue flag bit-set with persistent/transient classes
//! - [`hint`]: spatial hint plus flags
//! - [`frame`]: the register-tile marshalling pipeline
//! - [`record`]: the bound-call task record

pub mod flags;
pub mod frame;
pub mod hint;
pub mod record;

pub use flags::EnqFlags;
pub use frame::{CallFrame, RegisterArgs, TaskFn, Word, MAX_ENQUEUE_REGS, MAX_TASK_ARGS};
pub use hint::Hint;
pub use record::Task;

/// Virtual time. Smaller is earlier; totally ordered.
pub type Timestamp = u64;

/// Sentinel for "no timestamp" / "not inside a task".
pub const NO_TIMESTAMP: Timestamp = u64::MAX;
