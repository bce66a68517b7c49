//! The simulator seam.
//!
//! The hardware-accelerated runtime talks to the machine model through a
//! numbered magic-op channel; everything above that channel (the spill
//! protocol, the speculation-layer controls) is runtime code. This
//! module abstracts the channel as the [`SimBackend`] trait so the rest
//! of the crate never hard-codes the transport:
//!
//! - [`magic`] pins the opcode numbers. They are the ABI between the
//!   runtime and the simulator and must not change between versions of
//!   the two components.
//! - [`RawTask`] is the register image of one hardware task-queue entry:
//!   the shape tasks have on the wire and in spill descriptors.
//! - [`LoopbackSim`] is an in-process reference backend with a bounded
//!   task queue, used by the spill tests and any host without real
//!   hardware beneath it.
//!
//! See [`spill`] for the overflow protocol built on this seam.

pub mod spill;

use crate::task::{EnqFlags, Timestamp, MAX_TASK_ARGS};
use crate::util::DetRng;
use parking_lot::Mutex;

/// Magic-op opcode numbers.
///
/// Stable ABI; keep in sync with the machine model.
pub mod magic {
    /// Start of the region of interest.
    pub const ROI_BEGIN: u64 = 1025;
    /// End of the region of interest.
    pub const ROI_END: u64 = 1026;
    /// Periodic liveness beat.
    pub const HEARTBEAT: u64 = 1028;
    /// Write a NUL-terminated string to the host stdout.
    pub const WRITE_STD_OUT: u64 = 1029;
    /// Report a worker stack base and size.
    pub const UPDATE_STACK: u64 = 1030;
    /// Query thread count and stack placement.
    pub const THREADS_AND_STACKS: u64 = 1031;
    /// Yield the core.
    pub const YIELD: u64 = 1032;
    /// Full barrier across workers.
    pub const BARRIER: u64 = 1033;
    /// Wait until the current task is the GVT task.
    pub const SERIALIZE: u64 = 1034;
    /// Hardware random number.
    pub const RDRAND: u64 = 1035;
    /// Lower the GVT task's timestamp.
    pub const SET_GVT: u64 = 1036;
    /// Enter a new virtual-time subdomain.
    pub const DEEPEN: u64 = 1037;
    /// Clear the current task's read set.
    pub const CLEAR_READ_SET: u64 = 1038;
    /// Record the current task as aborted.
    pub const RECORD_AS_ABORTED: u64 = 1039;
    /// Read the current task's timestamp.
    pub const GET_TIMESTAMP: u64 = 1041;
    /// Read the current domain's super-timestamp.
    pub const GET_TIMESTAMP_SUPER: u64 = 1042;
    /// Enter privileged mode.
    pub const PRIV_CALL: u64 = 1043;
    /// Leave privileged mode.
    pub const PRIV_RET: u64 = 1044;
    /// Query whether the privileged task is doomed.
    pub const PRIV_ISDOOMED: u64 = 1045;
    /// Query irrevocability of the current task.
    pub const ISIRREVOCABLE: u64 = 1047;
    /// Account a read pseudo-syscall.
    pub const READ_PSEUDOSYSCALL: u64 = 1048;
    /// Account a write pseudo-syscall.
    pub const WRITE_PSEUDOSYSCALL: u64 = 1049;
    /// Declare a malloc partition.
    pub const MALLOC_PARTITION: u64 = 1050;
    /// Return to the enclosing virtual-time domain.
    pub const UNDEEPEN: u64 = 1051;
    /// Query fast-forward state.
    pub const IN_FF: u64 = 1053;
    /// Register the end-of-program handler.
    pub const REGISTER_END_HANDLER: u64 = 1054;
    /// Read the hardware thread id.
    pub const GET_THREAD_ID: u64 = 1055;

    /// Install the dequeue loop entry points.
    pub const TASK_DEQUEUE_SETUP: u64 = 2048;
    /// Extract one untied task for spilling.
    pub const TASK_REMOVE_UNTIED: u64 = 2049;
    /// Extract one out-of-frame task for spilling.
    pub const TASK_REMOVE_OUT_OF_FRAME: u64 = 2050;
    /// Register spiller/requeuer/exception handler addresses.
    pub const TASK_HANDLER_ADDRS: u64 = 2051;
    /// Register frame spiller/requeuer handler addresses.
    pub const TASK_FRAMEHANDLER_ADDRS: u64 = 2052;

    /// Base of the allocator opcode range.
    pub const ALLOC_BASE: u64 = 8192;
    /// Zero-cycle allocation.
    pub const ZERO_CYCLE_ALLOC: u64 = ALLOC_BASE + 16;
    /// Zero-cycle free.
    pub const ZERO_CYCLE_FREE: u64 = ALLOC_BASE + 17;

    /// First enqueue opcode; the argument count rides in the low bits
    /// and the enqueue flags are OR'd on top.
    pub const TASK_ENQUEUE_BEGIN: u64 = 1 << 30;
    /// One past the last enqueue opcode.
    pub const TASK_ENQUEUE_END: u64 = TASK_ENQUEUE_BEGIN << 1;
}

/// Encodes an enqueue magic op: argument count in the low bits, flags
/// OR'd in. Flag bits 0..=3 stay clear for exactly this reason.
#[must_use]
pub fn enqueue_magic_op(nargs: usize, flags: EnqFlags) -> u64 {
    debug_assert!(nargs <= MAX_TASK_ARGS);
    (magic::TASK_ENQUEUE_BEGIN + nargs as u64) | u64::from(flags.bits())
}

/// The register image of one hardware task-queue entry.
///
/// `task_ptr_and_flags` packs a 48-bit task pointer (here: an opaque
/// handler token) above the 16 persistent flag bits, the layout spill
/// descriptors preserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTask {
    /// Virtual time of the entry.
    pub ts: Timestamp,
    /// `[48 bits of task pointer | 16 bits of persistent flags]`.
    pub task_ptr_and_flags: u64,
    /// Spatial hint key.
    pub hint: u64,
    /// Argument registers.
    pub args: [u64; MAX_TASK_ARGS],
}

impl RawTask {
    /// Packs a raw entry from its parts. Only the persistent bits of
    /// `flags` survive the packing.
    #[must_use]
    pub fn new(
        ts: Timestamp,
        task_ptr: u64,
        flags: EnqFlags,
        hint: u64,
        args: [u64; MAX_TASK_ARGS],
    ) -> Self {
        Self {
            ts,
            task_ptr_and_flags: (task_ptr << 16) | u64::from(flags.persistent().bits()),
            hint,
            args,
        }
    }

    /// The task pointer (opaque handler token).
    #[must_use]
    pub const fn task_ptr(&self) -> u64 {
        self.task_ptr_and_flags >> 16
    }

    /// The persistent flags carried in the low 16 bits.
    #[must_use]
    pub const fn persistent_flags(&self) -> EnqFlags {
        EnqFlags::from_bits((self.task_ptr_and_flags & 0xFFFF) as u32)
    }
}

/// Error returned when a hardware task queue has no free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("hardware task queue is full")]
pub struct QueueFull;

/// The host side of the magic-op channel.
///
/// Speculation-layer notifications default to no-ops so software-only
/// back-ends can run without a machine model underneath.
pub trait SimBackend: Send + Sync {
    /// Region-of-interest begin.
    fn roi_begin(&self) {}
    /// Region-of-interest end.
    fn roi_end(&self) {}
    /// `SET_GVT`.
    fn set_gvt(&self, _ts: Timestamp) {}
    /// `SERIALIZE`.
    fn serialize(&self) {}
    /// `CLEAR_READ_SET`.
    fn clear_read_set(&self) {}
    /// `RECORD_AS_ABORTED`.
    fn record_as_aborted(&self) {}
    /// A drained domain was popped (`UNDEEPEN`).
    fn undeepen_notify(&self) {}
    /// A task record was created (oracle feed).
    fn task_created(&self, _parent_uid: u64, _uid: u64, _ts: Timestamp) {}
    /// A task began running (oracle feed).
    fn task_begin(&self, _uid: u64) {}
    /// A task finished running (oracle feed).
    fn task_end(&self, _uid: u64) {}
    /// Registers the spiller/requeuer/exception handler tokens.
    fn register_task_handlers(&self, _spiller: u64, _requeuer: u64, _exception: u64) {}
    /// Registers the frame spiller/requeuer handler tokens.
    fn register_frame_handlers(&self, _spiller: u64, _requeuer: u64) {}

    /// Places a raw entry into the hardware queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] when no slot is free and the entry is not a
    /// requeuer (requeuers always have a reserved slot, or spilling
    /// could never make progress).
    fn enqueue_raw(&self, task: RawTask, flags: EnqFlags) -> Result<(), QueueFull>;

    /// Extracts the oldest untied task with timestamp at most `bound`
    /// (non-timestamped entries always qualify). `None` ends a bulk
    /// extraction.
    fn remove_untied(&self, bound: Timestamp) -> Option<RawTask>;

    /// Extracts the oldest out-of-frame task with timestamp at most
    /// `bound`.
    fn remove_out_of_frame(&self, bound: Timestamp) -> Option<RawTask>;
}

/// A backend for software-only runs: every notification is a no-op and
/// the hardware queue does not exist.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSim;

impl SimBackend for NullSim {
    fn enqueue_raw(&self, _task: RawTask, _flags: EnqFlags) -> Result<(), QueueFull> {
        Ok(())
    }

    fn remove_untied(&self, _bound: Timestamp) -> Option<RawTask> {
        None
    }

    fn remove_out_of_frame(&self, _bound: Timestamp) -> Option<RawTask> {
        None
    }
}

#[derive(Debug)]
struct LoopbackState {
    queue: Vec<(u64, RawTask)>,
    next_seq: u64,
    rng: DetRng,
    ops: Vec<u64>,
    undeepens: u64,
}

/// In-process reference backend with a bounded task queue.
///
/// Capacity counts ordinary entries; a requeuer always finds a slot.
/// `NOHINT` entries receive a uniform pseudo-random hint, which is what
/// lets a later `SAMEHINT` requeue land back on the same queue.
#[derive(Debug)]
pub struct LoopbackSim {
    capacity: usize,
    state: Mutex<LoopbackState>,
}

impl LoopbackSim {
    /// Creates a loopback backend with the given queue capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_seed(capacity, 0xF1AC)
    }

    /// Creates a loopback backend with a specific hint-assignment seed.
    #[must_use]
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self {
            capacity,
            state: Mutex::new(LoopbackState {
                queue: Vec::new(),
                next_seq: 0,
                rng: DetRng::new(seed),
                ops: Vec::new(),
                undeepens: 0,
            }),
        }
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns true if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Pops the earliest entry for dispatch; test-harness surface.
    #[must_use]
    pub fn pop_for_dispatch(&self) -> Option<RawTask> {
        let mut state = self.state.lock();
        let best = state
            .queue
            .iter()
            .enumerate()
            .min_by_key(|(_, (seq, t))| (t.ts, *seq))
            .map(|(idx, _)| idx)?;
        Some(state.queue.remove(best).1)
    }

    /// The opcode stream observed so far.
    #[must_use]
    pub fn ops(&self) -> Vec<u64> {
        self.state.lock().ops.clone()
    }

    /// Number of domain pops notified.
    #[must_use]
    pub fn undeepens(&self) -> u64 {
        self.state.lock().undeepens
    }

    /// Extraction order mirrors the hardware's: spilling evicts the work
    /// farthest in the future first (which is what makes the spiller's
    /// shrinking bound monotone), and entries without a timestamp are
    /// unordered, so they spill before anything timestamped.
    fn take_youngest(
        queue: &mut Vec<(u64, RawTask)>,
        bound: Timestamp,
        extra: impl Fn(&RawTask) -> bool,
    ) -> Option<RawTask> {
        let sort_ts = |t: &RawTask| {
            if t.persistent_flags().contains(EnqFlags::NOTIMESTAMP) {
                Timestamp::MAX
            } else {
                t.ts
            }
        };
        let best = queue
            .iter()
            .enumerate()
            .filter(|(_, (_, t))| {
                (t.persistent_flags().contains(EnqFlags::NOTIMESTAMP) || t.ts <= bound) && extra(t)
            })
            .max_by_key(|(_, (seq, t))| (sort_ts(t), std::cmp::Reverse(*seq)))
            .map(|(idx, _)| idx)?;
        Some(queue.remove(best).1)
    }
}

impl SimBackend for LoopbackSim {
    fn undeepen_notify(&self) {
        let mut state = self.state.lock();
        state.ops.push(magic::UNDEEPEN);
        state.undeepens += 1;
    }

    fn set_gvt(&self, _ts: Timestamp) {
        self.state.lock().ops.push(magic::SET_GVT);
    }

    fn serialize(&self) {
        self.state.lock().ops.push(magic::SERIALIZE);
    }

    fn clear_read_set(&self) {
        self.state.lock().ops.push(magic::CLEAR_READ_SET);
    }

    fn record_as_aborted(&self) {
        self.state.lock().ops.push(magic::RECORD_AS_ABORTED);
    }

    fn register_task_handlers(&self, _spiller: u64, _requeuer: u64, _exception: u64) {
        self.state.lock().ops.push(magic::TASK_HANDLER_ADDRS);
    }

    fn register_frame_handlers(&self, _spiller: u64, _requeuer: u64) {
        self.state.lock().ops.push(magic::TASK_FRAMEHANDLER_ADDRS);
    }

    fn enqueue_raw(&self, mut task: RawTask, flags: EnqFlags) -> Result<(), QueueFull> {
        let mut state = self.state.lock();
        let op = enqueue_magic_op(MAX_TASK_ARGS, flags);
        state.ops.push(op);
        if !flags.contains(EnqFlags::REQUEUER) && state.queue.len() >= self.capacity {
            return Err(QueueFull);
        }
        if flags.contains(EnqFlags::NOHINT) {
            task.hint = state.rng.next_u64();
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push((seq, task));
        Ok(())
    }

    fn remove_untied(&self, bound: Timestamp) -> Option<RawTask> {
        let mut state = self.state.lock();
        state.ops.push(magic::TASK_REMOVE_UNTIED);
        Self::take_youngest(&mut state.queue, bound, |_| true)
    }

    fn remove_out_of_frame(&self, bound: Timestamp) -> Option<RawTask> {
        let mut state = self.state.lock();
        state.ops.push(magic::TASK_REMOVE_OUT_OF_FRAME);
        Self::take_youngest(&mut state.queue, bound, |t| {
            !t.persistent_flags().contains(EnqFlags::NOTIMESTAMP)
        })
    }
}
