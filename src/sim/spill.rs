//! Spill and requeue: software relief for over-full hardware queues.
//!
//! When a hardware task queue overflows, the machine model launches a
//! *spiller* task. The spiller bulk-extracts up to `n` of the oldest
//! untied entries into a heap-resident descriptor block and enqueues a
//! single *requeuer* in their place — coalescing many queue slots into
//! one. When the requeuer is scheduled it walks the block and reinstates
//! every descriptor, then frees the block. (Spillers were once called
//! coalescers, requeuers splitters.)
//!
//! Descriptor blocks are owned by a [`BlockArena`] and addressed by
//! opaque tokens; the token rides in the requeuer's first argument
//! register where the hardware ABI carries a raw block pointer.

use crate::error::{Error, ErrorKind, Result};
use crate::sim::{RawTask, SimBackend};
use crate::task::{EnqFlags, Timestamp, MAX_TASK_ARGS, NO_TIMESTAMP};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

/// One spilled task: the raw register image, preserved exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// Virtual time of the spilled task.
    pub ts: Timestamp,
    /// `[48 bits of task pointer | 16 bits of persistent flags]`.
    pub task_ptr_and_flags: u64,
    /// Spatial hint key.
    pub hint: u64,
    /// Argument registers.
    pub args: [u64; MAX_TASK_ARGS],
}

impl From<RawTask> for TaskDescriptor {
    fn from(t: RawTask) -> Self {
        Self {
            ts: t.ts,
            task_ptr_and_flags: t.task_ptr_and_flags,
            hint: t.hint,
            args: t.args,
        }
    }
}

impl TaskDescriptor {
    /// Rebuilds the raw entry this descriptor was captured from.
    #[must_use]
    pub const fn to_raw(&self) -> RawTask {
        RawTask {
            ts: self.ts,
            task_ptr_and_flags: self.task_ptr_and_flags,
            hint: self.hint,
            args: self.args,
        }
    }
}

/// A size-prefixed block of spilled descriptors.
///
/// `size` counts the descriptors not yet re-enqueued; the requeuer
/// decrements it as it drains, so a yielded requeuer resumes where it
/// stopped.
#[derive(Debug)]
pub struct TaskDescriptors {
    /// Live descriptor count.
    pub size: usize,
    /// Descriptor storage; `tds[..size]` are pending.
    pub tds: Vec<TaskDescriptor>,
}

/// Token-addressed owner of descriptor blocks.
///
/// The safe stand-in for zero-cycle heap blocks: a block is allocated
/// once, owned by exactly one requeuer, and freed exactly once.
#[derive(Debug, Default)]
pub struct BlockArena {
    blocks: Mutex<HashMap<u64, TaskDescriptors>>,
    next_token: Mutex<u64>,
}

impl BlockArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a block, returning its token.
    #[must_use]
    pub fn alloc(&self, block: TaskDescriptors) -> u64 {
        let mut next = self.next_token.lock();
        *next += 1;
        let token = *next;
        self.blocks.lock().insert(token, block);
        token
    }

    /// Frees a block.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::StaleBlock`] if the token is unknown.
    pub fn free(&self, token: u64) -> Result<()> {
        self.blocks
            .lock()
            .remove(&token)
            .map(|_| ())
            .ok_or_else(|| Error::new(ErrorKind::StaleBlock))
    }

    /// Runs `f` over the block behind `token`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::StaleBlock`] if the token is unknown.
    pub fn with_block<R>(&self, token: u64, f: impl FnOnce(&mut TaskDescriptors) -> R) -> Result<R> {
        let mut blocks = self.blocks.lock();
        let block = blocks
            .get_mut(&token)
            .ok_or_else(|| Error::new(ErrorKind::StaleBlock))?;
        Ok(f(block))
    }

    /// Number of live blocks.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.blocks.lock().len()
    }
}

/// Well-known handler token for the ordinary requeuer.
pub const REQUEUER_TASK_PTR: u64 = 0x5001;
/// Well-known handler token for the frame requeuer.
pub const FRAME_REQUEUER_TASK_PTR: u64 = 0x5002;
/// Well-known handler token for the ordinary spiller.
pub const SPILLER_TASK_PTR: u64 = 0x5003;
/// Well-known handler token for the frame spiller.
pub const FRAME_SPILLER_TASK_PTR: u64 = 0x5004;
/// Fixed timestamp frame requeuers are enqueued at.
pub const FRAME_REQUEUER_TS: Timestamp = 42;

/// Registers the spill handlers with the machine model.
pub fn setup_task_handlers(sim: &dyn SimBackend) {
    sim.register_task_handlers(SPILLER_TASK_PTR, REQUEUER_TASK_PTR, 0);
    sim.register_frame_handlers(FRAME_SPILLER_TASK_PTR, FRAME_REQUEUER_TASK_PTR);
}

/// What a requeuer invocation accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Every descriptor was reinstated and the block freed.
    Drained,
    /// The target queue filled; the requeuer re-enqueued itself with
    /// this many descriptors still pending.
    Yielded(usize),
}

fn spill_impl(sim: &dyn SimBackend, arena: &BlockArena, n: u32, is_frame: bool) {
    let mut tds = Vec::with_capacity(n as usize);
    let mut min_ts = NO_TIMESTAMP;
    // Tag the requeuer NOTIMESTAMP iff all spilled tasks are, and
    // CANTSPEC iff all are; the AND runs over the persistent bits. The
    // CANTSPEC part keeps a requeuer from dumping tasks that could not
    // run now anyway.
    let mut requeuer_flags = if is_frame {
        EnqFlags::NOFLAGS
    } else {
        EnqFlags::NOTIMESTAMP | EnqFlags::CANTSPEC
    };
    let mut non_timestamped = false;

    let remove = |bound: Timestamp| {
        if is_frame {
            sim.remove_out_of_frame(bound)
        } else {
            sim.remove_untied(bound)
        }
    };

    let mut extracted = 0u32;
    while extracted < n {
        let Some(raw) = remove(min_ts) else { break };
        requeuer_flags = requeuer_flags & raw.persistent_flags();
        non_timestamped = raw.persistent_flags().contains(EnqFlags::NOTIMESTAMP);
        assert!(
            !(is_frame && non_timestamped),
            "frame spillers only see tasks from non-root domains"
        );
        tds.push(TaskDescriptor::from(raw));
        extracted += 1;
        if non_timestamped {
            break;
        }
        // The removed timestamp precedes (or equals) the bound.
        min_ts = raw.ts;
    }

    if non_timestamped {
        // A non-timestamped task was extracted: bound the remaining
        // extractions at 0, so only non-timestamped or zero-timestamp
        // tasks may follow.
        while extracted < n {
            let Some(raw) = remove(0) else { break };
            requeuer_flags = requeuer_flags & raw.persistent_flags();
            if !raw.persistent_flags().contains(EnqFlags::NOTIMESTAMP) {
                min_ts = 0;
            }
            tds.push(TaskDescriptor::from(raw));
            extracted += 1;
        }
    }

    if tds.is_empty() {
        // The queue offered nothing; a requeuer here would just recurse.
        trace!(is_frame, "spiller extracted zero tasks");
        return;
    }

    let size = tds.len();
    let token = arena.alloc(TaskDescriptors { size, tds });

    let (handler, ts, flags) = if is_frame {
        (
            FRAME_REQUEUER_TASK_PTR,
            FRAME_REQUEUER_TS,
            EnqFlags::SAMEHINT
                | EnqFlags::NONSERIALHINT
                | EnqFlags::NOHASH
                | EnqFlags::PRODUCER
                | EnqFlags::REQUEUER
                | EnqFlags::CANTSPEC,
        )
    } else {
        (
            REQUEUER_TASK_PTR,
            min_ts,
            EnqFlags::SAMEHINT
                | EnqFlags::NONSERIALHINT
                | EnqFlags::NOHASH
                | EnqFlags::PRODUCER
                | EnqFlags::REQUEUER
                | requeuer_flags,
        )
    };
    trace!(size, token, ?flags, "spiller enqueues requeuer");
    let mut args = [0u64; MAX_TASK_ARGS];
    args[0] = token;
    sim.enqueue_raw(RawTask::new(ts, handler, flags, 0, args), flags)
        .expect("a requeuer slot is always reserved");
}

/// Evicts up to `n` of the oldest untied tasks into a descriptor block
/// and enqueues one requeuer in their place.
pub fn spiller(sim: &dyn SimBackend, arena: &BlockArena, n: u32) {
    spill_impl(sim, arena, n, false);
}

/// The frame variant: evicts out-of-frame tasks.
pub fn frame_spiller(sim: &dyn SimBackend, arena: &BlockArena, n: u32) {
    spill_impl(sim, arena, n, true);
}

fn requeue_impl(
    sim: &dyn SimBackend,
    arena: &BlockArena,
    token: u64,
    is_frame: bool,
) -> Result<RequeueOutcome> {
    // Walk high-index to low: last-spilled first, so re-inserted order
    // mirrors the documented descriptor tie-break.
    loop {
        let next = arena.with_block(token, |block| {
            if block.size == 0 {
                None
            } else {
                Some(block.tds[block.size - 1])
            }
        })?;
        let Some(desc) = next else { break };

        let mut flags = EnqFlags::YIELDIFFULL | desc.to_raw().persistent_flags();
        if is_frame {
            flags = flags | EnqFlags::PARENTDOMAIN;
        }
        match sim.enqueue_raw(desc.to_raw(), flags) {
            Ok(()) => {
                arena.with_block(token, |block| block.size -= 1)?;
            }
            Err(_) => {
                // Target queue is full: yield, leaving the block as is,
                // and reinstate ourselves so progress resumes later.
                let remaining = arena.with_block(token, |block| block.size)?;
                let handler = if is_frame {
                    FRAME_REQUEUER_TASK_PTR
                } else {
                    REQUEUER_TASK_PTR
                };
                let reflags = EnqFlags::SAMEHINT
                    | EnqFlags::NOHASH
                    | EnqFlags::PRODUCER
                    | EnqFlags::REQUEUER
                    | EnqFlags::CANTSPEC;
                let mut args = [0u64; MAX_TASK_ARGS];
                args[0] = token;
                sim.enqueue_raw(RawTask::new(desc.ts, handler, reflags, 0, args), reflags)
                    .expect("a requeuer slot is always reserved");
                trace!(remaining, token, "requeuer yielded on a full queue");
                return Ok(RequeueOutcome::Yielded(remaining));
            }
        }
    }
    arena.free(token)?;
    Ok(RequeueOutcome::Drained)
}

/// Reinstates every descriptor in the block behind `token`, freeing the
/// block afterwards.
///
/// # Errors
///
/// Fails with [`ErrorKind::StaleBlock`] if the token does not resolve.
pub fn requeuer(sim: &dyn SimBackend, arena: &BlockArena, token: u64) -> Result<RequeueOutcome> {
    requeue_impl(sim, arena, token, false)
}

/// The frame variant: re-enqueues into the parent domain.
///
/// # Errors
///
/// Fails with [`ErrorKind::StaleBlock`] if the token does not resolve.
pub fn frame_requeuer(
    sim: &dyn SimBackend,
    arena: &BlockArena,
    token: u64,
) -> Result<RequeueOutcome> {
    requeue_impl(sim, arena, token, true)
}
