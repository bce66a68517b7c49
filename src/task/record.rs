//! The task record: a bound call waiting for its turn.
//!
//! A [`Task`] is an immutable record of one future invocation: timestamp,
//! spatial hint, flags, and the bound call itself. The call takes one of
//! two shapes:
//!
//! - a *frame* body — the packed register tile from the scalar
//!   marshalling path, plus a monomorphised trampoline that unmarshals
//!   the words and forwards to the user function;
//! - a *closure* body — a boxed `FnOnce` owning its captures, produced
//!   by the heap marshalling path and by `enqueue_lambda`.
//!
//! Either way the record is consumed exactly once by [`Task::invoke`].

use crate::task::flags::EnqFlags;
use crate::task::frame::{CallFrame, RegisterArgs, TaskFn};
use crate::task::hint::Hint;
use crate::task::Timestamp;
use std::any::Any;

type Trampoline = fn(&(dyn Any + Send + Sync), Timestamp, &CallFrame);

fn trampoline<F, A>(func: &(dyn Any + Send + Sync), ts: Timestamp, frame: &CallFrame)
where
    F: TaskFn<A> + 'static,
    A: RegisterArgs,
{
    let f = func
        .downcast_ref::<F>()
        .expect("task frame carries a foreign function type");
    f.call(ts, A::unpack(frame));
}

enum TaskBody {
    /// Register-tile image plus the runner that unpacks it.
    Frame {
        func: Box<dyn Any + Send + Sync>,
        run: Trampoline,
        frame: CallFrame,
    },
    /// Boxed closure owning its captures.
    Closure(Box<dyn FnOnce(Timestamp) + Send>),
}

/// One enqueued unit of work.
pub struct Task {
    ts: Timestamp,
    uid: u64,
    hint: u64,
    flags: EnqFlags,
    body: TaskBody,
}

impl Task {
    /// Builds a task through the scalar marshalling path.
    #[must_use]
    pub fn from_frame<F, A>(f: F, ts: Timestamp, hint: Hint, args: A) -> Self
    where
        F: TaskFn<A> + 'static,
        A: RegisterArgs,
    {
        Self {
            ts,
            uid: 0,
            hint: hint.hint,
            flags: hint.flags,
            body: TaskBody::Frame {
                func: Box::new(f),
                run: trampoline::<F, A>,
                frame: args.pack(),
            },
        }
    }

    /// Builds a task through the heap marshalling path: the argument
    /// tuple moves into a closure.
    #[must_use]
    pub fn from_heap<F, A>(f: F, ts: Timestamp, hint: Hint, args: A) -> Self
    where
        F: TaskFn<A> + 'static,
        A: Send + 'static,
    {
        Self::from_closure(move |ts| f.call(ts, args), ts, hint)
    }

    /// Builds a task from a closure.
    #[must_use]
    pub fn from_closure<L>(l: L, ts: Timestamp, hint: Hint) -> Self
    where
        L: FnOnce(Timestamp) + Send + 'static,
    {
        Self {
            ts,
            uid: 0,
            hint: hint.hint,
            flags: hint.flags,
            body: TaskBody::Closure(Box::new(l)),
        }
    }

    /// The timestamp the scheduler sorts on.
    #[must_use]
    pub const fn ts(&self) -> Timestamp {
        self.ts
    }

    /// Rewrites the timestamp. Used when `SAMETIME` resolves against the
    /// running task and by the oracle's domain transfer.
    pub(crate) fn set_ts(&mut self, ts: Timestamp) {
        self.ts = ts;
    }

    /// The per-enqueue UID, if the back-end assigns them.
    #[must_use]
    pub const fn uid(&self) -> u64 {
        self.uid
    }

    pub(crate) fn set_uid(&mut self, uid: u64) {
        self.uid = uid;
    }

    /// The spatial hint key.
    #[must_use]
    pub const fn hint(&self) -> u64 {
        self.hint
    }

    pub(crate) fn set_hint(&mut self, hint: u64) {
        self.hint = hint;
    }

    /// The enqueue flags recorded at creation.
    #[must_use]
    pub const fn flags(&self) -> EnqFlags {
        self.flags
    }

    /// Runs the bound call, consuming the record.
    pub fn invoke(self) {
        let ts = self.ts;
        match self.body {
            TaskBody::Frame { func, run, frame } => run(&*func, ts, &frame),
            TaskBody::Closure(l) => l(ts),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.body {
            TaskBody::Frame { frame, .. } => format!("frame[{}]", frame.len()),
            TaskBody::Closure(_) => "closure".to_string(),
        };
        f.debug_struct("Task")
            .field("ts", &self.ts)
            .field("uid", &self.uid)
            .field("hint", &self.hint)
            .field("flags", &self.flags)
            .field("body", &kind)
            .finish()
    }
}
