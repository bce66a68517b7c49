//! Nested virtual-time domains.
//!
//! Fractal time nests timestamp intervals: `deepen` opens a child domain
//! whose tasks all order within the creating task's instant, `undeepen`
//! returns to the parent. The [`DomainStack`] models this as a LIFO of
//! priority queues, each remembering the *super-timestamp* — the
//! timestamp of the task that opened it.

use crate::error::{Error, ErrorKind, Result};
use crate::sched::queue::TimestampHeap;
use crate::task::{Timestamp, NO_TIMESTAMP};

#[derive(Debug)]
struct Domain {
    queue: TimestampHeap,
    super_ts: Timestamp,
}

/// A stack of priority queues, one per live virtual-time domain.
#[derive(Debug)]
pub struct DomainStack {
    domains: Vec<Domain>,
}

impl DomainStack {
    /// Creates a stack holding the root domain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            domains: vec![Domain {
                queue: TimestampHeap::new(),
                super_ts: NO_TIMESTAMP,
            }],
        }
    }

    /// Number of live domains.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.domains.len()
    }

    /// Returns true when every domain's queue is empty.
    #[must_use]
    pub fn all_empty(&self) -> bool {
        self.domains.iter().all(|d| d.queue.is_empty())
    }

    /// Returns true when no domains remain at all.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.domains.is_empty()
    }

    /// The current (innermost) domain's queue.
    ///
    /// # Panics
    ///
    /// Panics if the stack is exhausted; callers drive the stack only
    /// while a domain is live.
    pub fn top(&mut self) -> &mut TimestampHeap {
        &mut self
            .domains
            .last_mut()
            .expect("domain stack exhausted")
            .queue
    }

    /// The super-timestamp of the current domain; `NO_TIMESTAMP` at root.
    #[must_use]
    pub fn super_timestamp(&self) -> Timestamp {
        self.domains.last().map_or(NO_TIMESTAMP, |d| d.super_ts)
    }

    /// Opens a child domain whose super-timestamp is `super_ts`.
    pub fn push_domain(&mut self, super_ts: Timestamp) {
        self.domains.push(Domain {
            queue: TimestampHeap::new(),
            super_ts,
        });
    }

    /// Closes the current domain.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::DomainNotDrained`] if the domain still
    /// holds tasks; a domain only closes once it has run dry.
    pub fn pop_domain(&mut self) -> Result<()> {
        let top = self
            .domains
            .last()
            .ok_or_else(|| Error::new(ErrorKind::DomainAtRoot))?;
        if !top.queue.is_empty() {
            return Err(Error::new(ErrorKind::DomainNotDrained)
                .with_context(format!("{} tasks pending", top.queue.len())));
        }
        self.domains.pop();
        Ok(())
    }

    /// The queue one level below the top, for `PARENTDOMAIN` enqueues.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::DomainAtRoot`] when called at the root.
    pub fn parent(&mut self) -> Result<&mut TimestampHeap> {
        let depth = self.domains.len();
        if depth < 2 {
            return Err(Error::new(ErrorKind::DomainAtRoot)
                .with_context("PARENTDOMAIN enqueue from the root domain"));
        }
        Ok(&mut self.domains[depth - 2].queue)
    }
}

impl Default for DomainStack {
    fn default() -> Self {
        Self::new()
    }
}
