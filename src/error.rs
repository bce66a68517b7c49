//! Error types and error handling strategy for fractime.
//!
//! Error handling follows three rules:
//!
//! - Programmer contract violations (e.g. `undeepen` at the root domain)
//!   are fatal and abort with a diagnostic; they never surface as values.
//! - Recoverable conditions (full hardware queues, stale descriptor
//!   tokens, bad configuration) are explicit and typed.
//! - No panics cross a task boundary: a task either completes or the
//!   process aborts.

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Domains ===
    /// A domain operation was issued at the root of the domain stack.
    DomainAtRoot,
    /// A domain was closed while its queue still held tasks.
    DomainNotDrained,

    // === Hardware queues ===
    /// The target task queue is full.
    QueueFull,

    // === Spill protocol ===
    /// A descriptor block token did not resolve to a live block.
    StaleBlock,

    // === Marshalling ===
    /// An argument tuple exceeded the register tile.
    ArgOverflow,

    // === Configuration ===
    /// Invalid runtime configuration.
    Config,

    // === Internal ===
    /// Internal runtime error (bug).
    Internal,
}

/// The main error type for fractime operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error means a queue had no free slot.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        matches!(self.kind, ErrorKind::QueueFull)
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized Result type for fractime operations.
pub type Result<T> = core::result::Result<T, Error>;
