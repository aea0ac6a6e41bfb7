//! Error types and error handling strategy for the queue.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Legality violations (reentrancy) are detected synchronously at the call
//!   site and surfaced to the calling thread, never deferred into the lane
//! - Defined no-ops (post-shutdown ordinary submissions, double or late
//!   cancellation) are not errors; their kinds exist so internal paths and
//!   diagnostics can classify what was absorbed
//! - Task-body failures are outside this crate's contract: the queue does
//!   not catch, retry, or log panics raised by scheduled callbacks

use core::fmt;

/// A specialized result type for queue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A nesting-unsafe entry point was invoked from within a task already
    /// running on the same lane.
    AlreadyOnLane,
    /// An operation that must run on the lane was invoked from outside it.
    NotOnLane,
    /// The queue has begun shutting down; ordinary submissions are dropped.
    QueueShutdown,
    /// The executor's lane has been torn down.
    ExecutorStopped,
}

impl ErrorKind {
    /// Returns a static description of the error kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyOnLane => "already running on this queue's lane",
            Self::NotOnLane => "not running on this queue's lane",
            Self::QueueShutdown => "queue is shutting down",
            Self::ExecutorStopped => "executor lane has been torn down",
        }
    }

    /// Returns true if this kind signals a programming defect that should be
    /// surfaced loudly rather than absorbed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::AlreadyOnLane | Self::NotOnLane)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for queue operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Returns true if this error signals a programming defect.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}
