//! Serialq: a serialized task-execution queue.
//!
//! # Overview
//!
//! Serialq guarantees that all callbacks affecting shared state run
//! one-at-a-time, in a well-defined order, regardless of which thread
//! submitted them. Each [`AsyncQueue`] owns a single logical lane of
//! execution backed by a dedicated worker thread; submission is safe from
//! any thread, but task bodies never overlap.
//!
//! # Core Guarantees
//!
//! - **Strict ordering**: undelayed submissions run in FIFO submission order;
//!   delayed submissions run strictly by target fire time, ties broken by
//!   submission sequence
//! - **Mutual exclusion**: at most one task body executes per queue at any
//!   instant
//! - **Reentrancy detection**: submitting through a nesting-unsafe entry
//!   point from within a running task is rejected loudly instead of silently
//!   mis-ordering work
//! - **Cancellable delays**: delayed work returns a [`DelayedOperation`]
//!   handle whose `cancel` is idempotent and race-free
//! - **Shutdown protocol**: ordinary submissions are dropped once shutdown
//!   begins; shutdown-exempt submissions are guaranteed to run
//! - **Deterministic draining**: pending delayed work can be executed
//!   immediately in fire order, without waiting on real time, for tests
//!
//! # Module Structure
//!
//! - [`types`]: Core types (timer categories, task identifiers, lane time)
//! - [`executor`]: The lane itself: worker thread, delayed schedule, handles
//! - [`queue`]: The policy layer: reentrancy, shutdown, submission classes
//! - [`util`]: Internal utilities (generation-tagged slot arena)
//! - [`error`]: Error types
//! - [`test_utils`]: Shared logging helpers for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod error;
pub mod executor;
pub mod queue;
pub mod test_utils;
pub mod types;
pub mod util;

pub use error::{Error, ErrorKind, Result};
pub use executor::{DelayedOperation, Executor};
pub use queue::AsyncQueue;
pub use types::{TaskId, Time, TimerId};
