//! Core types for the queue.
//!
//! - [`TimerId`]: logical timer categories attached to delayed work
//! - [`TaskId`]: type-safe key into the pending-task table
//! - [`Time`]: monotonic lane time used to order delayed work

pub mod id;

pub use id::{TaskId, Time, TimerId};
