//! Internal utilities for the queue.
//!
//! These utilities are intentionally minimal and dependency-free so the
//! executor's bookkeeping stays easy to reason about.

pub mod arena;

pub use arena::{Arena, ArenaIndex};
