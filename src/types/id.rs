//! Identifier types for queue entities.
//!
//! These types provide type-safe identifiers for delayed work: the logical
//! timer category a delayed task carries, the slot key the pending-task table
//! hands out, and the monotonic lane timestamp delayed work is ordered by.

use crate::util::ArenaIndex;
use core::fmt;
use std::ops::Add;
use std::time::Duration;

/// A logical timer category attached to delayed work.
///
/// Timer categories exist for identification and test-driven draining only;
/// they never affect execution order or priority. Order among delayed tasks
/// is strictly by target fire time, ties broken by submission sequence.
///
/// The set is closed: these are the delayed operations the consuming
/// subsystems (streams, persistence, sync logic) schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Sentinel matching every timer category; used to drain everything.
    All,
    /// Listen stream idle timeout.
    ListenStreamIdle,
    /// Listen stream connection backoff.
    ListenStreamConnectionBackoff,
    /// Write stream idle timeout.
    WriteStreamIdle,
    /// Write stream connection backoff.
    WriteStreamConnectionBackoff,
    /// Online-state transition timeout.
    OnlineStateTimeout,
    /// Client metadata refresh.
    ClientMetadataRefresh,
    /// Index backfill trigger.
    IndexBackfill,
    /// Transaction retry backoff.
    TransactionRetry,
    /// Health check timeout.
    HealthCheckTimeout,
    /// Generic retry backoff.
    RetryTimer,
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::All => "all",
            Self::ListenStreamIdle => "listen-stream-idle",
            Self::ListenStreamConnectionBackoff => "listen-stream-connection-backoff",
            Self::WriteStreamIdle => "write-stream-idle",
            Self::WriteStreamConnectionBackoff => "write-stream-connection-backoff",
            Self::OnlineStateTimeout => "online-state-timeout",
            Self::ClientMetadataRefresh => "client-metadata-refresh",
            Self::IndexBackfill => "index-backfill",
            Self::TransactionRetry => "transaction-retry",
            Self::HealthCheckTimeout => "health-check-timeout",
            Self::RetryTimer => "retry-timer",
        };
        write!(f, "{name}")
    }
}

/// A unique key for one pending delayed task.
///
/// Wraps a generation-tagged slot index, so a key held by a cancellation
/// handle goes stale once the task runs or is canceled.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) ArenaIndex);

impl TaskId {
    /// Creates a new task ID from an arena index (internal use).
    #[must_use]
    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    /// Returns the underlying arena index (internal use).
    #[must_use]
    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }

    /// Creates a task ID for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(index: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(index, generation))
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}:{})", self.0.index(), self.0.generation())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0.index())
    }
}

/// A monotonic lane timestamp.
///
/// Nanoseconds since the owning executor's epoch. Delayed work is ordered by
/// this key; the key is materialized at scheduling time so the deterministic
/// drain can execute entries in fire order without consulting the real clock.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    /// The zero instant (the executor's epoch).
    pub const ZERO: Self = Self(0);

    /// The maximum representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new time from nanoseconds since epoch.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a new time from milliseconds since epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Returns the time as nanoseconds since epoch.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time as milliseconds since epoch (truncated).
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Adds a duration in nanoseconds, saturating on overflow.
    #[must_use]
    pub const fn saturating_add_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_add(nanos))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add_nanos(u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}us", self.0 / 1_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}
