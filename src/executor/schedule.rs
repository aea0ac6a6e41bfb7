//! Pending-task table for delayed work.
//!
//! The schedule owns every delayed task from submission until it runs or is
//! canceled. Tasks live in a generation-tagged slot arena; a min-heap of
//! `(fire time, submission sequence)` keys determines execution order.
//! Cancellation removes the arena slot and leaves the heap key behind; stale
//! keys are skipped when popped, so cancellation never needs to restructure
//! the heap.

use crate::types::{TaskId, Time, TimerId};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A boxed task body.
pub(crate) type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// The total order over pending delayed work.
///
/// Fire time first, submission sequence as the tiebreak, which makes the
/// order deterministic even when two tasks share a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ScheduleKey {
    deadline: Time,
    seq: u64,
}

impl ScheduleKey {
    /// Returns the target fire time.
    pub(crate) const fn deadline(self) -> Time {
        self.deadline
    }
}

/// One delayed task owned by the schedule.
struct ScheduledTask {
    tag: TimerId,
    key: ScheduleKey,
    task: TaskFn,
}

/// A heap entry referencing a scheduled task by its slot key.
#[derive(Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    key: ScheduleKey,
    id: TaskId,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest key first).
        other.key.cmp(&self.key)
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The pending delayed-task table for one lane.
#[derive(Default)]
pub(crate) struct Schedule {
    tasks: crate::util::Arena<ScheduledTask>,
    queue: BinaryHeap<HeapEntry>,
    next_seq: u64,
}

impl Schedule {
    /// Adds a task firing at `deadline`, tagged `tag`. Returns its slot key.
    pub(crate) fn insert(&mut self, deadline: Time, tag: TimerId, task: TaskFn) -> TaskId {
        let key = ScheduleKey {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        let id = TaskId::from_arena(self.tasks.insert(ScheduledTask { tag, key, task }));
        self.queue.push(HeapEntry { key, id });
        tracing::trace!(task = %id, %tag, deadline = %deadline, "delayed task scheduled");
        id
    }

    /// Removes the task with the given key if it is still pending.
    ///
    /// Returns true if a task was actually removed. Stale keys (task already
    /// ran or was already canceled) are a no-op.
    pub(crate) fn cancel(&mut self, id: TaskId) -> bool {
        let removed = self.tasks.remove(id.arena_index()).is_some();
        if removed {
            tracing::trace!(task = %id, "delayed task canceled");
        }
        removed
    }

    /// Returns true if at least one pending task carries `tag`.
    pub(crate) fn is_scheduled(&self, tag: TimerId) -> bool {
        self.tasks.iter().any(|(_, t)| t.tag == tag)
    }

    /// Returns the earliest pending fire time, if any.
    ///
    /// Skips and discards stale heap keys along the way.
    pub(crate) fn next_deadline(&mut self) -> Option<Time> {
        while let Some(entry) = self.queue.peek() {
            if self.tasks.contains(entry.id.arena_index()) {
                return Some(entry.key.deadline());
            }
            self.queue.pop();
        }
        None
    }

    /// Pops the earliest pending task whose fire time is `<= now`, skipping
    /// stale entries. Returns `None` when nothing is due.
    ///
    /// One task per call: the rest stay in the table until the caller asks
    /// again, so they remain cancelable while earlier due work runs.
    pub(crate) fn pop_due(&mut self, now: Time) -> Option<TaskFn> {
        while let Some(entry) = self.queue.peek() {
            if entry.key.deadline() > now {
                return None;
            }
            let entry = *entry;
            self.queue.pop();
            if let Some(scheduled) = self.tasks.remove(entry.id.arena_index()) {
                tracing::trace!(task = %entry.id, tag = %scheduled.tag, "delayed task due");
                return Some(scheduled.task);
            }
        }
        None
    }

    /// Pops the next pending task whose key is `<= cutoff`, skipping stale
    /// entries. Returns `None` once nothing at or before the cutoff remains.
    pub(crate) fn pop_next_up_to(&mut self, cutoff: ScheduleKey) -> Option<TaskFn> {
        while let Some(entry) = self.queue.peek() {
            if entry.key > cutoff {
                return None;
            }
            let entry = *entry;
            self.queue.pop();
            if let Some(scheduled) = self.tasks.remove(entry.id.arena_index()) {
                return Some(scheduled.task);
            }
        }
        None
    }

    /// Returns the latest key among pending tasks tagged `tag`, or the
    /// latest key overall for [`TimerId::All`].
    pub(crate) fn last_key_for(&self, tag: TimerId) -> Option<ScheduleKey> {
        self.tasks
            .iter()
            .filter(|(_, t)| tag == TimerId::All || t.tag == tag)
            .map(|(_, t)| t.key)
            .max()
    }

    /// Drops every pending task. Outstanding handles become stale.
    pub(crate) fn clear(&mut self) {
        self.tasks.clear();
        self.queue.clear();
    }

    /// Returns the number of pending tasks.
    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }
}
