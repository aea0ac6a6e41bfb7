//! Serialized submission queue with shutdown semantics.
//!
//! [`AsyncQueue`] wraps one [`Executor`] lane and layers policy on top of it:
//! reentrancy detection for the submission entry points and a three-state
//! shutdown protocol that lets teardown drain cleanly while late ordinary
//! submissions are absorbed as no-ops.
//!
//! Handles are cheap to clone; all clones refer to the same lane and the same
//! shutdown state.

use crate::error::{Error, ErrorKind, Result};
use crate::executor::{DelayedOperation, Executor};
use crate::types::TimerId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Lifecycle of a queue.
///
/// Transitions are one-way: `Running` to `ShuttingDown` when shutdown is
/// initiated, `ShuttingDown` to `Shutdown` when the shutdown task finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    /// Accepting all submissions.
    Running,
    /// Shutdown initiated; ordinary submissions are dropped.
    ShuttingDown,
    /// The shutdown task has completed.
    Shutdown,
}

struct QueueInner {
    executor: Executor,
    state: Mutex<QueueState>,
}

impl QueueInner {
    /// Marks the shutdown task as finished.
    fn complete_shutdown(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(*state, QueueState::ShuttingDown);
        *state = QueueState::Shutdown;
        tracing::debug!("queue shutdown complete");
    }
}

/// A serialized task queue: submissions from any thread, execution one task
/// at a time on a single lane, in a well-defined order.
///
/// # Submission classes
///
/// - **Ordinary** ([`enqueue`](Self::enqueue),
///   [`enqueue_relaxed`](Self::enqueue_relaxed),
///   [`enqueue_blocking`](Self::enqueue_blocking),
///   [`enqueue_after_delay`](Self::enqueue_after_delay)): accepted only while
///   the queue is running; once shutdown has begun they become no-ops.
/// - **Shutdown-exempt** ([`execute_blocking`](Self::execute_blocking),
///   [`enqueue_even_after_shutdown`](Self::enqueue_even_after_shutdown)):
///   accepted regardless of shutdown state, for teardown paths that must
///   still reach the lane.
///
/// # Reentrancy
///
/// Calling `enqueue`, `enqueue_blocking`, `execute_blocking`, or
/// [`enqueue_and_initiate_shutdown`](Self::enqueue_and_initiate_shutdown)
/// from within a task body running on this queue's own lane is a programming
/// error and panics on the calling thread. Use `enqueue_relaxed` for
/// deliberate nested submission; the nested task still runs strictly after
/// the current one completes, never inline.
#[derive(Clone)]
pub struct AsyncQueue {
    inner: Arc<QueueInner>,
}

impl AsyncQueue {
    /// Creates a queue with its own dedicated lane.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                executor: Executor::new(),
                state: Mutex::new(QueueState::Running),
            }),
        }
    }

    /// Appends `task` for execution after all previously accepted work.
    ///
    /// Dropped silently if shutdown has begun.
    ///
    /// # Panics
    ///
    /// Panics if called from a task body already running on this queue.
    pub fn enqueue(&self, task: impl FnOnce() + Send + 'static) {
        Self::fatal_if(self.verify_not_on_lane("enqueue"));
        if self.gate_open("enqueue") {
            self.inner.executor.execute(task);
        }
    }

    /// Like [`enqueue`](Self::enqueue) but without the reentrancy check, for
    /// deliberate submission from within a running task.
    ///
    /// The nested task is appended after all already-queued work and never
    /// runs inline. Dropped silently if shutdown has begun.
    pub fn enqueue_relaxed(&self, task: impl FnOnce() + Send + 'static) {
        if self.gate_open("enqueue_relaxed") {
            self.inner.executor.execute(task);
        }
    }

    /// Appends `task` and blocks the calling thread until it has run.
    ///
    /// If shutdown has begun, returns immediately without running the task.
    ///
    /// # Panics
    ///
    /// Panics if called from a task body already running on this queue.
    pub fn enqueue_blocking(&self, task: impl FnOnce() + Send + 'static) {
        Self::fatal_if(self.verify_not_on_lane("enqueue_blocking"));
        if self.gate_open("enqueue_blocking") {
            self.inner.executor.execute_blocking(task);
        }
    }

    /// Runs `task` on the lane and blocks until it completes, regardless of
    /// shutdown state.
    ///
    /// # Panics
    ///
    /// Panics if called from a task body already running on this queue.
    pub fn execute_blocking(&self, task: impl FnOnce() + Send + 'static) {
        Self::fatal_if(self.verify_not_on_lane("execute_blocking"));
        self.inner.executor.execute_blocking(task);
    }

    /// Schedules `task` to run after `delay`, tagged `tag`.
    ///
    /// Returns a cancellation handle. If shutdown has begun, nothing is
    /// scheduled and the returned handle is inert.
    pub fn enqueue_after_delay(
        &self,
        delay: Duration,
        tag: TimerId,
        task: impl FnOnce() + Send + 'static,
    ) -> DelayedOperation {
        if !self.gate_open("enqueue_after_delay") {
            return DelayedOperation::default();
        }
        self.inner.executor.execute_after(delay, tag, task)
    }

    /// Returns true iff at least one pending delayed task carries `tag`.
    #[must_use]
    pub fn is_scheduled(&self, tag: TimerId) -> bool {
        self.inner.executor.is_scheduled(tag)
    }

    /// Returns true iff the caller is executing from within a task running
    /// on this queue's lane.
    #[must_use]
    pub fn is_current_queue(&self) -> bool {
        self.inner.executor.is_current_executor()
    }

    /// Asserts that the caller is on this queue's lane.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is not currently executing one of this
    /// queue's task bodies.
    pub fn verify_is_current_queue(&self) {
        if !self.is_current_queue() {
            let err = Error::new(ErrorKind::NotOnLane)
                .with_message("verify_is_current_queue called off the lane");
            panic!("{err}");
        }
    }

    /// Returns true once shutdown has been initiated.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.inner.state.lock() != QueueState::Running
    }

    /// Initiates shutdown: schedules `task` as the shutdown step and closes
    /// the gate to ordinary submissions.
    ///
    /// Work accepted before this call still runs; `task` runs after it, and
    /// its completion advances the queue to the fully shut down state. If
    /// shutdown was already initiated the call is a silent no-op and `task`
    /// is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called from a task body already running on this queue.
    pub fn enqueue_and_initiate_shutdown(&self, task: impl FnOnce() + Send + 'static) {
        Self::fatal_if(self.verify_not_on_lane("enqueue_and_initiate_shutdown"));
        {
            let mut state = self.inner.state.lock();
            if *state != QueueState::Running {
                tracing::debug!(state = ?*state, "shutdown already initiated; task dropped");
                return;
            }
            *state = QueueState::ShuttingDown;
        }
        tracing::debug!("queue shutdown initiated");
        let inner = Arc::downgrade(&self.inner);
        self.inner.executor.execute(move || {
            task();
            if let Some(inner) = Weak::upgrade(&inner) {
                inner.complete_shutdown();
            }
        });
    }

    /// Appends `task` bypassing the shutdown gate entirely.
    ///
    /// For cleanup work that must reach the lane even after shutdown has
    /// begun or completed. No reentrancy restriction.
    pub fn enqueue_even_after_shutdown(&self, task: impl FnOnce() + Send + 'static) {
        self.inner.executor.execute(task);
    }

    /// Synchronously executes pending delayed work up to and including the
    /// latest pending task tagged `tag`, in fire order, ignoring real time.
    ///
    /// [`TimerId::All`] drains everything. Intended for tests.
    ///
    /// # Panics
    ///
    /// Panics if called from a task body already running on this queue.
    pub fn run_scheduled_operations_until(&self, tag: TimerId) {
        Self::fatal_if(self.verify_not_on_lane("run_scheduled_operations_until"));
        self.inner.executor.run_scheduled_operations_until(tag);
    }

    /// Reentrancy legality check for the strict entry points.
    fn verify_not_on_lane(&self, op: &str) -> Result<()> {
        if self.is_current_queue() {
            return Err(Error::new(ErrorKind::AlreadyOnLane)
                .with_message(format!("{op} called from a task already on this queue")));
        }
        Ok(())
    }

    /// Surfaces a legality violation on the calling thread.
    fn fatal_if(check: Result<()>) {
        if let Err(err) = check {
            debug_assert!(err.is_fatal());
            panic!("{err}");
        }
    }

    /// Returns whether ordinary submissions are still accepted; logs the
    /// drop when they are not.
    fn gate_open(&self, op: &str) -> bool {
        let state = *self.inner.state.lock();
        if state == QueueState::Running {
            return true;
        }
        let err = Error::new(ErrorKind::QueueShutdown)
            .with_message(format!("{op} after shutdown began"));
        tracing::debug!(kind = %err.kind(), state = ?state, "{err}");
        false
    }
}

impl Default for AsyncQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AsyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncQueue")
            .field("state", &*self.inner.state.lock())
            .field("executor", &self.inner.executor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn enqueue_preserves_submission_order() {
        init_test("enqueue_preserves_submission_order");
        let queue = AsyncQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let order = Arc::clone(&order);
            queue.enqueue(move || order.lock().push(i));
        }
        queue.execute_blocking(|| {});

        let seen = order.lock().clone();
        let expected: Vec<i32> = (0..50).collect();
        crate::assert_with_log!(seen == expected, "FIFO order preserved", expected, seen);
        crate::test_complete!("enqueue_preserves_submission_order");
    }

    #[test]
    fn relaxed_enqueue_from_task_runs_after_current() {
        init_test("relaxed_enqueue_from_task_runs_after_current");
        let queue = AsyncQueue::new();
        let order = Arc::new(Mutex::new(String::new()));

        let outer_order = Arc::clone(&order);
        let nested_queue = queue.clone();
        queue.enqueue(move || {
            let inner_order = Arc::clone(&outer_order);
            nested_queue.enqueue_relaxed(move || inner_order.lock().push('b'));
            outer_order.lock().push('a');
        });
        queue.execute_blocking(|| {});

        let seen = order.lock().clone();
        crate::assert_with_log!(seen == "ab", "nested task ran after current", "ab", seen);
        crate::test_complete!("relaxed_enqueue_from_task_runs_after_current");
    }

    #[test]
    fn shutdown_gates_ordinary_submissions() {
        init_test("shutdown_gates_ordinary_submissions");
        let queue = AsyncQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&ran);
        queue.enqueue_and_initiate_shutdown(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        crate::assert_with_log!(
            queue.is_shutting_down(),
            "gate closed immediately",
            true,
            queue.is_shutting_down()
        );

        let count = Arc::clone(&ran);
        queue.enqueue(move || {
            count.fetch_add(100, Ordering::SeqCst);
        });
        let handle = queue.enqueue_after_delay(Duration::ZERO, TimerId::RetryTimer, || {});
        handle.cancel();
        queue.enqueue_blocking(|| unreachable!("gated submission must not run"));

        queue.execute_blocking(|| {});
        crate::assert_with_log!(
            ran.load(Ordering::SeqCst) == 1,
            "only the shutdown task ran",
            1usize,
            ran.load(Ordering::SeqCst)
        );
        crate::test_complete!("shutdown_gates_ordinary_submissions");
    }

    #[test]
    fn second_shutdown_is_a_noop() {
        init_test("second_shutdown_is_a_noop");
        let queue = AsyncQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&ran);
        queue.enqueue_and_initiate_shutdown(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        let count = Arc::clone(&ran);
        queue.enqueue_and_initiate_shutdown(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        queue.execute_blocking(|| {});
        crate::assert_with_log!(
            ran.load(Ordering::SeqCst) == 1,
            "shutdown task scheduled once",
            1usize,
            ran.load(Ordering::SeqCst)
        );
        crate::test_complete!("second_shutdown_is_a_noop");
    }

    #[test]
    fn exempt_submissions_run_after_shutdown() {
        init_test("exempt_submissions_run_after_shutdown");
        let queue = AsyncQueue::new();
        queue.enqueue_and_initiate_shutdown(|| {});
        queue.execute_blocking(|| {});

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        queue.enqueue_even_after_shutdown(move || flag.store(true, Ordering::SeqCst));
        queue.execute_blocking(|| {});

        crate::assert_with_log!(
            ran.load(Ordering::SeqCst),
            "exempt task ran after shutdown completed",
            true,
            ran.load(Ordering::SeqCst)
        );
        crate::test_complete!("exempt_submissions_run_after_shutdown");
    }

    #[test]
    #[should_panic(expected = "not running on this queue's lane")]
    fn verify_is_current_queue_panics_off_lane() {
        init_test_logging();
        let queue = AsyncQueue::new();
        queue.verify_is_current_queue();
    }

    #[test]
    fn verify_is_current_queue_passes_on_lane() {
        init_test("verify_is_current_queue_passes_on_lane");
        let queue = AsyncQueue::new();
        let inner = queue.clone();
        queue.execute_blocking(move || inner.verify_is_current_queue());
        crate::test_complete!("verify_is_current_queue_passes_on_lane");
    }
}
