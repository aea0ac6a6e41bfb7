//! The lane: a single logical sequence of task execution.
//!
//! An [`Executor`] owns one dedicated worker thread and runs callbacks on it
//! one at a time, immediately or after a delay. It supports:
//!
//! - **Immediate execution**: FIFO, fire-and-forget
//! - **Delayed execution**: ordered strictly by `(fire time, submission
//!   sequence)`, tagged with a logical [`TimerId`] for identification
//! - **Cancellation**: every delayed task returns a [`DelayedOperation`]
//!   handle; cancellation is idempotent and race-free against execution
//! - **Introspection**: pending-by-tag queries and a check for whether the
//!   caller is already executing on the lane
//! - **Deterministic draining**: pending delayed work can be executed in
//!   fire order without waiting on the real clock
//!
//! # Thread Lifecycle
//!
//! The worker thread parks on a condition variable when idle, waking on
//! submission or when the earliest pending deadline arrives. Dropping the
//! executor stops the lane: remaining immediate work is drained, pending
//! delayed work is discarded, and the thread is joined.

pub(crate) mod schedule;

use crate::error::{Error, ErrorKind};
use crate::types::{TaskId, Time, TimerId};
use parking_lot::{Condvar, Mutex, MutexGuard};
use schedule::{Schedule, TaskFn};
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

static NEXT_LANE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Identity of the lane whose task body is currently running on this
    /// thread, if any. Set only for the duration of a task body.
    static CURRENT_LANE: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Scoped marker tagging the current thread with a lane identity while one
/// of that lane's task bodies runs.
struct LaneMarker {
    previous: Option<u64>,
}

impl LaneMarker {
    fn enter(lane: u64) -> Self {
        let previous = CURRENT_LANE.replace(Some(lane));
        Self { previous }
    }
}

impl Drop for LaneMarker {
    fn drop(&mut self) {
        CURRENT_LANE.set(self.previous);
    }
}

/// Mutable lane state behind the single point of mutual exclusion.
struct LaneState {
    /// Undelayed work, in submission order.
    immediate: VecDeque<TaskFn>,
    /// Pending delayed work.
    schedule: Schedule,
    /// Set when the lane is being torn down.
    stopped: bool,
}

pub(crate) struct ExecutorInner {
    /// Unique lane identity for reentrancy detection.
    lane: u64,
    /// Epoch all lane timestamps are measured from.
    epoch: Instant,
    state: Mutex<LaneState>,
    condvar: Condvar,
}

impl ExecutorInner {
    /// Current lane time.
    fn now(&self) -> Time {
        Time::from_nanos(u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX))
    }

    /// Converts a lane timestamp back to a wall-clock instant for parking.
    fn instant_at(&self, time: Time) -> Instant {
        self.epoch + Duration::from_nanos(time.as_nanos())
    }
}

/// A cancellable handle to one pending delayed task.
///
/// The handle references the task by its generation-tagged slot key and holds
/// only a weak reference to the lane, so it stays valid (and safely
/// cancellable) for the lifetime of the program regardless of whether the
/// task or the executor still exist. A default-constructed handle is inert.
#[derive(Clone, Default)]
pub struct DelayedOperation {
    executor: Weak<ExecutorInner>,
    id: Option<TaskId>,
}

impl DelayedOperation {
    fn new(executor: &Arc<ExecutorInner>, id: TaskId) -> Self {
        Self {
            executor: Arc::downgrade(executor),
            id: Some(id),
        }
    }

    /// Cancels the referenced task if it has not yet started.
    ///
    /// Once this returns, the task's callback is guaranteed never to run. If
    /// the task already ran, was already canceled, or the lane is gone, this
    /// is a no-op. Never blocks, never fails, safe to call repeatedly.
    pub fn cancel(&self) {
        let Some(id) = self.id else { return };
        let Some(inner) = self.executor.upgrade() else {
            return;
        };
        let removed = inner.state.lock().schedule.cancel(id);
        if removed {
            // The worker may be parked on this task's deadline.
            inner.condvar.notify_all();
        }
    }
}

impl fmt::Debug for DelayedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedOperation")
            .field("id", &self.id)
            .field("lane_alive", &(self.executor.strong_count() > 0))
            .finish()
    }
}

/// One logical lane of sequential task execution.
///
/// Submission entry points are safe to call from any thread; only task
/// execution is serialized, not submission.
pub struct Executor {
    inner: Arc<ExecutorInner>,
    worker: Option<JoinHandle<()>>,
}

impl Executor {
    /// Creates a new executor and spawns its worker thread.
    #[must_use]
    pub fn new() -> Self {
        let lane = NEXT_LANE_ID.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(ExecutorInner {
            lane,
            epoch: Instant::now(),
            state: Mutex::new(LaneState {
                immediate: VecDeque::new(),
                schedule: Schedule::default(),
                stopped: false,
            }),
            condvar: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name(format!("serialq-lane-{lane}"))
            .spawn(move || worker_loop(&worker_inner))
            .expect("failed to spawn lane worker thread");

        Self {
            inner,
            worker: Some(worker),
        }
    }

    /// Appends `task` for prompt execution on the lane. Fire-and-forget.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) {
        self.submit(Box::new(task));
    }

    /// Schedules `task` and blocks the calling thread until it has run.
    ///
    /// Must not be called from the lane's own run context. Returns without
    /// running the task if the lane has been torn down.
    pub fn execute_blocking(&self, task: impl FnOnce() + Send + 'static) {
        debug_assert!(
            !self.is_current_executor(),
            "execute_blocking from the lane's own context would deadlock"
        );
        let completion = Arc::new(TaskCompletion::new());
        let signal = Arc::clone(&completion);
        if self.submit(Box::new(move || {
            task();
            signal.signal_done();
        })) {
            completion.wait();
        }
    }

    /// Schedules `task` to run once `delay` has elapsed, tagged `tag`.
    ///
    /// A zero delay runs as soon as the lane is free of earlier-queued work.
    /// Returns a handle that cancels the task if it has not started.
    pub fn execute_after(
        &self,
        delay: Duration,
        tag: TimerId,
        task: impl FnOnce() + Send + 'static,
    ) -> DelayedOperation {
        debug_assert!(
            tag != TimerId::All,
            "TimerId::All is a drain sentinel, not a schedulable tag"
        );
        let mut state = self.inner.state.lock();
        if state.stopped {
            drop(state);
            self.reject_stopped("execute_after");
            return DelayedOperation::default();
        }
        let deadline = self.inner.now() + delay;
        let id = state.schedule.insert(deadline, tag, Box::new(task));
        drop(state);
        // The new deadline may be earlier than whatever the worker is
        // parked on.
        self.inner.condvar.notify_one();
        DelayedOperation::new(&self.inner, id)
    }

    /// Returns true iff at least one pending delayed task carries `tag`.
    #[must_use]
    pub fn is_scheduled(&self, tag: TimerId) -> bool {
        self.inner.state.lock().schedule.is_scheduled(tag)
    }

    /// Returns true iff the caller is executing from within a task the lane
    /// is currently running.
    #[must_use]
    pub fn is_current_executor(&self) -> bool {
        CURRENT_LANE.get() == Some(self.inner.lane)
    }

    /// Returns the number of pending delayed tasks.
    #[must_use]
    pub fn pending_delayed(&self) -> usize {
        self.inner.state.lock().schedule.len()
    }

    /// Synchronously executes pending delayed work up to and including the
    /// latest pending task tagged `tag`, in fire order, ignoring real time.
    ///
    /// [`TimerId::All`] drains everything. Tasks canceled before being
    /// drained are skipped; tasks scheduled past the cutoff stay pending,
    /// as does delayed work scheduled *by* the drained tasks themselves.
    /// Intended for tests; hops onto the lane so mutual exclusion holds.
    pub fn run_scheduled_operations_until(&self, tag: TimerId) {
        let inner = Arc::clone(&self.inner);
        self.execute_blocking(move || drain_up_to(&inner, tag));
    }

    /// Enqueues a task body, waking the worker. Returns false if the lane is
    /// already torn down.
    fn submit(&self, task: TaskFn) -> bool {
        let mut state = self.inner.state.lock();
        if state.stopped {
            drop(state);
            self.reject_stopped("execute");
            return false;
        }
        state.immediate.push_back(task);
        drop(state);
        self.inner.condvar.notify_one();
        true
    }

    fn reject_stopped(&self, op: &str) {
        let err = Error::new(ErrorKind::ExecutorStopped)
            .with_message(format!("{op} on a lane that has been torn down"));
        tracing::warn!(lane = self.inner.lane, kind = %err.kind(), "{err}");
        debug_assert!(false, "{err}");
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Executor")
            .field("lane", &self.inner.lane)
            .field("immediate", &state.immediate.len())
            .field("delayed", &state.schedule.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            // Pending delayed work dies with the lane; outstanding handles
            // go stale rather than dangling.
            state.schedule.clear();
        }
        self.inner.condvar.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        tracing::debug!(lane = self.inner.lane, "lane torn down");
    }
}

/// The worker loop: drain immediate work first, then due delayed work, then
/// park until the next deadline or submission.
fn worker_loop(inner: &Arc<ExecutorInner>) {
    let mut state = inner.state.lock();
    loop {
        if let Some(task) = state.immediate.pop_front() {
            MutexGuard::unlocked(&mut state, || {
                let _marker = LaneMarker::enter(inner.lane);
                task();
            });
            continue;
        }

        // One due task per iteration: everything still in the table while a
        // body runs can be canceled right up until it is popped.
        let now = inner.now();
        if let Some(task) = state.schedule.pop_due(now) {
            MutexGuard::unlocked(&mut state, || {
                let _marker = LaneMarker::enter(inner.lane);
                task();
            });
            continue;
        }

        if state.stopped {
            break;
        }

        match state.schedule.next_deadline() {
            Some(deadline) => {
                let wake_at = inner.instant_at(deadline);
                inner.condvar.wait_until(&mut state, wake_at);
            }
            None => inner.condvar.wait(&mut state),
        }
    }
}

/// Executes pending delayed entries up to the cutoff key for `tag`.
///
/// Runs on the lane, inside a task body, so the marker is already set and
/// the state lock is only held between entries. The cutoff is computed once
/// up front: delayed work scheduled by drained tasks does not extend the
/// drain.
fn drain_up_to(inner: &Arc<ExecutorInner>, tag: TimerId) {
    let cutoff = inner.state.lock().schedule.last_key_for(tag);
    let Some(cutoff) = cutoff else {
        if tag != TimerId::All {
            tracing::warn!(%tag, "nothing scheduled for tag; drain is a no-op");
        }
        return;
    };
    tracing::debug!(%tag, cutoff = %cutoff.deadline(), "draining delayed work");
    loop {
        let next = inner.state.lock().schedule.pop_next_up_to(cutoff);
        match next {
            Some(task) => task(),
            None => break,
        }
    }
}

/// Completion latch for blocking submissions.
struct TaskCompletion {
    done: Mutex<bool>,
    condvar: Condvar,
}

impl TaskCompletion {
    const fn new() -> Self {
        Self {
            done: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn signal_done(&self) {
        *self.done.lock() = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.condvar.wait(&mut done);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn execute_runs_task() {
        init_test("execute_runs_task");
        let executor = Executor::new();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        executor.execute_blocking(move || flag.store(true, Ordering::SeqCst));

        crate::assert_with_log!(
            ran.load(Ordering::SeqCst),
            "task ran on the lane",
            true,
            ran.load(Ordering::SeqCst)
        );
        crate::test_complete!("execute_runs_task");
    }

    #[test]
    fn immediate_tasks_run_in_submission_order() {
        init_test("immediate_tasks_run_in_submission_order");
        let executor = Executor::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let order = Arc::clone(&order);
            executor.execute(move || order.lock().push(i));
        }
        executor.execute_blocking(|| {});

        let seen = order.lock().clone();
        let expected: Vec<i32> = (0..100).collect();
        crate::assert_with_log!(seen == expected, "FIFO order preserved", expected, seen);
        crate::test_complete!("immediate_tasks_run_in_submission_order");
    }

    #[test]
    fn delayed_task_fires_after_delay() {
        init_test("delayed_task_fires_after_delay");
        let executor = Executor::new();
        let fired = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&fired);
        executor.execute_after(Duration::from_millis(5), TimerId::RetryTimer, move || {
            flag.store(true, Ordering::SeqCst);
        });

        crate::assert_with_log!(
            executor.is_scheduled(TimerId::RetryTimer),
            "task pending before its deadline",
            true,
            executor.is_scheduled(TimerId::RetryTimer)
        );

        // Wait for the timer to fire, then sync with the lane.
        thread::sleep(Duration::from_millis(20));
        executor.execute_blocking(|| {});

        crate::assert_with_log!(
            fired.load(Ordering::SeqCst),
            "delayed task fired",
            true,
            fired.load(Ordering::SeqCst)
        );
        crate::assert_with_log!(
            !executor.is_scheduled(TimerId::RetryTimer),
            "tag no longer pending after firing",
            false,
            executor.is_scheduled(TimerId::RetryTimer)
        );
        crate::test_complete!("delayed_task_fires_after_delay");
    }

    #[test]
    fn cancel_prevents_execution() {
        init_test("cancel_prevents_execution");
        let executor = Executor::new();
        let fired = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&fired);
        let handle = executor.execute_after(
            Duration::from_secs(3600),
            TimerId::WriteStreamIdle,
            move || {
                flag.store(true, Ordering::SeqCst);
            },
        );

        handle.cancel();
        crate::assert_with_log!(
            !executor.is_scheduled(TimerId::WriteStreamIdle),
            "tag unscheduled right after cancel",
            false,
            executor.is_scheduled(TimerId::WriteStreamIdle)
        );

        executor.run_scheduled_operations_until(TimerId::All);
        crate::assert_with_log!(
            !fired.load(Ordering::SeqCst),
            "canceled callback never ran",
            false,
            fired.load(Ordering::SeqCst)
        );

        // Idempotent: canceling again is safe.
        handle.cancel();
        crate::test_complete!("cancel_prevents_execution");
    }

    #[test]
    fn default_handle_is_inert() {
        init_test("default_handle_is_inert");
        let handle = DelayedOperation::default();
        handle.cancel();
        handle.cancel();
        crate::test_complete!("default_handle_is_inert");
    }

    #[test]
    fn is_current_executor_only_inside_task_body() {
        init_test("is_current_executor_only_inside_task_body");
        let executor = Arc::new(Executor::new());
        crate::assert_with_log!(
            !executor.is_current_executor(),
            "not on lane from test thread",
            false,
            executor.is_current_executor()
        );

        let on_lane = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&on_lane);
        let exec = Arc::clone(&executor);
        executor.execute_blocking(move || {
            flag.store(exec.is_current_executor(), Ordering::SeqCst);
        });

        crate::assert_with_log!(
            on_lane.load(Ordering::SeqCst),
            "on lane from inside task body",
            true,
            on_lane.load(Ordering::SeqCst)
        );
        crate::test_complete!("is_current_executor_only_inside_task_body");
    }

    #[test]
    fn two_executors_have_distinct_identities() {
        init_test("two_executors_have_distinct_identities");
        let a = Arc::new(Executor::new());
        let b = Arc::new(Executor::new());

        let cross = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&cross);
        let other = Arc::clone(&b);
        a.execute_blocking(move || {
            flag.store(other.is_current_executor(), Ordering::SeqCst);
        });

        crate::assert_with_log!(
            !cross.load(Ordering::SeqCst),
            "lane A's context is not lane B's",
            false,
            cross.load(Ordering::SeqCst)
        );
        crate::test_complete!("two_executors_have_distinct_identities");
    }

    #[test]
    fn drain_runs_in_fire_order_up_to_cutoff() {
        init_test("drain_runs_in_fire_order_up_to_cutoff");
        let executor = Executor::new();
        let order = Arc::new(Mutex::new(String::new()));

        let push = |c: char| {
            let order = Arc::clone(&order);
            move || order.lock().push(c)
        };
        executor.execute_after(Duration::from_secs(20), TimerId::RetryTimer, push('c'));
        executor.execute_after(Duration::from_secs(10), TimerId::WriteStreamIdle, push('a'));
        executor.execute_after(Duration::from_secs(15), TimerId::ListenStreamIdle, push('b'));

        executor.run_scheduled_operations_until(TimerId::ListenStreamIdle);

        let seen = order.lock().clone();
        crate::assert_with_log!(seen == "ab", "drained up to cutoff in fire order", "ab", seen);
        crate::assert_with_log!(
            executor.is_scheduled(TimerId::RetryTimer),
            "work past the cutoff stays pending",
            true,
            executor.is_scheduled(TimerId::RetryTimer)
        );
        crate::test_complete!("drain_runs_in_fire_order_up_to_cutoff");
    }

    #[test]
    fn drain_does_not_extend_to_newly_scheduled_work() {
        init_test("drain_does_not_extend_to_newly_scheduled_work");
        let executor = Arc::new(Executor::new());
        let count = Arc::new(AtomicUsize::new(0));

        let exec = Arc::clone(&executor);
        let outer = Arc::clone(&count);
        executor.execute_after(Duration::from_secs(10), TimerId::RetryTimer, move || {
            outer.fetch_add(1, Ordering::SeqCst);
            let inner = Arc::clone(&outer);
            // Scheduled mid-drain with an earlier deadline than the cutoff;
            // it must not run as part of the same drain.
            exec.execute_after(Duration::from_secs(1), TimerId::WriteStreamIdle, move || {
                inner.fetch_add(1, Ordering::SeqCst);
            });
        });

        executor.run_scheduled_operations_until(TimerId::RetryTimer);

        crate::assert_with_log!(
            count.load(Ordering::SeqCst) == 1,
            "only the pre-drain task ran",
            1usize,
            count.load(Ordering::SeqCst)
        );
        crate::assert_with_log!(
            executor.is_scheduled(TimerId::WriteStreamIdle),
            "mid-drain schedule stays pending",
            true,
            executor.is_scheduled(TimerId::WriteStreamIdle)
        );
        crate::test_complete!("drain_does_not_extend_to_newly_scheduled_work");
    }

    #[test]
    fn drop_discards_pending_delayed_work() {
        init_test("drop_discards_pending_delayed_work");
        let fired = Arc::new(AtomicBool::new(false));
        let handle = {
            let executor = Executor::new();
            let flag = Arc::clone(&fired);
            executor.execute_after(Duration::from_secs(60), TimerId::RetryTimer, move || {
                flag.store(true, Ordering::SeqCst);
            })
        };

        // The lane is gone; the handle is stale but still safe.
        handle.cancel();
        crate::assert_with_log!(
            !fired.load(Ordering::SeqCst),
            "pending work died with the lane",
            false,
            fired.load(Ordering::SeqCst)
        );
        crate::test_complete!("drop_discards_pending_delayed_work");
    }
}
