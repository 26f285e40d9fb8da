//! Task identifiers, states and the work interface.

use std::fmt;

use crate::deadline::Deadline;

/// Handle to a task in the [`Scheduler`](super::Scheduler) arena.
///
/// The generation changes when an arena entry is reused, so a handle to a
/// released task never aliases a newer one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
  pub(crate) index: u32,
  pub(crate) generation: u32,
}

impl fmt::Debug for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "T{}.{}", self.index, self.generation)
  }
}

/// Lifecycle of a task.
///
/// ```text
/// Pending ──► Ready ──► Running ──► Done
///    ▲          ▲          │
///    │          └──retry───┤
///    │                     ▼
///    └──reschedule──── Failed        (any state but Running) ──► Cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskStatus {
  /// Created or invalidated; waiting to be scheduled or for predecessors.
  Pending,
  /// All predecessors done, queued by deadline.
  Ready,
  /// Executing on a worker.
  Running,
  /// Last execution succeeded.
  Done,
  /// Execution failed and automatic retries are exhausted.
  Failed,
  /// Discarded before it ran.
  Cancelled,
}

impl TaskStatus {
  /// True when the scheduler will not touch the task again on its own.
  pub fn is_settled(&self) -> bool {
    matches!(
      self,
      TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled
    )
  }
}

/// The body of a task.
pub trait TaskWork: Send + Sync {
  /// Run the task. `false` reports a recoverable failure, the task is
  /// retried.
  fn run(&self) -> bool;

  /// Short description for logs.
  fn label(&self) -> String {
    String::from("task")
  }
}

/// Closure-backed task.
pub struct FnTask<F> {
  label: String,
  f: F,
}

impl<F> FnTask<F>
where
  F: Fn() -> bool + Send + Sync,
{
  pub fn new(label: impl Into<String>, f: F) -> Self {
    Self {
      label: label.into(),
      f,
    }
  }
}

impl<F> TaskWork for FnTask<F>
where
  F: Fn() -> bool + Send + Sync,
{
  fn run(&self) -> bool {
    (self.f)()
  }

  fn label(&self) -> String {
    self.label.clone()
  }
}

/// Notification sent to [`Scheduler::subscribe`](super::Scheduler::subscribe)
/// receivers whenever a task settles or is re-queued after a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskEvent {
  pub task: TaskId,
  pub label: String,
  pub status: TaskStatus,
  pub deadline: Deadline,
  /// Execution time of the attempt, 0 for cancellations.
  pub elapsed_us: u64,
  /// Failed attempts so far.
  pub attempts: u32,
}
