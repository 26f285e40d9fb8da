//! Scheduler - deadline-ordered execution of task graphs.
//!
//! All graph bookkeeping (task arena, dependency edges, ready queue) lives
//! behind one short-held lock. Task bodies run outside it, either on a rayon
//! pool or inline through [`Scheduler::tick`].
//!
//! Every time a task becomes ready one pool job is spawned; the job pops the
//! most urgent ready task at the moment it starts, so the queue order (not
//! the spawn order) decides what runs next.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};
use web_time::Instant;

use super::graph::{find_cycle, TaskGraph};
use super::task::{FnTask, TaskEvent, TaskId, TaskStatus, TaskWork};
use crate::config::SchedulerConfig;
use crate::deadline::Deadline;
use crate::error::{Result, TileError};
use crate::metrics::SchedulerMetrics;

struct TaskNode {
  work: Arc<dyn TaskWork>,
  label: String,
  status: TaskStatus,
  /// Someone asked for this task to run and it has not settled since.
  scheduled: bool,
  deadline: Deadline,
  predecessors: SmallVec<[TaskId; 4]>,
  successors: SmallVec<[TaskId; 4]>,
  /// Failed attempts since the last success or reschedule.
  attempts: u32,
  /// Invalidated while running; execute again once finished.
  rerun: bool,
  /// Sequence number of the live ready-queue entry.
  queue_stamp: u64,
}

#[derive(Default)]
struct Entry {
  generation: u32,
  node: Option<TaskNode>,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct ReadyEntry {
  deadline: Deadline,
  seq: u64,
  task: TaskId,
}

#[derive(Default)]
struct State {
  entries: Vec<Entry>,
  free: Vec<u32>,
  /// Min-heap on (deadline, seq); entries whose stamp no longer matches are
  /// skipped when popped.
  ready: BinaryHeap<Reverse<ReadyEntry>>,
  next_seq: u64,
  live: usize,
  running: usize,
  shut_down: bool,
  subscribers: Vec<Sender<TaskEvent>>,
  metrics: SchedulerMetrics,
}

impl State {
  fn node(&self, id: TaskId) -> Option<&TaskNode> {
    self
      .entries
      .get(id.index as usize)
      .filter(|e| e.generation == id.generation)
      .and_then(|e| e.node.as_ref())
  }

  fn node_mut(&mut self, id: TaskId) -> Option<&mut TaskNode> {
    self
      .entries
      .get_mut(id.index as usize)
      .filter(|e| e.generation == id.generation)
      .and_then(|e| e.node.as_mut())
  }

  fn insert(&mut self, node: TaskNode) -> TaskId {
    self.live += 1;
    if let Some(index) = self.free.pop() {
      let entry = &mut self.entries[index as usize];
      entry.node = Some(node);
      return TaskId {
        index,
        generation: entry.generation,
      };
    }
    let index = self.entries.len() as u32;
    self.entries.push(Entry {
      generation: 0,
      node: Some(node),
    });
    TaskId {
      index,
      generation: 0,
    }
  }

  fn remove(&mut self, id: TaskId) -> Option<TaskNode> {
    let entry = self
      .entries
      .get_mut(id.index as usize)
      .filter(|e| e.generation == id.generation)?;
    let node = entry.node.take()?;
    entry.generation = entry.generation.wrapping_add(1);
    self.free.push(id.index);
    self.live -= 1;
    Some(node)
  }

  fn status(&self, id: TaskId) -> Option<TaskStatus> {
    self.node(id).map(|n| n.status)
  }

  /// Released predecessors count as done.
  fn predecessors_done(&self, id: TaskId) -> bool {
    self.node(id).map_or(false, |node| {
      node
        .predecessors
        .iter()
        .all(|p| self.status(*p).map_or(true, |s| s == TaskStatus::Done))
    })
  }

  /// True when waiting on this task can no longer make progress by itself.
  fn is_settled(&self, id: TaskId) -> bool {
    match self.node(id) {
      None => true,
      Some(node) => match node.status {
        TaskStatus::Done | TaskStatus::Cancelled => true,
        TaskStatus::Pending | TaskStatus::Failed => !node.scheduled,
        TaskStatus::Ready | TaskStatus::Running => false,
      },
    }
  }

  /// Put a task on the ready queue with a fresh stamp. After shutdown the
  /// task is cancelled instead.
  fn enqueue(&mut self, id: TaskId) {
    let seq = self.next_seq;
    self.next_seq += 1;
    let shut_down = self.shut_down;
    let Some(node) = self.node_mut(id) else {
      return;
    };
    if shut_down {
      node.status = TaskStatus::Cancelled;
      node.scheduled = false;
      self.metrics.record_cancelled();
      self.emit(id, 0);
      return;
    }
    node.status = TaskStatus::Ready;
    node.queue_stamp = seq;
    let deadline = node.deadline;
    trace!(task = ?id, %deadline, "task ready");
    self.ready.push(Reverse(ReadyEntry {
      deadline,
      seq,
      task: id,
    }));
  }

  /// Pop the most urgent live ready entry and mark it running.
  fn pop_ready(&mut self) -> Option<(TaskId, Arc<dyn TaskWork>, String)> {
    while let Some(Reverse(entry)) = self.ready.pop() {
      let Some(node) = self.node_mut(entry.task) else {
        continue;
      };
      if node.status != TaskStatus::Ready || node.queue_stamp != entry.seq {
        continue;
      }
      node.status = TaskStatus::Running;
      let picked = (entry.task, Arc::clone(&node.work), node.label.clone());
      self.running += 1;
      let running = self.running;
      self.metrics.record_running(running);
      return Some(picked);
    }
    None
  }

  /// Mark tasks (and their unfinished predecessors) as wanted, promoting
  /// deadlines. Returns the number of tasks pushed on the ready queue.
  fn mark_scheduled(&mut self, roots: &[(TaskId, Deadline)]) -> usize {
    let mut stack: Vec<(TaskId, Deadline)> = roots.to_vec();
    // Most urgent root is visited first.
    stack.sort_by(|a, b| b.1.cmp(&a.1));

    let mut visited = HashSet::new();
    let mut queued = 0;

    while let Some((id, deadline)) = stack.pop() {
      if !visited.insert(id) {
        continue;
      }
      let Some(node) = self.node_mut(id) else {
        continue;
      };
      let promoted = deadline < node.deadline;
      node.deadline = node.deadline.most_urgent(deadline);

      let status = node.status;
      match status {
        TaskStatus::Done | TaskStatus::Cancelled | TaskStatus::Running => {}
        TaskStatus::Ready => {
          if promoted {
            self.enqueue(id);
            queued += 1;
          }
        }
        TaskStatus::Pending | TaskStatus::Failed => {
          if status == TaskStatus::Failed {
            node.status = TaskStatus::Pending;
            node.attempts = 0;
          }
          node.scheduled = true;
          let predecessors = node.predecessors.clone();

          let mut waiting = false;
          for p in predecessors {
            match self.status(p) {
              None | Some(TaskStatus::Done) => {}
              Some(_) => {
                waiting = true;
                stack.push((p, deadline));
              }
            }
          }
          if !waiting {
            self.enqueue(id);
            queued += 1;
          }
        }
      }
    }

    queued
  }

  /// Add the edge `successor → predecessor`. A queued successor goes back
  /// to waiting if the new predecessor is not done.
  fn link(&mut self, successor: TaskId, predecessor: TaskId) {
    let predecessor_done = self.status(predecessor) == Some(TaskStatus::Done);
    if let Some(node) = self.node_mut(successor) {
      if node.predecessors.contains(&predecessor) {
        return;
      }
      node.predecessors.push(predecessor);
      if node.status == TaskStatus::Ready && !predecessor_done {
        node.status = TaskStatus::Pending;
      }
    }
    if let Some(node) = self.node_mut(predecessor) {
      node.successors.push(successor);
    }
  }

  fn emit(&mut self, id: TaskId, elapsed_us: u64) {
    let Some(node) = self.node(id) else {
      return;
    };
    let event = TaskEvent {
      task: id,
      label: node.label.clone(),
      status: node.status,
      deadline: node.deadline,
      elapsed_us,
      attempts: node.attempts,
    };
    self.send(event);
  }

  fn send(&mut self, event: TaskEvent) {
    if self.subscribers.is_empty() {
      return;
    }
    self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
  }

  /// Record the outcome of a run. Returns the number of tasks queued.
  fn complete(&mut self, id: TaskId, success: bool, elapsed_us: u64, max_retries: u32) -> usize {
    self.running -= 1;
    let Some(node) = self.node_mut(id) else {
      return 0;
    };
    let deadline = node.deadline;
    let label = node.label.clone();

    if success {
      node.attempts = 0;
      if node.rerun {
        node.rerun = false;
        node.status = TaskStatus::Pending;
        node.scheduled = true;
        debug!(task = ?id, %label, "inputs changed while running, executing again");
        self.metrics.record_attempt(elapsed_us, true, false);
        return self.mark_scheduled(&[(id, deadline)]);
      }

      node.status = TaskStatus::Done;
      node.scheduled = false;
      let successors = node.successors.clone();
      self.metrics.record_attempt(elapsed_us, true, false);
      trace!(task = ?id, %label, elapsed_us, "task done");
      self.emit(id, elapsed_us);

      let mut queued = 0;
      for s in successors {
        let waiting = self
          .node(s)
          .map_or(false, |n| n.status == TaskStatus::Pending && n.scheduled);
        if waiting && self.predecessors_done(s) {
          self.enqueue(s);
          queued += 1;
        }
      }
      return queued;
    }

    node.rerun = false;
    node.attempts += 1;
    let attempts = node.attempts;
    if attempts <= max_retries {
      node.status = TaskStatus::Pending;
      node.scheduled = true;
      warn!(task = ?id, %label, attempts, "task failed, retrying");
      self.metrics.record_attempt(elapsed_us, false, true);
      let queued = self.mark_scheduled(&[(id, deadline)]);
      self.emit(id, elapsed_us);
      queued
    } else {
      node.status = TaskStatus::Failed;
      node.scheduled = false;
      error!(task = ?id, %label, attempts, "task failed, retries exhausted");
      self.metrics.record_attempt(elapsed_us, false, false);
      self.emit(id, elapsed_us);
      self.fail_downstream(id);
      0
    }
  }

  /// Settle every scheduled task waiting on the failed task `id` as
  /// `Failed`. Rescheduling one of them retries the whole chain.
  fn fail_downstream(&mut self, id: TaskId) {
    let mut stack: Vec<TaskId> = self
      .node(id)
      .map(|n| n.successors.to_vec())
      .unwrap_or_default();
    let mut visited = HashSet::new();

    while let Some(t) = stack.pop() {
      if !visited.insert(t) {
        continue;
      }
      let Some(node) = self.node_mut(t) else {
        continue;
      };
      if node.status != TaskStatus::Pending || !node.scheduled {
        continue;
      }
      node.status = TaskStatus::Failed;
      node.scheduled = false;
      stack.extend(node.successors.iter().copied());
      debug!(task = ?t, failed = ?id, "upstream failed");
      self.emit(t, 0);
    }
  }
}

struct Shared {
  state: Mutex<State>,
  /// Signalled whenever a task settles.
  changed: Condvar,
  config: SchedulerConfig,
  pool: Option<rayon::ThreadPool>,
}

/// Task graph scheduler.
///
/// Cheap to clone; clones share the same task arena and worker pool. Pass
/// it explicitly to every [`TileCache`](crate::TileCache) that should share
/// workers and dependency edges.
#[derive(Clone)]
pub struct Scheduler {
  shared: Arc<Shared>,
}

impl Scheduler {
  /// Create a scheduler. `worker_threads == 0` gives an inline scheduler.
  pub fn new(config: SchedulerConfig) -> Result<Self> {
    let pool = if config.is_inline() {
      None
    } else {
      let prefix = config.thread_name_prefix.clone();
      let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_threads)
        .thread_name(move |i| format!("{prefix}-{i}"))
        .build()
        .map_err(|e| TileError::WorkerPool(e.to_string()))?;
      Some(pool)
    };
    debug!(workers = config.worker_threads, "scheduler started");

    Ok(Self {
      shared: Arc::new(Shared {
        state: Mutex::new(State::default()),
        changed: Condvar::new(),
        config,
        pool,
      }),
    })
  }

  /// Scheduler without worker threads; drive it with [`Scheduler::tick`].
  pub fn inline() -> Self {
    let config = SchedulerConfig::inline();
    Self {
      shared: Arc::new(Shared {
        state: Mutex::new(State::default()),
        changed: Condvar::new(),
        config,
        pool: None,
      }),
    }
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.shared.config
  }

  /// True when tasks only run through [`Scheduler::tick`].
  pub fn is_inline(&self) -> bool {
    self.shared.pool.is_none()
  }

  /// Create a task without scheduling it.
  pub fn create_task<W: TaskWork + 'static>(&self, work: W, deadline: Deadline) -> TaskId {
    let label = work.label();
    let node = TaskNode {
      work: Arc::new(work),
      label,
      status: TaskStatus::Pending,
      scheduled: false,
      deadline,
      predecessors: SmallVec::new(),
      successors: SmallVec::new(),
      attempts: 0,
      rerun: false,
      queue_stamp: 0,
    };
    self.shared.state.lock().insert(node)
  }

  /// Create a closure-backed task without scheduling it.
  pub fn create_fn_task<F>(&self, label: impl Into<String>, deadline: Deadline, f: F) -> TaskId
  where
    F: Fn() -> bool + Send + Sync + 'static,
  {
    self.create_task(FnTask::new(label, f), deadline)
  }

  /// Insert the graph's edges and queue its tasks.
  ///
  /// Unfinished predecessors outside the graph are scheduled too. Fails
  /// without changing anything if an edge would close a cycle.
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "scheduler::schedule"))]
  pub fn schedule(&self, graph: &TaskGraph) -> Result<()> {
    let queued = {
      let mut state = self.shared.state.lock();
      if state.shut_down {
        return Err(TileError::ShutDown);
      }
      for &task in graph.tasks() {
        match state.status(task) {
          None => return Err(TileError::UnknownTask(task)),
          Some(TaskStatus::Cancelled) => return Err(TileError::TaskCancelled(task)),
          Some(_) => {}
        }
      }

      let extra = graph.successor_map();
      let cycle = find_cycle(graph.tasks(), |t, out| {
        if let Some(node) = state.node(t) {
          out.extend(node.successors.iter().copied());
        }
        if let Some(next) = extra.get(&t) {
          out.extend(next.iter().copied());
        }
      });
      if let Some(task) = cycle {
        error!(?task, tasks = graph.len(), "dependency cycle, graph not scheduled");
        return Err(TileError::GraphCycle { task });
      }

      for &(successor, predecessor) in graph.dependencies() {
        state.link(successor, predecessor);
      }

      let roots: Vec<(TaskId, Deadline)> = graph
        .tasks()
        .iter()
        .filter_map(|&t| state.node(t).map(|n| (t, n.deadline)))
        .collect();
      state.mark_scheduled(&roots)
    };

    self.dispatch(queued);
    Ok(())
  }

  /// Queue one task (and its unfinished predecessors) with at least the
  /// given urgency. A failed task gets a fresh set of retries.
  pub fn schedule_task(&self, task: TaskId, deadline: Deadline) -> Result<()> {
    let queued = {
      let mut state = self.shared.state.lock();
      if state.shut_down {
        return Err(TileError::ShutDown);
      }
      match state.status(task) {
        None => return Err(TileError::UnknownTask(task)),
        Some(TaskStatus::Cancelled) => return Err(TileError::TaskCancelled(task)),
        Some(_) => {}
      }
      state.mark_scheduled(&[(task, deadline)])
    };

    self.dispatch(queued);
    Ok(())
  }

  /// Mark a task and everything downstream of it as needing re-execution.
  ///
  /// Running tasks execute again once they finish and queued tasks stay
  /// queued behind their predecessors. Finished tasks downstream of `task`
  /// are queued again, which pulls `task` back in; `task` itself otherwise
  /// waits until it is scheduled again.
  pub fn invalidate(&self, task: TaskId) -> Result<()> {
    let queued = {
      let mut state = self.shared.state.lock();
      if state.node(task).is_none() {
        return Err(TileError::UnknownTask(task));
      }

      let mut visited = HashSet::new();
      let mut stack = vec![task];
      let mut requeue = Vec::new();

      while let Some(t) = stack.pop() {
        if !visited.insert(t) {
          continue;
        }
        let Some(node) = state.node_mut(t) else {
          continue;
        };
        let status = node.status;
        match status {
          TaskStatus::Cancelled => continue,
          TaskStatus::Running => node.rerun = true,
          TaskStatus::Done | TaskStatus::Failed => {
            node.status = TaskStatus::Pending;
            node.scheduled = false;
            node.attempts = 0;
            if t != task {
              requeue.push((t, node.deadline));
            }
          }
          TaskStatus::Ready => {
            node.status = TaskStatus::Pending;
            requeue.push((t, node.deadline));
          }
          TaskStatus::Pending => {
            if node.scheduled {
              requeue.push((t, node.deadline));
            }
          }
        }
        stack.extend(node.successors.iter().copied());
      }

      trace!(?task, affected = visited.len(), "invalidated");
      state.mark_scheduled(&requeue)
    };

    self.dispatch(queued);
    Ok(())
  }

  /// Cancel a task that has not started. Returns false for running or done
  /// tasks.
  pub fn cancel(&self, task: TaskId) -> Result<bool> {
    let mut state = self.shared.state.lock();
    let node = state.node_mut(task).ok_or(TileError::UnknownTask(task))?;
    let status = node.status;
    match status {
      TaskStatus::Running | TaskStatus::Done => Ok(false),
      TaskStatus::Cancelled => Ok(true),
      TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Failed => {
        node.status = TaskStatus::Cancelled;
        node.scheduled = false;
        state.metrics.record_cancelled();
        state.emit(task, 0);
        self.shared.changed.notify_all();
        Ok(true)
      }
    }
  }

  /// Remove a task and its edges from the scheduler.
  ///
  /// Refused (`Ok(false)`) while the task is running. A task that was still
  /// queued is reported as cancelled.
  pub fn try_release(&self, task: TaskId) -> Result<bool> {
    let queued = {
      let mut state = self.shared.state.lock();
      match state.status(task) {
        None => return Err(TileError::UnknownTask(task)),
        Some(TaskStatus::Running) => return Ok(false),
        Some(_) => {}
      }

      let was_queued = state.node(task).map_or(false, |n| {
        n.scheduled && matches!(n.status, TaskStatus::Pending | TaskStatus::Ready)
      });
      if was_queued {
        if let Some(node) = state.node_mut(task) {
          node.status = TaskStatus::Cancelled;
        }
        state.metrics.record_cancelled();
        state.emit(task, 0);
      }

      let Some(node) = state.remove(task) else {
        return Err(TileError::UnknownTask(task));
      };
      for p in &node.predecessors {
        if let Some(pred) = state.node_mut(*p) {
          pred.successors.retain(|s| *s != task);
        }
      }

      let mut queued = 0;
      for s in &node.successors {
        let Some(succ) = state.node_mut(*s) else {
          continue;
        };
        succ.predecessors.retain(|p| *p != task);
        let waiting = succ.status == TaskStatus::Pending && succ.scheduled;
        if waiting && state.predecessors_done(*s) {
          state.enqueue(*s);
          queued += 1;
        }
      }
      self.shared.changed.notify_all();
      queued
    };

    self.dispatch(queued);
    Ok(true)
  }

  /// Current state of a task, `None` once released.
  pub fn status(&self, task: TaskId) -> Option<TaskStatus> {
    self.shared.state.lock().status(task)
  }

  pub fn is_done(&self, task: TaskId) -> bool {
    self.status(task) == Some(TaskStatus::Done)
  }

  /// Current (possibly promoted) deadline of a task.
  pub fn deadline(&self, task: TaskId) -> Option<Deadline> {
    self.shared.state.lock().node(task).map(|n| n.deadline)
  }

  /// Direct predecessors of a task.
  pub fn dependencies(&self, task: TaskId) -> Vec<TaskId> {
    self
      .shared
      .state
      .lock()
      .node(task)
      .map(|n| n.predecessors.to_vec())
      .unwrap_or_default()
  }

  /// Run up to `max` ready tasks on the calling thread. Returns how many
  /// ran.
  pub fn tick(&self, max: usize) -> usize {
    let mut ran = 0;
    while ran < max && run_next(&self.shared) {
      ran += 1;
    }
    ran
  }

  /// Run ready tasks on the calling thread until none are left.
  pub fn run_until_idle(&self) -> usize {
    self.tick(usize::MAX)
  }

  /// Block until every task in `tasks` is done, or until they settle
  /// otherwise (failed, cancelled, released) or `timeout` elapses.
  ///
  /// Returns true only if all tasks are done. Inline schedulers execute
  /// ready tasks while waiting.
  pub fn wait(&self, tasks: &[TaskId], timeout: Duration) -> bool {
    let start = Instant::now();

    if self.is_inline() {
      loop {
        {
          let state = self.shared.state.lock();
          if tasks.iter().all(|t| state.is_settled(*t)) {
            return tasks.iter().all(|t| state.status(*t) == Some(TaskStatus::Done));
          }
        }
        if start.elapsed() >= timeout || self.tick(1) == 0 {
          return false;
        }
      }
    }

    let mut state = self.shared.state.lock();
    loop {
      if tasks.iter().all(|t| state.is_settled(*t)) {
        return tasks.iter().all(|t| state.status(*t) == Some(TaskStatus::Done));
      }
      let elapsed = start.elapsed();
      if elapsed >= timeout {
        return false;
      }
      self.shared.changed.wait_for(&mut state, timeout - elapsed);
    }
  }

  /// Receive a [`TaskEvent`] for every settled task from now on.
  pub fn subscribe(&self) -> Receiver<TaskEvent> {
    let (tx, rx) = crossbeam_channel::unbounded();
    self.shared.state.lock().subscribers.push(tx);
    rx
  }

  /// Tasks that were asked to run and have not settled, running ones
  /// included.
  pub fn pending_count(&self) -> usize {
    let state = self.shared.state.lock();
    state
      .entries
      .iter()
      .filter_map(|e| e.node.as_ref())
      .filter(|n| n.status == TaskStatus::Running || (n.scheduled && !n.status.is_settled()))
      .count()
  }

  pub fn running_count(&self) -> usize {
    self.shared.state.lock().running
  }

  /// Tasks alive in the arena.
  pub fn task_count(&self) -> usize {
    self.shared.state.lock().live
  }

  pub fn metrics(&self) -> SchedulerMetrics {
    self.shared.state.lock().metrics.clone()
  }

  /// Stop accepting work, cancel everything queued and wait for running
  /// tasks to finish.
  pub fn shutdown(&self) {
    let mut state = self.shared.state.lock();
    state.shut_down = true;
    state.ready.clear();

    let queued: Vec<TaskId> = state
      .entries
      .iter()
      .enumerate()
      .filter_map(|(index, e)| {
        let node = e.node.as_ref()?;
        let waiting = node.status == TaskStatus::Ready
          || (node.status == TaskStatus::Pending && node.scheduled);
        waiting.then_some(TaskId {
          index: index as u32,
          generation: e.generation,
        })
      })
      .collect();

    for task in &queued {
      if let Some(node) = state.node_mut(*task) {
        node.status = TaskStatus::Cancelled;
        node.scheduled = false;
      }
      state.metrics.record_cancelled();
      state.emit(*task, 0);
    }
    debug!(cancelled = queued.len(), running = state.running, "scheduler shutting down");

    self.shared.changed.notify_all();
    while state.running > 0 {
      self.shared.changed.wait(&mut state);
    }
  }

  fn dispatch(&self, count: usize) {
    dispatch(&self.shared, count);
  }
}

fn dispatch(shared: &Arc<Shared>, count: usize) {
  let Some(pool) = &shared.pool else {
    return;
  };
  for _ in 0..count {
    let shared = Arc::clone(shared);
    pool.spawn(move || {
      run_next(&shared);
    });
  }
}

/// Pop and execute the most urgent ready task. Returns false if none was
/// ready.
fn run_next(shared: &Arc<Shared>) -> bool {
  let Some((id, work, label)) = shared.state.lock().pop_ready() else {
    return false;
  };

  #[cfg(feature = "profiling")]
  let _span = tracing::info_span!("task", label = %label).entered();

  let start = Instant::now();
  let success = match catch_unwind(AssertUnwindSafe(|| work.run())) {
    Ok(success) => success,
    Err(_) => {
      error!(task = ?id, %label, "task panicked");
      false
    }
  };
  let elapsed_us = start.elapsed().as_micros() as u64;

  let queued = {
    let mut state = shared.state.lock();
    let queued = state.complete(id, success, elapsed_us, shared.config.max_retries);
    shared.changed.notify_all();
    queued
  };
  dispatch(shared, queued);
  true
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod runner_test;
