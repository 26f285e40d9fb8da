//! TaskGraph - a batch of tasks and dependency edges handed to
//! [`Scheduler::schedule`](super::Scheduler::schedule).
//!
//! Graph construction is cheap and never touches the scheduler lock. Edges
//! may point at tasks outside the graph (for example the production task of
//! another producer's tile); acyclicity is checked against the scheduler's
//! existing edges when the graph is scheduled.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::task::TaskId;

/// Set of tasks plus `successor → predecessor` dependency edges.
#[derive(Clone, Debug, Default)]
pub struct TaskGraph {
  tasks: Vec<TaskId>,
  /// `(successor, predecessor)` pairs.
  edges: Vec<(TaskId, TaskId)>,
}

impl TaskGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Graph of a single task.
  pub fn single(task: TaskId) -> Self {
    Self {
      tasks: vec![task],
      edges: Vec::new(),
    }
  }

  /// Add a task. Adding it twice is a no-op.
  pub fn add_task(&mut self, task: TaskId) {
    if !self.tasks.contains(&task) {
      self.tasks.push(task);
    }
  }

  /// `successor` may only run once `predecessor` is done.
  pub fn add_dependency(&mut self, successor: TaskId, predecessor: TaskId) {
    self.add_task(successor);
    self.add_task(predecessor);
    if !self.edges.contains(&(successor, predecessor)) {
      self.edges.push((successor, predecessor));
    }
  }

  /// Tasks in insertion order.
  pub fn tasks(&self) -> &[TaskId] {
    &self.tasks
  }

  /// `(successor, predecessor)` edges.
  pub fn dependencies(&self) -> &[(TaskId, TaskId)] {
    &self.edges
  }

  pub fn contains(&self, task: TaskId) -> bool {
    self.tasks.contains(&task)
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  /// Tasks with no predecessor inside this graph.
  pub fn first_tasks(&self) -> Vec<TaskId> {
    self
      .tasks
      .iter()
      .copied()
      .filter(|t| !self.edges.iter().any(|(s, _)| s == t))
      .collect()
  }

  /// Tasks with no successor inside this graph.
  pub fn last_tasks(&self) -> Vec<TaskId> {
    self
      .tasks
      .iter()
      .copied()
      .filter(|t| !self.edges.iter().any(|(_, p)| p == t))
      .collect()
  }

  /// `predecessor → successors` adjacency of this graph's own edges.
  pub(crate) fn successor_map(&self) -> HashMap<TaskId, SmallVec<[TaskId; 4]>> {
    let mut map: HashMap<TaskId, SmallVec<[TaskId; 4]>> = HashMap::new();
    for &(successor, predecessor) in &self.edges {
      map.entry(predecessor).or_default().push(successor);
    }
    map
  }

  /// A task on a dependency cycle formed by this graph's own edges.
  pub fn find_cycle(&self) -> Option<TaskId> {
    let map = self.successor_map();
    find_cycle(&self.tasks, |t, out| {
      if let Some(next) = map.get(&t) {
        out.extend(next.iter().copied());
      }
    })
  }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
  Visiting,
  Finished,
}

/// Iterative three-colour DFS over `successors`, starting from `roots`.
///
/// Returns a task that lies on a cycle, or `None` for a DAG.
pub(crate) fn find_cycle(
  roots: &[TaskId],
  mut successors: impl FnMut(TaskId, &mut Vec<TaskId>),
) -> Option<TaskId> {
  let mut marks: HashMap<TaskId, Mark> = HashMap::new();
  let mut scratch = Vec::new();

  for &root in roots {
    if marks.contains_key(&root) {
      continue;
    }
    // (task, successors still to visit)
    let mut stack: Vec<(TaskId, Vec<TaskId>)> = Vec::new();
    scratch.clear();
    successors(root, &mut scratch);
    marks.insert(root, Mark::Visiting);
    stack.push((root, scratch.clone()));

    while let Some((task, pending)) = stack.last_mut() {
      let task = *task;
      match pending.pop() {
        Some(next) => match marks.get(&next) {
          Some(Mark::Visiting) => return Some(next),
          Some(Mark::Finished) => {}
          None => {
            scratch.clear();
            successors(next, &mut scratch);
            marks.insert(next, Mark::Visiting);
            stack.push((next, scratch.clone()));
          }
        },
        None => {
          marks.insert(task, Mark::Finished);
          stack.pop();
        }
      }
    }
  }

  None
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod graph_test;
