//! Task scheduler.
//!
//! Tasks are created in an arena owned by the [`Scheduler`], linked into
//! dependency graphs with [`TaskGraph`] and executed in deadline order once
//! their predecessors are done.
//!
//! ```text
//! create_task ──► TaskGraph::add_dependency ──► Scheduler::schedule
//!                                                   │
//!                        ready queue (deadline, seq)◄┘
//!                                │
//!                   rayon worker / Scheduler::tick
//! ```

pub mod graph;
mod runner;
pub mod task;

pub use graph::TaskGraph;
pub use runner::Scheduler;
pub use task::{FnTask, TaskEvent, TaskId, TaskStatus, TaskWork};
