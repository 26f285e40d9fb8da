//! Error types for the tile cache and scheduler.
//!
//! Recoverable conditions (a full cache, a tile that is not ready yet) are
//! reported to the immediate caller. Invariant violations such as unbalanced
//! get/put pairs are debug assertions instead, see [`crate::cache`].

use thiserror::Error;

use crate::scheduler::{TaskId, TaskStatus};
use crate::tile_id::{ProducerId, TileId};

/// Errors returned by [`TileCache`](crate::TileCache) and
/// [`Scheduler`](crate::Scheduler) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
  /// Every slot is bound to a pinned tile (or a tile whose task is running).
  /// Try again once consumers have released tiles.
  #[error("cache '{cache}' exhausted: {pinned} of {capacity} slots pinned")]
  CapacityExhausted {
    cache: String,
    capacity: usize,
    pinned: usize,
  },

  /// No producer registered under this id.
  #[error("unknown producer {0}")]
  UnknownProducer(ProducerId),

  /// The cache does not accept more producers.
  #[error("producer limit of {limit} reached")]
  ProducerLimitReached { limit: usize },

  /// Tile coordinates outside `0..2^level`.
  #[error("tile {0} is outside its quadtree level")]
  InvalidTile(TileId),

  /// The producer declares that this tile has no data.
  #[error("producer has no tile {0}")]
  NoSuchTile(TileId),

  /// The handle refers to a tile that was released and evicted.
  #[error("stale handle for tile {0}")]
  StaleHandle(TileId),

  /// The production task has not completed successfully yet.
  #[error("tile {id} not ready ({status:?})")]
  NotReady { id: TileId, status: TaskStatus },

  /// Scheduling this graph would create a dependency cycle.
  #[error("dependency cycle through task {task:?}")]
  GraphCycle { task: TaskId },

  /// The task was released from the scheduler.
  #[error("unknown task {0:?}")]
  UnknownTask(TaskId),

  /// The task was cancelled and cannot be scheduled again.
  #[error("task {0:?} was cancelled")]
  TaskCancelled(TaskId),

  /// The scheduler is shut down.
  #[error("scheduler is shut down")]
  ShutDown,

  /// The worker thread pool could not be started.
  #[error("failed to start worker pool: {0}")]
  WorkerPool(String),
}

/// Errors from loading a [`PipelineConfig`](crate::config::PipelineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to parse config: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("invalid config: {0}")]
  Invalid(String),
}

/// Result alias used throughout the crate.
pub type Result<T, E = TileError> = std::result::Result<T, E>;
