//! TileProducer - the contract every tile source implements.
//!
//! The cache drives a producer through one lifecycle per tile:
//!
//! ```text
//! get_tile (miss)
//!   └─→ start_create_tile   build the task graph, pin upstream tiles
//!         └─→ [worker] begin_create_tile → do_create_tile → end_create_tile
//!               (repeated on retry or invalidation)
//! eviction / clear
//!   └─→ stop_create_tile    release upstream pins
//! ```
//!
//! A producer that reads tiles of another producer pins them in
//! `start_create_tile` (through [`PinnedTiles::acquire`]) and releases them in
//! `stop_create_tile` (through [`PinnedTiles::release`]). The ledger asserts
//! the two stay balanced.
//!
//! Every call after `start_create_tile` carries the production task. A tile
//! evicted and requested again gets a new task, so pins recorded under the
//! task belong to exactly one incarnation of the tile.

use std::collections::HashMap;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::warn;

use crate::cache::{TileCache, TileHandle};
use crate::deadline::Deadline;
use crate::error::Result;
use crate::scheduler::{TaskGraph, TaskId};
use crate::tile_id::{ProducerId, TileId, MAX_LEVEL};

/// Upstream dependency declared by [`TileProducer::referenced_producers`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProducerRef {
  /// Name of the cache the upstream producer is registered with.
  pub cache: String,
  pub producer: ProducerId,
}

/// Producer of tiles with payload `T`.
///
/// Implementations are shared between the cache and worker threads, so all
/// methods take `&self`; producers keep mutable bookkeeping behind locks.
pub trait TileProducer<T>: Send + Sync {
  /// Short name for logs.
  fn name(&self) -> &str;

  /// Whether data conceptually exists for this tile. Checked before any
  /// slot is allocated.
  fn has_tile(&self, level: u32, tx: u32, ty: u32) -> bool {
    let _ = (tx, ty);
    level <= self.max_level()
  }

  /// Deepest level this producer can build.
  fn max_level(&self) -> u32 {
    MAX_LEVEL
  }

  /// Whether the tile can be subdivided further.
  fn has_children(&self, level: u32, tx: u32, ty: u32) -> bool {
    let _ = (tx, ty);
    level < self.max_level()
  }

  /// Upstream producers whose tiles this producer reads.
  fn referenced_producers(&self, out: &mut Vec<ProducerRef>) {
    let _ = out;
  }

  /// Prepare production of `id` without running it.
  ///
  /// `task` is the tile's production task, already part of `graph`. Add
  /// upstream tasks as its predecessors. Must not block. An error aborts
  /// the `get_tile` call; `stop_create_tile` is still called.
  fn start_create_tile(
    &self,
    id: TileId,
    deadline: Deadline,
    task: TaskId,
    graph: &mut TaskGraph,
  ) -> Result<()> {
    let _ = (id, deadline, task, graph);
    Ok(())
  }

  /// Enter the execution context production needs.
  fn begin_create_tile(&self) {}

  /// Leave the context entered by `begin_create_tile`. Called even when
  /// `do_create_tile` fails or panics.
  fn end_create_tile(&self) {}

  /// Produce the tile into `data`. `task` is the one handed to
  /// `start_create_tile`. Returns false on a recoverable failure; the content
  /// is not exposed until a later attempt succeeds.
  fn do_create_tile(&self, id: TileId, task: TaskId, data: &mut T) -> bool;

  /// Release whatever `start_create_tile` acquired for `id` under `task`.
  fn stop_create_tile(&self, id: TileId, task: TaskId) {
    let _ = (id, task);
  }
}

/// Calls `begin_create_tile` now and `end_create_tile` on drop.
pub struct CreateTileScope<'a, T> {
  producer: &'a dyn TileProducer<T>,
}

impl<'a, T> CreateTileScope<'a, T> {
  pub fn new(producer: &'a dyn TileProducer<T>) -> Self {
    producer.begin_create_tile();
    Self { producer }
  }
}

impl<T> Drop for CreateTileScope<'_, T> {
  fn drop(&mut self) {
    self.producer.end_create_tile();
  }
}

/// Upstream tiles pinned on behalf of each tile a producer builds, keyed by
/// the tile's production task.
#[derive(Default)]
pub struct PinnedTiles {
  pins: Mutex<HashMap<TaskId, SmallVec<[TileHandle; 4]>>>,
}

impl PinnedTiles {
  pub fn new() -> Self {
    Self::default()
  }

  /// Pin `upstream` from `cache` for the tile built by `task`, and make
  /// `task` wait for its production.
  pub fn acquire<U: Send + Sync + 'static>(
    &self,
    task: TaskId,
    graph: &mut TaskGraph,
    cache: &TileCache<U>,
    upstream: TileId,
    deadline: Deadline,
  ) -> Result<TileHandle> {
    let handle = cache.get_tile(
      upstream.producer,
      upstream.level,
      upstream.tx,
      upstream.ty,
      deadline,
    )?;
    graph.add_dependency(task, handle.task());
    self.pins.lock().entry(task).or_default().push(handle);
    Ok(handle)
  }

  /// The pinned handle of `upstream`, if `task` holds one.
  pub fn get(&self, task: TaskId, upstream: TileId) -> Option<TileHandle> {
    self
      .pins
      .lock()
      .get(&task)
      .and_then(|handles| handles.iter().find(|h| h.id() == upstream).copied())
  }

  /// All handles pinned for `task`.
  pub fn handles(&self, task: TaskId) -> SmallVec<[TileHandle; 4]> {
    self.pins.lock().get(&task).cloned().unwrap_or_default()
  }

  /// Put every tile pinned for `task` back into `cache`. Returns how many
  /// were released.
  pub fn release<U: Send + Sync + 'static>(&self, task: TaskId, cache: &TileCache<U>) -> usize {
    let handles = self.pins.lock().remove(&task).unwrap_or_default();
    for handle in &handles {
      cache.put_tile(handle);
    }
    handles.len()
  }

  /// Drop the pins of `task` without releasing them, for when the
  /// upstream cache is already gone.
  pub fn forget(&self, task: TaskId) -> usize {
    self.pins.lock().remove(&task).map_or(0, |h| h.len())
  }

  /// Total pinned handles.
  pub fn len(&self) -> usize {
    self.pins.lock().values().map(|h| h.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.pins.lock().is_empty()
  }
}

impl Drop for PinnedTiles {
  fn drop(&mut self) {
    let leaked: usize = self.pins.get_mut().values().map(|h| h.len()).sum();
    if leaked > 0 && !std::thread::panicking() {
      warn!(leaked, "upstream tiles still pinned when their owner was dropped");
      debug_assert!(leaked == 0, "{leaked} upstream tiles never released");
    }
  }
}
