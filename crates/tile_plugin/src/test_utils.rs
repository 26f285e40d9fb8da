//! Mock producers shared by the cache tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::cache::TileCache;
use crate::config::CacheConfig;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::producer::{PinnedTiles, ProducerRef, TileProducer};
use crate::scheduler::{Scheduler, TaskGraph, TaskId};
use crate::storage::SlotPool;
use crate::tile_id::{ProducerId, TileId};

/// Value a [`CountingProducer`] writes for `id` (before any offset).
pub fn tile_value(id: TileId) -> u64 {
  id.level as u64 * 1_000_000 + id.tx as u64 * 1_000 + id.ty as u64
}

/// Cache of `u64` tiles.
pub fn u64_cache(name: &str, capacity: usize, scheduler: &Scheduler) -> TileCache<u64> {
  TileCache::new(
    CacheConfig::new(name, capacity),
    SlotPool::objects(capacity, 1),
    scheduler.clone(),
  )
}

/// Producer writing [`tile_value`] plus an adjustable offset, counting
/// every lifecycle call.
#[derive(Default)]
pub struct CountingProducer {
  pub created: AtomicU32,
  pub started: AtomicU32,
  pub stopped: AtomicU32,
  pub begins: AtomicU32,
  pub ends: AtomicU32,
  /// Added to every value written.
  pub offset: AtomicU64,
  /// Attempts left that report failure.
  pub failures: AtomicU32,
  /// `(level, tx, ty)` without data.
  pub missing: Mutex<HashSet<(u32, u32, u32)>>,
  /// When set, each production waits for one message.
  pub gate: Option<Receiver<()>>,
}

impl CountingProducer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fails the first `n` attempts.
  pub fn failing(n: u32) -> Self {
    Self {
      failures: AtomicU32::new(n),
      ..Self::default()
    }
  }

  /// Blocks each production until `gate` yields.
  pub fn gated(gate: Receiver<()>) -> Self {
    Self {
      gate: Some(gate),
      ..Self::default()
    }
  }

  pub fn created(&self) -> u32 {
    self.created.load(Ordering::SeqCst)
  }
}

impl TileProducer<u64> for CountingProducer {
  fn name(&self) -> &str {
    "counting"
  }

  fn has_tile(&self, level: u32, tx: u32, ty: u32) -> bool {
    !self.missing.lock().contains(&(level, tx, ty))
  }

  fn start_create_tile(
    &self,
    _id: TileId,
    _deadline: Deadline,
    _task: TaskId,
    _graph: &mut TaskGraph,
  ) -> Result<()> {
    self.started.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn begin_create_tile(&self) {
    self.begins.fetch_add(1, Ordering::SeqCst);
  }

  fn end_create_tile(&self) {
    self.ends.fetch_add(1, Ordering::SeqCst);
  }

  fn do_create_tile(&self, id: TileId, _task: TaskId, data: &mut u64) -> bool {
    if let Some(gate) = &self.gate {
      let _ = gate.recv();
    }
    let failing = self
      .failures
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if failing {
      return false;
    }
    *data = tile_value(id) + self.offset.load(Ordering::SeqCst);
    self.created.fetch_add(1, Ordering::SeqCst);
    true
  }

  fn stop_create_tile(&self, _id: TileId, _task: TaskId) {
    self.stopped.fetch_add(1, Ordering::SeqCst);
  }
}

/// Producer reading the upstream tile at the same coordinates and writing
/// its value plus one.
pub struct ChainedProducer {
  pub upstream: TileCache<u64>,
  pub upstream_producer: ProducerId,
  pub pins: PinnedTiles,
  /// Productions that found their upstream tile not ready.
  pub violations: AtomicU32,
  pub created: AtomicU32,
}

impl ChainedProducer {
  pub fn new(upstream: TileCache<u64>, upstream_producer: ProducerId) -> Self {
    Self {
      upstream,
      upstream_producer,
      pins: PinnedTiles::new(),
      violations: AtomicU32::new(0),
      created: AtomicU32::new(0),
    }
  }

  fn upstream_id(&self, id: TileId) -> TileId {
    id.with_producer(self.upstream_producer)
  }
}

impl TileProducer<u64> for ChainedProducer {
  fn name(&self) -> &str {
    "chained"
  }

  fn referenced_producers(&self, out: &mut Vec<ProducerRef>) {
    out.push(ProducerRef {
      cache: self.upstream.name().to_string(),
      producer: self.upstream_producer,
    });
  }

  fn start_create_tile(
    &self,
    id: TileId,
    deadline: Deadline,
    task: TaskId,
    graph: &mut TaskGraph,
  ) -> Result<()> {
    self
      .pins
      .acquire(task, graph, &self.upstream, self.upstream_id(id), deadline)?;
    Ok(())
  }

  fn do_create_tile(&self, id: TileId, task: TaskId, data: &mut u64) -> bool {
    let Some(handle) = self.pins.get(task, self.upstream_id(id)) else {
      self.violations.fetch_add(1, Ordering::SeqCst);
      return false;
    };
    match self.upstream.tile_data(&handle) {
      Ok(value) => {
        *data = *value + 1;
        self.created.fetch_add(1, Ordering::SeqCst);
        true
      }
      Err(_) => {
        self.violations.fetch_add(1, Ordering::SeqCst);
        false
      }
    }
  }

  fn stop_create_tile(&self, _id: TileId, task: TaskId) {
    self.pins.release(task, &self.upstream);
  }
}
