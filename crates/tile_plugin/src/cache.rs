//! TileCache - reference-counted, LRU-evicting cache of produced tiles.
//!
//! The cache owns every tile record in an arena; consumers hold
//! [`TileHandle`]s (arena index + generation) and pin tiles with
//! `get_tile` / `put_tile`. A tile nobody uses stays cached and valid until a
//! slot is actually needed for something else.
//!
//! ```text
//! get_tile(id)
//!   ├─ hit  → users += 1, move to MRU
//!   └─ miss → new_slot() or evict LRU { users == 0, task not running }
//!             → start_create_tile → Scheduler::schedule
//! put_tile(handle) → users -= 1   (tile stays cached)
//! ```
//!
//! # Locking
//!
//! One mutex guards the arena, the LRU index and the producer table. It is
//! not held across `start_create_tile` / `stop_create_tile` (which may call
//! other caches, or this one) or while touching slot payloads. `has_tile` is
//! asked under it and must not call into caches. Scheduler calls are made
//! under it; the scheduler never calls back into a cache.

use std::sync::{Arc, Weak};
use std::time::Duration;

use lru::LruCache;
use parking_lot::{Mutex, RwLockReadGuard};
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::deadline::Deadline;
use crate::error::{Result, TileError};
use crate::producer::{CreateTileScope, ProducerRef, TileProducer};
use crate::scheduler::{Scheduler, TaskGraph, TaskId, TaskStatus, TaskWork};
use crate::storage::{SlotId, SlotPool, TileStorage};
use crate::tile_id::{ProducerId, TileId};

// =============================================================================
// Handles and snapshots
// =============================================================================

/// Consumer handle to a cached tile.
///
/// Copyable and cheap. Valid while the tile is pinned; once the tile is
/// released and evicted the handle is stale and cache calls report
/// [`TileError::StaleHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileHandle {
  id: TileId,
  index: u32,
  generation: u32,
  task: TaskId,
  slot: SlotId,
}

impl TileHandle {
  pub fn id(&self) -> TileId {
    self.id
  }

  /// Production task; poll it with [`Scheduler::status`].
  pub fn task(&self) -> TaskId {
    self.task
  }

  pub fn slot(&self) -> SlotId {
    self.slot
  }
}

/// Point-in-time view of a tile record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
  pub id: TileId,
  pub slot: SlotId,
  pub task: TaskId,
  pub users: u32,
  pub status: TaskStatus,
}

/// Cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub capacity: usize,
  /// Tiles with at least one user.
  pub used: usize,
  /// Cached tiles nobody uses (evictable unless running).
  pub unused: usize,
  pub free_slots: usize,
  pub hits: u64,
  pub misses: u64,
  pub evictions: u64,
  pub prefetches: u64,
  /// `get_tile` calls that failed with `CapacityExhausted`.
  pub exhausted: u64,
}

// =============================================================================
// Arena
// =============================================================================

struct TileRecord<T> {
  id: TileId,
  slot: SlotId,
  task: TaskId,
  users: u32,
  /// Between slot allocation and the production graph being scheduled.
  starting: bool,
  producer: Arc<dyn TileProducer<T>>,
}

struct ArenaEntry<T> {
  generation: u32,
  record: Option<TileRecord<T>>,
}

struct CacheState<T> {
  producers: Vec<Arc<dyn TileProducer<T>>>,
  entries: Vec<ArenaEntry<T>>,
  free: Vec<u32>,
  /// TileId → arena index, in recency order.
  index: LruCache<TileId, u32>,
  stats: CacheStats,
}

impl<T> CacheState<T> {
  fn producer(&self, id: ProducerId) -> Result<Arc<dyn TileProducer<T>>> {
    self
      .producers
      .get(id.0 as usize)
      .cloned()
      .ok_or(TileError::UnknownProducer(id))
  }

  fn record(&self, index: u32, generation: u32) -> Option<&TileRecord<T>> {
    self
      .entries
      .get(index as usize)
      .filter(|e| e.generation == generation)
      .and_then(|e| e.record.as_ref())
  }

  fn record_mut(&mut self, index: u32, generation: u32) -> Option<&mut TileRecord<T>> {
    self
      .entries
      .get_mut(index as usize)
      .filter(|e| e.generation == generation)
      .and_then(|e| e.record.as_mut())
  }

  fn handle_record(&self, handle: &TileHandle) -> Result<&TileRecord<T>> {
    self
      .record(handle.index, handle.generation)
      .ok_or(TileError::StaleHandle(handle.id))
  }

  fn insert(&mut self, record: TileRecord<T>) -> (u32, u32) {
    let id = record.id;
    let (index, generation) = match self.free.pop() {
      Some(index) => {
        let entry = &mut self.entries[index as usize];
        entry.record = Some(record);
        (index, entry.generation)
      }
      None => {
        let index = self.entries.len() as u32;
        self.entries.push(ArenaEntry {
          generation: 0,
          record: Some(record),
        });
        (index, 0)
      }
    };
    self.index.put(id, index);
    (index, generation)
  }

  fn remove(&mut self, index: u32) -> Option<TileRecord<T>> {
    let entry = self.entries.get_mut(index as usize)?;
    let record = entry.record.take()?;
    entry.generation = entry.generation.wrapping_add(1);
    self.free.push(index);
    self.index.pop(&record.id);
    Some(record)
  }

  fn records(&self) -> impl Iterator<Item = &TileRecord<T>> {
    self.entries.iter().filter_map(|e| e.record.as_ref())
  }

  fn pinned_count(&self) -> usize {
    self.records().filter(|r| r.users > 0).count()
  }
}

/// A tile removed from the arena whose producer still has to be told.
struct Evicted<T> {
  id: TileId,
  task: TaskId,
  producer: Arc<dyn TileProducer<T>>,
}

impl<T> Evicted<T> {
  fn stop(self) {
    self.producer.stop_create_tile(self.id, self.task);
  }
}

// =============================================================================
// Production task
// =============================================================================

/// Runs a producer's `do_create_tile` into the tile's slot.
struct TileTask<T> {
  id: TileId,
  slot: SlotId,
  epoch: u64,
  storage: Arc<SlotPool<T>>,
  producer: Arc<dyn TileProducer<T>>,
  label: String,
}

impl<T: Send + Sync + 'static> TaskWork for TileTask<T> {
  fn run(&self) -> bool {
    let task = {
      let binding = self.storage.lock(self.slot);
      if !binding.is_current(self.id, self.epoch) {
        warn!(tile = %self.id, slot = %self.slot, "slot was repurposed under a live task");
        return false;
      }
      binding.task
    };
    let Some(task) = task else {
      warn!(tile = %self.id, slot = %self.slot, "slot has no production task");
      return false;
    };

    #[cfg(feature = "profiling")]
    let _span = tracing::info_span!("create_tile", tile = %self.id).entered();

    let _scope = CreateTileScope::new(self.producer.as_ref());
    let mut data = self.storage.write(self.slot);
    self.producer.do_create_tile(self.id, task, &mut data)
  }

  fn label(&self) -> String {
    self.label.clone()
  }
}

// =============================================================================
// TileCache
// =============================================================================

struct CacheInner<T: Send + Sync + 'static> {
  config: CacheConfig,
  storage: Arc<SlotPool<T>>,
  scheduler: Scheduler,
  state: Mutex<CacheState<T>>,
}

/// Fixed-capacity cache of tiles with payload `T`.
///
/// Cheap to clone; clones share the same tiles.
pub struct TileCache<T: Send + Sync + 'static> {
  inner: Arc<CacheInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for TileCache<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

/// Non-owning reference to a [`TileCache`], for producers that read tiles
/// of their own cache.
pub struct WeakTileCache<T: Send + Sync + 'static> {
  inner: Weak<CacheInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for WeakTileCache<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Weak::clone(&self.inner),
    }
  }
}

impl<T: Send + Sync + 'static> WeakTileCache<T> {
  pub fn upgrade(&self) -> Option<TileCache<T>> {
    self.inner.upgrade().map(|inner| TileCache { inner })
  }
}

impl<T: Send + Sync + 'static> TileCache<T> {
  /// Create a cache over `storage`. `config.capacity` is only a hint for
  /// building the storage; the storage's own capacity is authoritative.
  pub fn new(config: CacheConfig, storage: SlotPool<T>, scheduler: Scheduler) -> Self {
    if config.capacity != storage.capacity() {
      warn!(
        cache = %config.name,
        configured = config.capacity,
        actual = storage.capacity(),
        "cache capacity differs from its storage"
      );
    }
    debug!(cache = %config.name, capacity = storage.capacity(), "tile cache created");

    Self {
      inner: Arc::new(CacheInner {
        config,
        storage: Arc::new(storage),
        scheduler,
        state: Mutex::new(CacheState {
          producers: Vec::new(),
          entries: Vec::new(),
          free: Vec::new(),
          index: LruCache::unbounded(),
          stats: CacheStats::default(),
        }),
      }),
    }
  }

  pub fn downgrade(&self) -> WeakTileCache<T> {
    WeakTileCache {
      inner: Arc::downgrade(&self.inner),
    }
  }

  pub fn name(&self) -> &str {
    &self.inner.config.name
  }

  pub fn config(&self) -> &CacheConfig {
    &self.inner.config
  }

  pub fn capacity(&self) -> usize {
    self.inner.storage.capacity()
  }

  pub fn storage(&self) -> &SlotPool<T> {
    &self.inner.storage
  }

  pub fn scheduler(&self) -> &Scheduler {
    &self.inner.scheduler
  }

  /// Register a producer and assign it a cache-local id.
  pub fn register_producer(&self, producer: Arc<dyn TileProducer<T>>) -> Result<ProducerId> {
    let mut state = self.inner.state.lock();
    if !self.inner.config.can_register(state.producers.len()) {
      return Err(TileError::ProducerLimitReached {
        limit: self.inner.config.max_producers,
      });
    }
    let id = ProducerId(state.producers.len() as u32);
    debug!(cache = %self.inner.config.name, producer = %id, name = producer.name(), "producer registered");
    state.producers.push(producer);
    Ok(id)
  }

  pub fn producer(&self, id: ProducerId) -> Result<Arc<dyn TileProducer<T>>> {
    self.inner.state.lock().producer(id)
  }

  pub fn producer_count(&self) -> usize {
    self.inner.state.lock().producers.len()
  }

  /// Upstream producers declared by producer `id`.
  pub fn referenced_producers(&self, id: ProducerId) -> Result<Vec<ProducerRef>> {
    let producer = self.producer(id)?;
    let mut out = Vec::new();
    producer.referenced_producers(&mut out);
    Ok(out)
  }

  // ===========================================================================
  // Pinning
  // ===========================================================================

  /// Pin a tile, creating and scheduling its production if it is not
  /// cached.
  ///
  /// Never blocks on production: poll [`TileCache::status`] or wait on the
  /// handle's task before reading the data. Fails with
  /// [`TileError::CapacityExhausted`] when every slot is pinned or busy.
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "cache::get_tile"))]
  pub fn get_tile(
    &self,
    producer: ProducerId,
    level: u32,
    tx: u32,
    ty: u32,
    deadline: Deadline,
  ) -> Result<TileHandle> {
    let id = TileId::new(producer, level, tx, ty);
    if !id.is_valid() {
      return Err(TileError::InvalidTile(id));
    }

    let mut evicted = None;
    let started = {
      let mut state = self.inner.state.lock();
      let producer = state.producer(id.producer)?;

      if let Some(&index) = state.index.get(&id) {
        return self.inner.hit(&mut state, id, index, deadline);
      }

      if !producer.has_tile(level, tx, ty) {
        return Err(TileError::NoSuchTile(id));
      }

      let Some(slot) = self.inner.acquire_slot(&mut state, &mut evicted) else {
        let pinned = state.pinned_count();
        state.stats.exhausted += 1;
        warn!(
          cache = %self.inner.config.name,
          tile = %id,
          pinned,
          "no evictable tile, cache exhausted"
        );
        return Err(TileError::CapacityExhausted {
          cache: self.inner.config.name.clone(),
          capacity: self.inner.storage.capacity(),
          pinned,
        });
      };

      state.stats.misses += 1;
      self.inner.create(&mut state, id, slot, producer, 1, deadline)
    };

    if let Some(evicted) = evicted {
      evicted.stop();
    }
    self.inner.start(started, deadline)
  }

  /// Release one pin taken by `get_tile`. The tile stays cached.
  pub fn put_tile(&self, handle: &TileHandle) {
    let mut state = self.inner.state.lock();
    let Some(record) = state.record_mut(handle.index, handle.generation) else {
      warn!(cache = %self.inner.config.name, tile = %handle.id, "put_tile with a stale handle");
      return;
    };

    debug_assert!(record.users > 0, "unbalanced put_tile for {}", handle.id);
    if record.users == 0 {
      warn!(cache = %self.inner.config.name, tile = %handle.id, "put_tile on an unused tile");
      return;
    }
    record.users -= 1;
    if record.users == 0 {
      trace!(cache = %self.inner.config.name, tile = %handle.id, "tile unused");
    }
  }

  /// Create and schedule a tile nobody uses yet, at prefetch priority.
  ///
  /// Only takes a free slot or evicts an unused tile; returns whether a
  /// tile was created.
  pub fn prefetch_tile(&self, producer: ProducerId, level: u32, tx: u32, ty: u32) -> Result<bool> {
    let id = TileId::new(producer, level, tx, ty);
    if !id.is_valid() {
      return Err(TileError::InvalidTile(id));
    }

    let mut evicted = None;
    let started = {
      let mut state = self.inner.state.lock();
      let producer = state.producer(id.producer)?;
      if state.index.contains(&id) || !producer.has_tile(level, tx, ty) {
        return Ok(false);
      }
      let Some(slot) = self.inner.acquire_slot(&mut state, &mut evicted) else {
        return Ok(false);
      };
      state.stats.prefetches += 1;
      self
        .inner
        .create(&mut state, id, slot, producer, 0, Deadline::PREFETCH)
    };

    if let Some(evicted) = evicted {
      evicted.stop();
    }
    self.inner.start(started, Deadline::PREFETCH)?;
    Ok(true)
  }

  /// Non-pinning lookup. Leaves users and recency untouched.
  pub fn find_tile(&self, producer: ProducerId, level: u32, tx: u32, ty: u32) -> Option<TileHandle> {
    let id = TileId::new(producer, level, tx, ty);
    let state = self.inner.state.lock();
    let index = *state.index.peek(&id)?;
    let generation = state.entries[index as usize].generation;
    let record = state.record(index, generation)?;
    Some(TileHandle {
      id,
      index,
      generation,
      task: record.task,
      slot: record.slot,
    })
  }

  // ===========================================================================
  // Inspection
  // ===========================================================================

  pub fn tile(&self, handle: &TileHandle) -> Result<Tile> {
    let state = self.inner.state.lock();
    let record = state.handle_record(handle)?;
    Ok(Tile {
      id: record.id,
      slot: record.slot,
      task: record.task,
      users: record.users,
      status: self
        .inner
        .scheduler
        .status(record.task)
        .unwrap_or(TaskStatus::Cancelled),
    })
  }

  /// Production state of the tile.
  pub fn status(&self, handle: &TileHandle) -> Result<TaskStatus> {
    self.tile(handle).map(|t| t.status)
  }

  /// Read the tile's data once production succeeded.
  ///
  /// The handle must be pinned for the guard's lifetime.
  pub fn tile_data(&self, handle: &TileHandle) -> Result<RwLockReadGuard<'_, T>> {
    let tile = self.tile(handle)?;
    if tile.status != TaskStatus::Done {
      return Err(TileError::NotReady {
        id: tile.id,
        status: tile.status,
      });
    }
    Ok(self.inner.storage.read(tile.slot))
  }

  /// Cached tiles, used or not.
  pub fn len(&self) -> usize {
    self.inner.state.lock().index.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn stats(&self) -> CacheStats {
    let state = self.inner.state.lock();
    let used = state.pinned_count();
    CacheStats {
      capacity: self.inner.storage.capacity(),
      used,
      unused: state.index.len() - used,
      free_slots: self.inner.storage.free_slot_count(),
      ..state.stats
    }
  }

  // ===========================================================================
  // Invalidation
  // ===========================================================================

  /// Mark every cached tile of `producer` for re-production. Tiles keep
  /// their slots; pinned ones are rescheduled right away, unused ones when
  /// next requested. Returns the number of tiles affected.
  pub fn invalidate_tiles(&self, producer: ProducerId) -> Result<usize> {
    let state = self.inner.state.lock();
    state.producer(producer)?;

    let mut count = 0;
    for record in state.records().filter(|r| r.id.producer == producer) {
      self.inner.invalidate(record)?;
      count += 1;
    }
    debug!(cache = %self.inner.config.name, %producer, count, "tiles invalidated");
    Ok(count)
  }

  /// Single-tile variant of [`TileCache::invalidate_tiles`]. Returns false
  /// if the tile is not cached.
  pub fn invalidate_tile(&self, producer: ProducerId, level: u32, tx: u32, ty: u32) -> Result<bool> {
    let id = TileId::new(producer, level, tx, ty);
    let state = self.inner.state.lock();
    state.producer(producer)?;
    let Some(&index) = state.index.peek(&id) else {
      return Ok(false);
    };
    let generation = state.entries[index as usize].generation;
    let Some(record) = state.record(index, generation) else {
      return Ok(false);
    };
    self.inner.invalidate(record)?;
    debug!(cache = %self.inner.config.name, tile = %id, "tile invalidated");
    Ok(true)
  }

  // ===========================================================================
  // Teardown
  // ===========================================================================

  /// Evict every tile, waiting for running tasks to finish. Tiles still
  /// pinned by consumers are discarded anyway and reported as leaks.
  pub fn clear(&self) {
    self.inner.clear(true);
  }
}

impl<T: Send + Sync + 'static> CacheInner<T> {
  /// Pin a cached tile.
  fn hit(
    &self,
    state: &mut CacheState<T>,
    id: TileId,
    index: u32,
    deadline: Deadline,
  ) -> Result<TileHandle> {
    let generation = state.entries[index as usize].generation;
    let Some(record) = state.record(index, generation) else {
      return Err(TileError::StaleHandle(id));
    };
    let (task, slot) = (record.task, record.slot);

    // Failed, invalidated or not yet urgent enough; the starter schedules
    // tiles that are still starting.
    if !record.starting {
      match self.scheduler.status(task) {
        Some(TaskStatus::Done) | Some(TaskStatus::Running) => {}
        _ => self.scheduler.schedule_task(task, deadline)?,
      }
    }

    if let Some(record) = state.record_mut(index, generation) {
      record.users += 1;
    }
    state.stats.hits += 1;
    trace!(cache = %self.config.name, tile = %id, "cache hit");

    Ok(TileHandle {
      id,
      index,
      generation,
      task,
      slot,
    })
  }

  /// A free slot, evicting the least recently used evictable tile if
  /// needed.
  fn acquire_slot(
    &self,
    state: &mut CacheState<T>,
    evicted: &mut Option<Evicted<T>>,
  ) -> Option<SlotId> {
    if let Some(slot) = self.storage.new_slot() {
      return Some(slot);
    }
    *evicted = Some(self.evict_one(state)?);
    self.storage.new_slot()
  }

  /// Evict the least recently used tile with no users whose task can be
  /// released. The slot goes back to the free list; the caller must call
  /// [`Evicted::stop`] once the lock is released.
  fn evict_one(&self, state: &mut CacheState<T>) -> Option<Evicted<T>> {
    let index = state.index.iter().rev().find_map(|(_, &index)| {
      let record = state.entries[index as usize].record.as_ref()?;
      if record.users > 0 || record.starting {
        return None;
      }
      // Refused while running; released otherwise (queued tasks are
      // cancelled).
      match self.scheduler.try_release(record.task) {
        Ok(false) => None,
        Ok(true) | Err(_) => Some(index),
      }
    })?;

    let record = state.remove(index)?;
    self.storage.lock(record.slot).unbind();
    self.storage.delete_slot(record.slot);
    state.stats.evictions += 1;
    debug!(cache = %self.config.name, tile = %record.id, slot = %record.slot, "tile evicted");

    Some(Evicted {
      id: record.id,
      task: record.task,
      producer: record.producer,
    })
  }

  /// Bind `slot` to a new tile record and create its production task.
  fn create(
    &self,
    state: &mut CacheState<T>,
    id: TileId,
    slot: SlotId,
    producer: Arc<dyn TileProducer<T>>,
    users: u32,
    deadline: Deadline,
  ) -> Started<T> {
    let epoch = self.storage.lock(slot).bind(id);
    let work = TileTask {
      id,
      slot,
      epoch,
      storage: Arc::clone(&self.storage),
      producer: Arc::clone(&producer),
      label: format!("{}:{}", self.config.name, id),
    };
    let task = self.scheduler.create_task(work, deadline);
    self.storage.lock(slot).task = Some(task);

    let (index, generation) = state.insert(TileRecord {
      id,
      slot,
      task,
      users,
      starting: true,
      producer: Arc::clone(&producer),
    });
    debug!(cache = %self.config.name, tile = %id, %slot, %deadline, "tile created");

    Started {
      handle: TileHandle {
        id,
        index,
        generation,
        task,
        slot,
      },
      producer,
    }
  }

  /// Let the producer build the task graph and schedule it. On failure the
  /// tile is discarded again.
  fn start(&self, started: Started<T>, deadline: Deadline) -> Result<TileHandle> {
    let Started { handle, producer } = started;
    let mut graph = TaskGraph::single(handle.task);

    let result = producer
      .start_create_tile(handle.id, deadline, handle.task, &mut graph)
      .and_then(|()| self.scheduler.schedule(&graph));

    match result {
      Ok(()) => {
        if let Some(record) = self.state.lock().record_mut(handle.index, handle.generation) {
          record.starting = false;
        }
        Ok(handle)
      }
      Err(err) => {
        warn!(cache = %self.config.name, tile = %handle.id, %err, "tile production could not start");
        producer.stop_create_tile(handle.id, handle.task);
        self.discard(&handle);
        Err(err)
      }
    }
  }

  /// Drop a tile whose production never started.
  fn discard(&self, handle: &TileHandle) {
    let mut state = self.state.lock();
    let Some(record) = state.record(handle.index, handle.generation) else {
      return;
    };
    if record.users > 1 {
      warn!(cache = %self.config.name, tile = %handle.id, users = record.users, "discarding a tile other consumers already pinned");
    }
    if let Some(record) = state.remove(handle.index) {
      let _ = self.scheduler.try_release(record.task);
      self.storage.lock(record.slot).unbind();
      self.storage.delete_slot(record.slot);
    }
  }

  fn invalidate(&self, record: &TileRecord<T>) -> Result<()> {
    self.scheduler.invalidate(record.task)?;
    if record.users > 0 && !record.starting {
      let deadline = self
        .scheduler
        .deadline(record.task)
        .unwrap_or(Deadline::CURRENT_FRAME);
      self.scheduler.schedule_task(record.task, deadline)?;
    }
    Ok(())
  }

  /// Evict everything evictable (cascading through tiles pinned by this
  /// cache's own producers), then discard what is left.
  fn clear(&self, wait: bool) {
    loop {
      let evicted = self.evict_one(&mut self.state.lock());
      if let Some(evicted) = evicted {
        evicted.stop();
        continue;
      }
      if !wait {
        break;
      }

      let running: Vec<TaskId> = {
        let state = self.state.lock();
        state
          .records()
          .filter(|r| r.users == 0)
          .map(|r| r.task)
          .filter(|t| self.scheduler.status(*t) == Some(TaskStatus::Running))
          .collect()
      };
      if running.is_empty() {
        break;
      }
      self.scheduler.wait(&running, Duration::from_millis(100));
    }

    let leftover: Vec<TileRecord<T>> = {
      let mut state = self.state.lock();
      let indices: Vec<u32> = state.index.iter().map(|(_, &index)| index).collect();
      indices
        .into_iter()
        .filter_map(|index| state.remove(index))
        .collect()
    };

    for record in leftover {
      if wait {
        warn!(cache = %self.config.name, tile = %record.id, users = record.users, "discarding pinned tile");
        while let Ok(false) = self.scheduler.try_release(record.task) {
          self.scheduler.wait(&[record.task], Duration::from_millis(100));
        }
      } else if let Ok(false) = self.scheduler.try_release(record.task) {
        debug!(cache = %self.config.name, tile = %record.id, "task still running at teardown");
      }
      record.producer.stop_create_tile(record.id, record.task);
      self.storage.lock(record.slot).unbind();
      self.storage.delete_slot(record.slot);
    }
  }
}

impl<T: Send + Sync + 'static> Drop for CacheInner<T> {
  fn drop(&mut self) {
    self.clear(false);
  }
}

/// A freshly created tile whose graph is not scheduled yet.
struct Started<T> {
  handle: TileHandle,
  producer: Arc<dyn TileProducer<T>>,
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
