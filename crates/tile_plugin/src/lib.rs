//! tile_plugin - Quadtree tile cache, producers and task scheduling
//!
//! This crate provides the data pipeline behind a level-of-detail terrain
//! viewer: fixed-size tiles addressed by quadtree coordinates are produced
//! on demand, cached in fixed-capacity slot pools and evicted in LRU order
//! once nobody uses them.
//!
//! # Features
//!
//! - **Slot pools**: pre-allocated CPU buffers, texture array layers or
//!   arbitrary objects, never reallocated while tiles come and go
//! - **Pinning**: `get_tile` / `put_tile` reference counting; pinned tiles are
//!   never evicted, unused tiles stay valid until their slot is needed
//! - **Producer chains**: producers pin tiles of other producers and the
//!   scheduler runs the upstream work first
//! - **Deadline scheduling**: task graphs run on a rayon pool in deadline
//!   order, with retries, invalidation and cycle detection
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tile_plugin::{CacheConfig, Deadline, Scheduler, SchedulerConfig, SlotPool, TileCache};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//! let cache = TileCache::new(
//!   CacheConfig::new("elevation", 256),
//!   SlotPool::cpu(256, 101, 1),
//!   scheduler.clone(),
//! );
//! let elevation = cache.register_producer(Arc::new(MyElevationProducer::new()))?;
//!
//! let tile = cache.get_tile(elevation, 3, 2, 5, Deadline::CURRENT_FRAME)?;
//! if scheduler.is_done(tile.task()) {
//!   let data = cache.tile_data(&tile)?;
//!   // draw...
//! }
//! cache.put_tile(&tile);
//! ```

pub mod cache;
pub mod config;
pub mod deadline;
pub mod error;
pub mod metrics;
pub mod producer;
pub mod scheduler;
pub mod storage;
pub mod tile_id;

#[cfg(test)]
mod test_utils;

// Re-export commonly used items
pub use cache::{CacheStats, Tile, TileCache, TileHandle, WeakTileCache};
pub use config::{CacheConfig, PipelineConfig, SchedulerConfig};
pub use deadline::Deadline;
pub use error::{ConfigError, Result, TileError};
pub use producer::{CreateTileScope, PinnedTiles, ProducerRef, TileProducer};
pub use scheduler::{FnTask, Scheduler, TaskEvent, TaskGraph, TaskId, TaskStatus, TaskWork};
pub use storage::{
  CpuBuffer, CpuTileStorage, ObjectTileStorage, SlotId, SlotPool, TextureArrayStorage,
  TextureFormat, TextureLayer, TileStorage,
};
pub use tile_id::{ProducerId, TileId, TileLayout, MAX_LEVEL};
