//! Scheduler, caches and producers wired together.

use std::sync::Arc;

use anyhow::Context;
use tile_plugin::{
  CacheConfig, PipelineConfig, ProducerId, Scheduler, SlotPool, TileCache, TileLayout,
};
use tracing::info;

use crate::producers::{ElevationProducer, Samples, SlopeProducer};

pub const ELEVATION: &str = "elevation";
pub const SLOPE: &str = "slope";

/// Cache sizes used when no config file names them. Elevation needs room
/// for the ancestors every slope tile pulls in.
pub fn default_config() -> PipelineConfig {
  PipelineConfig {
    caches: vec![CacheConfig::new(ELEVATION, 512), CacheConfig::new(SLOPE, 256)],
    ..PipelineConfig::default()
  }
}

pub struct Pipeline {
  pub scheduler: Scheduler,
  pub elevation: TileCache<Samples>,
  pub slope: TileCache<Samples>,
  pub elevation_producer: Arc<ElevationProducer>,
  pub elevation_id: ProducerId,
  pub slope_id: ProducerId,
}

impl Pipeline {
  pub fn new(
    config: &PipelineConfig,
    layout: TileLayout,
    max_level: u32,
    seed: u32,
  ) -> anyhow::Result<Self> {
    let scheduler =
      Scheduler::new(config.scheduler.clone()).context("failed to start the task scheduler")?;

    let elevation_config = config.cache(ELEVATION);
    let slope_config = config.cache(SLOPE);
    elevation_config.validate()?;
    slope_config.validate()?;

    let elevation = TileCache::new(
      elevation_config.clone(),
      SlotPool::cpu(elevation_config.capacity, layout.tile_size, 1),
      scheduler.clone(),
    );
    let elevation_producer = Arc::new(ElevationProducer::new(
      layout,
      max_level,
      seed,
      elevation.downgrade(),
    ));
    let elevation_id = elevation.register_producer(elevation_producer.clone())?;

    let slope = TileCache::new(
      slope_config.clone(),
      SlotPool::cpu(slope_config.capacity, layout.tile_size, 1),
      scheduler.clone(),
    );
    let slope_id = slope.register_producer(Arc::new(SlopeProducer::new(
      layout,
      max_level,
      elevation.clone(),
      elevation_id,
    )))?;

    for upstream in slope.referenced_producers(slope_id)? {
      info!(
        cache = %upstream.cache,
        producer = %upstream.producer,
        "slope reads from"
      );
    }

    Ok(Self {
      scheduler,
      elevation,
      slope,
      elevation_producer,
      elevation_id,
      slope_id,
    })
  }

  /// Change the terrain seed and drop every tile derived from it.
  pub fn reseed(&self, seed: u32) -> anyhow::Result<usize> {
    self.elevation_producer.reseed(seed);
    let elevation = self.elevation.invalidate_tiles(self.elevation_id)?;
    let slope = self.slope.invalidate_tiles(self.slope_id)?;
    Ok(elevation + slope)
  }
}
