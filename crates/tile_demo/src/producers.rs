//! Procedural producers: elevation refined level by level from the parent
//! tile, and slope derived from elevation.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::DVec2;
use tile_plugin::{
  CpuBuffer, Deadline, PinnedTiles, ProducerId, ProducerRef, Result, TaskGraph, TaskId, TileCache,
  TileError, TileId, TileLayout, TileProducer, WeakTileCache,
};

pub type Samples = CpuBuffer<f32>;

// =============================================================================
// Value noise
// =============================================================================

fn hash(x: i64, y: i64, seed: u32) -> u32 {
  let mut h = (x as u32).wrapping_mul(0x27d4_eb2d) ^ (y as u32).wrapping_mul(0x1656_67b1) ^ seed;
  h ^= h >> 15;
  h = h.wrapping_mul(0x85eb_ca6b);
  h ^= h >> 13;
  h = h.wrapping_mul(0xc2b2_ae35);
  h ^ (h >> 16)
}

fn lattice(x: i64, y: i64, seed: u32) -> f64 {
  hash(x, y, seed) as f64 / u32::MAX as f64
}

/// Smooth value noise in [0, 1].
fn value_noise(p: DVec2, seed: u32) -> f64 {
  let cell = p.floor();
  let f = p - cell;
  let s = f * f * (DVec2::splat(3.0) - 2.0 * f);
  let (x, y) = (cell.x as i64, cell.y as i64);

  let a = lattice(x, y, seed);
  let b = lattice(x + 1, y, seed);
  let c = lattice(x, y + 1, seed);
  let d = lattice(x + 1, y + 1, seed);
  let top = a + (b - a) * s.x;
  let bottom = c + (d - c) * s.x;
  top + (bottom - top) * s.y
}

// =============================================================================
// Elevation
// =============================================================================

/// Elevation in meters.
///
/// The root tile is coarse noise; every finer tile bilinearly upsamples its
/// parent and adds detail at its own frequency, so it depends on the parent
/// tile being produced first.
pub struct ElevationProducer {
  layout: TileLayout,
  max_level: u32,
  amplitude: f64,
  seed: AtomicU32,
  cache: WeakTileCache<Samples>,
  pins: PinnedTiles,
}

impl ElevationProducer {
  pub fn new(layout: TileLayout, max_level: u32, seed: u32, cache: WeakTileCache<Samples>) -> Self {
    Self {
      layout,
      max_level,
      amplitude: 1200.0,
      seed: AtomicU32::new(seed),
      cache,
      pins: PinnedTiles::new(),
    }
  }

  /// Change the terrain; cached tiles must be invalidated afterwards.
  pub fn reseed(&self, seed: u32) {
    self.seed.store(seed, Ordering::Relaxed);
  }

  fn detail(&self, p: DVec2, level: u32) -> f64 {
    let frequency = (1u64 << level) as f64 * 4.0 / self.layout.root_quad_size;
    let amplitude = self.amplitude / (1u64 << level) as f64;
    let seed = self.seed.load(Ordering::Relaxed).wrapping_add(level);
    (value_noise(p * frequency, seed) - 0.5) * amplitude
  }

  /// Bilinear lookup of world position `p` in the parent tile's samples.
  fn upsample(&self, parent: &TileId, data: &Samples, p: DVec2) -> f64 {
    let spacing = self.layout.sample_spacing(parent.level);
    let local = (p - self.layout.tile_origin(parent)) / spacing + DVec2::splat(self.layout.border as f64);
    let max = (data.tile_size - 1) as f64;
    let u = local.clamp(DVec2::ZERO, DVec2::splat(max));

    let (x0, y0) = (u.x.floor() as u32, u.y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(data.tile_size - 1), (y0 + 1).min(data.tile_size - 1));
    let f = u - DVec2::new(x0 as f64, y0 as f64);

    let a = data.get(x0, y0, 0) as f64;
    let b = data.get(x1, y0, 0) as f64;
    let c = data.get(x0, y1, 0) as f64;
    let d = data.get(x1, y1, 0) as f64;
    let top = a + (b - a) * f.x;
    let bottom = c + (d - c) * f.x;
    top + (bottom - top) * f.y
  }
}

impl TileProducer<Samples> for ElevationProducer {
  fn name(&self) -> &str {
    "elevation"
  }

  fn max_level(&self) -> u32 {
    self.max_level
  }

  fn start_create_tile(
    &self,
    id: TileId,
    deadline: Deadline,
    task: TaskId,
    graph: &mut TaskGraph,
  ) -> Result<()> {
    let Some(parent) = id.parent() else {
      return Ok(());
    };
    let cache = self.cache.upgrade().ok_or(TileError::ShutDown)?;
    self.pins.acquire(task, graph, &cache, parent, deadline)?;
    Ok(())
  }

  fn do_create_tile(&self, id: TileId, task: TaskId, data: &mut Samples) -> bool {
    let size = data.tile_size;

    let Some(parent) = id.parent() else {
      for j in 0..size {
        for i in 0..size {
          let p = self.layout.sample_position(&id, i, j);
          data.set(i, j, 0, (self.detail(p, 0) * 2.0) as f32);
        }
      }
      return true;
    };

    let (Some(cache), Some(handle)) = (self.cache.upgrade(), self.pins.get(task, parent)) else {
      return false;
    };
    let Ok(parent_data) = cache.tile_data(&handle) else {
      return false;
    };

    for j in 0..size {
      for i in 0..size {
        let p = self.layout.sample_position(&id, i, j);
        let height = self.upsample(&parent, &parent_data, p) + self.detail(p, id.level);
        data.set(i, j, 0, height as f32);
      }
    }
    true
  }

  fn stop_create_tile(&self, _id: TileId, task: TaskId) {
    match self.cache.upgrade() {
      Some(cache) => {
        self.pins.release(task, &cache);
      }
      None => {
        self.pins.forget(task);
      }
    }
  }
}

// =============================================================================
// Slope
// =============================================================================

/// Slope in degrees, from central differences of the elevation tile at the
/// same coordinates.
pub struct SlopeProducer {
  layout: TileLayout,
  max_level: u32,
  elevation: TileCache<Samples>,
  elevation_producer: ProducerId,
  pins: PinnedTiles,
}

impl SlopeProducer {
  pub fn new(
    layout: TileLayout,
    max_level: u32,
    elevation: TileCache<Samples>,
    elevation_producer: ProducerId,
  ) -> Self {
    Self {
      layout,
      max_level,
      elevation,
      elevation_producer,
      pins: PinnedTiles::new(),
    }
  }
}

impl TileProducer<Samples> for SlopeProducer {
  fn name(&self) -> &str {
    "slope"
  }

  fn max_level(&self) -> u32 {
    self.max_level
  }

  fn referenced_producers(&self, out: &mut Vec<ProducerRef>) {
    out.push(ProducerRef {
      cache: self.elevation.name().to_string(),
      producer: self.elevation_producer,
    });
  }

  fn start_create_tile(
    &self,
    id: TileId,
    deadline: Deadline,
    task: TaskId,
    graph: &mut TaskGraph,
  ) -> Result<()> {
    let upstream = id.with_producer(self.elevation_producer);
    self
      .pins
      .acquire(task, graph, &self.elevation, upstream, deadline)?;
    Ok(())
  }

  fn do_create_tile(&self, id: TileId, task: TaskId, data: &mut Samples) -> bool {
    let upstream = id.with_producer(self.elevation_producer);
    let Some(handle) = self.pins.get(task, upstream) else {
      return false;
    };
    let Ok(elevation) = self.elevation.tile_data(&handle) else {
      return false;
    };

    let size = data.tile_size;
    let spacing = self.layout.sample_spacing(id.level);
    let last = size - 1;
    for j in 0..size {
      for i in 0..size {
        let (il, ir) = (i.saturating_sub(1), (i + 1).min(last));
        let (jd, ju) = (j.saturating_sub(1), (j + 1).min(last));
        let dx = gradient(elevation.get(il, j, 0), elevation.get(ir, j, 0), ir - il, spacing);
        let dy = gradient(elevation.get(i, jd, 0), elevation.get(i, ju, 0), ju - jd, spacing);
        let slope = DVec2::new(dx, dy).length().atan().to_degrees();
        data.set(i, j, 0, slope as f32);
      }
    }
    true
  }

  fn stop_create_tile(&self, _id: TileId, task: TaskId) {
    self.pins.release(task, &self.elevation);
  }
}

/// Rise over run between two samples `steps` apart. A one-sample tile has
/// no neighbours and is treated as flat.
fn gradient(from: f32, to: f32, steps: u32, spacing: f64) -> f64 {
  if steps == 0 {
    return 0.0;
  }
  (to - from) as f64 / (steps as f64 * spacing)
}
