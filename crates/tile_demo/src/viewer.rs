//! Simulated terrain viewer.
//!
//! Each frame selects quadtree leaves around the camera (split while the
//! camera is closer than `split_factor` tile lengths), pins their tiles for
//! the frame, prefetches the children of tiles that are about to split and
//! releases the previous frame's pins.

use glam::DVec2;
use tile_plugin::{Deadline, ProducerId, TileCache, TileError, TileHandle, TileId, TileLayout};
use tracing::trace;

use crate::producers::Samples;

/// What one frame saw.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameReport {
  /// Leaves selected by the LOD pass.
  pub visible: usize,
  /// Leaves whose data was ready to draw.
  pub ready: usize,
  /// Leaves that could not be pinned (cache exhausted).
  pub exhausted: usize,
  /// Prefetches that created a tile.
  pub prefetched: usize,
  /// Steepest slope drawn, in degrees.
  pub max_slope: f32,
}

pub struct Viewer {
  layout: TileLayout,
  cache: TileCache<Samples>,
  producer: ProducerId,
  split_factor: f64,
  held: Vec<TileHandle>,
}

impl Viewer {
  pub fn new(layout: TileLayout, cache: TileCache<Samples>, producer: ProducerId, split_factor: f64) -> Self {
    Self {
      layout,
      cache,
      producer,
      split_factor,
      held: Vec::new(),
    }
  }

  /// Tiles pinned by the last frame.
  pub fn held(&self) -> &[TileHandle] {
    &self.held
  }

  fn distance(&self, camera: DVec2, altitude: f64, id: &TileId) -> f64 {
    let d = self.layout.tile_center(id).distance(camera);
    (d * d + altitude * altitude).sqrt()
  }

  /// Quadtree leaves for the camera, nearest first.
  fn select(&self, camera: DVec2, altitude: f64) -> anyhow::Result<Vec<(TileId, f64)>> {
    let producer = self.cache.producer(self.producer)?;
    let mut leaves = Vec::new();
    let mut stack = vec![TileId::new(self.producer, 0, 0, 0)];

    while let Some(id) = stack.pop() {
      let distance = self.distance(camera, altitude, &id);
      let split = distance < self.split_factor * self.layout.tile_length(id.level);
      if split && producer.has_children(id.level, id.tx, id.ty) {
        stack.extend((0..4).filter_map(|q| id.child(q)));
      } else {
        leaves.push((id, distance));
      }
    }

    leaves.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(leaves)
  }

  /// Run one frame.
  pub fn frame(&mut self, camera: DVec2, altitude: f64) -> anyhow::Result<FrameReport> {
    let leaves = self.select(camera, altitude)?;
    let mut report = FrameReport {
      visible: leaves.len(),
      ..FrameReport::default()
    };

    let mut pinned = Vec::with_capacity(leaves.len());
    for (rank, (id, distance)) in leaves.iter().enumerate() {
      // Nearest tiles first; far ones may slip a few frames.
      let deadline = Deadline::in_frames((rank / 16) as u32);
      match self.cache.get_tile(id.producer, id.level, id.tx, id.ty, deadline) {
        Ok(handle) => pinned.push(handle),
        Err(TileError::CapacityExhausted { .. }) => {
          report.exhausted += 1;
          continue;
        }
        Err(err) => return Err(err.into()),
      }

      let len = self.layout.tile_length(id.level);
      if *distance < self.split_factor * 1.5 * len {
        for child in (0..4).filter_map(|q| id.child(q)) {
          if self.cache.prefetch_tile(child.producer, child.level, child.tx, child.ty)? {
            report.prefetched += 1;
          }
        }
      }
    }

    for handle in &pinned {
      if let Ok(data) = self.cache.tile_data(handle) {
        report.ready += 1;
        let steepest = data.data.iter().copied().fold(0.0f32, f32::max);
        report.max_slope = report.max_slope.max(steepest);
      }
    }

    for handle in self.held.drain(..) {
      self.cache.put_tile(&handle);
    }
    self.held = pinned;

    trace!(?report, "frame");
    Ok(report)
  }

  /// Release every pin.
  pub fn release(&mut self) {
    for handle in self.held.drain(..) {
      self.cache.put_tile(&handle);
    }
  }
}

#[cfg(test)]
#[path = "viewer_test.rs"]
mod viewer_test;
