//! TileId - immutable value type identifying a tile in a producer's quadtree.
//!
//! Level 0 is the root tile covering the whole terrain, higher levels are
//! finer. A tile at `level` has coordinates `0 <= tx, ty < 2^level`.

use std::cmp::Ordering;
use std::fmt;

use glam::DVec2;

/// Deepest supported quadtree level.
pub const MAX_LEVEL: u32 = 30;

/// Cache-local producer identifier, assigned by
/// [`TileCache::register_producer`](crate::TileCache::register_producer).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ProducerId(pub(crate) u32);

impl ProducerId {
  /// Get the raw id value.
  pub fn raw(&self) -> u32 {
    self.0
  }
}

impl fmt::Display for ProducerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "P{}", self.0)
  }
}

/// Tile identifier - immutable value type.
///
/// Ordered by `(level, tx, ty)`, with the producer as final tie break so the
/// order stays consistent with equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TileId {
  /// Owning producer within its cache
  pub producer: ProducerId,
  /// Quadtree level (0 = root)
  pub level: u32,
  /// Column at this level
  pub tx: u32,
  /// Row at this level
  pub ty: u32,
}

impl TileId {
  /// Create a new tile id.
  pub fn new(producer: ProducerId, level: u32, tx: u32, ty: u32) -> Self {
    Self {
      producer,
      level,
      tx,
      ty,
    }
  }

  /// True when the coordinates lie inside the quadtree level.
  pub fn is_valid(&self) -> bool {
    if self.level > MAX_LEVEL {
      return false;
    }
    let side = 1u64 << self.level;
    (self.tx as u64) < side && (self.ty as u64) < side
  }

  /// Get child tile (finer detail: level + 1).
  ///
  /// Quadrant: 0-3 where bit 0 is the +X offset and bit 1 the +Y offset.
  /// Returns None at [`MAX_LEVEL`].
  pub fn child(&self, quadrant: u8) -> Option<Self> {
    if self.level >= MAX_LEVEL {
      return None;
    }
    Some(Self {
      producer: self.producer,
      level: self.level + 1,
      tx: self.tx * 2 + (quadrant & 1) as u32,
      ty: self.ty * 2 + ((quadrant >> 1) & 1) as u32,
    })
  }

  /// Get parent tile (coarser: level - 1). Returns None for the root.
  pub fn parent(&self) -> Option<Self> {
    if self.level == 0 {
      return None;
    }
    Some(Self {
      producer: self.producer,
      level: self.level - 1,
      tx: self.tx / 2,
      ty: self.ty / 2,
    })
  }

  /// Quadrant of this tile inside its parent (inverse of [`TileId::child`]).
  pub fn quadrant(&self) -> u8 {
    ((self.tx & 1) | ((self.ty & 1) << 1)) as u8
  }

  /// Same coordinates for another producer.
  pub fn with_producer(&self, producer: ProducerId) -> Self {
    Self { producer, ..*self }
  }
}

impl Ord for TileId {
  fn cmp(&self, other: &Self) -> Ordering {
    (self.level, self.tx, self.ty, self.producer).cmp(&(
      other.level,
      other.tx,
      other.ty,
      other.producer,
    ))
  }
}

impl PartialOrd for TileId {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl fmt::Display for TileId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}/{}/{}", self.producer, self.level, self.tx, self.ty)
  }
}

/// Physical layout of a producer's tiles.
///
/// `tile_size` counts samples per side including `border` samples on each
/// edge; interior samples span the tile exactly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileLayout {
  /// Side length of the root tile in world units.
  pub root_quad_size: f64,
  /// World-space position of the root tile's minimum corner.
  pub origin: DVec2,
  /// Samples per tile side, borders included.
  pub tile_size: u32,
  /// Border samples on each side.
  pub border: u32,
}

impl TileLayout {
  /// Side length of a tile at `level`.
  #[inline]
  pub fn tile_length(&self, level: u32) -> f64 {
    self.root_quad_size / (1u64 << level) as f64
  }

  /// World-space minimum corner of a tile.
  #[inline]
  pub fn tile_origin(&self, id: &TileId) -> DVec2 {
    let len = self.tile_length(id.level);
    self.origin + DVec2::new(id.tx as f64 * len, id.ty as f64 * len)
  }

  /// World-space center of a tile.
  #[inline]
  pub fn tile_center(&self, id: &TileId) -> DVec2 {
    self.tile_origin(id) + DVec2::splat(self.tile_length(id.level) * 0.5)
  }

  /// Distance between adjacent samples at `level`.
  #[inline]
  pub fn sample_spacing(&self, level: u32) -> f64 {
    let interior = self.tile_size.saturating_sub(2 * self.border).max(2);
    self.tile_length(level) / (interior - 1) as f64
  }

  /// World-space position of sample `(i, j)`; borders lie outside the tile.
  #[inline]
  pub fn sample_position(&self, id: &TileId, i: u32, j: u32) -> DVec2 {
    let spacing = self.sample_spacing(id.level);
    let border = self.border as f64;
    self.tile_origin(id) + DVec2::new((i as f64 - border) * spacing, (j as f64 - border) * spacing)
  }

  /// Tile at `level` containing a world-space point, clamped to the quadtree.
  pub fn tile_at(&self, producer: ProducerId, level: u32, point: DVec2) -> TileId {
    let len = self.tile_length(level);
    let max = ((1u64 << level) - 1) as f64;
    let local = (point - self.origin) / len;
    TileId::new(
      producer,
      level,
      local.x.floor().clamp(0.0, max) as u32,
      local.y.floor().clamp(0.0, max) as u32,
    )
  }
}

impl Default for TileLayout {
  fn default() -> Self {
    Self {
      root_quad_size: 1.0,
      origin: DVec2::ZERO,
      tile_size: 1,
      border: 0,
    }
  }
}

#[cfg(test)]
#[path = "tile_id_test.rs"]
mod tile_id_test;
