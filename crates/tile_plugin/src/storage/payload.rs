//! Slot payload types for the built-in storage flavours.

/// Flat sample buffer of `tile_size × tile_size × channels` elements.
///
/// Row-major: `index = (y * tile_size + x) * channels + c`.
#[derive(Clone, Debug, PartialEq)]
pub struct CpuBuffer<T> {
  pub data: Vec<T>,
  pub tile_size: u32,
  pub channels: u32,
}

impl<T: Copy + Default> CpuBuffer<T> {
  /// Zero-filled buffer.
  pub fn new(tile_size: u32, channels: u32) -> Self {
    let len = tile_size as usize * tile_size as usize * channels as usize;
    Self {
      data: vec![T::default(); len],
      tile_size,
      channels,
    }
  }

  /// Element index of sample `(x, y)`, channel `c`.
  #[inline]
  pub fn index(&self, x: u32, y: u32, c: u32) -> usize {
    ((y as usize * self.tile_size as usize + x as usize) * self.channels as usize) + c as usize
  }

  /// Read one sample channel.
  #[inline]
  pub fn get(&self, x: u32, y: u32, c: u32) -> T {
    self.data[self.index(x, y, c)]
  }

  /// Write one sample channel.
  #[inline]
  pub fn set(&mut self, x: u32, y: u32, c: u32, value: T) {
    let idx = self.index(x, y, c);
    self.data[idx] = value;
  }

  /// Reset every element to the default value.
  pub fn clear(&mut self) {
    self.data.fill(T::default());
  }
}

/// Pixel format of a texture array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
  R8,
  Rg8,
  Rgba8,
  R32Float,
  Rgba32Float,
}

impl TextureFormat {
  /// Bytes per texel.
  pub fn bytes_per_texel(&self) -> usize {
    match self {
      TextureFormat::R8 => 1,
      TextureFormat::Rg8 => 2,
      TextureFormat::Rgba8 => 4,
      TextureFormat::R32Float => 4,
      TextureFormat::Rgba32Float => 16,
    }
  }
}

/// One layer of a texture array.
///
/// Producers fill `staging` and set `dirty`; the renderer uploads dirty
/// layers and clears the flag.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureLayer {
  /// Layer index inside the array texture.
  pub layer: u32,
  pub format: TextureFormat,
  /// Texels in `format`, `tile_size²` of them.
  pub staging: Vec<u8>,
  /// Staging content not yet uploaded.
  pub dirty: bool,
}

impl TextureLayer {
  /// Empty layer sized for `tile_size × tile_size` texels.
  pub fn new(layer: u32, tile_size: u32, format: TextureFormat) -> Self {
    let len = tile_size as usize * tile_size as usize * format.bytes_per_texel();
    Self {
      layer,
      format,
      staging: vec![0; len],
      dirty: false,
    }
  }

  /// Mark the staging buffer as uploaded.
  pub fn mark_uploaded(&mut self) {
    self.dirty = false;
  }
}
