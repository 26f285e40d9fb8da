//! Fixed-capacity tile storage.
//!
//! A storage owns `capacity` interchangeable slots of one payload type, all
//! sized for `tile_size` samples per side. Slots are pre-allocated once;
//! tiles borrow them and hand them back on eviction.
//!
//! ```text
//! SlotPool<T>
//!   ├─→ slot 0  [bound → P0:3/2/5, epoch 7]
//!   ├─→ slot 1  [free]
//!   ├─→ slot 2  [bound → P1:4/9/1, epoch 3]
//!   └─→ free list: [1]
//! ```
//!
//! # Storage flavours
//!
//! - [`CpuTileStorage`]: flat sample buffers (`tile_size² × channels`)
//! - [`TextureArrayStorage`]: layers of a texture array, with a CPU staging
//!   buffer the renderer uploads from
//! - [`ObjectTileStorage`]: any `Default` object per slot

pub mod payload;
pub mod pool;
pub mod slot;

pub use payload::{CpuBuffer, TextureFormat, TextureLayer};
pub use pool::{SlotPool, TileStorage};
pub use slot::{SlotBinding, SlotId};

/// Storage of flat CPU sample buffers.
pub type CpuTileStorage<T> = SlotPool<CpuBuffer<T>>;

/// Storage of texture array layers.
pub type TextureArrayStorage = SlotPool<TextureLayer>;

/// Storage of arbitrary per-tile objects.
pub type ObjectTileStorage<T> = SlotPool<T>;
