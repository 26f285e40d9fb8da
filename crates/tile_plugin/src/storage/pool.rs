//! SlotPool - pre-allocated pool of tile slots.
//!
//! All slots are created up front so tiles entering and leaving the cache
//! never allocate. `new_slot` / `delete_slot` only move indices between the
//! free list and the allocated set.

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::payload::{CpuBuffer, TextureFormat, TextureLayer};
use super::slot::{SlotBinding, SlotId};

/// The allocation contract shared by every storage flavour.
pub trait TileStorage: Send + Sync {
  /// Take a free slot, or `None` when the pool is exhausted (evict, then
  /// try again).
  fn new_slot(&self) -> Option<SlotId>;

  /// Return a slot to the free list.
  ///
  /// # Panics
  /// Panics if the slot was not allocated from this storage.
  fn delete_slot(&self, slot: SlotId);

  /// Number of slots on the free list.
  fn free_slot_count(&self) -> usize;

  /// Total number of slots.
  fn capacity(&self) -> usize;

  /// Samples per tile side the slots are sized for.
  fn tile_size(&self) -> u32;
}

/// A slot: payload plus the binding record guarded by the slot lock.
struct PoolSlot<T> {
  data: RwLock<T>,
  binding: Mutex<SlotBinding>,
}

#[derive(Default)]
struct FreeList {
  /// Free slot indices, next allocation at the back.
  stack: Vec<u32>,
  /// Allocation flag per slot.
  allocated: Vec<bool>,
}

/// Pre-allocated pool of slots holding payloads of type `T`.
pub struct SlotPool<T> {
  slots: Vec<PoolSlot<T>>,
  free: Mutex<FreeList>,
  tile_size: u32,
}

impl<T: Send + Sync> SlotPool<T> {
  /// Create a pool of `capacity` slots, building each payload with `init`.
  pub fn with_init(capacity: usize, tile_size: u32, mut init: impl FnMut(SlotId) -> T) -> Self {
    let slots = (0..capacity)
      .map(|i| PoolSlot {
        data: RwLock::new(init(SlotId(i as u32))),
        binding: Mutex::new(SlotBinding::default()),
      })
      .collect();

    // Reversed so slot 0 is handed out first.
    let stack = (0..capacity as u32).rev().collect();

    Self {
      slots,
      free: Mutex::new(FreeList {
        stack,
        allocated: vec![false; capacity],
      }),
      tile_size,
    }
  }

  /// True if `slot` is currently allocated.
  pub fn is_allocated(&self, slot: SlotId) -> bool {
    self
      .free
      .lock()
      .allocated
      .get(slot.index())
      .copied()
      .unwrap_or(false)
  }

  /// Lock the slot's binding record. Dropping the guard unlocks it.
  ///
  /// # Panics
  /// Panics if `slot` does not belong to this pool.
  pub fn lock(&self, slot: SlotId) -> MutexGuard<'_, SlotBinding> {
    self.slots[slot.index()].binding.lock()
  }

  /// Shared access to a slot's payload.
  pub fn read(&self, slot: SlotId) -> RwLockReadGuard<'_, T> {
    self.slots[slot.index()].data.read()
  }

  /// Exclusive access to a slot's payload (the producing task only).
  pub fn write(&self, slot: SlotId) -> RwLockWriteGuard<'_, T> {
    self.slots[slot.index()].data.write()
  }
}

impl<T: Send + Sync> TileStorage for SlotPool<T> {
  fn new_slot(&self) -> Option<SlotId> {
    let mut free = self.free.lock();
    let index = free.stack.pop()?;
    free.allocated[index as usize] = true;
    Some(SlotId(index))
  }

  fn delete_slot(&self, slot: SlotId) {
    let mut free = self.free.lock();
    match free.allocated.get_mut(slot.index()) {
      Some(allocated) if *allocated => *allocated = false,
      Some(_) => panic!("{} freed twice", slot),
      None => panic!("{} does not belong to this storage", slot),
    }
    free.stack.push(slot.0);
  }

  fn free_slot_count(&self) -> usize {
    self.free.lock().stack.len()
  }

  fn capacity(&self) -> usize {
    self.slots.len()
  }

  fn tile_size(&self) -> u32 {
    self.tile_size
  }
}

impl<T: Default + Send + Sync> SlotPool<T> {
  /// Pool of default-constructed objects.
  pub fn objects(capacity: usize, tile_size: u32) -> Self {
    Self::with_init(capacity, tile_size, |_| T::default())
  }
}

impl<T: Copy + Default + Send + Sync> SlotPool<CpuBuffer<T>> {
  /// Pool of `tile_size² × channels` sample buffers.
  pub fn cpu(capacity: usize, tile_size: u32, channels: u32) -> Self {
    Self::with_init(capacity, tile_size, |_| CpuBuffer::new(tile_size, channels))
  }
}

impl SlotPool<TextureLayer> {
  /// Pool over the layers of a `capacity`-layer texture array.
  pub fn texture_array(capacity: usize, tile_size: u32, format: TextureFormat) -> Self {
    Self::with_init(capacity, tile_size, |slot| {
      TextureLayer::new(slot.0, tile_size, format)
    })
  }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
