//! Slot handles and the binding record kept alongside each slot.

use std::fmt;

use crate::scheduler::TaskId;
use crate::tile_id::TileId;

/// Index of a slot inside its storage.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SlotId(pub(crate) u32);

impl SlotId {
  /// Get the raw slot index.
  pub fn index(&self) -> usize {
    self.0 as usize
  }
}

impl fmt::Display for SlotId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Slot({})", self.0)
  }
}

/// Who currently owns a slot's content.
///
/// Guarded by the slot lock. The epoch changes every time the slot is bound
/// to new content, so a task can tell whether the slot it was built for has
/// been repurposed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotBinding {
  /// Tile whose data lives (or will live) in the slot.
  pub tile: Option<TileId>,
  /// Production task writing the slot.
  pub task: Option<TaskId>,
  /// Bind counter.
  pub epoch: u64,
}

impl SlotBinding {
  /// Rebind to a new tile, bumping the epoch.
  pub fn bind(&mut self, tile: TileId) -> u64 {
    self.epoch += 1;
    self.tile = Some(tile);
    self.task = None;
    self.epoch
  }

  /// Drop the tile and task references.
  pub fn unbind(&mut self) {
    self.tile = None;
    self.task = None;
  }

  /// True when the binding still refers to `tile` at `epoch`.
  pub fn is_current(&self, tile: TileId, epoch: u64) -> bool {
    self.tile == Some(tile) && self.epoch == epoch
  }
}
