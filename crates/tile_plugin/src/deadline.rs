//! Scheduling deadlines.
//!
//! A deadline is a priority hint expressed in frames from now, not a
//! real-time bound. Lower values run first.

use std::fmt;

/// Frame-relative urgency of a task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(pub u32);

impl Deadline {
  /// Needed to draw the current frame.
  pub const CURRENT_FRAME: Self = Self(0);

  /// Speculative work, runs only when nothing else is queued.
  pub const PREFETCH: Self = Self(u32::MAX);

  /// Deadline `frames` frames from now.
  pub fn in_frames(frames: u32) -> Self {
    Self(frames)
  }

  /// True for prefetch work.
  pub fn is_prefetch(&self) -> bool {
    *self == Self::PREFETCH
  }

  /// The more urgent of two deadlines.
  #[inline]
  pub fn most_urgent(self, other: Self) -> Self {
    self.min(other)
  }
}

impl fmt::Display for Deadline {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_prefetch() {
      write!(f, "prefetch")
    } else {
      write!(f, "+{}f", self.0)
    }
  }
}
