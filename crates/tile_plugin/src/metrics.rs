//! Engine-agnostic scheduler statistics.
//!
//! Feature-gated and runtime-toggled to ensure zero overhead when disabled.
//!
//! # Usage
//!
//! ```ignore
//! use tile_plugin::metrics::COLLECT_METRICS;
//!
//! // Compile with --features metrics
//! // Runtime toggle:
//! COLLECT_METRICS.store(false, Ordering::Relaxed);
//!
//! let metrics = scheduler.metrics();
//! println!("avg task {:.1}us", metrics.avg_task_timing_us());
//! ```

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;

/// Runtime toggle for metrics collection.
pub static COLLECT_METRICS: AtomicBool = AtomicBool::new(true);

/// Check if metrics collection is enabled (both compile-time and runtime).
#[inline]
pub fn is_enabled() -> bool {
  #[cfg(feature = "metrics")]
  {
    COLLECT_METRICS.load(Ordering::Relaxed)
  }
  #[cfg(not(feature = "metrics"))]
  {
    false
  }
}

/// Rolling window for storing recent values (e.g., timing history).
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
  buffer: VecDeque<T>,
  capacity: usize,
}

impl<T> RollingWindow<T> {
  pub fn new(capacity: usize) -> Self {
    Self {
      buffer: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  /// Push a new value, evicting the oldest if at capacity.
  pub fn push(&mut self, value: T) {
    if self.buffer.len() >= self.capacity {
      self.buffer.pop_front();
    }
    self.buffer.push_back(value);
  }

  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }

  pub fn clear(&mut self) {
    self.buffer.clear();
  }

  /// Iterate over values (oldest to newest).
  pub fn iter(&self) -> impl Iterator<Item = &T> {
    self.buffer.iter()
  }

  /// Most recent value.
  pub fn last(&self) -> Option<&T> {
    self.buffer.back()
  }
}

impl RollingWindow<u64> {
  pub fn sum(&self) -> u64 {
    self.buffer.iter().sum()
  }

  pub fn average(&self) -> f64 {
    if self.buffer.is_empty() {
      0.0
    } else {
      self.sum() as f64 / self.buffer.len() as f64
    }
  }

  pub fn min_max(&self) -> Option<(u64, u64)> {
    let min = self.buffer.iter().min()?;
    let max = self.buffer.iter().max()?;
    Some((*min, *max))
  }
}

impl Default for RollingWindow<u64> {
  fn default() -> Self {
    Self::new(256)
  }
}

/// Scheduler counters and execution timings.
#[derive(Debug, Clone, Default)]
pub struct SchedulerMetrics {
  /// Rolling window of task execution times in microseconds.
  pub task_timings: RollingWindow<u64>,
  /// Successful executions.
  pub tasks_completed: u64,
  /// Failed attempts that were re-queued.
  pub tasks_retried: u64,
  /// Tasks that exhausted their retries.
  pub tasks_failed: u64,
  /// Tasks cancelled before running.
  pub tasks_cancelled: u64,
  /// Highest number of simultaneously running tasks.
  pub peak_running: usize,
}

impl SchedulerMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record one finished attempt.
  pub fn record_attempt(&mut self, timing_us: u64, success: bool, retried: bool) {
    if !is_enabled() {
      return;
    }
    self.task_timings.push(timing_us);
    if success {
      self.tasks_completed += 1;
    } else if retried {
      self.tasks_retried += 1;
    } else {
      self.tasks_failed += 1;
    }
  }

  pub fn record_cancelled(&mut self) {
    if is_enabled() {
      self.tasks_cancelled += 1;
    }
  }

  pub fn record_running(&mut self, running: usize) {
    if is_enabled() {
      self.peak_running = self.peak_running.max(running);
    }
  }

  /// Average task execution time in microseconds.
  pub fn avg_task_timing_us(&self) -> f64 {
    self.task_timings.average()
  }

  /// Reset timings; counters are cumulative and kept.
  pub fn reset_timings(&mut self) {
    self.task_timings.clear();
  }
}
