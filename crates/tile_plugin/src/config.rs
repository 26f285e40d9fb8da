//! Scheduler and cache configuration.
//!
//! Plain structs with sensible defaults; [`PipelineConfig`] can also be read
//! from TOML:
//!
//! ```toml
//! [scheduler]
//! worker_threads = 4
//! max_retries = 2
//!
//! [[caches]]
//! name = "elevation"
//! capacity = 256
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Task scheduler settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Worker threads. 0 runs tasks inline through
  /// [`Scheduler::tick`](crate::Scheduler::tick).
  pub worker_threads: usize,
  /// Automatic re-queues of a failing task before it settles as `Failed`.
  pub max_retries: u32,
  /// Worker thread name prefix.
  pub thread_name_prefix: String,
}

impl SchedulerConfig {
  /// Inline execution, no worker threads.
  pub fn inline() -> Self {
    Self {
      worker_threads: 0,
      ..Self::default()
    }
  }

  /// `n` worker threads.
  pub fn with_workers(n: usize) -> Self {
    Self {
      worker_threads: n,
      ..Self::default()
    }
  }

  /// True when tasks run on the caller thread.
  #[inline]
  pub fn is_inline(&self) -> bool {
    self.worker_threads == 0
  }
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      worker_threads: 2,
      max_retries: 2,
      thread_name_prefix: String::from("tile-worker"),
    }
  }
}

/// Settings for one [`TileCache`](crate::TileCache).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Name used in logs and errors.
  pub name: String,
  /// Number of slots.
  pub capacity: usize,
  /// Maximum registered producers (0 = unlimited).
  pub max_producers: usize,
}

impl CacheConfig {
  pub fn new(name: impl Into<String>, capacity: usize) -> Self {
    Self {
      name: name.into(),
      capacity,
      ..Self::default()
    }
  }

  /// Check if another producer can be registered.
  #[inline]
  pub fn can_register(&self, registered: usize) -> bool {
    self.max_producers == 0 || registered < self.max_producers
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.capacity == 0 {
      return Err(ConfigError::Invalid(format!(
        "cache '{}' needs a capacity of at least one slot",
        self.name
      )));
    }
    Ok(())
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: String::from("tiles"),
      capacity: 128,
      max_producers: 0,
    }
  }
}

/// Scheduler plus named cache settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub scheduler: SchedulerConfig,
  pub caches: Vec<CacheConfig>,
}

impl PipelineConfig {
  /// Parse and validate TOML.
  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  /// Read, parse and validate a TOML file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Self::from_toml_str(&text)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    for (i, cache) in self.caches.iter().enumerate() {
      cache.validate()?;
      if self.caches[..i].iter().any(|c| c.name == cache.name) {
        return Err(ConfigError::Invalid(format!(
          "duplicate cache name '{}'",
          cache.name
        )));
      }
    }
    Ok(())
  }

  /// Settings for the cache called `name`, defaults otherwise.
  pub fn cache(&self, name: &str) -> CacheConfig {
    self
      .caches
      .iter()
      .find(|c| c.name == name)
      .cloned()
      .unwrap_or_else(|| CacheConfig {
        name: name.to_string(),
        ..CacheConfig::default()
      })
  }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
