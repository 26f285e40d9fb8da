//! Terrain tile demo.
//!
//! Flies a camera over procedural terrain: an elevation producer refines
//! each tile from its parent, a slope producer reads elevation tiles from a
//! second cache, and a quadtree viewer pins whatever the camera needs each
//! frame.

mod pipeline;
mod producers;
mod viewer;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use glam::DVec2;
use tile_plugin::{PipelineConfig, TaskStatus, TileLayout};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pipeline::Pipeline;
use viewer::Viewer;

/// Side length of the whole terrain in meters.
const TERRAIN_SIZE: f64 = 16_384.0;

/// Frame budget when tasks run on workers.
const FRAME_TIME: Duration = Duration::from_millis(16);

/// Drive chained tile producers with a simulated viewer.
#[derive(Parser, Debug)]
#[command(name = "tile_demo")]
#[command(about = "Streams procedural terrain tiles around a moving camera")]
struct Args {
  /// Pipeline configuration TOML file.
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Worker threads (0 runs tasks inline between frames).
  #[arg(short, long)]
  workers: Option<usize>,

  /// Frames to simulate.
  #[arg(long, default_value_t = 120)]
  frames: u32,

  /// Deepest quadtree level.
  #[arg(long, default_value_t = 6)]
  max_level: u32,

  /// Samples per tile side, one border sample on each edge included.
  #[arg(long, default_value_t = 33, value_parser = clap::value_parser!(u32).range(3..))]
  tile_size: u32,

  /// Tasks run per frame in inline mode.
  #[arg(long, default_value_t = 64)]
  tick_budget: usize,

  /// Log level (trace, debug, info, warn, error).
  #[arg(long, default_value = "info")]
  log_level: String,

  /// Terrain seed.
  #[arg(long, default_value_t = 1)]
  seed: u32,

  /// Frame at which the terrain is reseeded and every tile invalidated.
  #[arg(long)]
  edit_frame: Option<u32>,
}

fn setup_logging(level: &str) {
  let level = level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);

  tracing_subscriber::registry()
    .with(fmt::layer().with_target(false))
    .with(EnvFilter::from_default_env().add_directive(level.into()))
    .init();
}

/// Camera path: a slow diagonal sweep that starts high and descends.
fn camera(frame: u32, frames: u32) -> (DVec2, f64) {
  let t = frame as f64 / frames.max(1) as f64;
  let position = DVec2::new(0.1 + 0.8 * t, 0.3 + 0.4 * t) * TERRAIN_SIZE;
  let altitude = TERRAIN_SIZE * (0.5 - 0.48 * t);
  (position, altitude)
}

fn main() -> Result<()> {
  let args = Args::parse();
  setup_logging(&args.log_level);

  let mut config = match &args.config {
    Some(path) => PipelineConfig::load(path)
      .with_context(|| format!("Failed to load config: {}", path.display()))?,
    None => pipeline::default_config(),
  };
  if let Some(workers) = args.workers {
    config.scheduler.worker_threads = workers;
  }

  let layout = TileLayout {
    root_quad_size: TERRAIN_SIZE,
    origin: DVec2::ZERO,
    tile_size: args.tile_size,
    border: 1,
  };

  info!(
    workers = config.scheduler.worker_threads,
    max_level = args.max_level,
    tile_size = args.tile_size,
    "starting tile demo"
  );

  let pipeline = Pipeline::new(&config, layout, args.max_level, args.seed)?;
  let events = pipeline.scheduler.subscribe();
  let mut viewer = Viewer::new(layout, pipeline.slope.clone(), pipeline.slope_id, 2.0);

  let mut failed = 0u64;
  for frame in 0..args.frames {
    if args.edit_frame == Some(frame) {
      let invalidated = pipeline.reseed(args.seed.wrapping_add(1))?;
      info!(frame, invalidated, "terrain edited");
    }

    let (position, altitude) = camera(frame, args.frames);
    let report = viewer.frame(position, altitude)?;

    if pipeline.scheduler.is_inline() {
      pipeline.scheduler.tick(args.tick_budget);
    } else {
      let tasks: Vec<_> = viewer.held().iter().map(|h| h.task()).collect();
      pipeline.scheduler.wait(&tasks, FRAME_TIME);
    }

    for event in events.try_iter() {
      match event.status {
        TaskStatus::Failed => {
          failed += 1;
          warn!(task = %event.label, attempts = event.attempts, "tile production failed");
        }
        _ => debug!(task = %event.label, status = ?event.status, elapsed_us = event.elapsed_us, "task settled"),
      }
    }

    if frame % 10 == 0 {
      info!(
        frame,
        visible = report.visible,
        ready = report.ready,
        exhausted = report.exhausted,
        prefetched = report.prefetched,
        max_slope = f64::from(report.max_slope),
        "frame"
      );
    }
  }

  viewer.release();

  for cache in [&pipeline.elevation, &pipeline.slope] {
    let stats = cache.stats();
    info!(
      cache = cache.name(),
      used = stats.used,
      unused = stats.unused,
      hits = stats.hits,
      misses = stats.misses,
      evictions = stats.evictions,
      prefetches = stats.prefetches,
      exhausted = stats.exhausted,
      "cache stats"
    );
  }

  let metrics = pipeline.scheduler.metrics();
  info!(
    completed = metrics.tasks_completed,
    retried = metrics.tasks_retried,
    failed = metrics.tasks_failed,
    cancelled = metrics.tasks_cancelled,
    peak_running = metrics.peak_running,
    avg_task_us = metrics.avg_task_timing_us(),
    failed_events = failed,
    "scheduler metrics"
  );

  pipeline.scheduler.shutdown();
  Ok(())
}
