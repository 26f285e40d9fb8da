use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::config::SchedulerConfig;
use crate::test_utils::{tile_value, u64_cache, ChainedProducer, CountingProducer};

const TIMEOUT: Duration = Duration::from_secs(5);
const NOW: Deadline = Deadline::CURRENT_FRAME;

fn counting_cache(capacity: usize) -> (Scheduler, TileCache<u64>, Arc<CountingProducer>, ProducerId) {
  let scheduler = Scheduler::inline();
  let cache = u64_cache("test", capacity, &scheduler);
  let producer = Arc::new(CountingProducer::new());
  let id = cache.register_producer(producer.clone()).unwrap();
  (scheduler, cache, producer, id)
}

/// Pin a tile, produce it and release it again.
fn touch(cache: &TileCache<u64>, scheduler: &Scheduler, p: ProducerId, tx: u32) -> TileHandle {
  let handle = cache.get_tile(p, 2, tx, 0, NOW).unwrap();
  scheduler.run_until_idle();
  cache.put_tile(&handle);
  handle
}

// =============================================================================
// Basic lifecycle
// =============================================================================

#[test]
fn test_get_tile_produces_asynchronously() {
  let (scheduler, cache, producer, p) = counting_cache(4);

  let handle = cache.get_tile(p, 3, 2, 5, NOW).unwrap();
  assert_eq!(cache.status(&handle).unwrap(), TaskStatus::Ready);
  assert!(matches!(
    cache.tile_data(&handle),
    Err(TileError::NotReady { .. })
  ));
  assert_eq!(producer.started.load(Ordering::SeqCst), 1);
  assert_eq!(producer.created(), 0);

  scheduler.run_until_idle();
  assert_eq!(cache.status(&handle).unwrap(), TaskStatus::Done);
  assert_eq!(*cache.tile_data(&handle).unwrap(), tile_value(handle.id()));
  assert_eq!(producer.begins.load(Ordering::SeqCst), 1);
  assert_eq!(producer.ends.load(Ordering::SeqCst), 1);

  let tile = cache.tile(&handle).unwrap();
  assert_eq!(tile.users, 1);
  assert_eq!(tile.id, TileId::new(p, 3, 2, 5));
}

#[test]
fn test_same_id_shares_one_task() {
  let (scheduler, cache, producer, p) = counting_cache(4);

  let first = cache.get_tile(p, 1, 0, 1, NOW).unwrap();
  let second = cache.get_tile(p, 1, 0, 1, Deadline::PREFETCH).unwrap();
  assert_eq!(first, second);
  assert_eq!(cache.tile(&first).unwrap().users, 2);

  scheduler.run_until_idle();
  assert_eq!(producer.created(), 1);
  assert_eq!(producer.started.load(Ordering::SeqCst), 1);
  assert_eq!(cache.stats().hits, 1);
  assert_eq!(cache.stats().misses, 1);
}

#[test]
fn test_concurrent_get_tile_single_task() {
  let scheduler = Scheduler::new(SchedulerConfig::with_workers(2)).unwrap();
  let cache = u64_cache("test", 8, &scheduler);
  let producer = Arc::new(CountingProducer::new());
  let p = cache.register_producer(producer.clone()).unwrap();

  let handles: Vec<TileHandle> = std::thread::scope(|s| {
    let workers: Vec<_> = (0..8)
      .map(|_| s.spawn(|| cache.get_tile(p, 4, 7, 9, NOW).unwrap()))
      .collect();
    workers.into_iter().map(|w| w.join().unwrap()).collect()
  });

  assert!(handles.iter().all(|h| *h == handles[0]));
  assert!(scheduler.wait(&[handles[0].task()], TIMEOUT));
  assert_eq!(producer.created(), 1);
  assert_eq!(cache.tile(&handles[0]).unwrap().users, 8);
  assert_eq!(cache.len(), 1);

  for handle in &handles {
    cache.put_tile(handle);
  }
}

#[test]
fn test_round_trip_reuse() {
  let (scheduler, cache, producer, p) = counting_cache(2);

  let first = touch(&cache, &scheduler, p, 1);
  let again = cache.get_tile(p, 2, 1, 0, NOW).unwrap();

  assert_eq!(again, first);
  assert_eq!(scheduler.run_until_idle(), 0);
  assert_eq!(producer.created(), 1);
  assert_eq!(*cache.tile_data(&again).unwrap(), tile_value(first.id()));
}

// =============================================================================
// Eviction
// =============================================================================

#[test]
fn test_lru_evicts_least_recently_used() {
  let (scheduler, cache, producer, p) = counting_cache(3);
  touch(&cache, &scheduler, p, 0); // A
  touch(&cache, &scheduler, p, 1); // B
  touch(&cache, &scheduler, p, 2); // C

  let d = cache.get_tile(p, 2, 3, 0, NOW).unwrap();
  assert!(cache.find_tile(p, 2, 0, 0).is_none());
  assert!(cache.find_tile(p, 2, 1, 0).is_some());
  assert!(cache.find_tile(p, 2, 2, 0).is_some());
  assert_eq!(cache.stats().evictions, 1);
  assert_eq!(producer.stopped.load(Ordering::SeqCst), 1);
  cache.put_tile(&d);
}

/// get_tile moves a tile to the most recently used end.
#[test]
fn test_get_tile_refreshes_recency() {
  let (scheduler, cache, _producer, p) = counting_cache(3);
  touch(&cache, &scheduler, p, 0); // A
  touch(&cache, &scheduler, p, 1); // B
  touch(&cache, &scheduler, p, 2); // C
  touch(&cache, &scheduler, p, 0); // A again

  touch(&cache, &scheduler, p, 3);
  assert!(cache.find_tile(p, 2, 0, 0).is_some());
  assert!(cache.find_tile(p, 2, 1, 0).is_none());
}

/// find_tile neither pins nor refreshes.
#[test]
fn test_find_tile_does_not_pin() {
  let (scheduler, cache, _producer, p) = counting_cache(2);
  touch(&cache, &scheduler, p, 0);
  touch(&cache, &scheduler, p, 1);

  let found = cache.find_tile(p, 2, 0, 0).unwrap();
  assert_eq!(cache.tile(&found).unwrap().users, 0);

  touch(&cache, &scheduler, p, 2);
  assert!(cache.find_tile(p, 2, 0, 0).is_none());
  assert_eq!(cache.tile(&found), Err(TileError::StaleHandle(found.id())));
}

#[test]
fn test_pinned_tiles_are_never_evicted() {
  let (scheduler, cache, _producer, p) = counting_cache(2);
  let a = cache.get_tile(p, 2, 0, 0, NOW).unwrap();
  touch(&cache, &scheduler, p, 1);

  // B is the only candidate even though A is older.
  touch(&cache, &scheduler, p, 2);
  assert!(cache.tile(&a).is_ok());
  assert!(cache.find_tile(p, 2, 1, 0).is_none());
  cache.put_tile(&a);
}

#[test]
fn test_capacity_exhausted() {
  let (scheduler, cache, _producer, p) = counting_cache(2);
  let a = cache.get_tile(p, 1, 0, 0, NOW).unwrap();
  let b = cache.get_tile(p, 1, 1, 0, NOW).unwrap();
  scheduler.run_until_idle();

  let err = cache.get_tile(p, 1, 0, 1, NOW).unwrap_err();
  assert_eq!(
    err,
    TileError::CapacityExhausted {
      cache: "test".to_string(),
      capacity: 2,
      pinned: 2,
    }
  );

  // Neither pinned slot was touched.
  assert_ne!(a.slot(), b.slot());
  assert_eq!(*cache.tile_data(&a).unwrap(), tile_value(a.id()));
  assert_eq!(*cache.tile_data(&b).unwrap(), tile_value(b.id()));
  assert_eq!(cache.stats().exhausted, 1);

  // Releasing one pin makes room again.
  cache.put_tile(&a);
  let c = cache.get_tile(p, 1, 0, 1, NOW).unwrap();
  assert_eq!(c.slot(), a.slot());
  cache.put_tile(&b);
  cache.put_tile(&c);
}

/// Evicting a tile whose task never ran cancels the task.
#[test]
fn test_eviction_cancels_queued_task() {
  let (scheduler, cache, producer, p) = counting_cache(1);
  let events = scheduler.subscribe();

  let a = cache.get_tile(p, 0, 0, 0, NOW).unwrap();
  cache.put_tile(&a);
  let b = cache.get_tile(p, 1, 0, 0, NOW).unwrap();

  let event = events.try_recv().unwrap();
  assert_eq!(event.task, a.task());
  assert_eq!(event.status, TaskStatus::Cancelled);
  assert_eq!(scheduler.status(a.task()), None);

  assert_eq!(scheduler.run_until_idle(), 1);
  assert_eq!(producer.created(), 1);
  assert_eq!(*cache.tile_data(&b).unwrap(), tile_value(b.id()));
  cache.put_tile(&b);
}

#[test]
fn test_running_tile_is_not_evictable() {
  let scheduler = Scheduler::new(SchedulerConfig::with_workers(1)).unwrap();
  let cache = u64_cache("test", 1, &scheduler);
  let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
  let producer = Arc::new(CountingProducer::gated(gate_rx));
  let p = cache.register_producer(producer.clone()).unwrap();

  let a = cache.get_tile(p, 0, 0, 0, NOW).unwrap();
  cache.put_tile(&a);
  while scheduler.status(a.task()) != Some(TaskStatus::Running) {
    std::thread::yield_now();
  }

  assert!(matches!(
    cache.get_tile(p, 1, 0, 0, NOW),
    Err(TileError::CapacityExhausted { pinned: 0, .. })
  ));

  gate_tx.send(()).unwrap();
  assert!(scheduler.wait(&[a.task()], TIMEOUT));

  gate_tx.send(()).unwrap();
  let b = cache.get_tile(p, 1, 0, 0, NOW).unwrap();
  assert!(scheduler.wait(&[b.task()], TIMEOUT));
  assert_eq!(producer.created(), 2);
  cache.put_tile(&b);
}

/// Random get/put sequences never evict or alias a pinned tile.
#[test]
fn test_pin_safety_random_interleaving() {
  let (scheduler, cache, _producer, p) = counting_cache(8);
  let mut rng = StdRng::seed_from_u64(0x7113);
  let mut held: Vec<TileHandle> = Vec::new();

  for _ in 0..2_000 {
    match rng.random_range(0..10) {
      0..=4 => {
        let tx = rng.random_range(0..24);
        match cache.get_tile(p, 5, tx, 0, NOW) {
          Ok(handle) => held.push(handle),
          Err(TileError::CapacityExhausted { capacity, pinned, .. }) => {
            let mut distinct: Vec<TileId> = held.iter().map(|h| h.id()).collect();
            distinct.sort();
            distinct.dedup();
            assert_eq!(distinct.len(), capacity);
            assert_eq!(pinned, capacity);
          }
          Err(err) => panic!("unexpected error {err}"),
        }
      }
      5..=8 if !held.is_empty() => {
        let i = rng.random_range(0..held.len());
        let handle = held.swap_remove(i);
        cache.put_tile(&handle);
      }
      _ => {
        scheduler.tick(rng.random_range(1..4));
      }
    }

    let mut pins: HashMap<TileHandle, u32> = HashMap::new();
    for handle in &held {
      *pins.entry(*handle).or_default() += 1;
    }
    let mut slots = HashMap::new();
    for (handle, count) in &pins {
      let tile = cache.tile(handle).unwrap();
      assert_eq!(tile.users, *count);
      assert_eq!(slots.insert(tile.slot, tile.id), None, "slot aliased");
    }
  }

  scheduler.run_until_idle();
  for handle in &held {
    assert_eq!(*cache.tile_data(handle).unwrap(), tile_value(handle.id()));
    cache.put_tile(handle);
  }
  assert_eq!(cache.stats().used, 0);
}

// =============================================================================
// Producer chains
// =============================================================================

struct Chain {
  scheduler: Scheduler,
  upstream: TileCache<u64>,
  upstream_producer: Arc<CountingProducer>,
  cache: TileCache<u64>,
  chained: Arc<ChainedProducer>,
  p: ProducerId,
}

fn chain(scheduler: Scheduler, upstream_capacity: usize, capacity: usize) -> Chain {
  let upstream = u64_cache("upstream", upstream_capacity, &scheduler);
  let upstream_producer = Arc::new(CountingProducer::new());
  let up = upstream
    .register_producer(upstream_producer.clone())
    .unwrap();

  let cache = u64_cache("chained", capacity, &scheduler);
  let chained = Arc::new(ChainedProducer::new(upstream.clone(), up));
  let p = cache.register_producer(chained.clone()).unwrap();

  Chain {
    scheduler,
    upstream,
    upstream_producer,
    cache,
    chained,
    p,
  }
}

#[test]
fn test_upstream_task_runs_first() {
  let c = chain(Scheduler::inline(), 4, 4);

  let handle = c.cache.get_tile(c.p, 2, 1, 3, NOW).unwrap();
  assert_eq!(c.scheduler.dependencies(handle.task()).len(), 1);
  assert_eq!(c.scheduler.run_until_idle(), 2);

  let upstream_id = handle.id().with_producer(ProducerId(0));
  assert_eq!(*c.cache.tile_data(&handle).unwrap(), tile_value(upstream_id) + 1);
  assert_eq!(c.chained.violations.load(Ordering::SeqCst), 0);

  // The upstream tile stays pinned by the chained tile.
  let upstream = c.upstream.find_tile(ProducerId(0), 2, 1, 3).unwrap();
  assert_eq!(c.upstream.tile(&upstream).unwrap().users, 1);

  c.cache.put_tile(&handle);
  assert_eq!(
    c.cache.referenced_producers(c.p).unwrap(),
    vec![ProducerRef {
      cache: "upstream".to_string(),
      producer: ProducerId(0),
    }]
  );
}

#[test]
fn test_upstream_order_on_workers() {
  let c = chain(Scheduler::new(SchedulerConfig::with_workers(4)).unwrap(), 64, 64);

  let mut handles = Vec::new();
  for tx in 0..8 {
    for ty in 0..4 {
      handles.push(c.cache.get_tile(c.p, 3, tx, ty, NOW).unwrap());
    }
  }
  let tasks: Vec<TaskId> = handles.iter().map(|h| h.task()).collect();
  assert!(c.scheduler.wait(&tasks, TIMEOUT));

  assert_eq!(c.chained.violations.load(Ordering::SeqCst), 0);
  assert_eq!(c.chained.created.load(Ordering::SeqCst), 32);
  assert_eq!(c.upstream_producer.created(), 32);
  for handle in &handles {
    c.cache.put_tile(handle);
  }
}

/// Evicting a downstream tile releases its upstream pins exactly once.
#[test]
fn test_eviction_releases_upstream_pins() {
  let c = chain(Scheduler::inline(), 4, 1);

  let first = c.cache.get_tile(c.p, 1, 0, 0, NOW).unwrap();
  c.scheduler.run_until_idle();
  c.cache.put_tile(&first);
  assert_eq!(c.upstream.stats().used, 1);

  let second = c.cache.get_tile(c.p, 1, 1, 0, NOW).unwrap();
  c.scheduler.run_until_idle();
  assert_eq!(c.chained.pins.len(), 1);
  assert_eq!(c.upstream.stats().used, 1);
  assert_eq!(c.upstream.stats().unused, 1);

  c.cache.put_tile(&second);
  c.cache.clear();
  assert!(c.chained.pins.is_empty());
  assert_eq!(c.upstream.stats().used, 0);
}

/// Pins belong to one production of a tile. Stopping an evicted incarnation
/// must not release the pins a newer incarnation of the same tile took.
#[test]
fn test_stop_releases_only_its_own_incarnation() {
  let c = chain(Scheduler::inline(), 4, 4);
  let id = TileId::new(c.p, 1, 0, 0);
  let upstream_id = id.with_producer(ProducerId(0));

  let old = c.scheduler.create_fn_task("old", NOW, || true);
  let mut old_graph = TaskGraph::single(old);
  c.chained
    .start_create_tile(id, NOW, old, &mut old_graph)
    .unwrap();

  // Re-created before the evicted incarnation was stopped.
  let new = c.scheduler.create_fn_task("new", NOW, || true);
  let mut new_graph = TaskGraph::single(new);
  c.chained
    .start_create_tile(id, NOW, new, &mut new_graph)
    .unwrap();

  let upstream = c.upstream.find_tile(ProducerId(0), 1, 0, 0).unwrap();
  assert_eq!(c.upstream.tile(&upstream).unwrap().users, 2);

  c.chained.stop_create_tile(id, old);
  assert_eq!(c.upstream.tile(&upstream).unwrap().users, 1);
  assert!(c.chained.pins.get(old, upstream_id).is_none());
  assert_eq!(c.chained.pins.get(new, upstream_id), Some(upstream));

  c.chained.stop_create_tile(id, new);
  assert_eq!(c.upstream.tile(&upstream).unwrap().users, 0);
  assert!(c.chained.pins.is_empty());
}

/// An evicted and re-created tile keeps its pins under the new production
/// task only.
#[test]
fn test_recreated_tile_keeps_upstream_pin() {
  let c = chain(Scheduler::inline(), 4, 1);

  let first = c.cache.get_tile(c.p, 1, 0, 0, NOW).unwrap();
  c.scheduler.run_until_idle();
  c.cache.put_tile(&first);

  // Evict (1, 0, 0), then bring it back.
  let other = c.cache.get_tile(c.p, 1, 1, 0, NOW).unwrap();
  c.scheduler.run_until_idle();
  c.cache.put_tile(&other);
  let again = c.cache.get_tile(c.p, 1, 0, 0, NOW).unwrap();
  assert_ne!(again.task(), first.task());
  c.scheduler.run_until_idle();

  assert_eq!(c.chained.pins.len(), 1);
  assert!(c.chained.pins.handles(first.task()).is_empty());
  assert_eq!(c.chained.pins.handles(again.task()).len(), 1);

  let upstream = c.upstream.find_tile(ProducerId(0), 1, 0, 0).unwrap();
  assert_eq!(c.upstream.tile(&upstream).unwrap().users, 1);
  assert_eq!(c.chained.violations.load(Ordering::SeqCst), 0);
  c.cache.put_tile(&again);
}

/// Invalidating an upstream tile reproduces the tiles built from it, even
/// when they live in another cache.
#[test]
fn test_invalidation_spreads_across_caches() {
  let c = chain(Scheduler::inline(), 4, 4);
  let handle = c.cache.get_tile(c.p, 1, 0, 0, NOW).unwrap();
  c.scheduler.run_until_idle();
  let upstream_id = handle.id().with_producer(ProducerId(0));
  assert_eq!(*c.cache.tile_data(&handle).unwrap(), tile_value(upstream_id) + 1);

  c.upstream_producer.offset.store(10, Ordering::SeqCst);
  assert_eq!(c.upstream.invalidate_tiles(ProducerId(0)).unwrap(), 1);
  assert_eq!(c.cache.status(&handle).unwrap(), TaskStatus::Pending);

  assert_eq!(c.scheduler.run_until_idle(), 2);
  assert_eq!(c.cache.status(&handle).unwrap(), TaskStatus::Done);
  assert_eq!(*c.cache.tile_data(&handle).unwrap(), tile_value(upstream_id) + 11);
  assert_eq!(c.chained.created.load(Ordering::SeqCst), 2);
  c.cache.put_tile(&handle);
}

/// Same with workers: waiting on the downstream tile sees the new value.
#[test]
fn test_invalidation_spreads_across_caches_on_workers() {
  let c = chain(Scheduler::new(SchedulerConfig::with_workers(2)).unwrap(), 4, 4);
  let handle = c.cache.get_tile(c.p, 1, 0, 0, NOW).unwrap();
  assert!(c.scheduler.wait(&[handle.task()], TIMEOUT));

  c.upstream_producer.offset.store(10, Ordering::SeqCst);
  c.upstream.invalidate_tiles(ProducerId(0)).unwrap();
  assert!(c.scheduler.wait(&[handle.task()], TIMEOUT));

  let upstream_id = handle.id().with_producer(ProducerId(0));
  assert_eq!(*c.cache.tile_data(&handle).unwrap(), tile_value(upstream_id) + 11);
  c.cache.put_tile(&handle);
}

/// A tile whose upstream keeps failing fails too instead of waiting forever.
#[test]
fn test_permanent_upstream_failure_settles_downstream() {
  let c = chain(Scheduler::inline(), 4, 4);
  c.upstream_producer.failures.store(100, Ordering::SeqCst);

  let handle = c.cache.get_tile(c.p, 1, 0, 0, NOW).unwrap();
  c.scheduler.run_until_idle();
  assert_eq!(c.cache.status(&handle).unwrap(), TaskStatus::Failed);
  assert_eq!(
    c.cache.tile_data(&handle).unwrap_err(),
    TileError::NotReady {
      id: handle.id(),
      status: TaskStatus::Failed,
    }
  );
  assert!(!c.scheduler.wait(&[handle.task()], TIMEOUT));
  assert_eq!(c.chained.created.load(Ordering::SeqCst), 0);

  // Once the upstream recovers, a new request retries the whole chain.
  c.upstream_producer.failures.store(0, Ordering::SeqCst);
  let again = c.cache.get_tile(c.p, 1, 0, 0, NOW).unwrap();
  c.scheduler.run_until_idle();
  let upstream_id = handle.id().with_producer(ProducerId(0));
  assert_eq!(*c.cache.tile_data(&again).unwrap(), tile_value(upstream_id) + 1);

  c.cache.put_tile(&handle);
  c.cache.put_tile(&again);
}

#[test]
fn test_permanent_upstream_failure_does_not_block_wait() {
  let c = chain(Scheduler::new(SchedulerConfig::with_workers(1)).unwrap(), 4, 4);
  c.upstream_producer.failures.store(100, Ordering::SeqCst);

  let handle = c.cache.get_tile(c.p, 1, 0, 0, NOW).unwrap();
  let start = web_time::Instant::now();
  assert!(!c.scheduler.wait(&[handle.task()], TIMEOUT));
  assert!(start.elapsed() < TIMEOUT);
  assert_eq!(c.cache.status(&handle).unwrap(), TaskStatus::Failed);
  c.cache.put_tile(&handle);
}

/// A failed start leaves no tile behind.
#[test]
fn test_start_failure_rolls_back() {
  let c = chain(Scheduler::inline(), 1, 4);
  let blocker = c
    .upstream
    .get_tile(ProducerId(0), 0, 0, 0, NOW)
    .unwrap();

  let err = c.cache.get_tile(c.p, 1, 0, 0, NOW).unwrap_err();
  assert!(matches!(err, TileError::CapacityExhausted { .. }));
  assert!(c.cache.is_empty());
  assert_eq!(c.cache.stats().free_slots, 4);
  assert!(c.chained.pins.is_empty());
  assert_eq!(c.scheduler.task_count(), 1);

  c.upstream.put_tile(&blocker);
}

// =============================================================================
// Failures, invalidation, prefetch
// =============================================================================

#[test]
fn test_failed_production_is_retried() {
  let scheduler = Scheduler::inline();
  let cache = u64_cache("test", 2, &scheduler);
  let producer = Arc::new(CountingProducer::failing(5));
  let p = cache.register_producer(producer.clone()).unwrap();

  let handle = cache.get_tile(p, 0, 0, 0, NOW).unwrap();
  scheduler.run_until_idle();
  assert_eq!(
    cache.tile_data(&handle).unwrap_err(),
    TileError::NotReady {
      id: handle.id(),
      status: TaskStatus::Failed,
    }
  );

  // A hit on a failed tile retries it.
  let again = cache.get_tile(p, 0, 0, 0, NOW).unwrap();
  scheduler.run_until_idle();
  assert_eq!(*cache.tile_data(&again).unwrap(), tile_value(handle.id()));
  assert_eq!(producer.begins.load(Ordering::SeqCst), 6);
  assert_eq!(producer.ends.load(Ordering::SeqCst), 6);

  cache.put_tile(&handle);
  cache.put_tile(&again);
}

#[test]
fn test_invalidate_reproduces_in_place() {
  let (scheduler, cache, producer, p) = counting_cache(4);
  let pinned = cache.get_tile(p, 1, 1, 1, NOW).unwrap();
  let unused = touch(&cache, &scheduler, p, 3);
  scheduler.run_until_idle();

  producer.offset.store(10, Ordering::SeqCst);
  assert_eq!(cache.invalidate_tiles(p).unwrap(), 2);

  // Pinned tiles are requeued, unused ones wait for the next request.
  assert_eq!(cache.status(&pinned).unwrap(), TaskStatus::Ready);
  assert_eq!(cache.status(&unused).unwrap(), TaskStatus::Pending);
  assert!(cache.tile_data(&pinned).is_err());

  assert_eq!(scheduler.run_until_idle(), 1);
  assert_eq!(*cache.tile_data(&pinned).unwrap(), tile_value(pinned.id()) + 10);
  assert_eq!(cache.tile(&pinned).unwrap().slot, pinned.slot());

  assert!(cache.invalidate_tile(p, 1, 1, 1).unwrap());
  assert!(!cache.invalidate_tile(p, 1, 0, 0).unwrap());
  cache.put_tile(&pinned);
}

#[test]
fn test_prefetch_creates_unused_tile() {
  let (scheduler, cache, producer, p) = counting_cache(2);

  assert!(cache.prefetch_tile(p, 1, 0, 0).unwrap());
  assert!(!cache.prefetch_tile(p, 1, 0, 0).unwrap());
  let prefetched = cache.find_tile(p, 1, 0, 0).unwrap();
  assert_eq!(cache.tile(&prefetched).unwrap().users, 0);
  assert_eq!(scheduler.deadline(prefetched.task()), Some(Deadline::PREFETCH));

  // A real request promotes the queued task.
  let handle = cache.get_tile(p, 1, 0, 0, NOW).unwrap();
  assert_eq!(handle, prefetched);
  assert_eq!(scheduler.deadline(handle.task()), Some(NOW));
  scheduler.run_until_idle();
  assert_eq!(producer.created(), 1);

  // Never displaces pinned tiles.
  let other = cache.get_tile(p, 1, 1, 0, NOW).unwrap();
  assert!(!cache.prefetch_tile(p, 1, 1, 1).unwrap());
  assert_eq!(cache.stats().prefetches, 1);

  cache.put_tile(&handle);
  cache.put_tile(&other);
}

// =============================================================================
// Errors and teardown
// =============================================================================

#[test]
fn test_request_errors() {
  let (_scheduler, cache, producer, p) = counting_cache(2);
  producer.missing.lock().insert((1, 1, 1));

  assert_eq!(
    cache.get_tile(p, 1, 2, 0, NOW),
    Err(TileError::InvalidTile(TileId::new(p, 1, 2, 0)))
  );
  assert_eq!(
    cache.get_tile(p, 1, 1, 1, NOW),
    Err(TileError::NoSuchTile(TileId::new(p, 1, 1, 1)))
  );
  assert_eq!(
    cache.get_tile(ProducerId(7), 0, 0, 0, NOW),
    Err(TileError::UnknownProducer(ProducerId(7)))
  );
  assert_eq!(cache.stats().free_slots, 2);
}

#[test]
fn test_producer_limit() {
  let scheduler = Scheduler::inline();
  let config = CacheConfig {
    max_producers: 1,
    ..CacheConfig::new("limited", 2)
  };
  let cache: TileCache<u64> = TileCache::new(config, SlotPool::objects(2, 1), scheduler);

  assert!(cache.register_producer(Arc::new(CountingProducer::new())).is_ok());
  assert_eq!(
    cache.register_producer(Arc::new(CountingProducer::new())),
    Err(TileError::ProducerLimitReached { limit: 1 })
  );
  assert_eq!(cache.producer_count(), 1);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "unbalanced put_tile")]
fn test_unbalanced_put_asserts() {
  let (scheduler, cache, _producer, p) = counting_cache(2);
  let handle = touch(&cache, &scheduler, p, 0);
  cache.put_tile(&handle);
}

#[test]
fn test_clear_releases_everything() {
  let (scheduler, cache, producer, p) = counting_cache(4);
  touch(&cache, &scheduler, p, 0);
  touch(&cache, &scheduler, p, 1);
  let leaked = cache.get_tile(p, 2, 2, 0, NOW).unwrap();

  cache.clear();
  assert!(cache.is_empty());
  assert_eq!(cache.stats().free_slots, 4);
  assert_eq!(producer.stopped.load(Ordering::SeqCst), 3);
  assert_eq!(scheduler.task_count(), 0);
  assert_eq!(cache.tile(&leaked), Err(TileError::StaleHandle(leaked.id())));
}
