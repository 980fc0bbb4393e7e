//! In-memory TTL cache keyed by logical endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// A cached value with the time it was written and its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub data: T,
  pub timestamp: Instant,
  pub ttl: Duration,
}

impl<T> CacheEntry<T> {
  /// An entry is stale once strictly more than `ttl` has passed.
  pub fn is_expired(&self, now: Instant) -> bool {
    now.saturating_duration_since(self.timestamp) > self.ttl
  }
}

/// Process-wide cache store. Values are cloned in and out; entries are never
/// mutated in place.
pub struct CacheStore<T: Clone> {
  entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> Default for CacheStore<T> {
  fn default() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
    }
  }
}

impl<T: Clone> CacheStore<T> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Live value for `key`. An expired entry is evicted and reported as a miss.
  pub fn get(&self, key: &str) -> Option<T> {
    let mut entries = self.lock();
    match entries.get(key) {
      Some(entry) if entry.is_expired(Instant::now()) => {
        entries.remove(key);
        None
      }
      Some(entry) => Some(entry.data.clone()),
      None => None,
    }
  }

  pub fn set(&self, key: impl Into<String>, data: T, ttl: Duration) {
    let entry = CacheEntry {
      data,
      timestamp: Instant::now(),
      ttl,
    };
    self.lock().insert(key.into(), entry);
  }

  /// Remove one entry, or every entry when `key` is `None`.
  pub fn clear(&self, key: Option<&str>) {
    let mut entries = self.lock();
    match key {
      Some(k) => {
        entries.remove(k);
      }
      None => entries.clear(),
    }
  }

  /// Whether a live entry exists, without evicting.
  pub fn contains(&self, key: &str) -> bool {
    self
      .lock()
      .get(key)
      .is_some_and(|e| !e.is_expired(Instant::now()))
  }

  /// Number of stored entries, expired ones included until swept.
  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Evict every expired entry. Returns how many were removed.
  pub fn purge_expired(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.lock();
    let before = entries.len();
    entries.retain(|_, e| !e.is_expired(now));
    before - entries.len()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<T: Clone + Send + 'static> CacheStore<T> {
  /// Spawn a background task that purges expired entries every `interval`.
  ///
  /// The task holds only a weak reference and exits once the store is
  /// dropped. Dropping the returned handle stops it as well.
  pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
    let store: Weak<Self> = Arc::downgrade(self);
    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let Some(store) = store.upgrade() else {
          break;
        };
        let removed = store.purge_expired();
        if removed > 0 {
          debug!(removed, "Swept expired cache entries");
        }
      }
    });
    SweeperHandle { task }
  }
}

/// Owns the sweep task; aborts it on drop.
#[derive(Debug)]
pub struct SweeperHandle {
  task: JoinHandle<()>,
}

impl SweeperHandle {
  pub fn is_finished(&self) -> bool {
    self.task.is_finished()
  }
}

impl Drop for SweeperHandle {
  fn drop(&mut self) {
    self.task.abort();
  }
}
