//! Registry of in-flight requests used to collapse duplicate concurrent calls.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::error;

/// Output seen by every caller of one execution; `None` if the task panicked.
type Outcome<T> = Shared<BoxFuture<'static, Option<T>>>;

struct Pending<T> {
  id: u64,
  future: Outcome<T>,
}

struct Inner<T> {
  next_id: u64,
  entries: HashMap<String, Pending<T>>,
}

/// In-flight request map keyed by `METHOD:endpoint`.
///
/// The first caller for a key spawns the work as its own task; every caller,
/// the first included, only observes that task's output. Dropping a caller
/// never cancels the work or releases the key. The task removes its entry
/// itself once the work finishes, whatever the outcome.
pub struct PendingRegistry<T: Clone> {
  inner: Arc<Mutex<Inner<T>>>,
}

impl<T: Clone> Default for PendingRegistry<T> {
  fn default() -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        next_id: 0,
        entries: HashMap::new(),
      })),
    }
  }
}

impl<T: Clone + Send + Sync + 'static> PendingRegistry<T> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Dedup key for a method/endpoint pair. Body and headers are ignored.
  pub fn key(method: &str, endpoint: &str) -> String {
    format!("{}:{}", method, endpoint)
  }

  /// Run `work` unless an identical request is already in flight, in which
  /// case join it. Returns the output (`None` if the work panicked) and
  /// whether this call joined.
  ///
  /// Must be called within a tokio runtime.
  pub async fn run<F>(&self, key: String, work: F) -> (Option<T>, bool)
  where
    F: FnOnce() -> BoxFuture<'static, T>,
  {
    let (future, joined) = {
      let mut inner = self.lock();
      // A settled entry is left behind only by a panicked task.
      let existing = inner
        .entries
        .get(&key)
        .filter(|p| p.future.peek().is_none())
        .map(|p| p.future.clone());
      match existing {
        Some(future) => (future, true),
        None => {
          inner.next_id += 1;
          let id = inner.next_id;
          let future = Self::spawn(Arc::downgrade(&self.inner), key.clone(), id, work());
          inner.entries.insert(
            key,
            Pending {
              id,
              future: future.clone(),
            },
          );
          (future, false)
        }
      }
    };

    (future.await, joined)
  }

  fn spawn(registry: Weak<Mutex<Inner<T>>>, key: String, id: u64, work: BoxFuture<'static, T>) -> Outcome<T> {
    let task = tokio::spawn(async move {
      let output = work.await;
      if let Some(inner) = registry.upgrade() {
        remove(&inner, &key, id);
      }
      output
    });
    task
      .map(|joined| match joined {
        Ok(output) => Some(output),
        Err(e) => {
          error!(error = %e, "In-flight request task failed");
          None
        }
      })
      .boxed()
      .shared()
  }
}

impl<T: Clone> PendingRegistry<T> {
  /// Whether a request with this key is in flight.
  pub fn contains(&self, key: &str) -> bool {
    self.lock().entries.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lock(&self) -> MutexGuard<'_, Inner<T>> {
    lock(&self.inner)
  }
}

fn lock<T>(inner: &Mutex<Inner<T>>) -> MutexGuard<'_, Inner<T>> {
  inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drop the entry for `key` if it still belongs to execution `id`.
fn remove<T>(inner: &Mutex<Inner<T>>, key: &str, id: u64) {
  let mut inner = lock(inner);
  if inner.entries.get(key).is_some_and(|p| p.id == id) {
    inner.entries.remove(key);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  /// Work that sleeps for `ms`, then counts itself and returns 100 + prior runs.
  fn slow_work(runs: Arc<AtomicU32>, ms: u64) -> impl FnOnce() -> BoxFuture<'static, u32> {
    move || {
      async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        runs.fetch_add(1, Ordering::SeqCst) + 100
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_calls_share_one_execution() {
    let registry: PendingRegistry<u32> = PendingRegistry::new();
    let runs = Arc::new(AtomicU32::new(0));

    let calls = (0..4).map(|_| registry.run(PendingRegistry::<u32>::key("GET", "/a"), slow_work(runs.clone(), 50)));
    let results = futures::future::join_all(calls).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|(v, _)| *v == Some(100)));
    assert_eq!(results.iter().filter(|(_, joined)| *joined).count(), 3);
    assert!(registry.is_empty());
  }

  #[tokio::test]
  async fn test_sequential_calls_run_separately() {
    let registry: PendingRegistry<u32> = PendingRegistry::new();
    let (a, joined_a) = registry.run("k".into(), || async { 1 }.boxed()).await;
    let (b, joined_b) = registry.run("k".into(), || async { 2 }.boxed()).await;
    assert_eq!((a, b), (Some(1), Some(2)));
    assert!(!joined_a && !joined_b);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancelled_first_caller_keeps_execution_shared() {
    let registry = Arc::new(PendingRegistry::<u32>::new());
    let runs = Arc::new(AtomicU32::new(0));

    let first = registry.run("k".into(), slow_work(runs.clone(), 100));
    let joiner = {
      let registry = Arc::clone(&registry);
      let runs = runs.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.run("k".into(), slow_work(runs, 100)).await
      })
    };

    assert!(tokio::time::timeout(Duration::from_millis(20), first).await.is_err());
    assert!(registry.contains("k"));

    let (late, late_joined) = registry.run("k".into(), slow_work(runs.clone(), 100)).await;
    let (joined_value, joiner_joined) = joiner.await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(late, Some(100));
    assert_eq!(joined_value, Some(100));
    assert!(late_joined && joiner_joined);
    assert!(registry.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropped_sole_caller_does_not_cancel_work() {
    let registry: PendingRegistry<u32> = PendingRegistry::new();
    let runs = Arc::new(AtomicU32::new(0));

    let call = registry.run("k".into(), slow_work(runs.clone(), 50));
    assert!(tokio::time::timeout(Duration::from_millis(10), call).await.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!registry.contains("k"));
  }

  #[tokio::test]
  async fn test_panicked_work_yields_none_and_frees_key() {
    let registry: PendingRegistry<u32> = PendingRegistry::new();
    let fail: fn() -> u32 = || panic!("boom");
    let (output, _) = registry.run("k".into(), move || async move { fail() }.boxed()).await;
    assert_eq!(output, None);

    let (output, joined) = registry.run("k".into(), || async { 7 }.boxed()).await;
    assert_eq!(output, Some(7));
    assert!(!joined);
  }

  #[test]
  fn test_key_format() {
    assert_eq!(PendingRegistry::<u32>::key("POST", "/users"), "POST:/users");
  }
}
