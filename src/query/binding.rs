//! State cell shared by every adapter: a watch channel guarded by a liveness
//! flag, plus an owned timer slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Observable adapter state that stops accepting writes once detached.
///
/// Work started before teardown is allowed to finish; its result is simply
/// dropped because every write checks the flag first.
pub(crate) struct Binding<S> {
  state: watch::Sender<S>,
  alive: AtomicBool,
}

impl<S> Binding<S> {
  pub fn new(initial: S) -> Self {
    let (state, _) = watch::channel(initial);
    Self {
      state,
      alive: AtomicBool::new(true),
    }
  }

  pub fn is_alive(&self) -> bool {
    self.alive.load(Ordering::SeqCst)
  }

  /// Apply `f` and notify subscribers. Returns false if detached.
  pub fn update(&self, f: impl FnOnce(&mut S)) -> bool {
    if !self.is_alive() {
      return false;
    }
    self.state.send_modify(f);
    true
  }

  /// Apply `f`, notifying only if it returns true. Returns false if detached
  /// or `f` made no change.
  pub fn try_update(&self, f: impl FnOnce(&mut S) -> bool) -> bool {
    if !self.is_alive() {
      return false;
    }
    self.state.send_if_modified(f)
  }

  pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
    f(&self.state.borrow())
  }

  pub fn subscribe(&self) -> watch::Receiver<S> {
    self.state.subscribe()
  }

  pub fn detach(&self) {
    self.alive.store(false, Ordering::SeqCst);
  }
}

impl<S: Clone> Binding<S> {
  pub fn snapshot(&self) -> S {
    self.state.borrow().clone()
  }
}

/// Holds at most one timer task. Arming replaces (and aborts) the previous
/// task; dropping the slot aborts the current one.
///
/// Only timer tasks live here. Requests a timer fires are spawned separately
/// so cancelling the timer never aborts a request already on the wire.
#[derive(Default)]
pub(crate) struct TimerSlot {
  task: Mutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
  pub fn arm(&self, task: JoinHandle<()>) {
    let previous = self
      .task
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .replace(task);
    if let Some(previous) = previous {
      previous.abort();
    }
  }

  pub fn cancel(&self) {
    let current = self
      .task
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(current) = current {
      current.abort();
    }
  }

  pub fn is_armed(&self) -> bool {
    self
      .task
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .is_some_and(|t| !t.is_finished())
  }
}

impl Drop for TimerSlot {
  fn drop(&mut self) {
    self.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_update_after_detach_is_ignored() {
    let binding = Binding::new(0u32);
    assert!(binding.update(|s| *s = 1));
    binding.detach();
    assert!(!binding.update(|s| *s = 2));
    assert_eq!(binding.snapshot(), 1);
  }

  #[test]
  fn test_try_update_reports_change() {
    let binding = Binding::new(0u32);
    assert!(!binding.try_update(|_| false));
    assert!(binding.try_update(|s| {
      *s = 5;
      true
    }));
    assert_eq!(binding.read(|s| *s), 5);
  }

  #[tokio::test]
  async fn test_subscribers_see_updates() {
    let binding = Binding::new(0u32);
    let mut rx = binding.subscribe();
    binding.update(|s| *s = 3);
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_timer_slot_rearm_aborts_previous() {
    let slot = TimerSlot::default();
    let fired = std::sync::Arc::new(AtomicBool::new(false));

    let flag = fired.clone();
    slot.arm(tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(100)).await;
      flag.store(true, Ordering::SeqCst);
    }));
    slot.arm(tokio::spawn(async {}));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!fired.load(Ordering::SeqCst));
    assert!(!slot.is_armed());
  }
}
