//! Interval refetching.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::client::{ApiClient, RequestConfig};

use super::binding::{Binding, TimerSlot};
use super::{QueryData, QueryState};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct PollingOptions {
  pub interval: Duration,
  pub enabled: bool,
  pub config: RequestConfig,
}

impl Default for PollingOptions {
  fn default() -> Self {
    Self {
      interval: DEFAULT_POLL_INTERVAL,
      enabled: true,
      config: RequestConfig::get(),
    }
  }
}

impl PollingOptions {
  pub fn every(interval: Duration) -> Self {
    Self {
      interval,
      ..Self::default()
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Schedule {
  endpoint: String,
  interval: Duration,
  enabled: bool,
}

struct PollingShared<T> {
  client: ApiClient,
  config: RequestConfig,
  schedule: Mutex<Schedule>,
  binding: Binding<QueryState<T>>,
  timer: TimerSlot,
}

impl<T: QueryData> PollingShared<T> {
  fn schedule(&self) -> Schedule {
    self
      .schedule
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Apply `f` to the schedule. Returns whether anything changed.
  fn reschedule(&self, f: impl FnOnce(&mut Schedule)) -> bool {
    let mut schedule = self.schedule.lock().unwrap_or_else(PoisonError::into_inner);
    let before = schedule.clone();
    f(&mut schedule);
    *schedule != before
  }

  async fn poll(&self, endpoint: &str) {
    if !self.binding.update(|s| s.loading = true) {
      return;
    }
    let response = self.client.execute::<T>(endpoint, self.config.clone()).await;
    if !self.binding.update(|s| s.apply(response.result)) {
      debug!(endpoint, "Discarding poll result for detached binding");
    }
  }

  /// Replace the timer with one matching the current schedule. The first tick
  /// fires immediately. A disabled schedule only cancels.
  fn arm(self: &Arc<Self>) {
    let schedule = self.schedule();
    if !schedule.enabled || !self.binding.is_alive() {
      self.timer.cancel();
      return;
    }

    let weak: Weak<Self> = Arc::downgrade(self);
    self.timer.arm(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(schedule.interval.max(MIN_INTERVAL));
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let Some(shared) = weak.upgrade() else { break };
        if !shared.binding.is_alive() {
          break;
        }
        trace!(endpoint = %schedule.endpoint, "Poll tick");
        // Spawned on its own so cancelling the timer never aborts a request.
        let endpoint = schedule.endpoint.clone();
        tokio::spawn(async move { shared.poll(&endpoint).await });
      }
    }));
  }
}

/// Fetches immediately, then again every `interval` while enabled.
pub struct Polling<T> {
  shared: Arc<PollingShared<T>>,
}

impl<T: QueryData> Polling<T> {
  pub fn activate(client: ApiClient, endpoint: impl Into<String>, options: PollingOptions) -> Self {
    let shared = Arc::new(PollingShared {
      client,
      config: options.config,
      schedule: Mutex::new(Schedule {
        endpoint: endpoint.into(),
        interval: options.interval,
        enabled: options.enabled,
      }),
      binding: Binding::new(QueryState {
        loading: options.enabled,
        ..QueryState::default()
      }),
      timer: TimerSlot::default(),
    });
    shared.arm();
    Self { shared }
  }

  pub fn state(&self) -> QueryState<T> {
    self.shared.binding.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
    self.shared.binding.subscribe()
  }

  pub fn endpoint(&self) -> String {
    self.shared.schedule().endpoint
  }

  pub fn is_polling(&self) -> bool {
    self.shared.timer.is_armed()
  }

  /// Start or stop polling. Disabling stops the timer without a trailing
  /// call; a request already on the wire still lands. No-op when unchanged.
  pub fn set_enabled(&self, enabled: bool) {
    if !self.shared.reschedule(|s| s.enabled = enabled) {
      return;
    }
    if !enabled {
      self.shared.binding.update(|s| s.loading = false);
    }
    self.shared.arm();
  }

  /// Point at a new endpoint and rearm, unless it is the current one.
  pub fn set_endpoint(&self, endpoint: impl Into<String>) {
    let endpoint = endpoint.into();
    if self.shared.reschedule(|s| s.endpoint = endpoint) {
      self.shared.arm();
    }
  }

  /// Change the period and rearm, unless it is the current one.
  pub fn set_interval(&self, interval: Duration) {
    if self.shared.reschedule(|s| s.interval = interval) {
      self.shared.arm();
    }
  }

  /// Fetch now, outside the schedule.
  pub async fn refetch(&self) {
    let endpoint = self.shared.schedule().endpoint;
    self.shared.poll(&endpoint).await
  }

  pub fn teardown(&self) {
    self.shared.binding.detach();
    self.shared.timer.cancel();
  }
}

impl<T> Drop for Polling<T> {
  fn drop(&mut self) {
    self.shared.binding.detach();
    self.shared.timer.cancel();
  }
}
