//! Fetch-on-activation binding for a single resource.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::client::{ApiClient, RequestConfig};

use super::binding::Binding;
use super::{QueryData, QueryState};

#[derive(Debug, Clone)]
pub struct FetchOptions {
  /// Fetch on activation. When false the binding stays idle until
  /// [`Fetch::refetch`].
  pub enabled: bool,
  pub config: RequestConfig,
}

impl Default for FetchOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      config: RequestConfig::get(),
    }
  }
}

impl FetchOptions {
  pub fn disabled() -> Self {
    Self {
      enabled: false,
      ..Self::default()
    }
  }

  pub fn config(mut self, config: RequestConfig) -> Self {
    self.config = config;
    self
  }
}

struct FetchShared<T> {
  client: ApiClient,
  endpoint: String,
  config: RequestConfig,
  binding: Binding<QueryState<T>>,
}

impl<T: QueryData> FetchShared<T> {
  async fn run(&self) {
    if !self.binding.update(|s| s.loading = true) {
      return;
    }
    let response = self
      .client
      .execute::<T>(&self.endpoint, self.config.clone())
      .await;
    if !self.binding.update(|s| s.apply(response.result)) {
      debug!(endpoint = %self.endpoint, "Discarding response for detached fetch");
    }
  }
}

/// Single-resource binding: fetch on activation, explicit refetch, and local
/// optimistic overwrite.
pub struct Fetch<T> {
  shared: Arc<FetchShared<T>>,
}

impl<T: QueryData> Fetch<T> {
  /// Create the binding and, unless disabled, start the initial fetch in the
  /// background.
  pub fn activate(client: ApiClient, endpoint: impl Into<String>, options: FetchOptions) -> Self {
    let shared = Arc::new(FetchShared {
      client,
      endpoint: endpoint.into(),
      config: options.config,
      binding: Binding::new(QueryState {
        loading: options.enabled,
        ..QueryState::default()
      }),
    });

    if options.enabled {
      let task = Arc::clone(&shared);
      tokio::spawn(async move { task.run().await });
    }

    Self { shared }
  }

  pub fn endpoint(&self) -> &str {
    &self.shared.endpoint
  }

  pub fn state(&self) -> QueryState<T> {
    self.shared.binding.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
    self.shared.binding.subscribe()
  }

  /// Reissue the same call and wait for it to land in state.
  pub async fn refetch(&self) {
    self.shared.run().await
  }

  /// Overwrite local data without a network round-trip.
  pub fn mutate(&self, data: T) {
    self.shared.binding.update(|s| {
      s.data = Some(data);
      s.error = None;
    });
  }

  /// Stop accepting state writes. Requests already in flight complete and
  /// are ignored.
  pub fn teardown(&self) {
    self.shared.binding.detach();
  }

  pub fn is_active(&self) -> bool {
    self.shared.binding.is_alive()
  }
}

impl<T> Drop for Fetch<T> {
  fn drop(&mut self) {
    self.shared.binding.detach();
  }
}
