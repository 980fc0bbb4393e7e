//! Cumulative listing for infinite scroll.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::client::{ApiClient, ApiError, RequestConfig};

use super::binding::Binding;
use super::paginated::DEFAULT_PAGE_SIZE;
use super::{with_query, PaginatedPage, QueryData};

#[derive(Debug, Clone)]
pub struct InfiniteOptions {
  pub page_size: u32,
  pub config: RequestConfig,
}

impl Default for InfiniteOptions {
  fn default() -> Self {
    Self {
      page_size: DEFAULT_PAGE_SIZE,
      config: RequestConfig::get(),
    }
  }
}

impl InfiniteOptions {
  pub fn page_size(page_size: u32) -> Self {
    Self {
      page_size,
      ..Self::default()
    }
  }
}

#[derive(Debug, Clone)]
pub struct InfiniteState<T> {
  /// Every item loaded so far, in page order.
  pub items: Vec<T>,
  /// Last page appended; 0 before the first load lands.
  pub page: u32,
  pub has_more: bool,
  pub total: Option<u64>,
  pub loading: bool,
  pub error: Option<ApiError>,
}

impl<T> Default for InfiniteState<T> {
  fn default() -> Self {
    Self {
      items: Vec::new(),
      page: 0,
      has_more: true,
      total: None,
      loading: false,
      error: None,
    }
  }
}

struct InfiniteShared<T> {
  client: ApiClient,
  endpoint: String,
  config: RequestConfig,
  page_size: u32,
  binding: Binding<InfiniteState<T>>,
  /// Bumped by reset so loads started before it are dropped.
  generation: AtomicU64,
}

impl<T: QueryData> InfiniteShared<T> {
  /// Take the in-flight slot. Fails while a load is running, when the list is
  /// exhausted, or once detached. Dedup cannot stand in for this: successive
  /// pages have distinct URLs.
  fn begin(&self) -> Option<(u64, u32)> {
    let mut next = 0;
    let taken = self.binding.try_update(|s| {
      if s.loading || !s.has_more {
        return false;
      }
      s.loading = true;
      s.error = None;
      next = s.page + 1;
      true
    });
    taken.then(|| (self.generation.load(Ordering::SeqCst), next))
  }

  async fn fetch(&self, generation: u64, page: u32) {
    let page_param = page.to_string();
    let size_param = self.page_size.to_string();
    let endpoint = with_query(
      &self.endpoint,
      &[("page", page_param.as_str()), ("pageSize", size_param.as_str())],
    );
    let response = self
      .client
      .execute::<PaginatedPage<T>>(&endpoint, self.config.clone())
      .await;

    if self.generation.load(Ordering::SeqCst) != generation {
      debug!(%endpoint, "Discarding page loaded before reset");
      return;
    }
    let page_size = self.page_size;
    self.binding.update(|s| {
      match response.result {
        Ok(body) => {
          s.has_more = body.has_more_after(page, page_size);
          s.total = body.total;
          s.items.extend(body.items);
          s.page = page;
        }
        Err(error) => s.error = Some(error),
      }
      s.loading = false;
    });
  }

  async fn load_more(&self) -> bool {
    match self.begin() {
      Some((generation, page)) => {
        self.fetch(generation, page).await;
        true
      }
      None => false,
    }
  }
}

/// Appends successive pages of `endpoint?page=N&pageSize=M` to one list.
pub struct InfiniteScroll<T> {
  shared: Arc<InfiniteShared<T>>,
}

impl<T: QueryData> InfiniteScroll<T> {
  /// Create the list and load page 1 in the background.
  pub fn activate(client: ApiClient, endpoint: impl Into<String>, options: InfiniteOptions) -> Self {
    let shared = Arc::new(InfiniteShared {
      client,
      endpoint: endpoint.into(),
      config: options.config,
      page_size: options.page_size.max(1),
      binding: Binding::new(InfiniteState::default()),
      generation: AtomicU64::new(0),
    });
    Self::spawn_load(&shared);
    Self { shared }
  }

  fn spawn_load(shared: &Arc<InfiniteShared<T>>) {
    if let Some((generation, page)) = shared.begin() {
      let task = Arc::clone(shared);
      tokio::spawn(async move { task.fetch(generation, page).await });
    }
  }

  pub fn state(&self) -> InfiniteState<T> {
    self.shared.binding.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<InfiniteState<T>> {
    self.shared.binding.subscribe()
  }

  /// Append the next page. Returns false without touching the network when a
  /// load is already in flight or nothing is left.
  pub async fn load_more(&self) -> bool {
    self.shared.load_more().await
  }

  /// Drop everything loaded so far and start again from page 1.
  pub async fn reset(&self) {
    self.shared.generation.fetch_add(1, Ordering::SeqCst);
    if !self.shared.binding.update(|s| *s = InfiniteState::default()) {
      return;
    }
    self.shared.load_more().await;
  }

  pub fn teardown(&self) {
    self.shared.binding.detach();
  }
}

impl<T> Drop for InfiniteScroll<T> {
  fn drop(&mut self) {
    self.shared.binding.detach();
  }
}
