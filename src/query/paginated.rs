//! Page-at-a-time listing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::client::{ApiClient, ApiError, RequestConfig};

use super::binding::Binding;
use super::{with_query, PaginatedPage, QueryData};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone)]
pub struct PaginatedOptions {
  pub page_size: u32,
  pub initial_page: u32,
  pub config: RequestConfig,
}

impl Default for PaginatedOptions {
  fn default() -> Self {
    Self {
      page_size: DEFAULT_PAGE_SIZE,
      initial_page: 1,
      config: RequestConfig::get(),
    }
  }
}

impl PaginatedOptions {
  pub fn page_size(page_size: u32) -> Self {
    Self {
      page_size,
      ..Self::default()
    }
  }
}

/// Current page of a [`Paginated`] listing.
#[derive(Debug, Clone)]
pub struct PageState<T> {
  pub items: Vec<T>,
  /// 1-based.
  pub page: u32,
  pub page_size: u32,
  pub total: Option<u64>,
  pub has_more: bool,
  pub loading: bool,
  pub error: Option<ApiError>,
}

impl<T> PageState<T> {
  fn new(page: u32, page_size: u32) -> Self {
    Self {
      items: Vec::new(),
      page,
      page_size,
      total: None,
      has_more: false,
      loading: false,
      error: None,
    }
  }

  pub fn has_prev(&self) -> bool {
    self.page > 1
  }
}

struct PaginatedShared<T> {
  client: ApiClient,
  endpoint: String,
  config: RequestConfig,
  page_size: u32,
  binding: Binding<PageState<T>>,
  /// Bumped per load; a response only lands if it belongs to the latest load.
  seq: AtomicU64,
}

impl<T: QueryData> PaginatedShared<T> {
  /// Claim a sequence number and mark `page` as loading. `None` once
  /// detached.
  fn begin(&self, page: u32) -> Option<u64> {
    let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
    let alive = self.binding.update(|s| {
      s.page = page;
      s.loading = true;
      s.error = None;
    });
    alive.then_some(seq)
  }

  async fn fetch(&self, page: u32, seq: u64) {
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

    if self.seq.load(Ordering::SeqCst) != seq {
      debug!(%endpoint, "Discarding superseded page");
      return;
    }
    let page_size = self.page_size;
    self.binding.update(|s| {
      match response.result {
        Ok(body) => {
          s.has_more = body.has_more_after(page, page_size);
          s.total = body.total;
          s.items = body.items;
        }
        Err(error) => s.error = Some(error),
      }
      s.loading = false;
    });
  }

  async fn load(&self, page: u32) {
    if let Some(seq) = self.begin(page) {
      self.fetch(page, seq).await;
    }
  }
}

/// Page-based listing against `endpoint?page=N&pageSize=M`.
pub struct Paginated<T> {
  shared: Arc<PaginatedShared<T>>,
}

impl<T: QueryData> Paginated<T> {
  /// Create the listing and load the initial page in the background.
  pub fn activate(client: ApiClient, endpoint: impl Into<String>, options: PaginatedOptions) -> Self {
    let page_size = options.page_size.max(1);
    let initial_page = options.initial_page.max(1);
    let shared = Arc::new(PaginatedShared {
      client,
      endpoint: endpoint.into(),
      config: options.config,
      page_size,
      binding: Binding::new(PageState::new(initial_page, page_size)),
      seq: AtomicU64::new(0),
    });

    if let Some(seq) = shared.begin(initial_page) {
      let task = Arc::clone(&shared);
      tokio::spawn(async move { task.fetch(initial_page, seq).await });
    }

    Self { shared }
  }

  pub fn state(&self) -> PageState<T> {
    self.shared.binding.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<PageState<T>> {
    self.shared.binding.subscribe()
  }

  /// Advance one page. No-op when the server reports no further pages, and
  /// while `has_more` is unsettled: a load in flight or a failed last load.
  pub async fn next_page(&self) -> bool {
    let (page, ready) = self
      .shared
      .binding
      .read(|s| (s.page, s.has_more && !s.loading && s.error.is_none()));
    if !ready {
      return false;
    }
    self.shared.load(page + 1).await;
    true
  }

  /// Go back one page. No-op on page 1.
  pub async fn prev_page(&self) -> bool {
    let page = self.shared.binding.read(|s| s.page);
    if page <= 1 {
      return false;
    }
    self.shared.load(page - 1).await;
    true
  }

  /// Jump to `page` (clamped to 1) and load it.
  pub async fn set_page(&self, page: u32) {
    self.shared.load(page.max(1)).await
  }

  /// Reload the current page.
  pub async fn refetch(&self) {
    let page = self.shared.binding.read(|s| s.page);
    self.shared.load(page).await
  }

  pub fn teardown(&self) {
    self.shared.binding.detach();
  }
}

impl<T> Drop for Paginated<T> {
  fn drop(&mut self) {
    self.shared.binding.detach();
  }
}
