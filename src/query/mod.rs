//! Reactive bindings over the request executor.
//!
//! Inspired by TanStack Query. Each adapter owns an observable state cell
//! (see [`QueryState`] and the adapter-specific state types), reads it through
//! `state()` or `subscribe()`, and drives requests through a shared
//! [`ApiClient`](crate::client::ApiClient), so caching, deduplication and
//! retry always apply.
//!
//! Lifecycle is framework-neutral:
//! - activation: the constructor (`activate`) performs the initial work;
//! - teardown: `teardown()` or dropping the adapter;
//! - liveness: after teardown, late responses are discarded instead of being
//!   written to state. In-flight requests are never aborted.
//!
//! # Example
//!
//! ```ignore
//! let users = Fetch::<Vec<User>>::activate(client.clone(), "/users", FetchOptions::default());
//! let mut rx = users.subscribe();
//! rx.wait_for(|s| !s.loading).await?;
//! match users.state().data {
//!     Some(list) => render(list),
//!     None => render_error(users.state().error),
//! }
//! ```

mod binding;
mod fetch;
mod infinite;
mod mutation;
mod paginated;
mod polling;
mod search;

pub use fetch::{Fetch, FetchOptions};
pub use infinite::{InfiniteOptions, InfiniteScroll, InfiniteState};
pub use mutation::{Mutation, MutationOptions};
pub use paginated::{PageState, Paginated, PaginatedOptions};
pub use polling::{Polling, PollingOptions};
pub use search::{Search, SearchOptions, SearchState};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::client::ApiError;

/// Bound shared by every value a binding can hold.
pub trait QueryData: DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T: DeserializeOwned + Clone + Send + Sync + 'static> QueryData for T {}

/// Data, error and loading flag of a single-resource binding.
///
/// A failed refetch keeps the last good `data` next to the new `error`.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
  pub data: Option<T>,
  pub error: Option<ApiError>,
  pub loading: bool,
}

impl<T> Default for QueryState<T> {
  fn default() -> Self {
    Self {
      data: None,
      error: None,
      loading: false,
    }
  }
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    self.loading
  }

  pub fn is_success(&self) -> bool {
    self.data.is_some() && self.error.is_none()
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.error.as_ref()
  }

  pub(crate) fn apply(&mut self, result: Result<T, ApiError>) {
    match result {
      Ok(data) => {
        self.data = Some(data);
        self.error = None;
      }
      Err(error) => self.error = Some(error),
    }
    self.loading = false;
  }
}

/// One page of a listing endpoint as sent by the server.
///
/// `hasMore` is authoritative when `total` is absent; callers never infer
/// continuation from the number of items.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedPage<T> {
  pub items: Vec<T>,
  #[serde(default)]
  pub total: Option<u64>,
  #[serde(default)]
  pub has_more: Option<bool>,
}

impl<T> PaginatedPage<T> {
  /// Whether pages follow `page` (1-based) at `page_size` items per page.
  pub fn has_more_after(&self, page: u32, page_size: u32) -> bool {
    match (self.total, self.has_more) {
      (Some(total), _) => u64::from(page) * u64::from(page_size) < total,
      (None, Some(has_more)) => has_more,
      (None, None) => false,
    }
  }
}

/// Append query parameters to an endpoint that may already carry some.
pub(crate) fn with_query(endpoint: &str, params: &[(&str, &str)]) -> String {
  let mut query = url::form_urlencoded::Serializer::new(String::new());
  for (key, value) in params {
    query.append_pair(key, value);
  }
  let query = query.finish();
  if query.is_empty() {
    return endpoint.to_string();
  }
  let separator = if endpoint.contains('?') { '&' } else { '?' };
  format!("{}{}{}", endpoint, separator, query)
}
