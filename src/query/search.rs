//! Debounced search-as-you-type.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::client::{ApiClient, ApiError, RequestConfig};

use super::binding::{Binding, TimerSlot};
use super::{with_query, QueryData};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_MIN_LENGTH: usize = 2;
pub const DEFAULT_QUERY_PARAM: &str = "q";

#[derive(Debug, Clone)]
pub struct SearchOptions {
  /// Quiet period before a query is sent.
  pub debounce: Duration,
  /// Shorter queries (in characters) clear results instead of searching.
  pub min_length: usize,
  /// Query-string parameter carrying the search text.
  pub param: String,
  pub config: RequestConfig,
}

impl Default for SearchOptions {
  fn default() -> Self {
    Self {
      debounce: DEFAULT_DEBOUNCE,
      min_length: DEFAULT_MIN_LENGTH,
      param: DEFAULT_QUERY_PARAM.to_string(),
      config: RequestConfig::get(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct SearchState<T> {
  pub query: String,
  pub results: Vec<T>,
  pub loading: bool,
  pub error: Option<ApiError>,
}

impl<T> Default for SearchState<T> {
  fn default() -> Self {
    Self {
      query: String::new(),
      results: Vec::new(),
      loading: false,
      error: None,
    }
  }
}

struct SearchShared<T> {
  client: ApiClient,
  endpoint: String,
  options: SearchOptions,
  binding: Binding<SearchState<T>>,
  timer: TimerSlot,
  /// Bumped by every `search`/`clear`; only the latest query may write results.
  seq: AtomicU64,
}

impl<T: QueryData> SearchShared<T> {
  fn is_current(&self, seq: u64) -> bool {
    self.seq.load(Ordering::SeqCst) == seq
  }

  async fn run(&self, query: String, seq: u64) {
    if !self.is_current(seq) || !self.binding.update(|s| s.loading = true) {
      return;
    }
    let endpoint = with_query(&self.endpoint, &[(self.options.param.as_str(), query.as_str())]);
    let response = self
      .client
      .execute::<Vec<T>>(&endpoint, self.options.config.clone())
      .await;

    if !self.is_current(seq) {
      debug!(%query, "Discarding results for abandoned query");
      return;
    }
    self.binding.update(|s| {
      match response.result {
        Ok(results) => {
          s.results = results;
          s.error = None;
        }
        Err(error) => s.error = Some(error),
      }
      s.loading = false;
    });
  }
}

/// Sends a query once input has been quiet for the debounce window.
pub struct Search<T> {
  shared: Arc<SearchShared<T>>,
}

impl<T: QueryData> Search<T> {
  pub fn new(client: ApiClient, endpoint: impl Into<String>, options: SearchOptions) -> Self {
    Self {
      shared: Arc::new(SearchShared {
        client,
        endpoint: endpoint.into(),
        options,
        binding: Binding::new(SearchState::default()),
        timer: TimerSlot::default(),
        seq: AtomicU64::new(0),
      }),
    }
  }

  pub fn state(&self) -> SearchState<T> {
    self.shared.binding.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<SearchState<T>> {
    self.shared.binding.subscribe()
  }

  /// Record `query` and restart the debounce window.
  ///
  /// A query under `min_length` clears results right away and schedules
  /// nothing. Requests already sent for earlier queries keep running; their
  /// results are dropped.
  pub fn search(&self, query: impl Into<String>) {
    let query = query.into();
    let seq = self.shared.seq.fetch_add(1, Ordering::SeqCst) + 1;

    if query.chars().count() < self.shared.options.min_length {
      self.shared.timer.cancel();
      self.shared.binding.update(|s| {
        s.query = query;
        s.results.clear();
        s.error = None;
        s.loading = false;
      });
      return;
    }

    if !self.shared.binding.update(|s| s.query = query.clone()) {
      return;
    }

    let shared = Arc::clone(&self.shared);
    let debounce = self.shared.options.debounce;
    self.shared.timer.arm(tokio::spawn(async move {
      tokio::time::sleep(debounce).await;
      // The request outlives the timer so rearming cannot abort it.
      tokio::spawn(async move { shared.run(query, seq).await });
    }));
  }

  /// Reset query, results and error, and drop any pending or in-flight
  /// query.
  pub fn clear(&self) {
    self.shared.seq.fetch_add(1, Ordering::SeqCst);
    self.shared.timer.cancel();
    self.shared.binding.update(|s| *s = SearchState::default());
  }

  pub fn teardown(&self) {
    self.shared.binding.detach();
    self.shared.timer.cancel();
  }
}

impl<T> Drop for Search<T> {
  fn drop(&mut self) {
    self.shared.binding.detach();
    self.shared.timer.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::client::mock::{MockReply, MockTransport};
  use crate::client::RetryConfig;
  use serde_json::json;

  fn client(transport: Arc<MockTransport>) -> ApiClient {
    ApiClient::builder()
      .base_url("http://api.test")
      .retry(RetryConfig::none())
      .transport(transport)
      .sweep_interval(None)
      .build()
      .unwrap()
  }

  fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
  }

  fn options(debounce: u64, min_length: usize) -> SearchOptions {
    SearchOptions {
      debounce: ms(debounce),
      min_length,
      ..SearchOptions::default()
    }
  }

  fn echo() -> Arc<MockTransport> {
    MockTransport::new(|req, _| {
      let url = url::Url::parse(&req.url).unwrap();
      let q = url
        .query_pairs()
        .find(|(k, _)| k == "q")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default();
      MockReply::json(200, json!([q]))
    })
  }

  #[tokio::test(start_paused = true)]
  async fn test_short_query_issues_no_request() {
    let transport = echo();
    let search = Search::<String>::new(client(transport.clone()), "/search", options(500, 3));

    search.search("te");
    assert_eq!(search.state().query, "te");
    tokio::time::sleep(ms(1000)).await;
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_only_last_query_in_window_is_sent() {
    let transport = echo();
    let search = Search::<String>::new(client(transport.clone()), "/search", options(500, 3));

    search.search("test");
    tokio::time::sleep(ms(100)).await;
    search.search("tests");
    tokio::time::sleep(ms(499)).await;
    assert_eq!(transport.calls(), 0);

    tokio::time::sleep(ms(10)).await;
    assert_eq!(transport.urls(), vec!["http://api.test/search?q=tests"]);
    let state = search.state();
    assert_eq!(state.results, vec!["tests".to_string()]);
    assert!(!state.loading);
  }

  #[tokio::test(start_paused = true)]
  async fn test_short_query_discards_in_flight_result() {
    let transport = MockTransport::with_latency(ms(200), |_, _| MockReply::json(200, json!(["late"])));
    let search = Search::<String>::new(client(transport.clone()), "/search", options(100, 3));

    search.search("long query");
    tokio::time::sleep(ms(150)).await;
    assert_eq!(transport.calls(), 1);
    assert!(search.state().loading);

    search.search("x");
    let state = search.state();
    assert!(state.results.is_empty());
    assert!(!state.loading);

    tokio::time::sleep(ms(500)).await;
    assert_eq!(transport.calls(), 1);
    assert!(search.state().results.is_empty());
    assert_eq!(search.state().query, "x");
  }

  #[tokio::test(start_paused = true)]
  async fn test_result_after_teardown_is_dropped() {
    let transport = MockTransport::with_latency(ms(200), |_, _| MockReply::json(200, json!(["late"])));
    let search = Search::<String>::new(client(transport.clone()), "/search", options(100, 3));

    search.search("long query");
    tokio::time::sleep(ms(150)).await;
    assert_eq!(transport.calls(), 1);

    search.teardown();
    tokio::time::sleep(ms(500)).await;

    let state = search.state();
    assert!(state.results.is_empty());
    assert!(state.loading);
    assert!(state.error.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_clear_resets_state() {
    let transport = echo();
    let search = Search::<String>::new(client(transport.clone()), "/search", options(50, 2));

    search.search("ab");
    tokio::time::sleep(ms(100)).await;
    assert_eq!(search.state().results, vec!["ab".to_string()]);

    search.search("abc");
    search.clear();
    tokio::time::sleep(ms(100)).await;

    let state = search.state();
    assert!(state.query.is_empty());
    assert!(state.results.is_empty());
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_query_is_url_encoded() {
    let transport = echo();
    let search = Search::<String>::new(client(transport.clone()), "/search", options(10, 1));

    search.search("a&b c");
    tokio::time::sleep(ms(50)).await;
    assert_eq!(transport.urls(), vec!["http://api.test/search?q=a%26b+c"]);
    assert_eq!(search.state().results, vec!["a&b c".to_string()]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_error_is_reported() {
    let transport = MockTransport::new(|_, _| MockReply::status(500));
    let search = Search::<String>::new(client(transport), "/search", options(10, 1));

    search.search("boom");
    tokio::time::sleep(ms(50)).await;
    let state = search.state();
    assert!(state.error.is_some());
    assert!(!state.loading);
  }
}
