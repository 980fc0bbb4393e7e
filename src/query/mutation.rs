//! Explicitly triggered write calls with cache invalidation.

use reqwest::Method;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::client::{
  ApiClient, ApiError, ApiResponse, RequestBody, RequestConfig, ResponseMetadata, ResponseSource,
};

use super::binding::Binding;
use super::{QueryData, QueryState};

#[derive(Debug, Clone)]
pub struct MutationOptions {
  pub method: Method,
  /// Cache keys dropped after every successful call, so later reads go to
  /// the network.
  pub invalidate: Vec<String>,
  /// Base configuration; method and body are replaced per call.
  pub config: RequestConfig,
}

impl Default for MutationOptions {
  fn default() -> Self {
    Self {
      method: Method::POST,
      invalidate: Vec::new(),
      config: RequestConfig::default(),
    }
  }
}

impl MutationOptions {
  pub fn method(method: Method) -> Self {
    Self {
      method,
      ..Self::default()
    }
  }

  pub fn invalidate<I, S>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.invalidate.extend(keys.into_iter().map(Into::into));
    self
  }
}

/// POST/PUT/PATCH/DELETE wrapper. Never runs on its own.
pub struct Mutation<T> {
  client: ApiClient,
  endpoint: String,
  options: MutationOptions,
  binding: Binding<QueryState<T>>,
}

impl<T: QueryData> Mutation<T> {
  pub fn new(client: ApiClient, endpoint: impl Into<String>, options: MutationOptions) -> Self {
    Self {
      client,
      endpoint: endpoint.into(),
      options,
      binding: Binding::new(QueryState::default()),
    }
  }

  pub fn state(&self) -> QueryState<T> {
    self.binding.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
    self.binding.subscribe()
  }

  /// Send `body` as JSON. A body that fails to serialise is reported as a
  /// `MUTATION_ERROR` without touching the network.
  pub async fn mutate<B: Serialize + ?Sized>(&self, body: &B) -> ApiResponse<T> {
    match serde_json::to_value(body) {
      Ok(value) => self.mutate_with(RequestBody::Json(value)).await,
      Err(e) => {
        let error = ApiError::mutation(format!("Failed to serialize mutation body: {}", e));
        let metadata = ResponseMetadata::new(uuid::Uuid::new_v4().to_string(), ResponseSource::Network);
        let response = ApiResponse::failure(error, metadata);
        self.binding.update(|s| {
          s.error = response.error().cloned();
          s.loading = false;
        });
        response
      }
    }
  }

  /// Trigger the call with no body (typical for DELETE).
  pub async fn mutate_empty(&self) -> ApiResponse<T> {
    self.mutate_with(RequestBody::Empty).await
  }

  /// Trigger the call with an explicit body.
  pub async fn mutate_with(&self, body: RequestBody) -> ApiResponse<T> {
    self.binding.update(|s| {
      s.loading = true;
      s.error = None;
    });

    let config = self
      .options
      .config
      .clone()
      .method(self.options.method.clone())
      .body(body);
    let response = self.client.execute::<T>(&self.endpoint, config).await;

    if response.is_success() {
      for key in &self.options.invalidate {
        self.client.invalidate(key);
      }
    } else {
      debug!(endpoint = %self.endpoint, "Mutation failed");
    }

    let result = response.result.clone();
    self.binding.update(|s| s.apply(result));
    response
  }

  /// Back to the initial state: no data, no error, not loading.
  pub fn reset(&self) {
    self.binding.update(|s| *s = QueryState::default());
  }
}

impl<T> Drop for Mutation<T> {
  fn drop(&mut self) {
    self.binding.detach();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::client::mock::{MockReply, MockTransport};
  use crate::client::{CacheConfig, ErrorKind, RetryConfig};
  use serde::ser::Error as _;
  use serde_json::{json, Value};
  use std::sync::Arc;

  fn client(transport: Arc<MockTransport>) -> ApiClient {
    ApiClient::builder()
      .base_url("http://api.test")
      .retry(RetryConfig::none())
      .transport(transport)
      .sweep_interval(None)
      .build()
      .unwrap()
  }

  #[tokio::test]
  async fn test_not_triggered_automatically() {
    let transport = MockTransport::new(|_, _| MockReply::json(200, json!({})));
    let mutation = Mutation::<Value>::new(client(transport.clone()), "/users", MutationOptions::default());
    tokio::task::yield_now().await;
    assert_eq!(transport.calls(), 0);
    assert!(!mutation.state().is_loading());
  }

  #[tokio::test]
  async fn test_success_invalidates_cache_keys() {
    let transport = MockTransport::new(|req, _| {
      if req.method == Method::GET {
        MockReply::json(200, json!([{"id": 1}]))
      } else {
        MockReply::json(201, json!({"id": 2}))
      }
    });
    let api = client(transport.clone());
    let cached = || RequestConfig::get().cache(CacheConfig::default().with_key("users"));

    let _ = api.execute_raw("/users", cached()).await;
    assert!(api.cache().contains("users"));

    let mutation = Mutation::<Value>::new(
      api.clone(),
      "/users",
      MutationOptions::default().invalidate(["users"]),
    );
    let response = mutation.mutate(&json!({"name": "bob"})).await;

    assert_eq!(response.data(), Some(&json!({"id": 2})));
    assert!(!api.cache().contains("users"));
    assert_eq!(mutation.state().data, Some(json!({"id": 2})));

    let _ = api.execute_raw("/users", cached()).await;
    assert_eq!(transport.calls(), 3);
  }

  #[tokio::test]
  async fn test_failure_keeps_cache_and_sets_error() {
    let transport = MockTransport::new(|req, _| {
      if req.method == Method::GET {
        MockReply::json(200, json!([]))
      } else {
        MockReply::json(422, json!({"code": "INVALID", "message": "bad name"}))
      }
    });
    let api = client(transport);
    let _ = api
      .execute_raw("/users", RequestConfig::get().cache(CacheConfig::default()))
      .await;

    let mutation = Mutation::<Value>::new(
      api.clone(),
      "/users",
      MutationOptions::method(Method::PUT).invalidate(["/users"]),
    );
    let response = mutation.mutate(&json!({"name": ""})).await;

    assert_eq!(response.error().map(|e| e.code.as_str()), Some("INVALID"));
    assert!(api.cache().contains("/users"));
    assert_eq!(mutation.state().error.map(|e| e.code), Some("INVALID".to_string()));
  }

  #[tokio::test]
  async fn test_delete_without_body() {
    let transport = MockTransport::new(|_, _| MockReply::status(204));
    let mutation = Mutation::<()>::new(
      client(transport.clone()),
      "/users/1",
      MutationOptions::method(Method::DELETE),
    );

    let response = mutation.mutate_empty().await;
    assert!(response.is_success());
    let request = &transport.requests()[0];
    assert_eq!(request.method, Method::DELETE);
    assert!(matches!(request.body, RequestBody::Empty));
  }

  struct Unserializable;

  impl Serialize for Unserializable {
    fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
      Err(S::Error::custom("refused"))
    }
  }

  #[tokio::test]
  async fn test_unserializable_body_is_mutation_error() {
    let transport = MockTransport::new(|_, _| MockReply::status(200));
    let mutation = Mutation::<Value>::new(client(transport.clone()), "/x", MutationOptions::default());

    let response = mutation.mutate(&Unserializable).await;
    assert_eq!(response.error().map(|e| e.kind), Some(ErrorKind::Mutation));
    assert_eq!(transport.calls(), 0);
    assert!(mutation.state().is_error());
  }

  #[tokio::test]
  async fn test_reset_clears_state() {
    let transport = MockTransport::new(|_, _| MockReply::json(200, json!(1)));
    let mutation = Mutation::<u32>::new(client(transport), "/x", MutationOptions::default());

    let _ = mutation.mutate(&json!({})).await;
    assert_eq!(mutation.state().data, Some(1));

    mutation.reset();
    let state = mutation.state();
    assert!(state.data.is_none() && state.error.is_none() && !state.loading);
  }
}
