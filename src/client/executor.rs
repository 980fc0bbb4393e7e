//! The request executor: URL building, cache check, deduplication, retry with
//! backoff, per-attempt timeout, response parsing and cache write-through.

use color_eyre::{eyre::eyre, Result};
use futures::FutureExt;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheStore, SweeperHandle};
use crate::config::Config;

use super::dedup::PendingRegistry;
use super::error::{ApiError, ErrorKind, NETWORK_ERROR};
use super::metrics::{self, AttemptStatus};
use super::request::{
  RequestBody, RequestConfig, RetryConfig, UploadFile, DEFAULT_CACHE_TTL, DEFAULT_TIMEOUT,
};
use super::response::{
  api_version, error_from_response, parse_body, ApiResponse, Payload, ResponseMetadata,
  ResponseSource,
};
use super::transport::{ReqwestTransport, Transport, TransportRequest};

/// Correlation header sent with every request.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Default interval of the background cache sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Client-wide defaults applied to any field a [`RequestConfig`] leaves unset.
#[derive(Debug, Clone)]
pub struct ClientDefaults {
  pub timeout: Duration,
  pub retry: RetryConfig,
  pub cache_ttl: Duration,
  pub headers: Vec<(String, String)>,
}

impl Default for ClientDefaults {
  fn default() -> Self {
    Self {
      timeout: DEFAULT_TIMEOUT,
      retry: RetryConfig::default(),
      cache_ttl: DEFAULT_CACHE_TTL,
      headers: Vec::new(),
    }
  }
}

/// Result of a successful [`ApiClient::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
  pub path: PathBuf,
  pub bytes: usize,
}

struct ClientInner {
  base_url: String,
  defaults: ClientDefaults,
  transport: Arc<dyn Transport>,
  cache: Arc<CacheStore<Payload>>,
  pending: PendingRegistry<ApiResponse<Payload>>,
  _sweeper: Option<SweeperHandle>,
}

/// One call after defaults are resolved; owned so it can run inside the
/// shared dedup future.
struct PreparedCall {
  endpoint: String,
  request: TransportRequest,
  retry: RetryConfig,
  timeout: Duration,
  cache: Option<(String, Duration)>,
  request_id: String,
}

/// Request executor shared by every query binding.
///
/// Cloning is cheap and every clone shares the same cache and in-flight
/// registry. Construct one per process at the composition root and pass it
/// to whatever needs it.
#[derive(Clone)]
pub struct ApiClient {
  inner: Arc<ClientInner>,
}

impl ApiClient {
  pub fn builder() -> ApiClientBuilder {
    ApiClientBuilder::default()
  }

  /// Build a client from loaded configuration using the HTTP transport.
  pub fn from_config(config: &Config) -> Result<Self> {
    ApiClientBuilder::from_config(config).build()
  }

  pub fn base_url(&self) -> &str {
    &self.inner.base_url
  }

  pub fn defaults(&self) -> &ClientDefaults {
    &self.inner.defaults
  }

  /// Resolve an endpoint against the base URL.
  ///
  /// Absolute `http://`/`https://` URLs pass through unchanged; relative paths
  /// get a leading `/` and the base URL prefix.
  pub fn build_url(&self, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
      return endpoint.to_string();
    }
    let base = self.inner.base_url.trim_end_matches('/');
    if endpoint.starts_with('/') {
      format!("{}{}", base, endpoint)
    } else {
      format!("{}/{}", base, endpoint)
    }
  }

  /// Execute a call and return the undecoded payload.
  pub async fn execute_raw(&self, endpoint: &str, config: RequestConfig) -> ApiResponse<Payload> {
    let request_id = Uuid::new_v4().to_string();
    let method = config.method.clone();

    let cache = match (&config.cache, method == Method::GET) {
      (Some(cache), true) => Some((
        cache.key.clone().unwrap_or_else(|| endpoint.to_string()),
        cache.ttl.unwrap_or(self.inner.defaults.cache_ttl),
      )),
      _ => None,
    };

    if let Some((key, _)) = &cache {
      if let Some(data) = self.inner.cache.get(key) {
        debug!(%key, "Cache hit");
        metrics::record_cache(key, true);
        return ApiResponse::success(data, ResponseMetadata::new(request_id, ResponseSource::Cache));
      }
      metrics::record_cache(key, false);
    }

    let call = self.prepare(endpoint, config, request_id, cache);
    let dedup_key = PendingRegistry::<ApiResponse<Payload>>::key(method.as_str(), endpoint);
    let inner = Arc::clone(&self.inner);

    let (response, joined) = self
      .inner
      .pending
      .run(dedup_key, move || perform(inner, call).boxed())
      .await;

    if joined {
      debug!(%method, endpoint, "Joined in-flight request");
      metrics::record_dedup(endpoint);
    }
    response.unwrap_or_else(|| local_failure(ApiError::network("Request task ended before completing")))
  }

  /// Execute a call and decode the payload into `T`.
  pub async fn execute<T: DeserializeOwned>(
    &self,
    endpoint: &str,
    config: RequestConfig,
  ) -> ApiResponse<T> {
    self.execute_raw(endpoint, config).await.decode()
  }

  pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResponse<T> {
    self.execute(endpoint, RequestConfig::get()).await
  }

  pub async fn post<T, B>(&self, endpoint: &str, body: &B) -> ApiResponse<T>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    self.send_json(Method::POST, endpoint, body).await
  }

  pub async fn put<T, B>(&self, endpoint: &str, body: &B) -> ApiResponse<T>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    self.send_json(Method::PUT, endpoint, body).await
  }

  pub async fn patch<T, B>(&self, endpoint: &str, body: &B) -> ApiResponse<T>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    self.send_json(Method::PATCH, endpoint, body).await
  }

  pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResponse<T> {
    self
      .execute(endpoint, RequestConfig::new(Method::DELETE))
      .await
  }

  /// POST `files` as a multipart form. No JSON content type is sent so the
  /// transport can set its own boundary.
  pub async fn upload<T: DeserializeOwned>(
    &self,
    endpoint: &str,
    files: Vec<UploadFile>,
  ) -> ApiResponse<T> {
    let config = RequestConfig::new(Method::POST).body(RequestBody::Multipart(files));
    self.execute(endpoint, config).await
  }

  /// GET `endpoint` and save the body to `path`.
  pub async fn download(&self, endpoint: &str, path: impl AsRef<Path>) -> ApiResponse<Download> {
    let path = path.as_ref().to_path_buf();
    let response = self.execute_raw(endpoint, RequestConfig::get()).await;
    let ApiResponse { result, metadata } = response;

    let payload = match result {
      Ok(payload) => payload,
      Err(err) => return ApiResponse::failure(err, metadata),
    };
    let bytes = payload.into_bytes();
    match tokio::fs::write(&path, &bytes).await {
      Ok(()) => {
        info!(endpoint, path = %path.display(), bytes = bytes.len(), "Saved download");
        ApiResponse::success(
          Download {
            path,
            bytes: bytes.len(),
          },
          metadata,
        )
      }
      Err(e) => ApiResponse::failure(
        ApiError::io(format!("Failed to write {}: {}", path.display(), e)),
        metadata,
      ),
    }
  }

  /// Drop the cached entry for `key`.
  pub fn invalidate(&self, key: &str) {
    info!(key, "Invalidating cache entry");
    self.inner.cache.clear(Some(key));
  }

  pub fn clear_cache(&self) {
    info!("Clearing cache");
    self.inner.cache.clear(None);
  }

  pub fn cache(&self) -> &CacheStore<Payload> {
    &self.inner.cache
  }

  /// Number of requests currently in flight.
  pub fn in_flight(&self) -> usize {
    self.inner.pending.len()
  }

  async fn send_json<T, B>(&self, method: Method, endpoint: &str, body: &B) -> ApiResponse<T>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    match RequestConfig::new(method).json(body) {
      Ok(config) => self.execute(endpoint, config).await,
      Err(err) => local_failure(err),
    }
  }

  fn prepare(
    &self,
    endpoint: &str,
    config: RequestConfig,
    request_id: String,
    cache: Option<(String, Duration)>,
  ) -> PreparedCall {
    let defaults = &self.inner.defaults;

    let mut headers: Vec<(String, String)> = defaults
      .headers
      .iter()
      .filter(|(name, _)| !config.has_header(name))
      .cloned()
      .collect();
    let content_type_set = headers
      .iter()
      .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
      || config.has_header("content-type");
    if !content_type_set && !config.body.is_multipart() {
      headers.push(("Content-Type".into(), "application/json".into()));
    }
    headers.extend(config.headers.iter().cloned());
    headers.push((REQUEST_ID_HEADER.into(), request_id.clone()));

    PreparedCall {
      endpoint: endpoint.to_string(),
      request: TransportRequest {
        method: config.method,
        url: self.build_url(endpoint),
        headers,
        body: config.body,
      },
      retry: config.retry.unwrap_or(defaults.retry),
      timeout: config.timeout.unwrap_or(defaults.timeout),
      cache,
      request_id,
    }
  }
}

/// Failure produced before any request was sent.
fn local_failure<T>(error: ApiError) -> ApiResponse<T> {
  ApiResponse::failure(
    error,
    ResponseMetadata::new(Uuid::new_v4().to_string(), ResponseSource::Network),
  )
}

/// Run the attempts for one call. Never returns early with an `Err`: every
/// path ends in an [`ApiResponse`].
async fn perform(inner: Arc<ClientInner>, call: PreparedCall) -> ApiResponse<Payload> {
  let PreparedCall {
    endpoint,
    request,
    retry,
    timeout,
    cache,
    request_id,
  } = call;
  let method = request.method.as_str().to_string();
  let attempts = retry.attempts.max(1);

  let mut metadata = ResponseMetadata::new(request_id, ResponseSource::Network);
  let mut last_error = ApiError::network("No attempt was made");

  for attempt in 1..=attempts {
    debug!(attempt, attempts, %method, url = %request.url, "Sending request");
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, inner.transport.send(request.clone())).await;
    let elapsed = started.elapsed();

    match outcome {
      Ok(Ok(response)) => {
        let status = response.status;
        metrics::record_attempt(
          &endpoint,
          &method,
          AttemptStatus::Response(status.as_u16()),
          elapsed,
        );
        metadata.status = Some(status.as_u16());
        metadata.api_version = api_version(&response.headers);

        if (200..400).contains(&status.as_u16()) {
          return match parse_body(&response.headers, response.body) {
            Ok(payload) => {
              if let Some((key, ttl)) = &cache {
                inner.cache.set(key.clone(), payload.clone(), *ttl);
              }
              debug!(%method, endpoint, status = status.as_u16(), "Request succeeded");
              ApiResponse::success(payload, metadata)
            }
            Err(err) => {
              warn!(%method, endpoint, error = %err, "Failed to parse response body");
              ApiResponse::failure(err, metadata)
            }
          };
        }

        let err = error_from_response(status, &response.headers, response.body);
        if !err.kind.is_retryable() {
          debug!(%method, endpoint, status = status.as_u16(), kind = err.kind.as_str(), code = %err.code, "Not retrying");
          return ApiResponse::failure(err, metadata);
        }
        warn!(attempt, attempts, %method, endpoint, status = status.as_u16(), kind = err.kind.as_str(), "Server error");
        last_error = err;
      }
      Ok(Err(err)) => {
        metrics::record_attempt(&endpoint, &method, AttemptStatus::Error, elapsed);
        warn!(attempt, attempts, %method, endpoint, error = %err, "Transport error");
        last_error = ApiError::network(err.to_string());
      }
      Err(_) => {
        metrics::record_attempt(&endpoint, &method, AttemptStatus::Timeout, elapsed);
        warn!(attempt, attempts, %method, endpoint, timeout_ms = timeout.as_millis() as u64, "Request timed out");
        last_error = ApiError::new(
          ErrorKind::Timeout,
          NETWORK_ERROR,
          format!("Request timed out after {}ms", timeout.as_millis()),
        );
      }
    }

    if attempt < attempts {
      metrics::record_retry(&endpoint, &method);
      let delay = retry.delay_after(attempt);
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
    }
  }

  error!(%method, endpoint, attempts, kind = last_error.kind.as_str(), error = %last_error, "Request failed after exhausting retries");
  let mut err = ApiError::new(
    last_error.kind,
    NETWORK_ERROR,
    format!(
      "Request failed after {} attempts: {}",
      attempts, last_error.message
    ),
  )
  .with_detail("attempts", attempts)
  .with_detail("lastCode", last_error.code.clone());
  if let Some(status) = last_error.status() {
    err = err.with_detail("status", status);
  }
  ApiResponse::failure(err, metadata)
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
  base_url: String,
  defaults: ClientDefaults,
  transport: Option<Arc<dyn Transport>>,
  sweep_interval: Option<Duration>,
}

impl Default for ApiClientBuilder {
  fn default() -> Self {
    Self {
      base_url: String::new(),
      defaults: ClientDefaults::default(),
      transport: None,
      sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
    }
  }
}

impl ApiClientBuilder {
  /// Builder preloaded with the configured base URL and defaults.
  pub fn from_config(config: &Config) -> Self {
    Self {
      base_url: config.api.base_url.clone(),
      defaults: config.client_defaults(),
      transport: None,
      sweep_interval: config.cache.sweep_interval(),
    }
  }

  pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
    self.base_url = base_url.into();
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.defaults.timeout = timeout;
    self
  }

  pub fn retry(mut self, retry: RetryConfig) -> Self {
    self.defaults.retry = retry;
    self
  }

  pub fn cache_ttl(mut self, ttl: Duration) -> Self {
    self.defaults.cache_ttl = ttl;
    self
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.defaults.headers.push((name.into(), value.into()));
    self
  }

  pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
    self.transport = Some(transport);
    self
  }

  /// Interval of the background cache sweep; `None` disables it.
  pub fn sweep_interval(mut self, interval: Option<Duration>) -> Self {
    self.sweep_interval = interval;
    self
  }

  pub fn build(self) -> Result<ApiClient> {
    let transport: Arc<dyn Transport> = match self.transport {
      Some(t) => t,
      None => {
        let client = reqwest::Client::builder()
          .build()
          .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
        Arc::new(ReqwestTransport::new(client))
      }
    };

    let cache = Arc::new(CacheStore::new());
    let sweeper = match self.sweep_interval {
      Some(interval) if tokio::runtime::Handle::try_current().is_ok() => {
        Some(cache.spawn_sweeper(interval))
      }
      Some(_) => {
        warn!("No tokio runtime available, cache sweep disabled");
        None
      }
      None => None,
    };

    metrics::describe();

    Ok(ApiClient {
      inner: Arc::new(ClientInner {
        base_url: self.base_url,
        defaults: self.defaults,
        transport,
        cache,
        pending: PendingRegistry::new(),
        _sweeper: sweeper,
      }),
    })
  }
}
