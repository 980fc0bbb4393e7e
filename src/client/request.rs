//! Per-call request configuration.

use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use super::error::ApiError;

/// Default number of attempts (initial try included).
pub const DEFAULT_ATTEMPTS: u32 = 3;
/// Default wait between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);
/// Default cache lifetime when a cache config omits its TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Retry policy for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
  pub attempts: u32,
  pub delay: Duration,
  /// Double the delay after every failed attempt.
  pub backoff: bool,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      attempts: DEFAULT_ATTEMPTS,
      delay: DEFAULT_RETRY_DELAY,
      backoff: false,
    }
  }
}

impl RetryConfig {
  /// No retries: a single attempt.
  pub fn none() -> Self {
    Self {
      attempts: 1,
      ..Self::default()
    }
  }

  /// Wait before the attempt following `attempt` (1-based).
  ///
  /// With backoff the wait is `delay * 2^(attempt - 1)`.
  pub fn delay_after(&self, attempt: u32) -> Duration {
    if !self.backoff {
      return self.delay;
    }
    let shift = attempt.saturating_sub(1).min(16);
    self.delay.saturating_mul(1u32 << shift)
  }
}

/// Caching directive for a GET call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
  /// Lifetime of the cached entry. Client default when `None`.
  pub ttl: Option<Duration>,
  /// Cache key. The endpoint when `None`.
  pub key: Option<String>,
}

impl CacheConfig {
  pub fn ttl(ttl: Duration) -> Self {
    Self {
      ttl: Some(ttl),
      key: None,
    }
  }

  pub fn with_key(mut self, key: impl Into<String>) -> Self {
    self.key = Some(key.into());
    self
  }
}

/// A file part of a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
  /// Form field name.
  pub field: String,
  pub file_name: String,
  pub content_type: Option<String>,
  pub data: Bytes,
}

impl UploadFile {
  pub fn new(field: impl Into<String>, file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
    Self {
      field: field.into(),
      file_name: file_name.into(),
      content_type: None,
      data: data.into(),
    }
  }

  pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
    self.content_type = Some(content_type.into());
    self
  }
}

/// Request payload. Kept as owned, cheaply clonable data so every retry
/// attempt can rebuild the request.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
  #[default]
  Empty,
  Json(Value),
  Text(String),
  Bytes(Bytes),
  Multipart(Vec<UploadFile>),
}

impl RequestBody {
  pub fn is_multipart(&self) -> bool {
    matches!(self, RequestBody::Multipart(_))
  }
}

/// Configuration for one executor call. Unset fields fall back to the
/// client-wide defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
  pub method: Method,
  pub headers: Vec<(String, String)>,
  pub body: RequestBody,
  pub retry: Option<RetryConfig>,
  pub timeout: Option<Duration>,
  /// Only honoured for GET.
  pub cache: Option<CacheConfig>,
}

impl RequestConfig {
  pub fn new(method: Method) -> Self {
    Self {
      method,
      ..Self::default()
    }
  }

  pub fn get() -> Self {
    Self::new(Method::GET)
  }

  pub fn method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn body(mut self, body: RequestBody) -> Self {
    self.body = body;
    self
  }

  /// Serialise `body` as the JSON payload.
  pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
    let value = serde_json::to_value(body)
      .map_err(|e| ApiError::parse(format!("Failed to serialize request body: {}", e)))?;
    self.body = RequestBody::Json(value);
    Ok(self)
  }

  pub fn retry(mut self, retry: RetryConfig) -> Self {
    self.retry = Some(retry);
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn cache(mut self, cache: CacheConfig) -> Self {
    self.cache = Some(cache);
    self
  }

  /// Whether a header with this name was set explicitly (case-insensitive).
  pub fn has_header(&self, name: &str) -> bool {
    self
      .headers
      .iter()
      .any(|(k, _)| k.eq_ignore_ascii_case(name))
  }
}
