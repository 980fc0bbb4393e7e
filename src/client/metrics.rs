//! Metric names and recording helpers. Emission is fire-and-forget through the
//! `metrics` facade; nothing is recorded unless the host installs a recorder.

use std::time::Duration;

pub const REQUEST_DURATION: &str = "fetchkit_request_duration_seconds";
pub const CACHE_HIT: &str = "fetchkit_cache_hit_total";
pub const CACHE_MISS: &str = "fetchkit_cache_miss_total";
pub const DEDUP_JOINED: &str = "fetchkit_dedup_joined_total";
pub const RETRY: &str = "fetchkit_retry_total";

/// Register metric descriptions with the installed recorder.
pub fn describe() {
  metrics::describe_histogram!(
    REQUEST_DURATION,
    metrics::Unit::Seconds,
    "Duration of each request attempt."
  );
  metrics::describe_counter!(CACHE_HIT, "GET calls served from the cache.");
  metrics::describe_counter!(CACHE_MISS, "Cacheable GET calls that went to the network.");
  metrics::describe_counter!(DEDUP_JOINED, "Calls that joined an identical in-flight request.");
  metrics::describe_counter!(RETRY, "Attempts retried after a retryable failure.");
}

/// Status label for an attempt outcome.
pub enum AttemptStatus {
  Response(u16),
  Timeout,
  Error,
}

impl AttemptStatus {
  fn label(&self) -> String {
    match self {
      AttemptStatus::Response(code) => code.to_string(),
      AttemptStatus::Timeout => "timeout".to_string(),
      AttemptStatus::Error => "error".to_string(),
    }
  }
}

pub fn record_attempt(endpoint: &str, method: &str, status: AttemptStatus, elapsed: Duration) {
  metrics::histogram!(
    REQUEST_DURATION,
    "endpoint" => endpoint.to_string(),
    "method" => method.to_string(),
    "status" => status.label()
  )
  .record(elapsed.as_secs_f64());
}

pub fn record_cache(key: &str, hit: bool) {
  let name = if hit { CACHE_HIT } else { CACHE_MISS };
  metrics::counter!(name, "key" => key.to_string()).increment(1);
}

pub fn record_dedup(endpoint: &str) {
  metrics::counter!(DEDUP_JOINED, "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_retry(endpoint: &str, method: &str) {
  metrics::counter!(
    RETRY,
    "endpoint" => endpoint.to_string(),
    "method" => method.to_string()
  )
  .increment(1);
}
