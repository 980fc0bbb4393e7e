//! Error taxonomy for the request executor.
//!
//! Every failure on the request path is a value: the executor resolves to an
//! [`ApiResponse`](super::ApiResponse) carrying an [`ApiError`] instead of
//! returning early or panicking.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Stable code for transport failures and exhausted retry budgets.
pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
/// Stable code for bodies that could not be decoded.
pub const PARSE_ERROR: &str = "PARSE_ERROR";
/// Stable code for unexpected failures while preparing or running a mutation.
pub const MUTATION_ERROR: &str = "MUTATION_ERROR";
/// Stable code for local filesystem failures (download target).
pub const IO_ERROR: &str = "IO_ERROR";

/// Broad classification of an [`ApiError`], used for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
  /// 4xx response. Terminal, never retried.
  Client,
  /// 5xx response that exhausted the retry budget.
  Server,
  /// Transport failure (connect, reset, DNS) that exhausted the retry budget.
  Network,
  /// Every attempt ran past its timeout.
  Timeout,
  /// The body did not match its declared content type or the requested type.
  Parse,
  /// Unexpected failure wrapping a mutation call.
  Mutation,
  /// Local filesystem failure while saving a download.
  Io,
}

impl ErrorKind {
  /// Taxonomy label, used in logs.
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::Client => "CLIENT_ERROR",
      ErrorKind::Server => "SERVER_ERROR",
      ErrorKind::Network => "NETWORK_ERROR",
      ErrorKind::Timeout => "TIMEOUT",
      ErrorKind::Parse => "PARSE_ERROR",
      ErrorKind::Mutation => "MUTATION_ERROR",
      ErrorKind::Io => "IO_ERROR",
    }
  }

  /// Whether a failure of this kind may be retried by the executor.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      ErrorKind::Server | ErrorKind::Network | ErrorKind::Timeout
    )
  }
}

/// Error value surfaced to callers of the executor and the query bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
  pub kind: ErrorKind,
  /// Stable machine identifier: status text, a server-provided code, or one
  /// of [`NETWORK_ERROR`], [`PARSE_ERROR`], [`MUTATION_ERROR`].
  pub code: String,
  pub message: String,
  #[serde(default)]
  pub details: Map<String, Value>,
}

impl ApiError {
  pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      kind,
      code: code.into(),
      message: message.into(),
      details: Map::new(),
    }
  }

  pub fn network(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Network, NETWORK_ERROR, message)
  }

  pub fn parse(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Parse, PARSE_ERROR, message)
  }

  pub fn mutation(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Mutation, MUTATION_ERROR, message)
  }

  pub fn io(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Io, IO_ERROR, message)
  }

  /// Attach a detail entry.
  pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.details.insert(key.into(), value.into());
    self
  }

  /// Build an error from a non-success HTTP response.
  ///
  /// The server may describe the failure either at the top level
  /// (`{"code": .., "message": .., "details": ..}`) or nested under `error`.
  /// Missing fields fall back to the status text.
  pub fn from_status(status: StatusCode, body: Option<&Value>) -> Self {
    let kind = if status.is_client_error() {
      ErrorKind::Client
    } else {
      ErrorKind::Server
    };
    let status_text = status
      .canonical_reason()
      .map(String::from)
      .unwrap_or_else(|| status.as_str().to_string());

    let described = body.and_then(|b| match b.get("error") {
      Some(nested @ Value::Object(_)) => Some(nested),
      _ => Some(b),
    });

    let code = described
      .and_then(|d| d.get("code"))
      .and_then(value_as_code)
      .unwrap_or_else(|| status_text.clone());
    let message = described
      .and_then(|d| d.get("message"))
      .and_then(Value::as_str)
      .map(String::from)
      .or_else(|| body.and_then(Value::as_str).map(String::from))
      .unwrap_or(status_text);
    let mut details = described
      .and_then(|d| d.get("details"))
      .and_then(Value::as_object)
      .cloned()
      .unwrap_or_default();
    details.insert("status".into(), Value::from(status.as_u16()));

    Self {
      kind,
      code,
      message,
      details,
    }
  }

  /// HTTP status recorded for this error, if it came from a response.
  pub fn status(&self) -> Option<u16> {
    self
      .details
      .get("status")
      .and_then(Value::as_u64)
      .and_then(|s| u16::try_from(s).ok())
  }
}

fn value_as_code(value: &Value) -> Option<String> {
  match value {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// Failure reported by a [`Transport`](super::Transport) before any response
/// was received.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
  #[error("connection failed: {0}")]
  Connect(String),
  #[error("request timed out")]
  Timeout,
  #[error("invalid request: {0}")]
  Request(String),
  #[error("transport failure: {0}")]
  Other(String),
}

impl From<reqwest::Error> for TransportError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      TransportError::Timeout
    } else if err.is_connect() {
      TransportError::Connect(err.to_string())
    } else if err.is_builder() {
      TransportError::Request(err.to_string())
    } else {
      TransportError::Other(err.to_string())
    }
  }
}
