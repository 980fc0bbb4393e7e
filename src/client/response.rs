//! Uniform response type returned by the executor, and body parsing.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::ApiError;

/// Header carrying the API version, when the server reports one.
pub const API_VERSION_HEADER: &str = "x-api-version";

/// Decoded response body, dispatched by content type.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
  /// No body (e.g. 204).
  Empty,
  Json(Value),
  Text(String),
  Binary(Bytes),
}

impl Payload {
  /// Decode the payload into a typed value.
  ///
  /// Text decodes as a JSON string and an empty body as `null`, so `String`,
  /// `Option<_>` and `()` targets work without special casing. Binary bodies
  /// only decode through [`Payload::into_bytes`].
  pub fn decode<T: DeserializeOwned>(self) -> Result<T, ApiError> {
    let value = match self {
      Payload::Empty => Value::Null,
      Payload::Json(v) => v,
      Payload::Text(s) => Value::String(s),
      Payload::Binary(b) => {
        return Err(ApiError::parse(format!(
          "Cannot decode {} byte binary body as structured data",
          b.len()
        )))
      }
    };
    serde_json::from_value(value)
      .map_err(|e| ApiError::parse(format!("Failed to decode response body: {}", e)))
  }

  /// Raw bytes of the payload, re-encoding structured bodies.
  pub fn into_bytes(self) -> Bytes {
    match self {
      Payload::Empty => Bytes::new(),
      Payload::Json(v) => Bytes::from(v.to_string()),
      Payload::Text(s) => Bytes::from(s),
      Payload::Binary(b) => b,
    }
  }

  fn as_json(&self) -> Option<Value> {
    match self {
      Payload::Json(v) => Some(v.clone()),
      Payload::Text(s) => Some(Value::String(s.clone())),
      _ => None,
    }
  }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Produced by a network exchange (possibly shared with concurrent callers).
  Network,
  /// Served from a live cache entry without touching the network.
  Cache,
}

/// Metadata present on every response, success or failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMetadata {
  pub timestamp: DateTime<Utc>,
  /// Correlation id sent with the request.
  pub request_id: String,
  pub api_version: Option<String>,
  /// HTTP status of the final attempt, if a response was received.
  pub status: Option<u16>,
  pub source: ResponseSource,
}

impl ResponseMetadata {
  pub fn new(request_id: impl Into<String>, source: ResponseSource) -> Self {
    Self {
      timestamp: Utc::now(),
      request_id: request_id.into(),
      api_version: None,
      status: None,
      source,
    }
  }
}

/// Result of an executor call: exactly one of data or error, plus metadata.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
  pub result: Result<T, ApiError>,
  pub metadata: ResponseMetadata,
}

impl<T> ApiResponse<T> {
  pub fn success(data: T, metadata: ResponseMetadata) -> Self {
    Self {
      result: Ok(data),
      metadata,
    }
  }

  pub fn failure(error: ApiError, metadata: ResponseMetadata) -> Self {
    Self {
      result: Err(error),
      metadata,
    }
  }

  pub fn is_success(&self) -> bool {
    self.result.is_ok()
  }

  pub fn data(&self) -> Option<&T> {
    self.result.as_ref().ok()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.result.as_ref().err()
  }

  pub fn into_result(self) -> Result<T, ApiError> {
    self.result
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
    ApiResponse {
      result: self.result.map(f),
      metadata: self.metadata,
    }
  }

  /// Chain a fallible conversion, keeping the metadata.
  pub fn and_then<U>(self, f: impl FnOnce(T) -> Result<U, ApiError>) -> ApiResponse<U> {
    ApiResponse {
      result: self.result.and_then(f),
      metadata: self.metadata,
    }
  }
}

impl ApiResponse<Payload> {
  /// Decode a raw payload response into `T`.
  pub fn decode<T: DeserializeOwned>(self) -> ApiResponse<T> {
    self.and_then(Payload::decode)
  }
}

/// Decode a body according to its declared content type.
///
/// JSON (`application/json` or any `+json` suffix) is parsed, `text/*` is read
/// as UTF-8, and anything else is kept as binary. An empty body is
/// [`Payload::Empty`] regardless of type.
pub fn parse_body(headers: &HeaderMap, body: Bytes) -> Result<Payload, ApiError> {
  if body.is_empty() {
    return Ok(Payload::Empty);
  }

  let content_type = headers
    .get(CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
    .unwrap_or_default();

  if content_type == "application/json" || content_type.ends_with("+json") {
    serde_json::from_slice(&body)
      .map(Payload::Json)
      .map_err(|e| ApiError::parse(format!("Invalid JSON body: {}", e)))
  } else if content_type.starts_with("text/") {
    String::from_utf8(body.to_vec())
      .map(Payload::Text)
      .map_err(|e| ApiError::parse(format!("Invalid UTF-8 text body: {}", e)))
  } else {
    Ok(Payload::Binary(body))
  }
}

/// Map a non-success response to an [`ApiError`], parsing the body the same
/// way as a success body. An undecodable error body still yields the status
/// error rather than a parse error.
pub fn error_from_response(status: StatusCode, headers: &HeaderMap, body: Bytes) -> ApiError {
  let parsed = parse_body(headers, body).ok().and_then(|p| p.as_json());
  ApiError::from_status(status, parsed.as_ref())
}

/// API version advertised by the response, if any.
pub fn api_version(headers: &HeaderMap) -> Option<String> {
  headers
    .get(API_VERSION_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(String::from)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::client::error::ErrorKind;
  use reqwest::header::HeaderValue;
  use serde_json::json;

  fn headers(content_type: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
    headers
  }

  #[test]
  fn test_parse_json_with_charset() {
    let payload = parse_body(
      &headers("application/json; charset=utf-8"),
      Bytes::from_static(b"{\"a\":1}"),
    )
    .unwrap();
    assert_eq!(payload, Payload::Json(json!({"a": 1})));
  }

  #[test]
  fn test_parse_vendor_json() {
    let payload = parse_body(
      &headers("application/problem+json"),
      Bytes::from_static(b"[1,2]"),
    )
    .unwrap();
    assert_eq!(payload, Payload::Json(json!([1, 2])));
  }

  #[test]
  fn test_parse_text() {
    let payload = parse_body(&headers("text/plain"), Bytes::from_static(b"hello")).unwrap();
    assert_eq!(payload, Payload::Text("hello".into()));
  }

  #[test]
  fn test_parse_other_is_binary() {
    let payload = parse_body(&headers("image/png"), Bytes::from_static(&[0x89, 0x50])).unwrap();
    assert_eq!(payload, Payload::Binary(Bytes::from_static(&[0x89, 0x50])));
  }

  #[test]
  fn test_parse_invalid_json_is_parse_error() {
    let err = parse_body(&headers("application/json"), Bytes::from_static(b"{oops")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Parse);
    assert_eq!(err.code, "PARSE_ERROR");
  }

  #[test]
  fn test_empty_body() {
    let payload = parse_body(&headers("application/json"), Bytes::new()).unwrap();
    assert_eq!(payload, Payload::Empty);
    let unit: Option<u32> = payload.decode().unwrap();
    assert_eq!(unit, None);
  }

  #[test]
  fn test_decode_text_into_string() {
    let s: String = Payload::Text("abc".into()).decode().unwrap();
    assert_eq!(s, "abc");
  }

  #[test]
  fn test_decode_binary_fails() {
    let err = Payload::Binary(Bytes::from_static(b"x"))
      .decode::<String>()
      .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Parse);
  }

  #[test]
  fn test_error_from_unparseable_body_keeps_status() {
    let err = error_from_response(
      StatusCode::INTERNAL_SERVER_ERROR,
      &headers("application/json"),
      Bytes::from_static(b"<html>"),
    );
    assert_eq!(err.code, "Internal Server Error");
    assert_eq!(err.kind, ErrorKind::Server);
  }
}
