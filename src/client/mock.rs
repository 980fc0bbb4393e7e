//! Scripted transport for tests: records every request and answers through a
//! handler closure, optionally after a fixed latency.

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::error::TransportError;
use super::transport::{Transport, TransportRequest, TransportResponse};

pub(crate) enum MockReply {
  Response(TransportResponse),
  Fail(TransportError),
  /// Never completes; only a timeout ends the attempt.
  Hang,
}

impl MockReply {
  pub fn json(status: u16, body: Value) -> Self {
    Self::with_body(status, "application/json", Bytes::from(body.to_string()))
  }

  pub fn text(status: u16, body: &str) -> Self {
    Self::with_body(status, "text/plain", Bytes::from(body.to_string()))
  }

  pub fn binary(status: u16, body: &'static [u8]) -> Self {
    Self::with_body(status, "application/octet-stream", Bytes::from_static(body))
  }

  pub fn status(status: u16) -> Self {
    Self::with_body(status, "application/json", Bytes::new())
  }

  pub fn with_body(status: u16, content_type: &str, body: Bytes) -> Self {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(content_type) {
      headers.insert(CONTENT_TYPE, value);
    }
    MockReply::Response(TransportResponse {
      status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
      headers,
      body,
    })
  }

  pub fn header(mut self, name: &'static str, value: &'static str) -> Self {
    if let MockReply::Response(response) = &mut self {
      response
        .headers
        .insert(name, HeaderValue::from_static(value));
    }
    self
  }
}

type Handler = Box<dyn Fn(&TransportRequest, usize) -> MockReply + Send + Sync>;

pub(crate) struct MockTransport {
  handler: Handler,
  latency: Duration,
  log: Mutex<Vec<(TransportRequest, Instant)>>,
}

impl MockTransport {
  /// `handler` receives each request and its zero-based call index.
  pub fn new<F>(handler: F) -> Arc<Self>
  where
    F: Fn(&TransportRequest, usize) -> MockReply + Send + Sync + 'static,
  {
    Self::with_latency(Duration::ZERO, handler)
  }

  pub fn with_latency<F>(latency: Duration, handler: F) -> Arc<Self>
  where
    F: Fn(&TransportRequest, usize) -> MockReply + Send + Sync + 'static,
  {
    Arc::new(Self {
      handler: Box::new(handler),
      latency,
      log: Mutex::new(Vec::new()),
    })
  }

  pub fn calls(&self) -> usize {
    self.log.lock().unwrap().len()
  }

  pub fn urls(&self) -> Vec<String> {
    self
      .log
      .lock()
      .unwrap()
      .iter()
      .map(|(r, _)| r.url.clone())
      .collect()
  }

  pub fn requests(&self) -> Vec<TransportRequest> {
    self
      .log
      .lock()
      .unwrap()
      .iter()
      .map(|(r, _)| r.clone())
      .collect()
  }

  pub fn call_times(&self) -> Vec<Instant> {
    self.log.lock().unwrap().iter().map(|(_, t)| *t).collect()
  }
}

impl Transport for MockTransport {
  fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
    let index = {
      let mut log = self.log.lock().unwrap();
      log.push((request.clone(), Instant::now()));
      log.len() - 1
    };
    let reply = (self.handler)(&request, index);
    let latency = self.latency;
    Box::pin(async move {
      if !latency.is_zero() {
        tokio::time::sleep(latency).await;
      }
      match reply {
        MockReply::Response(response) => Ok(response),
        MockReply::Fail(err) => Err(err),
        MockReply::Hang => futures::future::pending().await,
      }
    })
  }
}
