//! Transport seam between the executor and the network.

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};

use super::error::TransportError;
use super::request::RequestBody;

/// A fully resolved request for one attempt.
#[derive(Debug, Clone)]
pub struct TransportRequest {
  pub method: Method,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: RequestBody,
}

/// Raw response returned by a transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
}

/// Performs a single request/response exchange.
///
/// Implementations do not retry or time out on their own; the executor wraps
/// every call with its own timeout and retry policy.
pub trait Transport: Send + Sync + 'static {
  fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<TransportResponse, TransportError>>;
}

/// HTTP transport backed by a shared `reqwest` client.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new(client: reqwest::Client) -> Self {
    Self { client }
  }

  fn build(&self, request: TransportRequest) -> Result<reqwest::RequestBuilder, TransportError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| TransportError::Request(format!("invalid header name {}: {}", name, e)))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| TransportError::Request(format!("invalid header value: {}", e)))?;
      headers.append(name, value);
    }

    let builder = self
      .client
      .request(request.method, &request.url)
      .headers(headers);

    let builder = match request.body {
      RequestBody::Empty => builder,
      RequestBody::Json(value) => builder.body(value.to_string()),
      RequestBody::Text(text) => builder.body(text),
      RequestBody::Bytes(bytes) => builder.body(bytes),
      RequestBody::Multipart(files) => {
        let mut form = Form::new();
        for file in files {
          let mut part = Part::bytes(file.data.to_vec()).file_name(file.file_name);
          if let Some(ct) = file.content_type {
            part = part
              .mime_str(&ct)
              .map_err(|e| TransportError::Request(format!("invalid content type {}: {}", ct, e)))?;
          }
          form = form.part(file.field, part);
        }
        builder.multipart(form)
      }
    };

    Ok(builder)
  }
}

impl Transport for ReqwestTransport {
  fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
    Box::pin(async move {
      let response = self.build(request)?.send().await?;
      let status = response.status();
      let headers = response.headers().clone();
      let body = response.bytes().await?;
      Ok(TransportResponse {
        status,
        headers,
        body,
      })
    })
  }
}
