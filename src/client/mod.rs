//! Request executor and the types flowing through it.

mod dedup;
pub mod error;
mod executor;
pub mod metrics;
mod request;
mod response;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use dedup::PendingRegistry;
pub use error::{ApiError, ErrorKind, TransportError};
pub use executor::{
  ApiClient, ApiClientBuilder, ClientDefaults, Download, DEFAULT_SWEEP_INTERVAL, REQUEST_ID_HEADER,
};
pub use request::{
  CacheConfig, RequestBody, RequestConfig, RetryConfig, UploadFile, DEFAULT_ATTEMPTS,
  DEFAULT_CACHE_TTL, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT,
};
pub use response::{parse_body, ApiResponse, Payload, ResponseMetadata, ResponseSource};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
