//! Resilient data access for HTTP APIs.
//!
//! [`ApiClient`] executes calls with response caching, in-flight
//! deduplication, retry with optional exponential backoff, and per-attempt
//! timeouts. The [`query`] module layers reactive bindings on top of it:
//! single fetch, mutation, paginated and infinite listings, polling and
//! debounced search.

pub mod cache;
pub mod client;
pub mod config;
pub mod logging;
pub mod query;

pub use client::{ApiClient, ApiError, ApiResponse, ErrorKind, RequestConfig};
pub use config::Config;
