//! The network capability consumed by the pipeline.
//!
//! Everything that touches the network goes through [`ResourceFetcher`]:
//! page loads, stylesheet retrieval, and the batched resource downloads.
//! [`HttpFetcher`] is the reqwest-backed production implementation;
//! [`MemoryFetcher`] serves canned responses for tests and offline use.

pub mod http;
pub mod memory;

pub use http::HttpFetcher;
pub use memory::MemoryFetcher;

use async_trait::async_trait;
use thiserror::Error;

/// Per-request retrieval parameters.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Encode the payload as a `data:` URI instead of returning text.
    pub as_data_uri: bool,
    /// Maximum payload size in bytes, enforced only when
    /// `max_size_enabled` is set.
    pub max_size: u64,
    pub max_size_enabled: bool,
    /// Preferred charset for text payloads, when known.
    pub charset: Option<String>,
}

/// A successfully retrieved resource.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    /// Text content, or a `data:` URI when `as_data_uri` was requested.
    pub data: String,
    /// Final URL after redirects.
    pub resource_url: String,
    /// Charset reported by the transport, when any.
    pub charset: Option<String>,
}

/// Retrieval failure for a single resource. `TooLarge` is distinct so
/// size-limit rejections can be recognized by consumers.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("resource exceeds the configured size limit ({size} > {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },
    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("no response registered for {0}")]
    NotFound(String),
    #[error("resource batch completed without resolving this request")]
    Cancelled,
}

/// Abstract fetch primitive. Implementations decide transport, caching and
/// size enforcement; the pipeline only sees data or a typed failure.
#[async_trait(?Send)]
pub trait ResourceFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedResource, FetchError>;
}
