//! In-memory resource fetcher.
//!
//! Serves canned responses keyed by URL. Used by the test suite and by
//! hosts that already hold every resource (offline re-captures).

use std::cell::RefCell;
use std::collections::HashMap;

use super::{FetchError, FetchOptions, FetchedResource, ResourceFetcher};

#[derive(Debug, Clone)]
struct MemoryResponse {
    data: String,
    /// Size reported to the limit check; defaults to the payload length.
    size: u64,
}

/// Map-backed [`ResourceFetcher`] with a request log.
#[derive(Default)]
pub struct MemoryFetcher {
    responses: RefCell<HashMap<String, MemoryResponse>>,
    log: RefCell<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the payload returned for `url`.
    pub fn insert(&self, url: impl Into<String>, data: impl Into<String>) {
        let data = data.into();
        let size = data.len() as u64;
        self.responses
            .borrow_mut()
            .insert(url.into(), MemoryResponse { data, size });
    }

    /// Register a payload with an explicit size used by the limit check,
    /// independent of the payload text length.
    pub fn insert_sized(&self, url: impl Into<String>, data: impl Into<String>, size: u64) {
        self.responses
            .borrow_mut()
            .insert(url.into(), MemoryResponse { data: data.into(), size });
    }

    /// How many times `url` was requested.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.log.borrow().iter().filter(|logged| logged.as_str() == url).count()
    }

    /// Every requested URL, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.log.borrow().clone()
    }
}

#[async_trait::async_trait(?Send)]
impl ResourceFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedResource, FetchError> {
        if url.starts_with("data:") {
            return Ok(FetchedResource {
                data: url.to_string(),
                resource_url: url.to_string(),
                charset: None,
            });
        }
        self.log.borrow_mut().push(url.to_string());
        let response = self
            .responses
            .borrow()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))?;
        if options.max_size_enabled && response.size > options.max_size {
            return Err(FetchError::TooLarge { size: response.size, limit: options.max_size });
        }
        Ok(FetchedResource {
            data: response.data,
            resource_url: url.to_string(),
            charset: None,
        })
    }
}
