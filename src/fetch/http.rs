//! HTTP resource retrieval.
//!
//! Streams the response body with the size limit enforced twice: once
//! against the declared `Content-Length` before any byte is read, and
//! again cumulatively while chunks arrive, so a lying server cannot blow
//! past the cap.

use base64::Engine;
use futures_util::StreamExt;
use reqwest::Client;

use super::{FetchError, FetchOptions, FetchedResource, ResourceFetcher};
use crate::utils::constants::CHROME_USER_AGENT;

/// reqwest-backed [`ResourceFetcher`].
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn download(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<(Vec<u8>, String, String, Option<String>), FetchError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", CHROME_USER_AGENT)
            .header("Accept", "*/*")
            .send()
            .await
            .map_err(|error| FetchError::Request(error.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let resource_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let charset = content_type
            .split(';')
            .find_map(|part| part.trim().strip_prefix("charset="))
            .map(|charset| charset.trim().to_lowercase());
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("application/octet-stream")
            .trim()
            .to_string();

        // First line of defense: the declared length.
        let expected = response.content_length().unwrap_or(0);
        if options.max_size_enabled && expected > options.max_size {
            return Err(FetchError::TooLarge { size: expected, limit: options.max_size });
        }

        let mut buffer = Vec::with_capacity(expected as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| FetchError::Request(error.to_string()))?;
            let total = buffer.len() as u64 + chunk.len() as u64;
            // Second line of defense: the bytes actually received.
            if options.max_size_enabled && total > options.max_size {
                return Err(FetchError::TooLarge { size: total, limit: options.max_size });
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok((buffer, resource_url, mime, charset))
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait(?Send)]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedResource, FetchError> {
        // Inline payloads need no transport.
        if url.starts_with("data:") {
            return Ok(FetchedResource {
                data: url.to_string(),
                resource_url: url.to_string(),
                charset: None,
            });
        }

        let (buffer, resource_url, mime, charset) = self.download(url, options).await?;
        let data = if options.as_data_uri {
            encode_data_uri(&mime, &buffer)
        } else {
            String::from_utf8_lossy(&buffer).into_owned()
        };
        log::debug!("fetched {url} ({} bytes)", buffer.len());
        Ok(FetchedResource { data, resource_url, charset })
    }
}

fn encode_data_uri(mime: &str, payload: &[u8]) -> String {
    let encoded_len = base64::encoded_len(payload.len(), false).unwrap_or(0);
    let mut data = String::with_capacity(encoded_len + mime.len() + 16);
    data.push_str("data:");
    data.push_str(mime);
    data.push_str(";base64,");
    base64::engine::general_purpose::STANDARD.encode_string(payload, &mut data);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_encoding() {
        assert_eq!(encode_data_uri("image/png", b"abc"), "data:image/png;base64,YWJj");
    }
}
