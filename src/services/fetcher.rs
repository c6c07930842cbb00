use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Upstream playlist could not be retrieved
#[derive(Debug, Error)]
pub enum FetchError {
    /// Non-2xx HTTP status
    #[error("HTTP {0}")]
    Status(u16),
    /// Connection, TLS, timeout or body read failure
    #[error("network error: {0}")]
    Network(String),
    /// Body exceeds the configured size limit
    #[error("playlist too large: {size_mb:.1}MB (limit {limit_mb}MB)")]
    TooLarge { size_mb: f64, limit_mb: usize },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

/// Retrieves raw playlist text from a source address
#[async_trait]
pub trait PlaylistFetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<String, FetchError>;
}

/// Fetches playlists over HTTP with retry and size limits
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    max_m3u_size_mb: usize,
}

impl HttpFetcher {
    pub fn new(
        user_agent: &str,
        timeout_ms: u64,
        max_retries: u32,
        max_m3u_size_mb: usize,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_millis(timeout_ms))
            .gzip(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            max_retries,
            max_m3u_size_mb,
        })
    }

    fn max_bytes(&self) -> u64 {
        (self.max_m3u_size_mb as u64) * 1024 * 1024
    }

    fn too_large(&self, len: u64) -> FetchError {
        FetchError::TooLarge {
            size_mb: len as f64 / 1024f64 / 1024f64,
            limit_mb: self.max_m3u_size_mb,
        }
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let mut attempt = 0u32;

        loop {
            let backoff_ms = (1u64 << attempt.min(16)).saturating_mul(500).min(10_000);

            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        if let Some(len) = resp.content_length() {
                            if len > self.max_bytes() {
                                return Err(self.too_large(len));
                            }
                        }
                        return Ok(resp);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS && attempt < self.max_retries {
                        tracing::warn!(fetch_retry = attempt + 1, reason = "429", backoff_ms);
                        sleep(Duration::from_millis(backoff_ms)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::Status(status.as_u16()));
                }
                Err(err) => {
                    if attempt < self.max_retries {
                        tracing::warn!(fetch_retry = attempt + 1, reason = "network", backoff_ms, error = %err);
                        sleep(Duration::from_millis(backoff_ms)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

#[async_trait]
impl PlaylistFetcher for HttpFetcher {
    async fn fetch(&self, source: &str) -> Result<String, FetchError> {
        let mut response = self.fetch_with_retry(source).await?;

        // Content-Length may be absent or lie; enforce the limit while streaming
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_bytes() {
                return Err(self.too_large(body.len() as u64));
            }
        }

        tracing::debug!(
            source,
            size_mb = body.len() as f64 / 1024.0 / 1024.0,
            "Playlist downloaded"
        );

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_messages() {
        assert_eq!(FetchError::Status(404).to_string(), "HTTP 404");
        assert_eq!(
            FetchError::TooLarge {
                size_mb: 75.31,
                limit_mb: 50
            }
            .to_string(),
            "playlist too large: 75.3MB (limit 50MB)"
        );
    }

    #[tokio::test]
    async fn test_unreachable_source_is_network_error() {
        let fetcher = HttpFetcher::new("test-agent", 2_000, 0, 1).unwrap();
        // Port 9 (discard) on loopback is closed in test environments
        let result = fetcher.fetch("http://127.0.0.1:9/list.m3u").await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }

    #[tokio::test]
    async fn test_invalid_address_is_network_error() {
        let fetcher = HttpFetcher::new("test-agent", 2_000, 0, 1).unwrap();
        let result = fetcher.fetch("not a url").await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }
}
