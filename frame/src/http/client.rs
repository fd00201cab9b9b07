//! Outbound HTTP requests with a timeout and a response size bound.
//!
//! Retries are deliberately left to callers: a check may retry freely while a
//! download must never resume onto a partial file.

use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use crate::errors::FrameError;
use crate::utils::hex_encode;

/// Per-request limits
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Upper bound for the whole request, body included
    pub timeout: Duration,

    /// Upper bound for the response body
    pub max_bytes: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Result of streaming a response into a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub bytes: u64,
    pub sha256: String,
}

/// HTTP client for outbound requests
#[derive(Debug, Clone)]
pub struct WebClient {
    client: Client,
}

impl WebClient {
    /// Create a new client
    pub fn new() -> Result<Self, FrameError> {
        let client = Client::builder()
            .user_agent(format!("aide-frame/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client })
    }

    async fn send(&self, url: &str, options: &FetchOptions) -> Result<Response, FrameError> {
        debug!("HTTP: GET {}", url);

        let response = self
            .client
            .get(url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            error!("HTTP GET {} failed: {}", url, status);
            return Err(FrameError::Network(format!("GET {} returned {}", url, status)));
        }

        if let Some(length) = response.content_length() {
            if length > options.max_bytes {
                return Err(FrameError::SizeExceeded {
                    limit: options.max_bytes,
                });
            }
        }

        Ok(response)
    }

    /// Fetch a response body into memory
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> Result<Vec<u8>, FrameError> {
        let response = self.send(url, &options).await?;
        let mut stream = response.bytes_stream();
        let mut body = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify)?;
            if (body.len() + chunk.len()) as u64 > options.max_bytes {
                return Err(FrameError::SizeExceeded {
                    limit: options.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!("  -> {} bytes", body.len());
        Ok(body)
    }

    /// Fetch and parse JSON
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> Result<T, FrameError> {
        let body = self.fetch(url, options).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetch a UTF-8 text body
    pub async fn fetch_text(&self, url: &str, options: FetchOptions) -> Result<String, FrameError> {
        let body = self.fetch(url, options).await?;
        String::from_utf8(body)
            .map_err(|e| FrameError::Network(format!("non UTF-8 body from {}: {}", url, e)))
    }

    /// Stream a response body into `file`, hashing it on the way
    pub async fn download_to(
        &self,
        url: &str,
        file: &mut tokio::fs::File,
        options: FetchOptions,
    ) -> Result<DownloadSummary, FrameError> {
        let response = self.send(url, &options).await?;
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify)?;
            written += chunk.len() as u64;
            if written > options.max_bytes {
                return Err(FrameError::SizeExceeded {
                    limit: options.max_bytes,
                });
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok(DownloadSummary {
            bytes: written,
            sha256: hex_encode(hasher.finalize()),
        })
    }
}

fn classify(err: reqwest::Error) -> FrameError {
    if err.is_timeout() {
        FrameError::Timeout(err.to_string())
    } else {
        FrameError::Network(err.to_string())
    }
}
