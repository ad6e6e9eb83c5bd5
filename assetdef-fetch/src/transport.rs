//! HTTP transport abstraction and the reqwest implementation.

use crate::headers::RequestHeaders;
use assetdef_core::FetchError;
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::debug;

/// Raw response as seen by the fetch engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Raw `Last-Modified` header value, if the server sent one.
    pub last_modified: Option<String>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            last_modified: None,
        }
    }

    pub fn with_last_modified(mut self, value: impl Into<String>) -> Self {
        self.last_modified = Some(value.into());
        self
    }
}

/// Performs a single GET. No retries, no status interpretation.
#[async_trait]
pub trait DocumentTransport: Send + Sync {
    async fn get(&self, url: &Url, headers: &RequestHeaders) -> Result<TransportResponse, FetchError>;
}

/// Transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentTransport for ReqwestTransport {
    async fn get(&self, url: &Url, headers: &RequestHeaders) -> Result<TransportResponse, FetchError> {
        let mut request = self.client.get(url.clone());
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| request_error(url, e))?;
        let status = response.status().as_u16();
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| request_error(url, e))?
            .to_vec();

        debug!(url = %url, status = status, bytes = body.len(), "HTTP response");
        Ok(TransportResponse {
            status,
            body,
            last_modified,
        })
    }
}

fn request_error(url: &Url, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}
