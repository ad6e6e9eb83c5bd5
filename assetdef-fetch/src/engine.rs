//! Conditional fetch engine.
//!
//! One call is one logical attempt as far as the coordinator's retry policy is
//! concerned. A truncated body is retried inside that attempt, without the
//! freshness validator, before the attempt is reported as failed.

use crate::headers::RequestHeaders;
use crate::transport::DocumentTransport;
use assetdef_core::{compute_content_hash, parse_http_date, ContentHash, FetchError, Timestamp};
use reqwest::Url;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Terminator a complete document must end with once trimmed.
pub const DOCUMENT_TERMINATOR: char = '>';

/// Whether a body looks cut off mid-download.
pub fn looks_truncated(xml: &str) -> bool {
    !xml.trim().ends_with(DOCUMENT_TERMINATOR)
}

/// Freshly downloaded document bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub xml: String,
    /// From `Last-Modified`, when present and parseable.
    pub last_modified: Option<Timestamp>,
}

/// Result of one conditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResponse {
    Unmodified,
    Updated(FetchedDocument),
    Failed(FetchError),
}

impl FetchResponse {
    pub fn is_failed(&self) -> bool {
        matches!(self, FetchResponse::Failed(_))
    }
}

/// Issues conditional requests and interprets their responses.
#[derive(Clone)]
pub struct FetchEngine {
    transport: Arc<dyn DocumentTransport>,
    headers: RequestHeaders,
    truncation_retries: u32,
}

impl fmt::Debug for FetchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchEngine")
            .field("headers", &self.headers)
            .field("truncation_retries", &self.truncation_retries)
            .finish_non_exhaustive()
    }
}

impl FetchEngine {
    pub fn new(
        transport: Arc<dyn DocumentTransport>,
        headers: RequestHeaders,
        truncation_retries: u32,
    ) -> Self {
        Self {
            transport,
            headers,
            truncation_retries,
        }
    }

    /// Fetch `url`, sending `if_modified_since` when known.
    ///
    /// `cached` is the hash of the copy already held; a 200 with identical
    /// bytes is reported as unmodified.
    pub async fn conditional_fetch(
        &self,
        url: &Url,
        if_modified_since: Option<Timestamp>,
        cached: Option<&ContentHash>,
    ) -> FetchResponse {
        let mut since = if_modified_since;
        let mut requests: u32 = 0;

        loop {
            requests += 1;
            let headers = self.headers.conditional(since);
            let response = match self.transport.get(url, &headers).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, error = %e, "Fetch failed");
                    return FetchResponse::Failed(e);
                }
            };

            match response.status {
                304 => {
                    debug!(url = %url, "Not modified");
                    return FetchResponse::Unmodified;
                }
                200 => {}
                status => {
                    debug!(url = %url, status = status, "Fetch rejected");
                    return FetchResponse::Failed(FetchError::Status {
                        url: url.to_string(),
                        status,
                    });
                }
            }

            let xml = match String::from_utf8(response.body) {
                Ok(xml) if !xml.trim().is_empty() => xml,
                Ok(_) => {
                    warn!(url = %url, "Empty body");
                    return FetchResponse::Failed(FetchError::EmptyBody {
                        url: url.to_string(),
                    });
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Body is not valid UTF-8");
                    return FetchResponse::Failed(FetchError::InvalidBody {
                        url: url.to_string(),
                        reason: e.to_string(),
                    });
                }
            };

            if cached == Some(&compute_content_hash(xml.as_bytes())) {
                debug!(url = %url, "Body identical to cached copy");
                return FetchResponse::Unmodified;
            }

            if looks_truncated(&xml) {
                if requests <= self.truncation_retries {
                    warn!(url = %url, attempt = requests, "Truncated body; retrying unconditionally");
                    since = None;
                    continue;
                }
                warn!(url = %url, attempts = requests, "Truncated body; giving up");
                return FetchResponse::Failed(FetchError::Truncated {
                    url: url.to_string(),
                    attempts: requests,
                });
            }

            let last_modified = response.last_modified.as_deref().and_then(parse_http_date);
            return FetchResponse::Updated(FetchedDocument { xml, last_modified });
        }
    }
}
