//! Request headers sent with every document fetch.

use assetdef_core::{format_http_date, AssetDefConfig, ClientIdentity, Timestamp};

pub const ACCEPT: &str = "Accept";
pub const CLIENT_NAME: &str = "X-Client-Name";
pub const CLIENT_VERSION: &str = "X-Client-Version";
pub const PLATFORM_NAME: &str = "X-Platform-Name";
pub const PLATFORM_VERSION: &str = "X-Platform-Version";
pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";

/// Fixed identification headers plus the optional freshness validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaders {
    accept: String,
    client: ClientIdentity,
    if_modified_since: Option<Timestamp>,
}

impl RequestHeaders {
    pub fn new(accept: impl Into<String>, client: ClientIdentity) -> Self {
        Self {
            accept: accept.into(),
            client,
            if_modified_since: None,
        }
    }

    pub fn from_config(config: &AssetDefConfig) -> Self {
        Self::new(config.repository.accept.clone(), config.client.clone())
    }

    /// Copy of these headers carrying `since` as the validator.
    pub fn conditional(&self, since: Option<Timestamp>) -> Self {
        Self {
            if_modified_since: since,
            ..self.clone()
        }
    }

    pub fn if_modified_since(&self) -> Option<Timestamp> {
        self.if_modified_since
    }

    /// Header name/value pairs in send order.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (ACCEPT, self.accept.clone()),
            (CLIENT_NAME, self.client.client_name.clone()),
            (CLIENT_VERSION, self.client.client_version.clone()),
            (PLATFORM_NAME, self.client.platform_name.clone()),
            (PLATFORM_VERSION, self.client.platform_version.clone()),
        ];
        if let Some(since) = self.if_modified_since {
            pairs.push((IF_MODIFIED_SINCE, format_http_date(since)));
        }
        pairs
    }
}
