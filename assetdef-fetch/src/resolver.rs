//! URL resolution: on-chain script pointer first, canonical repository second.

use assetdef_core::{Address, ContractKey, NetworkId, ResolveError};
use async_trait::async_trait;
use reqwest::Url;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads a contract's `scriptURI()` from chain.
///
/// `Ok(None)` means the contract declares no pointer. `Err` means the lookup
/// itself failed and says nothing about the contract.
#[async_trait]
pub trait ScriptUriSource: Send + Sync {
    async fn script_uri(
        &self,
        address: &Address,
        network: NetworkId,
    ) -> Result<Option<String>, ResolveError>;
}

/// Source for hosts without chain access: no contract has a pointer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScriptUri;

#[async_trait]
impl ScriptUriSource for NoScriptUri {
    async fn script_uri(
        &self,
        _address: &Address,
        _network: NetworkId,
    ) -> Result<Option<String>, ResolveError> {
        Ok(None)
    }
}

/// Where a resolved URL came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlSource {
    ScriptUri,
    Repository,
}

impl UrlSource {
    pub fn is_script_uri(&self) -> bool {
        matches!(self, UrlSource::ScriptUri)
    }
}

/// Why the resolver fell back to the repository.
///
/// Diagnostic only; callers see the same repository URL in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// No network given, so no chain to ask.
    NoNetwork,
    /// The contract declares no script pointer.
    NoScriptUri,
    /// The chain lookup failed.
    LookupFailed(String),
    /// The declared pointer is not a usable URL.
    InvalidScriptUri(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NoNetwork => write!(f, "no network"),
            FallbackReason::NoScriptUri => write!(f, "no scriptURI declared"),
            FallbackReason::LookupFailed(reason) => write!(f, "scriptURI lookup failed: {}", reason),
            FallbackReason::InvalidScriptUri(reason) => write!(f, "invalid scriptURI: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub url: Url,
    pub source: UrlSource,
    pub fallback: Option<FallbackReason>,
}

/// Resolves the URL to fetch a contract's document from.
#[derive(Clone)]
pub struct Resolver {
    script_uri: Arc<dyn ScriptUriSource>,
    repository_base: String,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("repository_base", &self.repository_base)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(script_uri: Arc<dyn ScriptUriSource>, repository_base: impl Into<String>) -> Self {
        Self {
            script_uri,
            repository_base: repository_base.into(),
        }
    }

    /// Repository-only resolver.
    pub fn repository_only(repository_base: impl Into<String>) -> Self {
        Self::new(Arc::new(NoScriptUri), repository_base)
    }

    /// Canonical repository URL: `<base>/<EIP-55 address>`.
    pub fn repository_url(&self, address: &Address) -> Result<Url, ResolveError> {
        let raw = format!(
            "{}/{}",
            self.repository_base.trim_end_matches('/'),
            address.to_checksum()
        );
        Url::parse(&raw).map_err(|e| ResolveError::InvalidRepository {
            base: self.repository_base.clone(),
            reason: e.to_string(),
        })
    }

    /// Resolve a key. Script pointer failures never surface; they fall back.
    ///
    /// Returns `None` only if the repository URL cannot be built.
    pub async fn resolve(&self, key: &ContractKey) -> Option<ResolvedUrl> {
        let fallback = match key.network {
            None => FallbackReason::NoNetwork,
            Some(network) => match self.script_uri.script_uri(&key.address, network).await {
                Ok(Some(raw)) => match Url::parse(raw.trim()) {
                    Ok(url) => {
                        debug!(contract = %key.address, url = %url, "Resolved scriptURI");
                        return Some(ResolvedUrl {
                            url,
                            source: UrlSource::ScriptUri,
                            fallback: None,
                        });
                    }
                    Err(e) => FallbackReason::InvalidScriptUri(format!("{}: {}", raw, e)),
                },
                Ok(None) => FallbackReason::NoScriptUri,
                Err(e) => FallbackReason::LookupFailed(e.to_string()),
            },
        };

        match &fallback {
            FallbackReason::LookupFailed(_) | FallbackReason::InvalidScriptUri(_) => {
                warn!(contract = %key.address, reason = %fallback, "Falling back to repository URL");
            }
            FallbackReason::NoNetwork | FallbackReason::NoScriptUri => {
                debug!(contract = %key.address, reason = %fallback, "Using repository URL");
            }
        }

        match self.repository_url(&key.address) {
            Ok(url) => Some(ResolvedUrl {
                url,
                source: UrlSource::Repository,
                fallback: Some(fallback),
            }),
            Err(e) => {
                warn!(contract = %key.address, error = %e, "No URL resolvable");
                None
            }
        }
    }
}
