//! Assetdef Test Utilities
//!
//! Centralized test infrastructure for the assetdef workspace:
//! - Scripted HTTP transport that records every request
//! - Script-URI sources with fixed answers
//! - A parser that counts parses, and a scheduler tests can hold
//! - Document fixtures and proptest generators

pub use assetdef_core::{
    Address, AssetDefConfig, CachedDocument, ContractKey, FetchError, FetchOutcome, NetworkId,
    ParseError, Provenance, ResolveError, Timestamp,
};
pub use assetdef_fetch::{TransportResponse, Url};
pub use assetdef_store::{BackingStore, InMemoryBackingStore, StoreChange};

use assetdef_cache::{DocumentParser, ParseSource, Scheduler};
use assetdef_fetch::{DocumentTransport, RequestHeaders, ScriptUriSource};
use async_trait::async_trait;
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

// ============================================================================
// FIXTURES
// ============================================================================

pub const SAMPLE_ADDRESS: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

/// Deterministic address whose bytes are all `n`.
pub fn address(n: u8) -> Address {
    Address::from_bytes([n; 20])
}

/// Network-less key for [`address`].
pub fn key(n: u8) -> ContractKey {
    ContractKey::new(address(n))
}

/// A well-formed document on the current schema naming `address`.
pub fn token_xml(address: &Address, marker: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ts:token xmlns:ts="http://tokenscript.org/2020/06/tokenscript">
  <ts:contract name="{marker}"><ts:address network="1">{address}</ts:address></ts:contract>
</ts:token>
"#,
        marker = marker,
        address = address.to_checksum()
    )
}

/// A document on an older schema.
pub fn outdated_xml(address: &Address) -> String {
    format!(
        r#"<ts:token xmlns:ts="http://tokenscript.org/2019/10/tokenscript"><ts:address>{}</ts:address></ts:token>"#,
        address.to_checksum()
    )
}

/// A document cut off mid-element.
pub fn truncated_xml(address: &Address) -> String {
    let full = token_xml(address, "truncated");
    let cut = full.find("</ts:contract>").unwrap_or(full.len() / 2);
    format!("{}</ts:contr", &full[..cut])
}

pub fn ok(xml: impl Into<String>) -> TransportResponse {
    TransportResponse::new(200, xml.into().into_bytes())
}

pub fn status(code: u16) -> TransportResponse {
    TransportResponse::new(code, Vec::new())
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// A request seen by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: Url,
    pub if_modified_since: Option<Timestamp>,
    pub headers: Vec<(&'static str, String)>,
}

/// Transport answering from a queue of scripted responses.
///
/// When the queue is empty the fallback response repeats; without one the
/// request fails as a transport error.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Result<TransportResponse, FetchError>>>,
    fallback: Mutex<Option<Result<TransportResponse, FetchError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport answering every request with `response`.
    pub fn always(response: TransportResponse) -> Self {
        let transport = Self::new();
        transport.set_fallback(Ok(response));
        transport
    }

    pub fn push(&self, response: TransportResponse) -> &Self {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(response));
        self
    }

    pub fn push_error(&self, error: FetchError) -> &Self {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(error));
        self
    }

    pub fn set_fallback(&self, response: Result<TransportResponse, FetchError>) {
        *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = Some(response);
    }

    /// Delay every response by `delay` on the tokio clock.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl DocumentTransport for ScriptedTransport {
    async fn get(
        &self,
        url: &Url,
        headers: &RequestHeaders,
    ) -> Result<TransportResponse, FetchError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                url: url.clone(),
                if_modified_since: headers.if_modified_since(),
                headers: headers.pairs(),
            });

        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(response) => response,
            None => self
                .fallback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .unwrap_or_else(|| {
                    Err(FetchError::Transport {
                        url: url.to_string(),
                        reason: "no scripted response".to_string(),
                    })
                }),
        }
    }
}

// ============================================================================
// SCRIPT URI SOURCES
// ============================================================================

/// Every contract declares the same pointer.
#[derive(Debug, Default)]
pub struct StaticScriptUri {
    uri: String,
    calls: AtomicUsize,
}

impl StaticScriptUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptUriSource for StaticScriptUri {
    async fn script_uri(
        &self,
        _address: &Address,
        _network: NetworkId,
    ) -> Result<Option<String>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.uri.clone()))
    }
}

/// Every lookup fails as an RPC error.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingScriptUri;

#[async_trait]
impl ScriptUriSource for FailingScriptUri {
    async fn script_uri(
        &self,
        address: &Address,
        network: NetworkId,
    ) -> Result<Option<String>, ResolveError> {
        Err(ResolveError::ScriptUri {
            contract: address.to_checksum(),
            network: network.as_u64(),
            reason: "rpc unavailable".to_string(),
        })
    }
}

// ============================================================================
// PARSER
// ============================================================================

/// Handler produced by [`RecordingParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub xml: String,
    pub source: ParseSource,
}

/// Parser that counts parses and can reject documents with a marker.
///
/// Clones share the parse counter, so a test can keep one while the
/// coordinator owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingParser {
    parses: Arc<AtomicUsize>,
    reject_marker: Option<String>,
}

impl RecordingParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any document containing `marker`.
    pub fn rejecting(marker: impl Into<String>) -> Self {
        Self {
            parses: Arc::new(AtomicUsize::new(0)),
            reject_marker: Some(marker.into()),
        }
    }

    pub fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }
}

impl DocumentParser for RecordingParser {
    type Handler = ParsedDocument;

    fn parse(&self, xml: &str, source: ParseSource) -> Result<ParsedDocument, ParseError> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.reject_marker {
            if xml.contains(marker.as_str()) {
                return Err(ParseError::Malformed {
                    contract: format!("{:?}", source),
                    reason: format!("contains {}", marker),
                });
            }
        }
        Ok(ParsedDocument {
            xml: xml.to_string(),
            source,
        })
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Scheduler that records delays and, when gated, waits for [`release`].
///
/// [`release`]: ManualScheduler::release
#[derive(Debug, Default)]
pub struct ManualScheduler {
    delays: Mutex<Vec<Duration>>,
    gate: Option<Semaphore>,
    entered: Notify,
}

impl ManualScheduler {
    /// Every sleep returns at once.
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Every sleep blocks until released.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Let one pending or future sleep finish.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until at least `count` sleeps have started.
    pub async fn wait_for_sleeps(&self, count: usize) {
        loop {
            if self.delays.lock().unwrap_or_else(PoisonError::into_inner).len() >= count {
                return;
            }
            self.entered.notified().await;
        }
    }
}

#[async_trait]
impl Scheduler for ManualScheduler {
    async fn sleep(&self, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delay);
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub fn arb_address() -> impl Strategy<Value = Address> {
    prop::array::uniform20(any::<u8>()).prop_map(Address::from_bytes)
}

pub fn arb_network() -> impl Strategy<Value = Option<NetworkId>> {
    prop::option::of((1u64..100_000).prop_map(NetworkId))
}

pub fn arb_contract_key() -> impl Strategy<Value = ContractKey> {
    (arb_address(), arb_network()).prop_map(|(address, network)| ContractKey { address, network })
}

// ============================================================================
// TESTS
// ============================================================================
