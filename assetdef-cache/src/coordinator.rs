//! Cache coordinator.
//!
//! Orchestrates the resolver, fetch engine, and backing store; owns the
//! parsed-handler cache and the change bus.
//!
//! # Ordering
//!
//! For a given contract, committing an update holds that contract's lock
//! while it writes the store, drops the parsed handler, and publishes both
//! topics. The outcome is delivered to the caller after the lock is released.
//! Different contracts never contend. Two overlapping fetches for the same
//! contract both run; the later commit wins.

use crate::handle::FetchHandle;
use crate::handlers::{DocumentParser, HandlerCache, ParseSource};
use crate::retry::{NextStep, RetryMachine, RetryPolicy, Scheduler, TokioScheduler};
use assetdef_core::{
    compute_content_hash, Address, AssetDefConfig, AssetDefResult, CachedDocument, ContractKey,
    FetchOutcome, NetworkId, RetryConfig, SignatureVerification, TokenType,
};
use assetdef_events::{ChangeBus, Subscription, Topic, TopicFilter};
use assetdef_fetch::{
    DocumentTransport, FetchEngine, FetchResponse, FetchedDocument, NoScriptUri, ReqwestTransport,
    RequestHeaders, Resolver, ScriptUriSource, Url,
};
use assetdef_store::{BackingStore, ConflictingFiles, StoreChange};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Source of clipboard text for the opportunistic fetch.
pub trait ClipboardSource: Send + Sync {
    fn text(&self) -> Option<String>;
}

/// Builder for [`AssetDefinitionStore`].
pub struct AssetDefinitionStoreBuilder<P: DocumentParser> {
    store: Arc<dyn BackingStore>,
    parser: P,
    config: AssetDefConfig,
    bus: Option<ChangeBus>,
    transport: Option<Arc<dyn DocumentTransport>>,
    script_uri: Option<Arc<dyn ScriptUriSource>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    base_documents: HashMap<TokenType, String>,
}

impl<P: DocumentParser> AssetDefinitionStoreBuilder<P> {
    pub fn config(mut self, config: AssetDefConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing bus instead of creating one.
    pub fn bus(mut self, bus: ChangeBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn DocumentTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn script_uri(mut self, script_uri: Arc<dyn ScriptUriSource>) -> Self {
        self.script_uri = Some(script_uri);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Register the base template for a token standard.
    pub fn base_document(mut self, token_type: TokenType, xml: impl Into<String>) -> Self {
        self.base_documents.insert(token_type, xml.into());
        self
    }

    /// Validate the configuration and assemble the coordinator.
    ///
    /// Without an explicit transport a reqwest client is built.
    pub fn build(self) -> AssetDefResult<AssetDefinitionStore<P>> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.config.request_timeout())?),
        };
        let engine = FetchEngine::new(
            transport,
            RequestHeaders::from_config(&self.config),
            self.config.retry.truncation_retries,
        );
        let resolver = Resolver::new(
            self.script_uri.unwrap_or_else(|| Arc::new(NoScriptUri)),
            self.config.repository.base_url.clone(),
        );

        info!(
            repository = %self.config.repository.base_url,
            base_documents = self.base_documents.len(),
            "Asset definition store ready"
        );

        let bus_capacity = self.config.bus_capacity;
        Ok(AssetDefinitionStore {
            inner: Arc::new(Inner {
                store: self.store,
                bus: self.bus.unwrap_or_else(|| ChangeBus::new(bus_capacity)),
                resolver,
                engine,
                scheduler: self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler)),
                parser: self.parser,
                retry: self.config.retry,
                handlers: HandlerCache::new(),
                base_handlers: HandlerCache::new(),
                base_documents: self.base_documents,
                key_locks: DashMap::new(),
                networks: DashMap::new(),
                in_flight: DashMap::new(),
                clipboard_enabled: self.config.clipboard_fetch_enabled,
                last_clipboard: Mutex::new(None),
            }),
        })
    }
}

struct Inner<P: DocumentParser> {
    store: Arc<dyn BackingStore>,
    bus: ChangeBus,
    resolver: Resolver,
    engine: FetchEngine,
    scheduler: Arc<dyn Scheduler>,
    parser: P,
    retry: RetryConfig,
    handlers: HandlerCache<Address, P::Handler>,
    base_handlers: HandlerCache<TokenType, P::Handler>,
    base_documents: HashMap<TokenType, String>,
    /// Per-contract commit locks, held only while some caller uses them.
    key_locks: DashMap<Address, Arc<Mutex<()>>>,
    /// Last network each contract was fetched on, for refetches the store asks for.
    networks: DashMap<Address, NetworkId>,
    in_flight: DashMap<Address, usize>,
    clipboard_enabled: bool,
    last_clipboard: Mutex<Option<String>>,
}

/// Decrements the pending count for a contract when dropped.
///
/// The count is raised when the fetch is spawned, so callers see it at once.
struct PendingGuard<'a> {
    in_flight: &'a DashMap<Address, usize>,
    address: Address,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .remove_if_mut(&self.address, |_, count| {
                *count = count.saturating_sub(1);
                *count == 0
            });
    }
}

impl<P: DocumentParser> Inner<P> {
    /// Run `f` under the contract's lock. The lock entry is dropped again once
    /// nobody else holds it.
    fn with_key_lock<T>(&self, address: &Address, f: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(
            self.key_locks
                .entry(*address)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        drop(lock);
        // Clones are only taken under the shard lock, so a count of one here
        // means no other caller can be waiting on this entry.
        self.key_locks
            .remove_if(address, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// The key to refetch a contract with, on its last known network.
    fn known_key(&self, address: Address) -> ContractKey {
        match self.networks.get(&address) {
            Some(network) => ContractKey::on_network(address, *network),
            None => ContractKey::new(address),
        }
    }

    /// Run one fetch to its final outcome, delivering it to `sink`.
    async fn run_fetch(self: Arc<Self>, key: ContractKey, sink: Option<mpsc::Sender<FetchOutcome>>) {
        let _pending = PendingGuard {
            in_flight: &self.in_flight,
            address: key.address,
        };

        let outcome = match &sink {
            Some(tx) => {
                tokio::select! {
                    outcome = self.fetch_with_retries(key) => outcome,
                    _ = tx.closed() => {
                        debug!(contract = %key.address, "Fetch cancelled by caller");
                        return;
                    }
                }
            }
            None => self.fetch_with_retries(key).await,
        };

        if let (Some(outcome), Some(tx)) = (outcome, sink) {
            // The receiver may be gone by now; nothing to do then.
            let _ = tx.send(outcome).await;
        }
    }

    /// Resolve, then attempt under the retry policy. `None` when no URL.
    async fn fetch_with_retries(&self, key: ContractKey) -> Option<FetchOutcome> {
        let Some(resolved) = self.resolver.resolve(&key).await else {
            debug!(contract = %key.address, "No URL to fetch from");
            return None;
        };

        let mut machine = RetryMachine::new(RetryPolicy::for_source(resolved.source, &self.retry));
        loop {
            let outcome = self.attempt(&key, &resolved.url).await;
            match machine.on_outcome(outcome.is_error()) {
                NextStep::Done => {
                    debug!(
                        contract = %key.address,
                        outcome = %outcome,
                        attempts = machine.attempts(),
                        "Fetch finished"
                    );
                    return Some(outcome);
                }
                NextStep::RetryNow => {
                    debug!(contract = %key.address, attempt = machine.attempts(), "Retrying scriptURI fetch");
                }
                NextStep::RetryAfter(delay) => {
                    debug!(
                        contract = %key.address,
                        attempt = machine.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Retrying scriptURI fetch after delay"
                    );
                    self.scheduler.sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&self, key: &ContractKey, url: &Url) -> FetchOutcome {
        // Compare against the official copy; an override must not make an
        // unchanged remote look new.
        let official = self.store.read_official(&key.address);
        let since = official.as_ref().and_then(|document| document.last_modified);
        let cached = official.as_ref().map(|document| document.content_hash);

        match self
            .engine
            .conditional_fetch(url, since, cached.as_ref())
            .await
        {
            FetchResponse::Unmodified => FetchOutcome::Unmodified,
            FetchResponse::Failed(e) => {
                warn!(contract = %key.address, url = %url, error = %e, transient = e.is_transient(), "Fetch attempt failed");
                FetchOutcome::Error
            }
            FetchResponse::Updated(document) => self.commit(key, document),
        }
    }

    /// Write, invalidate, and notify as one step for this contract.
    fn commit(&self, key: &ContractKey, document: FetchedDocument) -> FetchOutcome {
        self.with_key_lock(&key.address, || {
            let stamp = document.last_modified.unwrap_or_else(Utc::now);
            if let Err(e) = self.store.write(&key.address, &document.xml, Some(stamp)) {
                warn!(contract = %key.address, error = %e, "Failed to persist fetched document");
                return FetchOutcome::Error;
            }
            self.handlers.invalidate(&key.address);
            self.bus.publish_both(*key);
            info!(contract = %key.address, bytes = document.xml.len(), "Asset definition updated");
            FetchOutcome::Updated
        })
    }

    fn spawn_fetch(self: &Arc<Self>, key: ContractKey, sink: Option<mpsc::Sender<FetchOutcome>>) -> bool {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                if let Some(network) = key.network {
                    self.networks.insert(key.address, network);
                }
                *self.in_flight.entry(key.address).or_insert(0) += 1;
                runtime.spawn(Arc::clone(self).run_fetch(key, sink));
                true
            }
            Err(e) => {
                error!(contract = %key.address, error = %e, "Fetch requested outside a tokio runtime");
                false
            }
        }
    }

    fn on_store_change(self: &Arc<Self>, change: StoreChange) {
        match change {
            StoreChange::DocumentChanged { address } => {
                let key = self.known_key(address);
                self.with_key_lock(&address, || {
                    self.handlers.invalidate(&address);
                    self.bus.publish_both(key);
                });
                debug!(contract = %address, "External document change");
                self.spawn_fetch(key, None);
            }
            StoreChange::BadFilesChanged => {
                self.bus.publish_bad_files(self.store.bad_file_names());
            }
        }
    }

    /// Treat every held contract as changed after store signals were lost.
    fn resync_after_lag(self: &Arc<Self>) {
        self.handlers.clear();
        let contracts = self.store.contracts();
        info!(contracts = contracts.len(), "Resyncing after missed store changes");
        for address in contracts {
            self.on_store_change(StoreChange::DocumentChanged { address });
        }
        self.bus.publish_bad_files(self.store.bad_file_names());
    }
}

/// Explicitly constructed cache of asset definitions.
///
/// Cloning is cheap and every clone shares the same caches and bus.
pub struct AssetDefinitionStore<P: DocumentParser> {
    inner: Arc<Inner<P>>,
}

impl<P: DocumentParser> Clone for AssetDefinitionStore<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: DocumentParser> std::fmt::Debug for AssetDefinitionStore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetDefinitionStore")
            .field("resolver", &self.inner.resolver)
            .field("handlers", &self.inner.handlers.len())
            .finish_non_exhaustive()
    }
}

impl<P: DocumentParser> AssetDefinitionStore<P> {
    pub fn builder(store: Arc<dyn BackingStore>, parser: P) -> AssetDefinitionStoreBuilder<P> {
        AssetDefinitionStoreBuilder {
            store,
            parser,
            config: AssetDefConfig::default(),
            bus: None,
            transport: None,
            script_uri: None,
            scheduler: None,
            base_documents: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Fetching
    // ------------------------------------------------------------------

    /// Fetch the document for `key`.
    ///
    /// With `use_cache_and_fetch` and a document already held, the handle
    /// yields `Cached` right away, then the network outcome. The network
    /// attempt needs a tokio runtime; outside one only `Cached` can appear.
    pub fn fetch(&self, key: ContractKey, use_cache_and_fetch: bool) -> FetchHandle {
        let (tx, rx) = mpsc::channel(2);
        if use_cache_and_fetch && self.inner.store.read(&key.address).is_some() {
            // Capacity 2 and nothing sent yet, so this cannot fail.
            let _ = tx.try_send(FetchOutcome::Cached);
        }
        // Outside a runtime the sender is dropped and the handle ends early.
        self.inner.spawn_fetch(key, Some(tx));
        FetchHandle::new(rx)
    }

    /// Fetch with nobody waiting; runs to completion regardless.
    ///
    /// Returns whether the fetch was started.
    pub fn fetch_detached(&self, key: ContractKey) -> bool {
        self.inner.spawn_fetch(key, None)
    }

    /// Detached fetch for each key.
    pub fn fetch_all(&self, keys: impl IntoIterator<Item = ContractKey>) {
        for key in keys {
            self.fetch_detached(key);
        }
    }

    /// Per-contract locks currently allocated; zero when nothing is committing.
    pub fn lock_entries(&self) -> usize {
        self.inner.key_locks.len()
    }

    /// Fetches currently running for a contract.
    ///
    /// Concurrent fetches are not coalesced, so this can exceed one.
    pub fn in_flight(&self, address: &Address) -> usize {
        self.inner
            .in_flight
            .get(address)
            .map(|count| *count)
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    /// The authoritative document; an override wins over an official copy.
    pub fn read(&self, address: &Address) -> Option<CachedDocument> {
        self.inner.store.read(address)
    }

    /// Store an official document directly. Returns whether it was stored.
    pub fn write(&self, key: ContractKey, xml: &str) -> bool {
        self.inner.with_key_lock(&key.address, || {
            match self.inner.store.write(&key.address, xml, Some(Utc::now())) {
                Ok(()) => {
                    self.inner.handlers.invalidate(&key.address);
                    self.inner.bus.publish_both(key);
                    true
                }
                Err(e) => {
                    warn!(contract = %key.address, error = %e, "Failed to write document");
                    false
                }
            }
        })
    }

    /// Drop the parsed handler for a contract. Persisted bytes are untouched.
    pub fn invalidate(&self, address: &Address) -> bool {
        self.inner.handlers.invalidate(address)
    }

    /// Forget a contract: drop its handler and delete its official copy.
    pub fn contract_deleted(&self, address: &Address) {
        self.inner.with_key_lock(address, || {
            self.inner.handlers.invalidate(address);
            match self.inner.store.delete(address) {
                Ok(existed) => debug!(contract = %address, existed = existed, "Contract deleted"),
                Err(e) => warn!(contract = %address, error = %e, "Failed to delete official document"),
            }
        });
        self.inner.networks.remove(address);
    }

    pub fn for_each_contract_with_document(&self, mut f: impl FnMut(Address)) {
        for address in self.inner.store.contracts() {
            f(address);
        }
    }

    pub fn contracts_from_official_repo(&self) -> Vec<Address> {
        self.inner.store.contracts_from_official_repo()
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    /// Parsed handler for the current document, parsing on first use.
    pub fn handler(&self, address: &Address) -> Option<Arc<P::Handler>> {
        let document = self.inner.store.read(address)?;
        if let Some(handler) = self.inner.handlers.get(address, &document.content_hash) {
            return Some(handler);
        }
        match self
            .inner
            .parser
            .parse(&document.xml, ParseSource::Contract(*address))
        {
            Ok(handler) => {
                let handler = Arc::new(handler);
                self.inner
                    .handlers
                    .insert(*address, document.content_hash, Arc::clone(&handler));
                Some(handler)
            }
            Err(e) => {
                warn!(contract = %address, error = %e, "Failed to parse document");
                None
            }
        }
    }

    /// Whether a parsed handler is cached for the contract, current or not.
    pub fn has_cached_handler(&self, address: &Address) -> bool {
        self.inner.handlers.contains(address)
    }

    pub fn base_token_script_file(&self, token_type: TokenType) -> Option<&str> {
        self.inner
            .base_documents
            .get(&token_type)
            .map(String::as_str)
    }

    pub fn contains_token_script_file(&self, xml: &str) -> bool {
        self.inner.base_documents.values().any(|base| base == xml)
    }

    /// Parsed handler for a base template.
    pub fn base_handler(&self, token_type: TokenType) -> Option<Arc<P::Handler>> {
        let xml = self.inner.base_documents.get(&token_type)?;
        let hash = compute_content_hash(xml.as_bytes());
        if let Some(handler) = self.inner.base_handlers.get(&token_type, &hash) {
            return Some(handler);
        }
        match self.inner.parser.parse(xml, ParseSource::Base(token_type)) {
            Ok(handler) => {
                let handler = Arc::new(handler);
                self.inner
                    .base_handlers
                    .insert(token_type, hash, Arc::clone(&handler));
                Some(handler)
            }
            Err(e) => {
                warn!(token_type = token_type.as_key(), error = %e, "Failed to parse base document");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Provenance
    // ------------------------------------------------------------------

    pub fn has_conflict(&self, address: &Address) -> bool {
        self.inner.store.has_conflict(address)
    }

    pub fn is_official(&self, address: &Address) -> bool {
        self.inner.store.is_official(address)
    }

    pub fn is_canonicalized(&self, address: &Address) -> bool {
        self.inner.store.is_canonicalized(address)
    }

    pub fn has_outdated(&self, address: &Address) -> bool {
        self.inner.store.has_outdated(address)
    }

    pub fn bad_file_names(&self) -> Vec<String> {
        self.inner.store.bad_file_names()
    }

    pub fn conflicting_file_names(&self) -> ConflictingFiles {
        self.inner.store.conflicting_file_names()
    }

    // ------------------------------------------------------------------
    // Signatures
    // ------------------------------------------------------------------

    pub fn signature_verification(&self, xml: &str) -> Option<SignatureVerification> {
        self.inner
            .store
            .signature_verification(&compute_content_hash(xml.as_bytes()))
    }

    pub fn record_signature_verification(
        &self,
        address: &Address,
        xml: &str,
        verification: SignatureVerification,
    ) {
        debug!(contract = %address, verification = ?verification, "Signature verification recorded");
        self.inner
            .store
            .record_signature_verification(compute_content_hash(xml.as_bytes()), verification);
    }

    /// Ask subscribers to re-verify without touching the document.
    pub fn invalidate_signature_status(&self, key: ContractKey) {
        self.inner.bus.publish(Topic::SignatureChanged, key);
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    pub fn subscribe(&self, filter: TopicFilter, address: Option<Address>) -> Subscription {
        self.inner.bus.subscribe(filter, address)
    }

    pub fn subscribe_bad_files(&self) -> broadcast::Receiver<Vec<String>> {
        self.inner.bus.subscribe_bad_files()
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.inner.bus
    }

    /// React to external store changes until the store or coordinator goes.
    ///
    /// The task holds the coordinator weakly. Returns `None` outside a tokio
    /// runtime.
    pub fn listen_for_store_changes(&self) -> Option<JoinHandle<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "Store listener requested outside a tokio runtime");
                return None;
            }
        };
        let mut changes = self.inner.store.subscribe_changes();
        let weak: Weak<Inner<P>> = Arc::downgrade(&self.inner);

        Some(runtime.spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Store change listener lagged");
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        // The resync reads current store state, so anything
                        // still queued is covered by it.
                        loop {
                            match changes.try_recv() {
                                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                                Err(_) => break,
                            }
                        }
                        inner.resync_after_lag();
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_store_change(change);
            }
            debug!("Store change listener stopped");
        }))
    }

    // ------------------------------------------------------------------
    // Clipboard
    // ------------------------------------------------------------------

    /// Fetch the contract in clipboard text, if it is a new valid address.
    ///
    /// Returns whether a fetch was started. Its outcome is not reported.
    pub fn fetch_for_clipboard_text(&self, contents: &str) -> bool {
        if !self.inner.clipboard_enabled {
            return false;
        }
        let contents = contents.trim();
        let mut last = self
            .inner
            .last_clipboard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.as_deref() == Some(contents) {
            return false;
        }
        let Ok(address) = Address::parse(contents) else {
            return false;
        };
        *last = Some(contents.to_string());
        drop(last);

        debug!(contract = %address, "Fetching contract found in clipboard");
        self.fetch_detached(ContractKey::new(address))
    }

    /// Call when the host application becomes active.
    pub fn on_became_active(&self, clipboard: &dyn ClipboardSource) -> bool {
        match clipboard.text() {
            Some(text) => self.fetch_for_clipboard_text(&text),
            None => false,
        }
    }
}
