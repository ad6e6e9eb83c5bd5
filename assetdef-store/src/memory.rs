//! In-memory backing store.

use crate::indices::{official_file_name, IndexDelta, OverrideIndex};
use crate::{BackingStore, ConflictingFiles, StoreChange, STORE_CHANGE_CAPACITY};
use assetdef_core::{
    Address, CachedDocument, ContentHash, Provenance, SignatureVerification, StoreError, Timestamp,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

/// Documents and indices shared by both store implementations.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) official: BTreeMap<Address, CachedDocument>,
    pub(crate) overrides: OverrideIndex,
}

impl StoreState {
    pub(crate) fn has_conflict(&self, address: &Address) -> bool {
        let overrides = self.overrides.files_for(address).len();
        overrides > 1 || (overrides == 1 && self.official.contains_key(address))
    }

    pub(crate) fn conflicting_files(&self) -> ConflictingFiles {
        let mut official = BTreeSet::new();
        let mut overrides = BTreeSet::new();
        for address in self.overrides.contracts() {
            if !self.has_conflict(&address) {
                continue;
            }
            if self.official.contains_key(&address) {
                official.insert(official_file_name(&address));
            }
            overrides.extend(self.overrides.files_for(&address));
        }
        let all = official.iter().chain(overrides.iter()).cloned().collect();
        ConflictingFiles {
            official: official.into_iter().collect(),
            overrides: overrides.into_iter().collect(),
            all,
        }
    }

    pub(crate) fn contracts(&self) -> Vec<Address> {
        let mut all: BTreeSet<Address> = self.official.keys().copied().collect();
        all.extend(self.overrides.contracts());
        all.into_iter().collect()
    }
}

/// Fan an index delta out as store change events.
pub(crate) fn emit_delta(changes: &broadcast::Sender<StoreChange>, delta: &IndexDelta) -> Vec<StoreChange> {
    let mut emitted = Vec::with_capacity(delta.affected.len() + 1);
    for address in &delta.affected {
        emitted.push(StoreChange::DocumentChanged { address: *address });
    }
    if delta.bad_files_changed {
        emitted.push(StoreChange::BadFilesChanged);
    }
    for change in &emitted {
        // No receivers is fine; nobody is listening yet.
        let _ = changes.send(change.clone());
    }
    if !emitted.is_empty() {
        debug!(changes = emitted.len(), "Store changes emitted");
    }
    emitted
}

/// Backing store held entirely in memory.
///
/// Useful for tests and for hosts that persist documents elsewhere.
#[derive(Debug)]
pub struct InMemoryBackingStore {
    state: RwLock<StoreState>,
    signatures: RwLock<HashMap<ContentHash, SignatureVerification>>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for InMemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackingStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(STORE_CHANGE_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            signatures: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Seed an official document without going through a fetch.
    pub fn with_official(self, address: Address, xml: &str, last_modified: Option<Timestamp>) -> Self {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.official.insert(
                address,
                CachedDocument::new(address, xml, Provenance::Official, last_modified),
            );
        }
        self
    }

    /// Add or replace an override file and announce the change.
    pub fn add_override(&self, file_name: &str, xml: &str) -> Vec<StoreChange> {
        let delta = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.overrides.upsert(file_name, xml, None)
        };
        emit_delta(&self.changes, &delta)
    }

    /// Remove an override file and announce the change.
    pub fn remove_override(&self, file_name: &str) -> Vec<StoreChange> {
        let delta = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.overrides.remove(file_name)
        };
        emit_delta(&self.changes, &delta)
    }

    pub fn override_file_names(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .overrides
            .file_names()
    }
}

impl BackingStore for InMemoryBackingStore {
    fn read_official(&self, address: &Address) -> Option<CachedDocument> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .official
            .get(address)
            .cloned()
    }

    fn read_override(&self, address: &Address) -> Option<CachedDocument> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .overrides
            .document_for(address)
    }

    fn write(
        &self,
        address: &Address,
        xml: &str,
        last_modified: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.official.insert(
            *address,
            CachedDocument::new(*address, xml, Provenance::Official, last_modified),
        );
        Ok(())
    }

    fn delete(&self, address: &Address) -> Result<bool, StoreError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Ok(state.official.remove(address).is_some())
    }

    fn has_conflict(&self, address: &Address) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .has_conflict(address)
    }

    fn bad_file_names(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .overrides
            .bad_file_names()
    }

    fn conflicting_file_names(&self) -> ConflictingFiles {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .conflicting_files()
    }

    fn contracts(&self) -> Vec<Address> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contracts()
    }

    fn contracts_from_official_repo(&self) -> Vec<Address> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .official
            .keys()
            .copied()
            .collect()
    }

    fn signature_verification(&self, content_hash: &ContentHash) -> Option<SignatureVerification> {
        self.signatures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(content_hash)
            .cloned()
    }

    fn record_signature_verification(
        &self,
        content_hash: ContentHash,
        verification: SignatureVerification,
    ) {
        self.signatures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(content_hash, verification);
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
