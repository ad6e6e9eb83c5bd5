//! Assetdef Store - Backing Store
//!
//! Persists raw asset-definition documents per contract and tracks their
//! provenance. Two implementations are provided:
//!
//! - [`InMemoryBackingStore`] keeps everything in process memory
//! - [`DiskBackingStore`] persists official documents and override files in
//!   two directories
//!
//! The cache coordinator is the only writer of official documents. Override
//! files change outside that path; such changes are announced on the
//! [`StoreChange`] channel returned by [`BackingStore::subscribe_changes`].

pub mod disk;
pub mod indices;
pub mod memory;

pub use disk::DiskBackingStore;
pub use indices::{
    extract_contracts, official_file_name, schema_status, IndexDelta, OverrideIndex,
    SchemaStatus, OFFICIAL_FILE_EXTENSION,
};
pub use memory::InMemoryBackingStore;

use assetdef_core::{
    Address, CachedDocument, ContentHash, SignatureVerification, StoreError, Timestamp,
};
use tokio::sync::broadcast;

/// Change signal for writes that did not go through the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// The authoritative bytes for a contract may have changed.
    DocumentChanged { address: Address },
    /// The set of override files naming no contract changed.
    BadFilesChanged,
}

/// File names involved in provenance conflicts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictingFiles {
    pub official: Vec<String>,
    pub overrides: Vec<String>,
    pub all: Vec<String>,
}

impl ConflictingFiles {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

/// Key-value store of documents with provenance metadata.
///
/// Methods are synchronous and expected to be short; implementations must be
/// safe to call from many tasks at once. Lookups never fail: a missing or
/// unreadable document is just absent.
pub trait BackingStore: Send + Sync {
    /// Official copy only, ignoring overrides.
    fn read_official(&self, address: &Address) -> Option<CachedDocument>;

    /// Winning override for the contract, if any.
    fn read_override(&self, address: &Address) -> Option<CachedDocument>;

    /// The authoritative document. An override always wins.
    fn read(&self, address: &Address) -> Option<CachedDocument> {
        self.read_override(address)
            .or_else(|| self.read_official(address))
    }

    /// Store an official document.
    fn write(
        &self,
        address: &Address,
        xml: &str,
        last_modified: Option<Timestamp>,
    ) -> Result<(), StoreError>;

    /// Delete the official document. Returns whether one existed.
    fn delete(&self, address: &Address) -> Result<bool, StoreError>;

    /// Last-modified time of the official copy.
    fn last_modified(&self, address: &Address) -> Option<Timestamp> {
        self.read_official(address)
            .and_then(|document| document.last_modified)
    }

    /// Whether the authoritative document came from the official repository.
    fn is_official(&self, address: &Address) -> bool {
        self.read(address)
            .is_some_and(|document| !document.is_override())
    }

    /// Whether the authoritative document declares the current schema.
    fn is_canonicalized(&self, address: &Address) -> bool {
        self.read(address)
            .is_some_and(|document| schema_status(&document.xml) == SchemaStatus::Current)
    }

    /// Whether the authoritative document declares an older schema.
    fn has_outdated(&self, address: &Address) -> bool {
        self.read(address)
            .is_some_and(|document| schema_status(&document.xml) == SchemaStatus::Outdated)
    }

    /// An override shadows an official copy, or several overrides claim the
    /// same contract.
    fn has_conflict(&self, address: &Address) -> bool;

    fn bad_file_names(&self) -> Vec<String>;

    fn conflicting_file_names(&self) -> ConflictingFiles;

    /// Every contract with a document of either provenance.
    fn contracts(&self) -> Vec<Address>;

    fn contracts_from_official_repo(&self) -> Vec<Address>;

    fn signature_verification(&self, content_hash: &ContentHash) -> Option<SignatureVerification>;

    fn record_signature_verification(
        &self,
        content_hash: ContentHash,
        verification: SignatureVerification,
    );

    /// Subscribe to external change signals.
    fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange>;
}

/// Capacity of the store change channel.
pub const STORE_CHANGE_CAPACITY: usize = 128;
