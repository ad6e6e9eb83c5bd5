//! Override file indices.
//!
//! Override files are named by the user, not by contract, so the contracts a
//! file covers come from the `<ts:address>` elements inside it. The index keeps
//! both directions (file → contracts, contract → files) so conflicts and bad
//! files fall out of simple lookups.

use assetdef_core::{
    compute_content_hash, Address, CachedDocument, ContentHash, Provenance, Timestamp,
    TOKENSCRIPT_SCHEMA_VERSION,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

/// File extension used for official documents on disk.
pub const OFFICIAL_FILE_EXTENSION: &str = "tsml";

static CONTRACT_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<(?:ts:)?address\b[^>]*>\s*(0x[0-9a-f]{40})\s*</(?:ts:)?address>")
        .expect("contract address pattern is valid")
});

static SCHEMA_NAMESPACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"http://tokenscript\.org/(\d{4}/\d{2})/tokenscript")
        .expect("schema namespace pattern is valid")
});

/// File name an official document for `address` is stored under.
pub fn official_file_name(address: &Address) -> String {
    format!("{}.{}", address.to_checksum(), OFFICIAL_FILE_EXTENSION)
}

/// Contracts declared by a document, deduplicated and sorted.
pub fn extract_contracts(xml: &str) -> Vec<Address> {
    let found: BTreeSet<Address> = CONTRACT_ADDRESS
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| Address::parse(&m.as_str().to_ascii_lowercase()).ok())
        .collect();
    found.into_iter().collect()
}

/// Schema generation a document declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Declares the schema this client understands.
    Current,
    /// Declares an older schema.
    Outdated,
    /// Declares a newer schema, or none at all.
    Unknown,
}

/// Classify a document by the TokenScript namespace it declares.
pub fn schema_status(xml: &str) -> SchemaStatus {
    let Some(version) = SCHEMA_NAMESPACE
        .captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
    else {
        return SchemaStatus::Unknown;
    };

    // YYYY/MM compares correctly as a string.
    match version.cmp(TOKENSCRIPT_SCHEMA_VERSION) {
        std::cmp::Ordering::Equal => SchemaStatus::Current,
        std::cmp::Ordering::Less => SchemaStatus::Outdated,
        std::cmp::Ordering::Greater => SchemaStatus::Unknown,
    }
}

#[derive(Debug, Clone)]
struct OverrideFile {
    xml: String,
    content_hash: ContentHash,
    contracts: Vec<Address>,
    last_modified: Option<Timestamp>,
}

/// What an index mutation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDelta {
    /// Contracts whose authoritative override bytes may have changed.
    pub affected: BTreeSet<Address>,
    /// Whether the set of bad file names changed.
    pub bad_files_changed: bool,
}

impl IndexDelta {
    pub fn is_empty(&self) -> bool {
        self.affected.is_empty() && !self.bad_files_changed
    }
}

/// Bidirectional index over override files.
#[derive(Debug, Clone, Default)]
pub struct OverrideIndex {
    files: BTreeMap<String, OverrideFile>,
    by_contract: BTreeMap<Address, BTreeSet<String>>,
}

impl OverrideIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an override file.
    ///
    /// Re-inserting identical bytes is a no-op and yields an empty delta.
    pub fn upsert(
        &mut self,
        file_name: &str,
        xml: impl Into<String>,
        last_modified: Option<Timestamp>,
    ) -> IndexDelta {
        let xml = xml.into();
        let content_hash = compute_content_hash(xml.as_bytes());
        if self
            .files
            .get(file_name)
            .is_some_and(|existing| existing.content_hash == content_hash)
        {
            return IndexDelta::default();
        }

        let bad_before = self.bad_file_names();
        let mut affected = self.unlink(file_name);

        let contracts = extract_contracts(&xml);
        for contract in &contracts {
            self.by_contract
                .entry(*contract)
                .or_default()
                .insert(file_name.to_string());
            affected.insert(*contract);
        }
        self.files.insert(
            file_name.to_string(),
            OverrideFile {
                xml,
                content_hash,
                contracts,
                last_modified,
            },
        );

        IndexDelta {
            affected,
            bad_files_changed: bad_before != self.bad_file_names(),
        }
    }

    /// Remove an override file.
    pub fn remove(&mut self, file_name: &str) -> IndexDelta {
        if !self.files.contains_key(file_name) {
            return IndexDelta::default();
        }
        let bad_before = self.bad_file_names();
        let affected = self.unlink(file_name);
        self.files.remove(file_name);
        IndexDelta {
            affected,
            bad_files_changed: bad_before != self.bad_file_names(),
        }
    }

    fn unlink(&mut self, file_name: &str) -> BTreeSet<Address> {
        let mut affected = BTreeSet::new();
        if let Some(old) = self.files.get(file_name) {
            for contract in &old.contracts {
                affected.insert(*contract);
                if let Some(names) = self.by_contract.get_mut(contract) {
                    names.remove(file_name);
                    if names.is_empty() {
                        self.by_contract.remove(contract);
                    }
                }
            }
        }
        affected
    }

    /// The override that wins for `address`: the first file by name.
    pub fn document_for(&self, address: &Address) -> Option<CachedDocument> {
        let name = self.by_contract.get(address)?.iter().next()?;
        let file = self.files.get(name)?;
        Some(CachedDocument::new(
            *address,
            file.xml.clone(),
            Provenance::Override,
            file.last_modified,
        ))
    }

    /// Override files that declare `address`, sorted by name.
    pub fn files_for(&self, address: &Address) -> Vec<String> {
        self.by_contract
            .get(address)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains_contract(&self, address: &Address) -> bool {
        self.by_contract.contains_key(address)
    }

    /// Contracts covered by at least one override.
    pub fn contracts(&self) -> Vec<Address> {
        self.by_contract.keys().copied().collect()
    }

    /// Files that declare no contract at all.
    pub fn bad_file_names(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|(_, file)| file.contracts.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn content_hash(&self, file_name: &str) -> Option<ContentHash> {
        self.files.get(file_name).map(|file| file.content_hash)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
