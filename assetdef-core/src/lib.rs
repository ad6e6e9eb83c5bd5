//! Assetdef Core - Data Types
//!
//! Pure data structures shared by every assetdef crate: contract keys,
//! cached documents, fetch outcomes, errors, and configuration.
//! This crate contains no I/O beyond reading a config file.

pub mod address;
pub mod config;
pub mod error;
pub mod http_date;

pub use address::{Address, ADDRESS_LEN};
pub use config::{AssetDefConfig, ClientIdentity, RepositoryConfig, RetryConfig};
pub use error::{
    AddressError, AssetDefError, AssetDefResult, ConfigError, FetchError, ParseError,
    ResolveError, StoreError,
};
pub use http_date::{format_http_date, parse_http_date};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

// ============================================================================
// SCHEMA CONSTANTS
// ============================================================================

/// TokenScript schema version currently understood.
pub const TOKENSCRIPT_SCHEMA_VERSION: &str = "2020/06";

/// XML namespace declared by documents on the current schema.
pub const TOKENSCRIPT_NAMESPACE: &str = "http://tokenscript.org/2020/06/tokenscript";

/// Namespace prefix shared by every schema version.
pub const TOKENSCRIPT_NAMESPACE_PREFIX: &str = "http://tokenscript.org/";

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// SHA-256 content hash used for change detection.
pub type ContentHash = [u8; 32];

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Numeric chain identifier (EIP-155 chain id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkId(pub u64);

impl NetworkId {
    pub const MAINNET: NetworkId = NetworkId(1);

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Primary cache key: a contract address plus an optional network.
///
/// Identity is the address alone. There is one authoritative document per
/// contract; the network only tells the resolver where to look for an
/// on-chain script pointer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContractKey {
    pub address: Address,
    pub network: Option<NetworkId>,
}

impl ContractKey {
    /// Key without a network; resolution goes straight to the repository.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            network: None,
        }
    }

    /// Key with a network; resolution tries the on-chain pointer first.
    pub fn on_network(address: Address, network: NetworkId) -> Self {
        Self {
            address,
            network: Some(network),
        }
    }

    /// Parse an address string into a network-less key.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        Address::parse(input).map(Self::new)
    }

    /// Whether two keys refer to the same contract.
    pub fn same_contract(&self, other: &ContractKey) -> bool {
        self.address == other.address
    }
}

impl PartialEq for ContractKey {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for ContractKey {}

impl Hash for ContractKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl From<Address> for ContractKey {
    fn from(address: Address) -> Self {
        Self::new(address)
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.network {
            Some(network) => write!(f, "{}@{}", self.address, network),
            None => write!(f, "{}", self.address),
        }
    }
}

// ============================================================================
// DOCUMENTS
// ============================================================================

/// Where a cached document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// Downloaded from the canonical repository or a script pointer.
    Official,
    /// Supplied locally; always wins over an official copy.
    Override,
}

/// Raw definition text plus its provenance metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDocument {
    pub address: Address,
    pub xml: String,
    pub provenance: Provenance,
    /// Local overrides may have no meaningful timestamp.
    pub last_modified: Option<Timestamp>,
    pub content_hash: ContentHash,
}

impl CachedDocument {
    pub fn new(
        address: Address,
        xml: impl Into<String>,
        provenance: Provenance,
        last_modified: Option<Timestamp>,
    ) -> Self {
        let xml = xml.into();
        let content_hash = compute_content_hash(xml.as_bytes());
        Self {
            address,
            xml,
            provenance,
            last_modified,
            content_hash,
        }
    }

    pub fn is_override(&self) -> bool {
        self.provenance == Provenance::Override
    }

    /// Hex form of the content hash, handy for logs.
    pub fn content_hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }
}

// ============================================================================
// FETCH OUTCOME
// ============================================================================

/// Result of a fetch, as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchOutcome {
    /// Served from the local cache without a network round trip.
    Cached,
    /// The network returned new content, now cached.
    Updated,
    /// The network confirmed no change.
    Unmodified,
    /// Network or content failure.
    Error,
}

impl FetchOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, FetchOutcome::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchOutcome::Cached => "cached",
            FetchOutcome::Updated => "updated",
            FetchOutcome::Unmodified => "unmodified",
            FetchOutcome::Error => "error",
        }
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// BASE TEMPLATES AND SIGNATURES
// ============================================================================

/// Token standards that have a base (non-contract-specific) template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    NativeCryptocurrency,
    Erc20,
    Erc721,
    Erc875,
    Erc1155,
}

impl TokenType {
    /// Key used by the base-handler cache.
    pub fn as_key(&self) -> &'static str {
        match self {
            TokenType::NativeCryptocurrency => "native",
            TokenType::Erc20 => "erc20",
            TokenType::Erc721 => "erc721",
            TokenType::Erc875 => "erc875",
            TokenType::Erc1155 => "erc1155",
        }
    }
}

/// Cached outcome of verifying a document's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureVerification {
    NotSigned,
    Verified { domain: String },
    VerificationFailed,
}

// ============================================================================
// TESTS
// ============================================================================
