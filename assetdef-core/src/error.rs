//! Error types for asset-definition operations

use thiserror::Error;

/// Contract address parsing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address must start with 0x: {input}")]
    MissingPrefix { input: String },

    #[error("Address must have 40 hex digits, got {len}")]
    InvalidLength { len: usize },

    #[error("Address contains non-hex characters: {input}")]
    InvalidHex { input: String },

    #[error("Address checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: String, got: String },
}

/// Backing store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Invalid override file name {name}: {reason}")]
    InvalidFileName { name: String, reason: String },
}

/// Network fetch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Empty body from {url}")]
    EmptyBody { url: String },

    #[error("Body from {url} is not valid UTF-8: {reason}")]
    InvalidBody { url: String, reason: String },

    #[error("Truncated document from {url} after {attempts} attempts")]
    Truncated { url: String, attempts: u32 },
}

impl FetchError {
    /// Transient failures are ones a retry can plausibly fix.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::Truncated { .. } => true,
            FetchError::EmptyBody { .. } | FetchError::InvalidBody { .. } => false,
        }
    }
}

/// URL resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("scriptURI lookup for {contract} on network {network} failed: {reason}")]
    ScriptUri {
        contract: String,
        network: u64,
        reason: String,
    },

    #[error("Invalid repository base URL {base}: {reason}")]
    InvalidRepository { base: String, reason: String },
}

/// Document parse/verification errors raised by the parser collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed document for {contract}: {reason}")]
    Malformed { contract: String, reason: String },

    #[error("Signature verification failed for {contract}: {reason}")]
    Signature { contract: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all asset-definition errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssetDefError {
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for asset-definition operations.
pub type AssetDefResult<T> = Result<T, AssetDefError>;

// =============================================================================
// TESTS
// =============================================================================
