//! Parsed-handler cache.
//!
//! Each entry remembers the content hash of the bytes it was parsed from and is
//! only served while that hash matches the current document. A stale entry is
//! therefore unreachable even if an insert races an invalidation.

use assetdef_core::{Address, ContentHash, ParseError, TokenType};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

/// What a document is being parsed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseSource {
    /// The document for a specific contract.
    Contract(Address),
    /// A base template shared by every token of a standard.
    Base(TokenType),
}

/// Turns document text into a structured, verified handler.
pub trait DocumentParser: Send + Sync + 'static {
    type Handler: Send + Sync + 'static;

    fn parse(&self, xml: &str, source: ParseSource) -> Result<Self::Handler, ParseError>;
}

/// Parser whose handler is the document text itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughParser;

impl DocumentParser for PassthroughParser {
    type Handler = String;

    fn parse(&self, xml: &str, _source: ParseSource) -> Result<String, ParseError> {
        Ok(xml.to_string())
    }
}

struct Entry<H> {
    content_hash: ContentHash,
    handler: Arc<H>,
}

/// Concurrent map from key to handler, validated by content hash.
pub struct HandlerCache<K, H> {
    entries: DashMap<K, Entry<H>>,
}

impl<K: Eq + Hash, H> Default for HandlerCache<K, H> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash, H> HandlerCache<K, H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler for `key`, only if it was parsed from `current`.
    pub fn get(&self, key: &K, current: &ContentHash) -> Option<Arc<H>> {
        self.entries
            .get(key)
            .filter(|entry| &entry.content_hash == current)
            .map(|entry| Arc::clone(&entry.handler))
    }

    pub fn insert(&self, key: K, content_hash: ContentHash, handler: Arc<H>) {
        self.entries.insert(
            key,
            Entry {
                content_hash,
                handler,
            },
        );
    }

    /// Drop the entry. Returns whether one existed.
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
