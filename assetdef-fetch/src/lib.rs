//! Assetdef Fetch - Resolver and Fetch Engine
//!
//! - [`Resolver`] picks the URL: on-chain script pointer, else repository
//! - [`FetchEngine`] performs the conditional GET and classifies the result
//! - [`DocumentTransport`] is the seam between the engine and HTTP; the
//!   production implementation is [`ReqwestTransport`]

pub mod engine;
pub mod headers;
pub mod resolver;
pub mod transport;

pub use engine::{looks_truncated, FetchEngine, FetchResponse, FetchedDocument, DOCUMENT_TERMINATOR};
pub use headers::RequestHeaders;
pub use resolver::{FallbackReason, NoScriptUri, ResolvedUrl, Resolver, ScriptUriSource, UrlSource};
pub use transport::{DocumentTransport, ReqwestTransport, TransportResponse};

// Re-exported so callers need not depend on reqwest for URLs.
pub use reqwest::Url;
