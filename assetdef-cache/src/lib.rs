//! Assetdef Cache - Cache Coordinator
//!
//! The entry point for hosts. Build an [`AssetDefinitionStore`] with a
//! backing store and a document parser, then fetch, read, and subscribe:
//!
//! ```no_run
//! use assetdef_cache::{AssetDefinitionStore, PassthroughParser};
//! use assetdef_core::{Address, ContractKey};
//! use assetdef_events::TopicFilter;
//! use assetdef_store::InMemoryBackingStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> assetdef_core::AssetDefResult<()> {
//! let store = AssetDefinitionStore::builder(Arc::new(InMemoryBackingStore::new()), PassthroughParser)
//!     .build()?;
//! let address = Address::parse("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed")?;
//!
//! let mut changes = store.subscribe(TopicFilter::Either, Some(address));
//! let outcomes = store.fetch(ContractKey::new(address), true).collect().await;
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod handle;
pub mod handlers;
pub mod retry;

pub use coordinator::{AssetDefinitionStore, AssetDefinitionStoreBuilder, ClipboardSource};
pub use handle::FetchHandle;
pub use handlers::{DocumentParser, HandlerCache, ParseSource, PassthroughParser};
pub use retry::{NextStep, RetryMachine, RetryPolicy, RetryState, Scheduler, TokioScheduler};

pub use assetdef_core::FetchOutcome;
