//! Assetdef Events - Change Notification Bus
//!
//! Signals, not payloads: a subscriber learns *which* contract changed and
//! re-queries the coordinator for the current document.
//!
//! - Uses a tokio broadcast channel for fan-out
//! - The bus holds only the sending half, so a subscription lives exactly as
//!   long as its [`Subscription`] handle
//! - Filtering by topic and contract happens on the receiving side

use assetdef_core::{Address, ContractKey};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

/// Default number of buffered signals before slow subscribers lag.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// What changed about a contract's document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    SignatureChanged,
    BodyChanged,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::SignatureChanged => "signature_changed",
            Topic::BodyChanged => "body_changed",
        }
    }
}

/// Which topics a subscription wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicFilter {
    Signature,
    Body,
    /// Both topics merged.
    Either,
}

impl TopicFilter {
    pub fn matches(&self, topic: Topic) -> bool {
        match self {
            TopicFilter::Signature => topic == Topic::SignatureChanged,
            TopicFilter::Body => topic == Topic::BodyChanged,
            TopicFilter::Either => true,
        }
    }
}

/// A single published signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub topic: Topic,
    pub key: ContractKey,
}

/// Multi-topic publish/subscribe bus keyed by contract.
#[derive(Debug, Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ChangeEvent>,
    bad_files: broadcast::Sender<Vec<String>>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl ChangeBus {
    /// Create a bus buffering up to `capacity` signals per subscriber.
    ///
    /// A zero capacity is bumped to one, since broadcast channels reject it.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel(capacity);
        let (bad_files, _rx) = broadcast::channel(capacity);
        Self { tx, bad_files }
    }

    /// Publish one topic for a contract.
    pub fn publish(&self, topic: Topic, key: ContractKey) {
        match self.tx.send(ChangeEvent { topic, key }) {
            Ok(receivers) => {
                debug!(
                    topic = topic.as_str(),
                    contract = %key.address,
                    receivers = receivers,
                    "Published change"
                );
            }
            Err(_) => {
                debug!(topic = topic.as_str(), contract = %key.address, "No subscribers for change");
            }
        }
    }

    /// Publish both topics: body first, then signature.
    pub fn publish_both(&self, key: ContractKey) {
        self.publish(Topic::BodyChanged, key);
        self.publish(Topic::SignatureChanged, key);
    }

    /// Subscribe to `filter`, optionally narrowed to one contract.
    pub fn subscribe(&self, filter: TopicFilter, address: Option<Address>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter,
            address,
        }
    }

    /// Announce the current list of bad override files.
    pub fn publish_bad_files(&self, names: Vec<String>) {
        let count = names.len();
        if self.bad_files.send(names).is_err() {
            debug!(count = count, "No subscribers for bad file list");
        }
    }

    pub fn subscribe_bad_files(&self) -> broadcast::Receiver<Vec<String>> {
        self.bad_files.subscribe()
    }

    /// Live subscriptions, across all filters.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving half of a bus subscription.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    filter: TopicFilter,
    address: Option<Address>,
}

impl Subscription {
    fn wants(filter: TopicFilter, address: Option<Address>, event: &ChangeEvent) -> bool {
        filter.matches(event.topic) && address.map_or(true, |a| a == event.key.address)
    }

    /// Next matching signal, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<ContractKey> {
        self.recv_event().await.map(|event| event.key)
    }

    /// Like [`recv`](Self::recv) but keeps the topic.
    pub async fn recv_event(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if Self::wants(self.filter, self.address, &event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Change subscriber lagged; signals dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// A matching signal if one is already buffered.
    pub fn try_recv(&mut self) -> Option<ContractKey> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if Self::wants(self.filter, self.address, &event) => {
                    return Some(event.key)
                }
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Change subscriber lagged; signals dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Turn the subscription into a stream of contract keys.
    pub fn into_stream(self) -> impl Stream<Item = ContractKey> + Send + 'static {
        let filter = self.filter;
        let address = self.address;
        BroadcastStream::new(self.rx).filter_map(move |item| match item {
            Ok(event) if Self::wants(filter, address, &event) => Some(event.key),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Change stream lagged; signals dropped");
                None
            }
        })
    }

    pub fn filter(&self) -> TopicFilter {
        self.filter
    }
}
