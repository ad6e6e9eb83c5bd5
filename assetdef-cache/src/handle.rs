//! Caller-side handle for a fetch.

use assetdef_core::FetchOutcome;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Outcomes of one fetch call, at most two.
///
/// Dropping the handle cancels a fetch that has not committed yet.
#[derive(Debug)]
pub struct FetchHandle {
    rx: mpsc::Receiver<FetchOutcome>,
}

impl FetchHandle {
    pub(crate) fn new(rx: mpsc::Receiver<FetchOutcome>) -> Self {
        Self { rx }
    }

    /// Next outcome, or `None` when the fetch is finished.
    pub async fn next(&mut self) -> Option<FetchOutcome> {
        self.rx.recv().await
    }

    /// An outcome if one is already available.
    pub fn try_next(&mut self) -> Option<FetchOutcome> {
        self.rx.try_recv().ok()
    }

    /// Wait for the fetch to finish and return every outcome.
    pub async fn collect(mut self) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::with_capacity(2);
        while let Some(outcome) = self.rx.recv().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn into_stream(self) -> ReceiverStream<FetchOutcome> {
        ReceiverStream::new(self.rx)
    }
}
