//! Realtime record store.
//!
//! Collections are appendable and subscribable. A subscription receives the
//! whole collection snapshot on every change, never a diff.

mod firebase;
mod memory;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use visage_time_core::Snapshot;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("store payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("store revoked the id token")]
    AuthRevoked,
    #[error("unexpected store response: {0}")]
    UnexpectedResponse(String),
}

#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Append a record under a fresh key. Returns once the store acknowledged it.
    async fn push(&self, collection: &str, value: serde_json::Value) -> Result<String, StoreError>;

    /// One-off read of the whole collection.
    async fn snapshot(&self, collection: &str) -> Result<Snapshot, StoreError>;

    /// Listen for changes. Dropping the subscription tears the listener down.
    fn subscribe(&self, collection: &str) -> Subscription;
}

/// Live view of a collection.
pub struct Subscription {
    rx: watch::Receiver<Option<Snapshot>>,
    primed: bool,
    listener: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(rx: watch::Receiver<Option<Snapshot>>, listener: Option<JoinHandle<()>>) -> Self {
        Self {
            rx,
            primed: false,
            listener,
        }
    }

    /// Next snapshot. The first call yields the current contents if known.
    /// Returns `None` once the listener has ended.
    pub async fn next(&mut self) -> Option<Snapshot> {
        if !self.primed {
            self.primed = true;
            if let Some(snapshot) = self.rx.borrow_and_update().clone() {
                return Some(snapshot);
            }
        }
        loop {
            self.rx.changed().await.ok()?;
            if let Some(snapshot) = self.rx.borrow_and_update().clone() {
                return Some(snapshot);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
