use super::{RealtimeStore, StoreError, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;
use visage_time_core::Snapshot;

/// In-process store. Contents live as long as the daemon.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, watch::Sender<Option<Snapshot>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, collection: &str) -> watch::Sender<Option<Snapshot>> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        collections
            .entry(collection.to_string())
            .or_insert_with(|| watch::channel(Some(Snapshot::new())).0)
            .clone()
    }
}

/// Push keys sort by creation time; the random suffix keeps them unique.
fn push_key() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("-{millis:012x}{}", &suffix[..8])
}

#[async_trait]
impl RealtimeStore for MemoryStore {
    async fn push(&self, collection: &str, value: serde_json::Value) -> Result<String, StoreError> {
        let key = push_key();
        self.sender(collection).send_modify(|snap| {
            snap.get_or_insert_with(Snapshot::new)
                .insert(key.clone(), value);
        });
        tracing::debug!(collection, key = %key, "memory store push");
        Ok(key)
    }

    async fn snapshot(&self, collection: &str) -> Result<Snapshot, StoreError> {
        Ok(self.sender(collection).borrow().clone().unwrap_or_default())
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        Subscription::new(self.sender(collection).subscribe(), None)
    }
}
