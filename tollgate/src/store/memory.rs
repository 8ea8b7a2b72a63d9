//! In-process backend.
//!
//! Clones share one map and one change feed, so several `RuleStore`s over
//! clones of a single `MemoryBackend` behave like several instances over one
//! cluster. Used for local runs and tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use super::{KvBackend, KvEvent, KvWatch, StoreError, StoredEntry};

/// Capacity of the change feed. A watcher that falls further behind fails
/// and must resubscribe.
const FEED_CAPACITY: usize = 1024;

struct Inner {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    events: broadcast::Sender<KvEvent>,
}

/// Shared in-memory key-value map with a change feed.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(BTreeMap::new()),
                events,
            }),
        }
    }

    /// Number of live watch subscriptions.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.inner.events.receiver_count()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StoreError> {
        self.inner
            .entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn publish(&self, event: KvEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KvBackend for MemoryBackend {
    type Watch = MemoryWatch;

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<StoredEntry>, StoreError> {
        let entries = self.entries()?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| StoredEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    // Events are published while the map lock is held, so the feed order
    // always matches the order writes were applied.
    #[allow(clippy::significant_drop_tightening)] // publish under the lock
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut entries = self.entries()?;
        entries.insert(key.to_string(), value.clone());
        self.publish(KvEvent::Put {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    #[allow(clippy::significant_drop_tightening)] // publish under the lock
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries()?;
        if entries.remove(key).is_some() {
            self.publish(KvEvent::Delete {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    #[allow(clippy::significant_drop_tightening)] // publish under the lock
    async fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let mut entries = self.entries()?;
        let keys: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            entries.remove(&key);
            self.publish(KvEvent::Delete { key });
        }
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<MemoryWatch, StoreError> {
        Ok(MemoryWatch {
            receiver: self.inner.events.subscribe(),
            prefix: prefix.to_string(),
        })
    }
}

/// Subscription to a `MemoryBackend` change feed.
pub struct MemoryWatch {
    receiver: broadcast::Receiver<KvEvent>,
    prefix: String,
}

impl KvWatch for MemoryWatch {
    async fn next_event(&mut self) -> Result<KvEvent, StoreError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.key().starts_with(&self.prefix) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    return Err(StoreError::WatchClosed(format!(
                        "watcher lagged by {count} events"
                    )));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(StoreError::WatchClosed("feed closed".to_string()));
                }
            }
        }
    }
}
