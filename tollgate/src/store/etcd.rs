//! etcd v3 backend.

use std::collections::VecDeque;
use std::time::Duration;

use etcd_client::{
    Client, ConnectOptions, DeleteOptions, EventType, GetOptions, WatchOptions, WatchStream,
    Watcher,
};

use super::{KvBackend, KvEvent, KvWatch, StoreError, StoredEntry};

/// Connection settings for [`EtcdBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdOptions {
    pub endpoints: Vec<String>,
    /// Username and password, if the cluster has auth enabled.
    pub credentials: Option<(String, String)>,
    pub dial_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub keep_alive_timeout: Duration,
}

impl EtcdOptions {
    pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(10);

    #[must_use]
    pub const fn new(endpoints: Vec<String>, dial_timeout: Duration) -> Self {
        Self {
            endpoints,
            credentials: None,
            dial_timeout,
            keep_alive_interval: Self::DEFAULT_KEEP_ALIVE_INTERVAL,
            keep_alive_timeout: Self::DEFAULT_KEEP_ALIVE_TIMEOUT,
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(self.dial_timeout)
            .with_keep_alive(self.keep_alive_interval, self.keep_alive_timeout);
        if let Some((user, password)) = &self.credentials {
            options = options.with_user(user.clone(), password.clone());
        }
        options
    }
}

/// Backend over an etcd cluster.
#[derive(Clone)]
pub struct EtcdBackend {
    client: Client,
}

impl EtcdBackend {
    /// Connect to the cluster.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if no endpoint can be reached.
    pub async fn connect(options: &EtcdOptions) -> Result<Self, StoreError> {
        let client = Client::connect(&options.endpoints, Some(options.connect_options()))
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to etcd {:?}: {e}", options.endpoints);
                backend_error(e)
            })?;
        tracing::info!("Connected to etcd {:?}", options.endpoints);
        Ok(Self { client })
    }
}

// Client methods take `&mut self`; clones share one channel.
impl KvBackend for EtcdBackend {
    type Watch = EtcdWatch;

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<StoredEntry>, StoreError> {
        let response = self
            .client
            .clone()
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(backend_error)?;
        response
            .kvs()
            .iter()
            .map(|kv| {
                Ok(StoredEntry {
                    key: kv
                        .key_str()
                        .map_err(|e| StoreError::Encoding(e.to_string()))?
                        .to_string(),
                    value: kv.value().to_vec(),
                })
            })
            .collect()
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.client
            .clone()
            .put(key, value, None)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .clone()
            .delete(key, None)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        self.client
            .clone()
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<EtcdWatch, StoreError> {
        let (watcher, stream) = self
            .client
            .clone()
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(backend_error)?;
        tracing::debug!("Watching etcd prefix '{prefix}'");
        Ok(EtcdWatch {
            _watcher: watcher,
            stream,
            pending: VecDeque::new(),
        })
    }
}

/// An etcd watch stream. Responses carry batches of events; they are handed
/// out one at a time.
pub struct EtcdWatch {
    // dropping the watcher cancels the server-side watch
    _watcher: Watcher,
    stream: WatchStream,
    pending: VecDeque<KvEvent>,
}

impl KvWatch for EtcdWatch {
    async fn next_event(&mut self) -> Result<KvEvent, StoreError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }

            let response = self
                .stream
                .message()
                .await
                .map_err(backend_error)?
                .ok_or_else(|| StoreError::WatchClosed("etcd watch stream ended".to_string()))?;
            if response.canceled() {
                return Err(StoreError::WatchClosed(format!(
                    "etcd cancelled the watch: {}",
                    response.cancel_reason()
                )));
            }

            for event in response.events() {
                let Some(kv) = event.kv() else { continue };
                let Ok(key) = kv.key_str() else {
                    tracing::warn!("Skipping watch event with a non UTF-8 key");
                    continue;
                };
                let key = key.to_string();
                self.pending.push_back(match event.event_type() {
                    EventType::Put => KvEvent::Put {
                        key,
                        value: kv.value().to_vec(),
                    },
                    EventType::Delete => KvEvent::Delete { key },
                });
            }
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn backend_error(e: etcd_client::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = EtcdOptions::new(
            vec!["http://127.0.0.1:2379".to_string()],
            Duration::from_secs(5),
        );
        assert!(options.credentials.is_none());
        assert_eq!(
            options.keep_alive_interval,
            EtcdOptions::DEFAULT_KEEP_ALIVE_INTERVAL
        );
        assert_eq!(options.dial_timeout, Duration::from_secs(5));
    }
}
