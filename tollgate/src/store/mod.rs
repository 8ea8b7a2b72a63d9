//! Rule persistence in a key-value configuration store.
//!
//! Rules live under `<prefix>/rules/<base64url(name)>` as their JSON
//! persisted form. Every instance watches `<prefix>/` and applies the events
//! to its own registry, so administrative writes go to the store first and
//! reach each registry (the writer's included) through the watch.
//!
//! # Pre-conditions
//! - The prefix has no trailing `/`.
//!
//! # Post-conditions
//! - Every store call is bounded by the configured timeout.
//! - A failed full load leaves the registry untouched.
//!
//! # Invariants
//! - The registry only ever receives fully built rules.

mod etcd;
mod memory;
pub mod watch;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use etcd::{EtcdBackend, EtcdOptions};
pub use memory::MemoryBackend;

use crate::registry::{RegistryError, RuleRegistry};
use crate::rule::{Rule, RuleDefinition, RuleError, decode_rule_name, encode_rule_name};

/// A key and its value as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// A change observed on the watch feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvEvent {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl KvEvent {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Errors from the store adapter and its backends.
#[derive(Debug)]
pub enum StoreError {
    /// A store call did not finish within the configured timeout.
    Timeout { operation: &'static str },
    /// The backend reported a failure.
    Backend(String),
    /// A key or value could not be encoded or decoded.
    Encoding(String),
    /// A stored rule could not be built.
    Rule(RuleError),
    /// The local registry failed.
    Registry(RegistryError),
    /// The watch subscription ended.
    WatchClosed(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { operation } => write!(f, "store {operation} timed out"),
            Self::Backend(reason) => write!(f, "store backend error: {reason}"),
            Self::Encoding(reason) => write!(f, "store encoding error: {reason}"),
            Self::Rule(e) => write!(f, "stored rule rejected: {e}"),
            Self::Registry(e) => write!(f, "{e}"),
            Self::WatchClosed(reason) => write!(f, "watch closed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rule(e) => Some(e),
            Self::Registry(e) => Some(e),
            Self::Timeout { .. } | Self::Backend(_) | Self::Encoding(_) | Self::WatchClosed(_) => {
                None
            }
        }
    }
}

impl From<RuleError> for StoreError {
    fn from(e: RuleError) -> Self {
        Self::Rule(e)
    }
}

impl From<RegistryError> for StoreError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Backend(_))
    }
}

/// An established subscription to store changes.
pub trait KvWatch: Send + 'static {
    /// Wait for the next change.
    ///
    /// # Errors
    /// Returns an error once the subscription has failed or been cancelled.
    /// The subscription is unusable afterwards.
    fn next_event(&mut self) -> impl Future<Output = Result<KvEvent, StoreError>> + Send;
}

/// Minimal key-value operations the rule store needs.
pub trait KvBackend: Send + Sync + 'static {
    type Watch: KvWatch;

    fn get_prefix(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<StoredEntry>, StoreError>> + Send;

    fn put(&self, key: &str, value: Vec<u8>)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_prefix(&self, prefix: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Subscribe to every change under `prefix`.
    ///
    /// The returned future resolves once the subscription is established, so
    /// any write issued afterwards is observed.
    fn watch(&self, prefix: &str) -> impl Future<Output = Result<Self::Watch, StoreError>> + Send;
}

/// What a watch event did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Updated(String),
    Removed(String),
    Ignored,
}

/// Adapter between the registry and a key-value backend.
pub struct RuleStore<B> {
    backend: B,
    prefix: String,
    registry: Arc<RuleRegistry>,
    timeout: Duration,
}

impl<B: KvBackend> RuleStore<B> {
    /// Create a store adapter. A trailing `/` on `prefix` is removed.
    #[must_use]
    pub fn new(
        backend: B,
        prefix: impl Into<String>,
        registry: Arc<RuleRegistry>,
        timeout: Duration,
    ) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self {
            backend,
            prefix,
            registry,
            timeout,
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Every key this instance watches starts with this.
    #[must_use]
    pub fn watch_prefix(&self) -> String {
        format!("{}/", self.prefix)
    }

    #[must_use]
    pub fn rules_prefix(&self) -> String {
        format!("{}/rules/", self.prefix)
    }

    #[must_use]
    pub fn rule_key(&self, name: &str) -> String {
        format!("{}/rules/{}", self.prefix, encode_rule_name(name))
    }

    /// Load every stored rule and replace the registry contents with them.
    ///
    /// Returns the number of rules loaded.
    ///
    /// # Errors
    /// Fails on the first rule that cannot be built; the registry is left
    /// as it was.
    pub async fn load_all_rules(&self) -> Result<usize, StoreError> {
        let entries = self
            .timed("get", self.backend.get_prefix(&self.rules_prefix()))
            .await?;

        let mut rules = Vec::with_capacity(entries.len());
        for entry in entries {
            let rule = Rule::from_json(&entry.value).map_err(|e| {
                tracing::error!("Failed to load rule from '{}': {e}", entry.key);
                StoreError::Rule(e)
            })?;
            rules.push(rule);
        }

        let count = rules.len();
        self.registry.replace_all(rules)?;
        tracing::info!("Loaded {count} rules from store");
        Ok(count)
    }

    /// Write one rule. Last write wins.
    ///
    /// # Errors
    /// Returns an error if encoding fails or the write fails or times out.
    pub async fn save_rule(&self, definition: &RuleDefinition) -> Result<(), StoreError> {
        let value =
            serde_json::to_vec(definition).map_err(|e| StoreError::Encoding(e.to_string()))?;
        let key = self.rule_key(&definition.name);
        self.timed("put", self.backend.put(&key, value)).await?;
        tracing::debug!("Saved rule '{}'", definition.name);
        Ok(())
    }

    /// Clear the stored rules and rewrite them from the registry.
    ///
    /// Returns the number of rules written.
    ///
    /// # Errors
    /// Returns the first failing store call. Rules already written stay.
    pub async fn save_all_rules(&self) -> Result<usize, StoreError> {
        let snapshot = self.registry.export_all()?;
        let mut values = Vec::with_capacity(snapshot.len());
        for (name, definition) in &snapshot {
            let value =
                serde_json::to_vec(definition).map_err(|e| StoreError::Encoding(e.to_string()))?;
            values.push((self.rule_key(name), value));
        }

        self.timed("delete", self.backend.delete_prefix(&self.rules_prefix()))
            .await?;
        for (key, value) in values {
            self.timed("put", self.backend.put(&key, value)).await?;
        }

        tracing::info!("Saved {} rules to store", snapshot.len());
        Ok(snapshot.len())
    }

    /// Remove one rule from the store. Removing an absent rule succeeds.
    ///
    /// # Errors
    /// Returns an error if the delete fails or times out.
    pub async fn delete_rule(&self, name: &str) -> Result<(), StoreError> {
        let key = self.rule_key(name);
        self.timed("delete", self.backend.delete(&key)).await?;
        tracing::debug!("Deleted rule '{name}'");
        Ok(())
    }

    /// Apply one watch event to the registry.
    ///
    /// # Errors
    /// Returns an error if a put carries a rule that cannot be built, or a
    /// delete key does not encode a rule name. The registry is unchanged in
    /// both cases.
    pub fn apply_event(&self, event: KvEvent) -> Result<WatchOutcome, StoreError> {
        let rules_prefix = self.rules_prefix();
        match event {
            KvEvent::Put { key, value } => {
                if !key.starts_with(&rules_prefix) {
                    return Ok(WatchOutcome::Ignored);
                }
                let rule = Rule::from_json(&value)?;
                let name = rule.name().to_string();
                self.registry.put(rule)?;
                Ok(WatchOutcome::Updated(name))
            }
            KvEvent::Delete { key } => {
                let Some(encoded) = key.strip_prefix(&rules_prefix) else {
                    return Ok(WatchOutcome::Ignored);
                };
                let name = decode_rule_name(encoded)?;
                self.registry.remove(&name)?;
                Ok(WatchOutcome::Removed(name))
            }
        }
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                tracing::warn!("Store {operation} timed out after {:?}", self.timeout);
                StoreError::Timeout { operation }
            })?
    }
}
