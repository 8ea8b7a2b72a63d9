//! Long-lived task keeping the registry in step with the store.
//!
//! The backend subscription feeds a bounded queue; the dispatcher drains it
//! and applies each event to the registry. Every subscription, the first one
//! included, is followed by a full reload, so writes that landed before it
//! existed are not lost. A failed subscription is re-established with
//! exponential backoff.
//!
//! # Post-conditions
//! - The task returns `Ok(())` once the shutdown signal fires.
//! - It returns an error after `max_retries` consecutive failures to
//!   (re)subscribe; the caller treats this as fatal.
//!
//! # Invariants
//! - A bad event is logged and dropped; the registry entry it targeted is
//!   left untouched.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{KvBackend, KvEvent, KvWatch, RuleStore, StoreError, WatchOutcome};

/// Capacity of the queue between the backend feed and the dispatcher.
pub const QUEUE_CAPACITY: usize = 256;

/// Restart policy of the watch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// Consecutive failures tolerated before giving up.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl WatchConfig {
    pub const DEFAULT_MAX_RETRIES: u32 = 5;
    pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
    pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Self::DEFAULT_INITIAL_BACKOFF,
            max_backoff: Self::DEFAULT_MAX_BACKOFF,
        }
    }

    /// Delay before the given retry (1-based): doubles each time, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES)
    }
}

/// Start the watch task.
///
/// Send `true` on the shutdown channel (or drop its sender) to stop it.
#[must_use]
pub fn spawn_watch<B: KvBackend>(
    store: Arc<RuleStore<B>>,
    config: WatchConfig,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<Result<(), StoreError>> {
    tokio::spawn(run(store, config, shutdown))
}

enum Exit {
    Shutdown,
    Failed(StoreError),
}

async fn run<B: KvBackend>(
    store: Arc<RuleStore<B>>,
    config: WatchConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), StoreError> {
    let prefix = store.watch_prefix();
    let mut failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let error = match store.backend().watch(&prefix).await {
            Ok(subscription) => {
                // subscribe first, then reload: anything written before the
                // subscription is in the snapshot, anything after is queued
                if let Err(e) = store.load_all_rules().await {
                    tracing::error!("Resync after subscribing failed: {e}");
                }
                tracing::info!("Watching '{prefix}' for rule changes");
                failures = 0;
                match dispatch(&store, subscription, &mut shutdown).await {
                    Exit::Shutdown => return Ok(()),
                    Exit::Failed(e) => e,
                }
            }
            Err(e) => e,
        };

        failures += 1;
        if failures > config.max_retries {
            tracing::error!("Watch failed {failures} times in a row, giving up: {error}");
            return Err(error);
        }

        let delay = config.backoff(failures);
        tracing::warn!(
            "Watch failed ({error}), retry {failures}/{} in {delay:?}",
            config.max_retries
        );
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Pump one subscription through the queue until it fails or shutdown.
async fn dispatch<B: KvBackend>(
    store: &RuleStore<B>,
    subscription: B::Watch,
    shutdown: &mut watch::Receiver<bool>,
) -> Exit {
    let (sender, mut receiver) = mpsc::channel(QUEUE_CAPACITY);
    let feed = forward(subscription, sender);
    tokio::pin!(feed);

    let error = loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => return Exit::Shutdown,
            Some(event) = receiver.recv() => apply(store, event),
            error = &mut feed => break error,
        }
    };

    while let Ok(event) = receiver.try_recv() {
        apply(store, event);
    }
    Exit::Failed(error)
}

/// Move events from the subscription into the queue. Returns why it stopped.
async fn forward<W: KvWatch>(mut subscription: W, sender: mpsc::Sender<KvEvent>) -> StoreError {
    loop {
        match subscription.next_event().await {
            Ok(event) => {
                if sender.send(event).await.is_err() {
                    return StoreError::WatchClosed("dispatcher stopped".to_string());
                }
            }
            Err(e) => return e,
        }
    }
}

fn apply<B: KvBackend>(store: &RuleStore<B>, event: KvEvent) {
    let key = event.key().to_string();
    match store.apply_event(event) {
        Ok(WatchOutcome::Updated(name)) => tracing::info!("Rule '{name}' updated from store"),
        Ok(WatchOutcome::Removed(name)) => tracing::info!("Rule '{name}' removed from store"),
        Ok(WatchOutcome::Ignored) => tracing::debug!("Ignoring change to '{key}'"),
        Err(e) => tracing::error!("Dropping change to '{key}': {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::registry::RuleRegistry;
    use crate::rule::tests::hs256_definition;
    use crate::rule::{CodecSpec, RuleDefinition};
    use crate::store::{MemoryBackend, StoredEntry};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn store<B: KvBackend>(backend: B) -> Arc<RuleStore<B>> {
        Arc::new(RuleStore::new(
            backend,
            "/tollgate",
            Arc::new(RuleRegistry::new()),
            TIMEOUT,
        ))
    }

    fn fast_config(max_retries: u32) -> WatchConfig {
        WatchConfig {
            max_retries,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        }
    }

    /// Poll until `condition` holds or two seconds pass.
    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    async fn wait_for_watchers(backend: &MemoryBackend, count: usize) {
        eventually(|| backend.watcher_count() >= count).await;
    }

    /// Memory backend whose first `failures` subscriptions are refused.
    struct FlakyBackend {
        inner: MemoryBackend,
        failures: AtomicU32,
        attempts: Arc<AtomicU32>,
    }

    impl KvBackend for FlakyBackend {
        type Watch = <MemoryBackend as KvBackend>::Watch;

        async fn get_prefix(&self, prefix: &str) -> Result<Vec<StoredEntry>, StoreError> {
            self.inner.get_prefix(prefix).await
        }

        async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
            self.inner.put(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }

        async fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError> {
            self.inner.delete_prefix(prefix).await
        }

        async fn watch(&self, prefix: &str) -> Result<Self::Watch, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Backend("connection refused".to_string()));
            }
            self.inner.watch(prefix).await
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = WatchConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(4), Duration::from_millis(800));
        assert_eq!(config.backoff(5), Duration::from_millis(1000));
        assert_eq!(config.backoff(40), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_instances_converge_through_watch() {
        let backend = MemoryBackend::new();
        let first = store(backend.clone());
        let second = store(backend.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let first_task = spawn_watch(Arc::clone(&first), fast_config(3), shutdown_rx.clone());
        let second_task = spawn_watch(Arc::clone(&second), fast_config(3), shutdown_rx);
        wait_for_watchers(&backend, 2).await;

        first.save_rule(&hs256_definition("shared")).await.expect("save");
        eventually(|| second.registry().contains("shared").unwrap_or(false)).await;
        eventually(|| first.registry().contains("shared").unwrap_or(false)).await;

        second.delete_rule("shared").await.expect("delete");
        eventually(|| !first.registry().contains("shared").unwrap_or(true)).await;
        eventually(|| !second.registry().contains("shared").unwrap_or(true)).await;

        shutdown_tx.send(true).expect("signal shutdown");
        first_task.await.expect("join").expect("clean exit");
        second_task.await.expect("join").expect("clean exit");
    }

    #[tokio::test]
    async fn test_malformed_put_keeps_previous_rule() {
        let backend = MemoryBackend::new();
        let store = store(backend.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_watch(Arc::clone(&store), fast_config(3), shutdown_rx);
        wait_for_watchers(&backend, 1).await;

        store.save_rule(&hs256_definition("r")).await.expect("save");
        eventually(|| store.registry().contains("r").unwrap_or(false)).await;

        let broken = RuleDefinition {
            updater: CodecSpec::new("JWT_SM2", r#"{"private_key":""}"#),
            ..hs256_definition("r")
        };
        store.save_rule(&broken).await.expect("save");
        // a later valid event proves the broken one was processed
        store.save_rule(&hs256_definition("marker")).await.expect("save");
        eventually(|| store.registry().contains("marker").unwrap_or(false)).await;

        let rule = store.registry().get("r").expect("get").expect("still present");
        assert_eq!(rule.definition(), &hs256_definition("r"));

        shutdown_tx.send(true).expect("signal shutdown");
        task.await.expect("join").expect("clean exit");
    }

    #[tokio::test]
    async fn test_restart_resyncs_registry() {
        let inner = MemoryBackend::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let backend = FlakyBackend {
            inner: inner.clone(),
            failures: AtomicU32::new(2),
            attempts: Arc::clone(&attempts),
        };
        // written while no subscription exists
        let definition = serde_json::to_vec(&hs256_definition("missed")).expect("json");
        inner
            .put("/tollgate/rules/bWlzc2Vk", definition)
            .await
            .expect("put");

        let store = store(backend);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_watch(Arc::clone(&store), fast_config(3), shutdown_rx);

        eventually(|| store.registry().contains("missed").unwrap_or(false)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        shutdown_tx.send(true).expect("signal shutdown");
        task.await.expect("join").expect("clean exit");
    }

    #[tokio::test]
    async fn test_write_between_load_and_spawn_is_seen() {
        let backend = MemoryBackend::new();
        let serving = store(backend.clone());
        let other = store(backend.clone());

        serving.load_all_rules().await.expect("initial load");
        // lands after the load, before any subscription exists
        other.save_rule(&hs256_definition("gap")).await.expect("save");
        assert_eq!(backend.watcher_count(), 0);
        assert!(!serving.registry().contains("gap").expect("contains"));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_watch(Arc::clone(&serving), fast_config(3), shutdown_rx);
        eventually(|| serving.registry().contains("gap").unwrap_or(false)).await;

        shutdown_tx.send(true).expect("signal shutdown");
        task.await.expect("join").expect("clean exit");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let backend = FlakyBackend {
            inner: MemoryBackend::new(),
            failures: AtomicU32::new(u32::MAX),
            attempts: Arc::clone(&attempts),
        };
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = spawn_watch(store(backend), fast_config(2), shutdown_rx)
            .await
            .expect("join");
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_lagged_feed_restarts_and_resyncs() {
        let backend = MemoryBackend::new();
        let store = store(backend.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_watch(Arc::clone(&store), fast_config(3), shutdown_rx);
        wait_for_watchers(&backend, 1).await;

        // flood the feed past its capacity without yielding to the watcher
        let value = serde_json::to_vec(&hs256_definition("last")).expect("json");
        for i in 0..2_000 {
            backend
                .put(&format!("/tollgate/noise/{i}"), Vec::new())
                .await
                .expect("put");
        }
        backend
            .put("/tollgate/rules/bGFzdA", value)
            .await
            .expect("put");

        eventually(|| store.registry().contains("last").unwrap_or(false)).await;

        shutdown_tx.send(true).expect("signal shutdown");
        task.await.expect("join").expect("clean exit");
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff() {
        let backend = FlakyBackend {
            inner: MemoryBackend::new(),
            failures: AtomicU32::new(u32::MAX),
            attempts: Arc::new(AtomicU32::new(0)),
        };
        let config = WatchConfig {
            max_retries: 100,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_watch(store(backend), config, shutdown_rx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).expect("signal shutdown");
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("task stops promptly")
            .expect("join");
        assert!(result.is_ok());
    }
}
