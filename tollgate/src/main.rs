#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::future::IntoFuture;
use std::sync::Arc;

use tokio::sync::{Notify, watch};
use tollgate::Authority;
use tollgate::config::{ServiceConfig, StoreKind};
use tollgate::http::{self, AppState};
use tollgate::registry::RuleRegistry;
use tollgate::store::watch::{WatchConfig, spawn_watch};
use tollgate::store::{EtcdBackend, KvBackend, MemoryBackend, RuleStore};
use tollgate::telemetry::{self, LogFormat};

#[tokio::main]
async fn main() {
    // Load configuration from environment variables
    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            telemetry::init(LogFormat::default());
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    telemetry::init(config.log_format);

    tracing::info!(
        "Loaded configuration: listen_addr={}, key_prefix={}, strict_refresh_binding={}",
        config.listen_addr,
        config.key_prefix,
        config.strict_refresh_binding
    );

    match &config.store {
        StoreKind::Etcd(options) => match EtcdBackend::connect(options).await {
            Ok(backend) => run(&config, backend).await,
            Err(e) => {
                tracing::error!("Failed to connect to the rule store: {e}");
                std::process::exit(1);
            }
        },
        StoreKind::Memory => {
            tracing::warn!("Using the in-memory store; rules are lost on exit");
            run(&config, MemoryBackend::new()).await;
        }
    }
}

#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
async fn run<B: KvBackend>(config: &ServiceConfig, backend: B) {
    let registry = Arc::new(RuleRegistry::new());
    let store = Arc::new(RuleStore::new(
        backend,
        config.key_prefix.as_str(),
        Arc::clone(&registry),
        config.store_timeout,
    ));

    // Post-condition: the registry mirrors the store before any request is served.
    match store.load_all_rules().await {
        Ok(count) => tracing::info!("Loaded {count} rules"),
        Err(e) => {
            tracing::error!("Failed to load rules: {e}");
            std::process::exit(1);
        }
    }

    // the watcher reloads again once subscribed, covering writes made since
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut watch_task = spawn_watch(
        Arc::clone(&store),
        WatchConfig::new(config.watch_max_retries),
        shutdown_rx,
    );

    let authority = Arc::new(Authority::new(registry, config.strict_refresh_binding));
    if authority.strict_refresh_binding() {
        tracing::info!("Strict refresh binding on: refresh tokens only renew their own access token");
    } else {
        tracing::warn!("Strict refresh binding off: a refresh token renews any access token");
    }
    let app = http::router(AppState::new(authority, store, &config.secret));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind {}: {e}", config.listen_addr);
            std::process::exit(1);
        });
    tracing::info!("listening on {}", config.listen_addr);

    let signalled = Arc::new(Notify::new());
    let server = axum::serve(listener, app)
        .with_graceful_shutdown({
            let signalled = Arc::clone(&signalled);
            async move {
                shutdown_signal().await;
                signalled.notify_one();
            }
        })
        .into_future();
    let drain_deadline = async {
        signalled.notified().await;
        tokio::time::sleep(config.shutdown_timeout).await;
    };

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Server error: {e}");
                std::process::exit(1);
            }
        }
        () = drain_deadline => {
            tracing::warn!(
                "In-flight requests did not finish within {:?}",
                config.shutdown_timeout
            );
        }
        result = &mut watch_task => {
            match result {
                Ok(Ok(())) => tracing::error!("Rule watch stopped unexpectedly"),
                Ok(Err(e)) => tracing::error!("Rule watch failed: {e}"),
                Err(e) => tracing::error!("Rule watch task panicked: {e}"),
            }
            std::process::exit(1);
        }
    }

    let _ = shutdown_tx.send(true);
    match watch_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Rule watch ended with an error: {e}"),
        Err(e) => tracing::warn!("Rule watch task panicked: {e}"),
    }
    tracing::info!("Shut down");
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
