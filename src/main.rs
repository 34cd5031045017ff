//! Spy relayer - Redis backed relay queue for signed cross-chain messages
//!
//! Accepted messages are queued in Redis, claimed by one worker per
//! destination chain and signing key, relayed, and later audited against
//! destination-chain finality.

use anyhow::Result;
use clap::Parser;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod api;
mod backend;
mod chain;
mod cli;
mod config;
mod error;
mod listener;
mod metrics;
mod monitor;
mod queue;
mod store;
mod vaa;
mod worker;

use backend::Backend;
use chain::ChainRegistry;
use cli::Args;
use config::Settings;
use listener::Intake;
use metrics::MetricsServer;
use monitor::{QueueMonitor, WalletMonitor};
use queue::{RelayQueue, RetryPolicy};
use store::RedisStore;
use worker::auditor::AuditTimings;
use worker::{spawn_supervised, Auditor, RelayWorker};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging();

    info!("Starting spy relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load(&args.config)?;
    let roles = args.roles();
    info!(
        "Loaded configuration for {} chains, roles {:?}",
        settings.enabled_chains().len(),
        roles
    );

    let chains = Arc::new(ChainRegistry::from_settings(&settings)?);
    let backend = Backend::from_settings(&settings, chains.clone())?;
    let descriptors = worker::build_descriptors(&settings, &backend);
    info!("{} worker descriptors", descriptors.len());
    for descriptor in &descriptors {
        metrics::init_chain(&descriptor.target_chain_name);
    }

    let queue = if roles.needs_store() {
        let store = connect_store(&settings).await;
        let queue = Arc::new(RelayQueue::new(Arc::new(store)));
        if roles.prepares_tables() {
            prepare_tables(&settings, &queue).await?;
        }
        Some(queue)
    } else {
        None
    };

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // Start metrics server
    if settings.metrics.enabled {
        let port = settings.metrics.port;
        handles.push(spawn_supervised(
            "metrics".into(),
            settings.relayer.worker_restart(),
            move || async move { MetricsServer::new(port).run().await },
        ));
    }

    if let Some(queue) = &queue {
        let mut known_chains: BTreeSet<u16> = backend
            .listener
            .emitter_filters()
            .iter()
            .map(|f| f.chain_id)
            .collect();
        known_chains.extend(backend.destination_chains(&settings));
        let interval = Duration::from_secs(settings.monitor.queue_interval_secs);
        let queue = queue.clone();
        handles.push(spawn_supervised(
            "queue-monitor".into(),
            settings.relayer.worker_restart(),
            move || QueueMonitor::new(queue.clone(), known_chains.clone(), interval).run(),
        ));
    }

    if let (true, Some(queue)) = (roles.listen, &queue) {
        let intake = Arc::new(Intake::new(backend.listener.clone(), queue.clone()));

        let drain_interval = Duration::from_millis(settings.listener.backlog_drain_ms);
        let drain = intake.clone();
        handles.push(spawn_supervised(
            "backlog-drain".into(),
            settings.relayer.worker_restart(),
            move || drain.clone().run_backlog_drain(drain_interval),
        ));

        if settings.api.enabled {
            let api_config = settings.api.clone();
            handles.push(spawn_supervised(
                "api".into(),
                settings.relayer.worker_restart(),
                move || api::run_server(api_config.clone(), intake.clone()),
            ));
            info!("API server: http://{}:{}", settings.api.host, settings.api.port);
        }
    }

    if let (true, Some(queue)) = (roles.relay, &queue) {
        let policy = RetryPolicy::from_config(&settings.relayer);
        let timings = AuditTimings {
            interval: settings.relayer.audit_interval(),
            min_age: Duration::from_secs(settings.relayer.audit_age_secs),
            stuck_age: Duration::from_secs(settings.relayer.stuck_claim_age_secs),
            store_retry: settings.relayer.store_retry(),
        };
        let idle = settings.relayer.worker_interval();

        for descriptor in &descriptors {
            let (d, q, r) = (descriptor.clone(), queue.clone(), backend.relayer.clone());
            handles.push(spawn_supervised(
                format!("relay-worker-{}", descriptor.label()),
                settings.relayer.worker_restart(),
                move || RelayWorker::new(d.clone(), q.clone(), r.clone(), policy, idle).run(),
            ));

            let (d, q, r) = (descriptor.clone(), queue.clone(), backend.relayer.clone());
            handles.push(spawn_supervised(
                format!("audit-worker-{}", descriptor.label()),
                settings.relayer.auditor_restart(),
                move || Auditor::new(d.clone(), q.clone(), r.clone(), timings).run(),
            ));
        }
        info!("Spawned {} relay workers and auditors", descriptors.len());
    }

    if roles.wallet_monitor {
        let interval = Duration::from_secs(settings.monitor.wallet_interval_secs);
        let (c, d) = (chains.clone(), descriptors.clone());
        handles.push(spawn_supervised(
            "wallet-monitor".into(),
            settings.relayer.worker_restart(),
            move || WalletMonitor::new(c.clone(), d.clone(), interval).run(),
        ));
    }

    info!("Spy relayer is running");
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Abort background tasks
    for handle in &handles {
        handle.abort();
    }
    futures::future::join_all(handles).await;

    info!("Spy relayer stopped");
    Ok(())
}

/// Connect to Redis, retrying until it answers
async fn connect_store(settings: &Settings) -> RedisStore {
    loop {
        match RedisStore::connect(&settings.redis).await {
            Ok(store) => return store,
            Err(e) => {
                warn!(
                    "Redis connection failed, retrying in {:?}: {}",
                    settings.relayer.store_retry(),
                    e
                );
                tokio::time::sleep(settings.relayer.store_retry()).await;
            }
        }
    }
}

/// Apply the startup table tunables
async fn prepare_tables(settings: &Settings, queue: &RelayQueue) -> Result<()> {
    if settings.relayer.clear_on_init {
        queue.clear().await?;
        info!("Cleared both queue tables");
    } else if settings.relayer.demote_working_on_init {
        let moved = queue.demote_working(chrono::Utc::now()).await?;
        info!("Moved {} WORKING records back to INCOMING", moved);
    }
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,spy_relayer=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
