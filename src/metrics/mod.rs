//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Relay outcomes per destination chain
//! - Intake volume and the in-memory backlog
//! - Queue depth per table and source chain
//! - Relayer wallet balances
//! - Background task restarts

use crate::error::{RelayerError, RelayerResult};
use crate::store::Table;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Relay outcome metrics
    pub static ref RELAY_SUCCESSES: CounterVec = register_counter_vec!(
        "spy_relayer_successes_total",
        "Relays that completed on the destination chain",
        &["chain"]
    ).unwrap();

    pub static ref RELAY_CONFIRMED: CounterVec = register_counter_vec!(
        "spy_relayer_confirmed_total",
        "Completed relays confirmed by an auditor",
        &["chain"]
    ).unwrap();

    pub static ref RELAY_FAILURES: CounterVec = register_counter_vec!(
        "spy_relayer_failures_total",
        "Relay attempts that did not complete",
        &["chain"]
    ).unwrap();

    pub static ref RELAY_ROLLBACKS: CounterVec = register_counter_vec!(
        "spy_relayer_rollbacks_total",
        "Completed relays an auditor could not confirm",
        &["chain"]
    ).unwrap();

    pub static ref ALREADY_EXECUTED: CounterVec = register_counter_vec!(
        "spy_relayer_already_executed_total",
        "Duplicates dropped at claim time because the key was already in WORKING",
        &["chain"]
    ).unwrap();

    pub static ref STUCK_RECLAIMED: CounterVec = register_counter_vec!(
        "spy_relayer_stuck_reclaimed_total",
        "Abandoned claims returned to the incoming table",
        &["chain"]
    ).unwrap();

    pub static ref COMPLETE_TIME: HistogramVec = register_histogram_vec!(
        "spy_relayer_complete_time_seconds",
        "Time from claim to completed relay",
        &["chain"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Intake metrics
    pub static ref VAAS_RECEIVED: CounterVec = register_counter_vec!(
        "spy_relayer_vaas_received_total",
        "Accepted messages handed to the queue",
        &[]
    ).unwrap();

    pub static ref INTAKE_DUPLICATES: CounterVec = register_counter_vec!(
        "spy_relayer_intake_duplicates_total",
        "Messages dropped because they were already queued",
        &[]
    ).unwrap();

    pub static ref BACKLOG_LENGTH: Gauge = register_gauge!(
        "spy_relayer_listener_backlog_length",
        "Entries waiting in the in-memory backlog"
    ).unwrap();

    // Queue metrics
    pub static ref QUEUE_LENGTH: GaugeVec = register_gauge_vec!(
        "spy_relayer_queue_length",
        "Records per table and source chain",
        &["queue", "source_chain"]
    ).unwrap();

    // Wallet metrics
    pub static ref WALLET_BALANCE: GaugeVec = register_gauge_vec!(
        "spy_relayer_wallet_balance",
        "Relayer wallet balance in native units",
        &["currency", "wallet", "chain"]
    ).unwrap();

    // Health metrics
    pub static ref TASK_RESTARTS: CounterVec = register_counter_vec!(
        "spy_relayer_task_restarts_total",
        "Supervised task restarts",
        &["task"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/", get(|| async { "ok" }));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Text exposition of the default registry
pub fn render() -> RelayerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| RelayerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| RelayerError::Internal(e.to_string()))
}

/// Create the per-chain series at zero so dashboards see them before the first event
pub fn init_chain(chain: &str) {
    for counter in [
        &*RELAY_SUCCESSES,
        &*RELAY_CONFIRMED,
        &*RELAY_FAILURES,
        &*RELAY_ROLLBACKS,
        &*ALREADY_EXECUTED,
        &*STUCK_RECLAIMED,
    ] {
        counter.with_label_values(&[chain]);
    }
}

// Helper functions to record metrics

pub fn record_success(chain: &str, elapsed_secs: f64) {
    RELAY_SUCCESSES.with_label_values(&[chain]).inc();
    COMPLETE_TIME.with_label_values(&[chain]).observe(elapsed_secs);
}

pub fn record_confirmed(chain: &str) {
    RELAY_CONFIRMED.with_label_values(&[chain]).inc();
}

pub fn record_failure(chain: &str) {
    RELAY_FAILURES.with_label_values(&[chain]).inc();
}

pub fn record_rollback(chain: &str) {
    RELAY_ROLLBACKS.with_label_values(&[chain]).inc();
}

pub fn record_already_executed(chain: &str) {
    ALREADY_EXECUTED.with_label_values(&[chain]).inc();
}

pub fn record_stuck_reclaimed(chain: &str) {
    STUCK_RECLAIMED.with_label_values(&[chain]).inc();
}

pub fn record_vaa_received() {
    VAAS_RECEIVED.with_label_values(&[]).inc();
}

pub fn record_intake_duplicate() {
    INTAKE_DUPLICATES.with_label_values(&[]).inc();
}

pub fn set_backlog_length(len: usize) {
    BACKLOG_LENGTH.set(len as f64);
}

pub fn set_queue_length(table: Table, source_chain: &str, len: usize) {
    QUEUE_LENGTH
        .with_label_values(&[table.label(), source_chain])
        .set(len as f64);
}

pub fn record_wallet_balance(currency: &str, wallet: &str, chain: &str, balance: f64) {
    WALLET_BALANCE
        .with_label_values(&[currency, wallet, chain])
        .set(balance);
}

pub fn record_task_restart(task: &str) {
    TASK_RESTARTS.with_label_values(&[task]).inc();
}
