//! HTTP API for health checks, queue status and message ingestion

use crate::config::ApiConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::listener::{Intake, IntakeOutcome};
use crate::store::Table;
use crate::vaa::chains;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<Intake>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .route("/relayvaa/:vaa", get(relay_vaa))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, intake: Arc<Intake>) -> RelayerResult<()> {
    let app = router(AppState { intake });

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

async fn index() -> impl IntoResponse {
    Json(vec!["/relayvaa/<vaaInBase64>"])
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - the store must answer
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.intake.queue().ping().await.is_ok();
    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready: store_ok,
            store: store_ok,
        }),
    )
}

/// Queue depth per table and source chain
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let queue = state.intake.queue();
    let backlog = queue.backlog_len().await;
    match queue.depths().await {
        Ok(depths) => {
            let mut incoming = BTreeMap::new();
            let mut working = BTreeMap::new();
            for ((table, chain), len) in depths {
                let target = match table {
                    Table::Incoming => &mut incoming,
                    Table::Working => &mut working,
                };
                target.insert(chains::name(chain), len);
            }
            (
                StatusCode::OK,
                Json(StatsResponse {
                    backlog,
                    incoming,
                    working,
                }),
            )
        }
        Err(e) => {
            warn!("Stats unavailable: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatsResponse {
                    backlog,
                    incoming: BTreeMap::new(),
                    working: BTreeMap::new(),
                }),
            )
        }
    }
}

/// Ingest a base64 encoded VAA.
///
/// Acknowledges the enqueue attempt only; the relay itself happens later.
async fn relay_vaa(State(state): State<AppState>, Path(vaa): Path<String>) -> impl IntoResponse {
    let raw = match STANDARD.decode(vaa.as_bytes()) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Rejected /relayvaa request: bad base64: {}", e);
            return request_failed();
        }
    };

    match state.intake.process(&raw).await {
        Ok(IntakeOutcome::Enqueued { .. }) | Ok(IntakeOutcome::Duplicate(_)) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Scheduled".into(),
            }),
        ),
        Ok(IntakeOutcome::Rejected(reason)) => {
            warn!("Rejected /relayvaa request: {}", reason);
            request_failed()
        }
        Err(e) => {
            warn!("Failed /relayvaa request: {}", e);
            request_failed()
        }
    }
}

fn request_failed() -> (StatusCode, Json<MessageResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(MessageResponse {
            message: "Request failed".into(),
        }),
    )
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
}

#[derive(Serialize)]
struct StatsResponse {
    backlog: usize,
    incoming: BTreeMap<String, usize>,
    working: BTreeMap<String, usize>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}
