//! HTTP API served by every node
//!
//! - `GET /api/sampling?service=<name>`: sampling strategy from the local cache
//! - `POST /api/throughput`: count one root span into the aggregator
//! - `GET /status`: election role of this node
//! - `GET /health`, `GET /metrics`

use crate::common::{Error, Result, SamplerMetrics};
use crate::coordinator::election::Election;
use crate::sampling::{Aggregator, StrategyStore};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct SamplerState {
    pub node_id: String,
    pub resource_name: String,
    pub election: Arc<dyn Election>,
    pub aggregator: Arc<Aggregator>,
    pub strategies: Arc<StrategyStore>,
    pub metrics: Arc<SamplerMetrics>,
}

#[derive(Debug, Deserialize)]
struct StrategyQuery {
    service: Option<String>,
}

/// One root span reported by a client
#[derive(Debug, Serialize, Deserialize)]
pub struct ThroughputReport {
    pub service: String,
    pub operation: String,
    /// Probability the span was sampled with
    #[serde(default = "default_report_probability")]
    pub probability: f64,
}

fn default_report_probability() -> f64 {
    1.0
}

pub fn create_router(state: SamplerState) -> Router {
    Router::new()
        .route("/api/sampling", get(get_sampling_strategy))
        .route("/api/throughput", post(record_throughput))
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_sampling_strategy(
    State(state): State<SamplerState>,
    Query(query): Query<StrategyQuery>,
) -> Result<Response> {
    match query.service.as_deref().map(str::trim) {
        Some(service) if !service.is_empty() => {
            Ok(Json(state.strategies.get_sampling_strategy(service)).into_response())
        }
        _ => Err(Error::InvalidRequest(
            "'service' parameter must be provided".into(),
        )),
    }
}

async fn record_throughput(
    State(state): State<SamplerState>,
    Json(report): Json<ThroughputReport>,
) -> Result<StatusCode> {
    if report.service.is_empty() || report.operation.is_empty() {
        return Err(Error::InvalidRequest(
            "'service' and 'operation' must be non-empty".into(),
        ));
    }
    if !(report.probability > 0.0 && report.probability <= 1.0) {
        return Err(Error::InvalidRequest(
            "'probability' must be in (0, 1]".into(),
        ));
    }
    state
        .aggregator
        .record_throughput(&report.service, &report.operation, report.probability);
    Ok(StatusCode::ACCEPTED)
}

async fn status(State(state): State<SamplerState>) -> impl IntoResponse {
    let is_leader = state.election.is_leader();
    Json(json!({
        "node_id": state.node_id,
        "resource": state.resource_name,
        "is_leader": is_leader,
        "role": if is_leader { "leader" } else { "follower" },
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "alive": true,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": crate::common::timestamp_now_millis() / 1000,
    }))
}

async fn metrics(State(state): State<SamplerState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}
