//! Liveness and observability endpoints.

use std::collections::BTreeMap;
use std::fmt::Write;

use axum::{extract::State, http::header, response::IntoResponse, Json};
use courier_providers::ProviderAdapter;
use serde::Serialize;

use crate::state::AppState;

/// Gateway liveness plus per-provider health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Channels with at least one registered adapter.
    pub channels: Vec<String>,
    /// Health score per adapter, in `[0, 100]`. Adapters with no traffic
    /// yet score 100.
    pub providers: BTreeMap<String, f64>,
    /// Messages waiting for their scheduled time.
    pub scheduled_pending: usize,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.dispatcher.health_snapshot();
    let mut providers: BTreeMap<String, f64> =
        snapshot.iter().map(|(name, h)| (name.to_string(), h.score)).collect();
    // Cold adapters have no stats entry yet; surface them at full score.
    for adapter in state.registry.all() {
        providers.entry(adapter.name().to_string()).or_insert(100.0);
    }

    let mut channels: Vec<String> = state.registry.channels().map(|c| c.to_string()).collect();
    channels.sort();

    Json(HealthResponse {
        status: "ok",
        channels,
        providers,
        scheduled_pending: state.scheduler.pending(),
    })
}

/// `GET /metrics`
///
/// Prometheus text exposition rendered from the health snapshot.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.dispatcher.health_snapshot();
    let mut scores: BTreeMap<&str, f64> =
        state.registry.all().map(|a| (a.name(), 100.0)).collect();
    for (name, health) in snapshot.iter() {
        if let Some(score) = scores.get_mut(name) {
            *score = health.score;
        }
    }

    let mut body = String::new();
    let _ = writeln!(body, "# HELP courier_provider_health_score Provider health in [0, 100].");
    let _ = writeln!(body, "# TYPE courier_provider_health_score gauge");
    for (name, score) in &scores {
        let _ = writeln!(body, "courier_provider_health_score{{provider=\"{name}\"}} {score}");
    }
    let _ = writeln!(body, "# HELP courier_scheduled_pending Messages awaiting their due time.");
    let _ = writeln!(body, "# TYPE courier_scheduled_pending gauge");
    let _ = writeln!(body, "courier_scheduled_pending {}", state.scheduler.pending());

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
