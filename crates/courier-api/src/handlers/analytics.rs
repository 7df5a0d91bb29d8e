//! Tenant analytics endpoints.

use std::collections::BTreeMap;

use axum::{extract::State, http::HeaderMap, Json};
use courier_core::{AnalyticsOverview, ChannelStats, ProviderStats};
use courier_providers::ProviderAdapter;
use serde::Serialize;

use super::tenant_id;
use crate::{error::ApiError, state::AppState};

/// `GET /api/v1/analytics/overview`
///
/// Today's live counters for the calling tenant.
pub async fn overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AnalyticsOverview>, ApiError> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(state.dispatcher.analytics().overview(tenant).await?))
}

/// `GET /api/v1/analytics/by-channel`
pub async fn by_channel(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChannelStats>>, ApiError> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(state.dispatcher.analytics().by_channel(tenant).await?))
}

/// `GET /api/v1/analytics/by-provider`
///
/// Counters per adapter the tenant's traffic was routed through, with the
/// adapter's current health score attached.
pub async fn by_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ProviderStats>>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let names: Vec<String> =
        state.registry.all().map(|a| a.name().to_string()).collect();
    let mut stats = state.dispatcher.analytics().by_provider(tenant, &names).await?;
    let snapshot = state.dispatcher.health_snapshot();
    for entry in &mut stats {
        entry.health_score = snapshot.score(&entry.provider);
    }
    Ok(Json(stats))
}

/// Delivery rates for the current day, overall and per channel.
#[derive(Debug, Serialize)]
pub struct DeliveryRatesView {
    /// Day bucket the rates cover.
    pub period: String,
    /// Delivered over sent across all channels, in [0, 1].
    pub overall: f64,
    /// Delivered over sent per channel.
    pub by_channel: BTreeMap<String, f64>,
}

/// `GET /api/v1/analytics/delivery-rates`
pub async fn delivery_rates(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DeliveryRatesView>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let analytics = state.dispatcher.analytics();
    let overview = analytics.overview(tenant).await?;
    let channels = analytics.by_channel(tenant).await?;
    Ok(Json(DeliveryRatesView {
        period: overview.period,
        overall: overview.delivery_rate,
        by_channel: channels
            .into_iter()
            .map(|c| (c.channel.to_string(), c.delivery_rate))
            .collect(),
    }))
}

/// Cost totals for the current day, broken down both ways.
#[derive(Debug, Serialize)]
pub struct CostAnalysisView {
    /// Day bucket the costs cover.
    pub period: String,
    /// Sum of all message costs.
    pub total_cost: f64,
    /// Cost per acknowledged send.
    pub avg_cost_per_message: f64,
    /// Cost per channel.
    pub by_channel: BTreeMap<String, f64>,
    /// Cost per provider.
    pub by_provider: BTreeMap<String, f64>,
}

/// `GET /api/v1/analytics/cost-analysis`
pub async fn cost_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CostAnalysisView>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let analytics = state.dispatcher.analytics();
    let overview = analytics.overview(tenant).await?;
    let channels = analytics.by_channel(tenant).await?;
    let names: Vec<String> =
        state.registry.all().map(|a| a.name().to_string()).collect();
    let providers = analytics.by_provider(tenant, &names).await?;
    Ok(Json(CostAnalysisView {
        period: overview.period,
        total_cost: overview.total_cost,
        avg_cost_per_message: if overview.sent == 0 {
            0.0
        } else {
            overview.total_cost / overview.sent as f64
        },
        by_channel: channels
            .into_iter()
            .map(|c| (c.channel.to_string(), c.total_cost))
            .collect(),
        by_provider: providers
            .into_iter()
            .map(|p| (p.provider, p.total_cost))
            .collect(),
    }))
}
