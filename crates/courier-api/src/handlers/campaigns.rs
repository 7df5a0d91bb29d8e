//! Campaign lifecycle endpoints.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use courier_core::{
    Campaign, CampaignId, CampaignStats, CampaignStatus, CoreError, TenantId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{parse_channel, tenant_id};
use crate::{error::ApiError, state::AppState};

/// Campaign creation body.
#[derive(Debug, Deserialize)]
pub struct CreateCampaignBody {
    /// Human-readable name.
    pub name: String,
    /// Transport channel for every message.
    pub channel: String,
    /// Sender identity.
    #[serde(default)]
    pub from: String,
    /// Recipient addresses.
    pub recipients: Vec<String>,
    /// Literal body, used when no template is set.
    #[serde(default)]
    pub body: String,
    /// Template to render per recipient.
    pub template_id: Option<Uuid>,
    /// Parameters substituted into the template.
    #[serde(default)]
    pub template_params: HashMap<String, String>,
    /// Maximum messages emitted per second.
    pub rate_cap: Option<u32>,
    /// When the campaign should start, for scheduled campaigns.
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// `POST /api/v1/campaigns`
pub async fn create_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateCampaignBody>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let tenant = tenant_id(&headers)?;
    let channel = parse_channel(&body.channel)?;
    if body.recipients.is_empty() {
        return Err(ApiError(CoreError::InvalidRequest("recipients must not be empty".into())));
    }
    if body.body.is_empty() && body.template_id.is_none() {
        return Err(ApiError(CoreError::InvalidRequest(
            "either body or template_id is required".into(),
        )));
    }

    let now = state.dispatcher.clock().now_utc();
    let status = if body.scheduled_at.is_some() {
        CampaignStatus::Scheduled
    } else {
        CampaignStatus::Draft
    };
    let campaign = state.dispatcher.campaigns().create(Campaign {
        id: CampaignId::new(),
        tenant_id: tenant,
        name: body.name,
        channel,
        status,
        from: body.from,
        recipients: body.recipients,
        body: body.body,
        template_id: body.template_id.map(Into::into),
        template_params: body.template_params,
        rate_cap: body.rate_cap.unwrap_or(50),
        scheduled_at: body.scheduled_at,
        cursor: 0,
        stats: CampaignStats::default(),
        created_at: now,
        started_at: None,
        completed_at: None,
    });
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// `GET /api/v1/campaigns`
pub async fn list_campaigns(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Campaign>>, ApiError> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(state.dispatcher.campaigns().list(tenant)))
}

/// `GET /api/v1/campaigns/{id}`
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Campaign>, ApiError> {
    let (tenant, id) = scope(&headers, id)?;
    Ok(Json(state.dispatcher.campaigns().get(tenant, id)?))
}

/// `PUT /api/v1/campaigns/{id}`
///
/// Replaces a draft or scheduled campaign's definition. Campaigns that
/// have started keep their cursor and counters and cannot be edited.
pub async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<CreateCampaignBody>,
) -> Result<Json<Campaign>, ApiError> {
    let (tenant, id) = scope(&headers, id)?;
    let channel = parse_channel(&body.channel)?;
    if body.recipients.is_empty() {
        return Err(ApiError(CoreError::InvalidRequest("recipients must not be empty".into())));
    }
    if body.body.is_empty() && body.template_id.is_none() {
        return Err(ApiError(CoreError::InvalidRequest(
            "either body or template_id is required".into(),
        )));
    }

    let status = if body.scheduled_at.is_some() {
        CampaignStatus::Scheduled
    } else {
        CampaignStatus::Draft
    };
    let campaign = state.dispatcher.campaigns().update(Campaign {
        id,
        tenant_id: tenant,
        name: body.name,
        channel,
        status,
        from: body.from,
        recipients: body.recipients,
        body: body.body,
        template_id: body.template_id.map(Into::into),
        template_params: body.template_params,
        rate_cap: body.rate_cap.unwrap_or(50),
        scheduled_at: body.scheduled_at,
        cursor: 0,
        stats: CampaignStats::default(),
        created_at: state.dispatcher.clock().now_utc(),
        started_at: None,
        completed_at: None,
    })?;
    Ok(Json(campaign))
}

/// `DELETE /api/v1/campaigns/{id}`
pub async fn delete_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let (tenant, id) = scope(&headers, id)?;
    state.dispatcher.campaigns().delete(tenant, id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/campaigns/{id}/start`
///
/// Starts a draft or scheduled campaign, or resumes a paused one from
/// its cursor.
pub async fn start_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Campaign>, ApiError> {
    let (tenant, id) = scope(&headers, id)?;
    Ok(Json(state.runner.start(tenant, id)?))
}

/// `POST /api/v1/campaigns/{id}/pause`
pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Campaign>, ApiError> {
    let (tenant, id) = scope(&headers, id)?;
    Ok(Json(state.runner.pause(tenant, id)?))
}

/// `POST /api/v1/campaigns/{id}/cancel`
pub async fn cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Campaign>, ApiError> {
    let (tenant, id) = scope(&headers, id)?;
    Ok(Json(state.runner.cancel(tenant, id)?))
}

/// Campaign progress counters plus the derived delivery rate.
#[derive(Debug, Serialize)]
pub struct CampaignStatsView {
    /// Campaign the counters belong to.
    pub campaign_id: CampaignId,
    /// Lifecycle status.
    pub status: CampaignStatus,
    /// Index of the next recipient to attempt.
    pub cursor: usize,
    /// Live counters.
    #[serde(flatten)]
    pub stats: CampaignStats,
    /// Delivered over sent, in [0, 1].
    pub delivery_rate: f64,
}

/// `GET /api/v1/campaigns/{id}/stats`
pub async fn campaign_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<CampaignStatsView>, ApiError> {
    let (tenant, id) = scope(&headers, id)?;
    let campaign = state.dispatcher.campaigns().get(tenant, id)?;
    Ok(Json(CampaignStatsView {
        campaign_id: campaign.id,
        status: campaign.status,
        cursor: campaign.cursor,
        delivery_rate: campaign.stats.delivery_rate(),
        stats: campaign.stats,
    }))
}

fn scope(headers: &HeaderMap, id: Uuid) -> Result<(TenantId, CampaignId), ApiError> {
    Ok((tenant_id(headers)?, CampaignId::from(id)))
}
