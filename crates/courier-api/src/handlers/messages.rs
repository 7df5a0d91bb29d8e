//! Send endpoints and status lookup.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use courier_core::{CoreError, MessageId, TenantId};
use courier_dispatch::SendRequest;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{parse_channel, tenant_id, MessageView};
use crate::{error::ApiError, state::AppState};

/// Send request body. `channel` is taken from the path on channel-scoped
/// routes and required in the body on the unified route.
#[derive(Debug, Deserialize)]
pub struct SendBody {
    /// Transport channel; unified route only.
    pub channel: Option<String>,
    /// Sender identity.
    #[serde(default)]
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Literal body. Mutually exclusive with `template_id`.
    pub body: Option<String>,
    /// Attached media URL.
    pub media_url: Option<String>,
    /// MIME type of the attached media.
    pub media_type: Option<String>,
    /// Template to render the body from.
    pub template_id: Option<Uuid>,
    /// Parameters substituted into the template.
    #[serde(default)]
    pub template_params: HashMap<String, String>,
    /// Priority 1..=10, defaults to 5.
    pub priority: Option<u8>,
    /// Deferred send time; must be in the future.
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Caller-supplied opaque metadata, echoed on the record.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SendBody {
    fn into_request(self, tenant_id: TenantId, channel: courier_core::Channel) -> SendRequest {
        SendRequest {
            tenant_id,
            channel,
            from: self.from,
            to: self.to,
            body: self.body,
            media_url: self.media_url,
            media_type: self.media_type,
            template_id: self.template_id.map(Into::into),
            template_params: self.template_params,
            priority: self.priority,
            scheduled_for: self.scheduled_for,
            metadata: self.metadata,
            campaign_id: None,
        }
    }
}

/// `POST /api/v1/messages/send`
///
/// Unified send across all channels. Immediate sends block until a
/// terminal or `sent` state; scheduled sends return `202 Accepted` with
/// the stored record.
pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SendBody>,
) -> Result<Response, ApiError> {
    let tenant = tenant_id(&headers)?;
    let channel = body
        .channel
        .as_deref()
        .ok_or_else(|| ApiError(CoreError::InvalidRequest("channel is required".into())))
        .and_then(parse_channel)?;
    dispatch(&state, body.into_request(tenant, channel)).await
}

/// `POST /api/v1/{channel}/send`
pub async fn send_on_channel(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SendBody>,
) -> Result<Response, ApiError> {
    let tenant = tenant_id(&headers)?;
    let channel = parse_channel(&channel)?;
    dispatch(&state, body.into_request(tenant, channel)).await
}

async fn dispatch(state: &AppState, request: SendRequest) -> Result<Response, ApiError> {
    if let Some(at) = request.scheduled_for {
        let message = state.dispatcher.admit_deferred(request).await?;
        state.scheduler.schedule(message.id, at);
        return Ok((StatusCode::ACCEPTED, Json(MessageView::from(&message))).into_response());
    }
    let message = state.dispatcher.send_now(request).await?;
    Ok(Json(MessageView::from(&message)).into_response())
}

/// Bulk send body: one message fanned out to many recipients.
#[derive(Debug, Deserialize)]
pub struct BulkSendBody {
    /// Sender identity.
    #[serde(default)]
    pub from: String,
    /// Recipient addresses.
    pub recipients: Vec<String>,
    /// Literal body. Mutually exclusive with `template_id`.
    pub body: Option<String>,
    /// Template to render the body from.
    pub template_id: Option<Uuid>,
    /// Parameters substituted into the template.
    #[serde(default)]
    pub template_params: HashMap<String, String>,
    /// Priority 1..=10, defaults to 5.
    pub priority: Option<u8>,
}

/// A recipient the gateway refused during bulk admission.
#[derive(Debug, Serialize)]
pub struct BulkRejection {
    /// Recipient as supplied.
    pub to: String,
    /// Why admission failed.
    pub error: String,
    /// Machine-readable code.
    pub code: &'static str,
}

/// Bulk send outcome.
#[derive(Debug, Serialize)]
pub struct BulkSendResponse {
    /// Messages admitted and queued.
    pub accepted: Vec<MessageView>,
    /// Recipients refused, each with its reason.
    pub rejected: Vec<BulkRejection>,
}

/// `POST /api/v1/sms/send/bulk`
///
/// Admits each recipient independently; one bad address does not sink
/// the batch. Messages are queued for the worker pool rather than sent
/// inline.
pub async fn send_bulk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BulkSendBody>,
) -> Result<(StatusCode, Json<BulkSendResponse>), ApiError> {
    let tenant = tenant_id(&headers)?;
    if body.recipients.is_empty() {
        return Err(ApiError(CoreError::InvalidRequest("recipients must not be empty".into())));
    }

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for to in &body.recipients {
        let request = SendRequest {
            tenant_id: tenant,
            channel: courier_core::Channel::Sms,
            from: body.from.clone(),
            to: to.clone(),
            body: body.body.clone(),
            template_id: body.template_id.map(Into::into),
            template_params: body.template_params.clone(),
            priority: body.priority,
            ..SendRequest::default()
        };
        match state.dispatcher.enqueue(request).await {
            Ok(message) => accepted.push(MessageView::from(&message)),
            Err(error) => rejected.push(BulkRejection {
                to: to.clone(),
                error: error.to_string(),
                code: error.code(),
            }),
        }
    }

    let status = if accepted.is_empty() { StatusCode::BAD_REQUEST } else { StatusCode::ACCEPTED };
    Ok((status, Json(BulkSendResponse { accepted, rejected })))
}

/// `GET /api/v1/{channel}/status/{message_id}`
pub async fn message_status(
    State(state): State<AppState>,
    Path((channel, message_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> Result<Json<MessageView>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let channel = parse_channel(&channel)?;
    let id = MessageId::from(message_id);

    let message = state
        .dispatcher
        .inflight()
        .get(id)
        .await?
        .filter(|m| m.tenant_id == tenant && m.channel == channel)
        .ok_or_else(|| ApiError(CoreError::NotFound(format!("message {id}"))))?;
    Ok(Json(MessageView::from(&message)))
}
