//! Provider webhook ingress.
//!
//! All state transitions driven by providers flow through here: the
//! adapter verifies the signature and parses the payload into canonical
//! delivery events, then each event is CAS-applied to the inflight
//! record. Events for unknown provider IDs (records past their grace
//! window) are acknowledged anyway; the provider retrying cannot help.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use courier_core::CoreError;
use courier_providers::{ProviderAdapter, WebhookError, WebhookRequest};
use serde::Serialize;
use tracing::{debug, warn};

use super::parse_channel;
use crate::{error::ApiError, state::AppState};

/// Webhook ingestion outcome, mostly useful for provider dashboards.
#[derive(Debug, Serialize)]
pub struct WebhookReceipt {
    /// Delivery events parsed from the payload.
    pub events: usize,
    /// Events that advanced a message's state.
    pub applied: usize,
    /// Inbound peer messages observed (session-window channels).
    pub inbound: usize,
}

/// `POST /api/v1/{channel}/webhook/{provider}`
pub async fn provider_webhook(
    State(state): State<AppState>,
    Path((channel, provider)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookReceipt>, ApiError> {
    let channel = parse_channel(&channel)?;
    let adapter = state
        .registry
        .by_name(&provider)
        .filter(|a| a.channel() == channel)
        .cloned()
        .ok_or_else(|| ApiError(CoreError::NotFound(format!("provider {provider}"))))?;
    ingest(&state, &adapter, &uri, &headers, body).await
}

/// `POST /api/v1/{channel}/webhook`
///
/// Channel-default route for providers that register a single callback
/// URL. Resolves to the channel's first registered adapter.
pub async fn channel_webhook(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookReceipt>, ApiError> {
    let channel = parse_channel(&channel)?;
    let adapter = state.registry.candidates(channel)?[0].clone();
    ingest(&state, &adapter, &uri, &headers, body).await
}

async fn ingest(
    state: &AppState,
    adapter: &Arc<dyn ProviderAdapter>,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookReceipt>, ApiError> {
    let request = WebhookRequest {
        url: format!("{}{uri}", state.public_base_url),
        headers: header_map(headers),
        body,
    };

    let parsed = adapter.parse_webhook(&request).map_err(|error| match error {
        WebhookError::SignatureInvalid(m) => ApiError(CoreError::SignatureInvalid(m)),
        WebhookError::MalformedPayload(m) => ApiError(CoreError::InvalidRequest(m)),
    })?;

    let mut applied = 0;
    for event in &parsed.events {
        match state.dispatcher.apply_delivery_event(event).await {
            Ok(outcome) if outcome.transitioned => applied += 1,
            Ok(_) => debug!(
                provider = %event.provider_name,
                provider_message_id = %event.provider_message_id,
                status = ?event.new_status,
                "stale webhook event, timestamps patched only"
            ),
            Err(CoreError::NotFound(_)) => warn!(
                provider = %event.provider_name,
                provider_message_id = %event.provider_message_id,
                "webhook event for unknown message, acknowledged"
            ),
            Err(error) => return Err(error.into()),
        }
    }

    Ok(Json(WebhookReceipt {
        events: parsed.events.len(),
        applied,
        inbound: parsed.inbound_peers.len(),
    }))
}

/// `POST /api/v1/messenger/webhook`
///
/// Separate from the parameterised route because the same path also
/// serves Meta's GET verification handshake.
pub async fn messenger_webhook(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookReceipt>, ApiError> {
    let adapter = state.registry.candidates(courier_core::Channel::Messenger)?[0].clone();
    ingest(&state, &adapter, &uri, &headers, body).await
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// `GET /api/v1/messenger/webhook`
///
/// Meta's registration handshake: echo `hub.challenge` when
/// `hub.verify_token` matches, 403 otherwise.
pub async fn messenger_verify(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token");
    let challenge = params.get("hub.challenge");

    match (&state.messenger_verify_token, mode, token, challenge) {
        (Some(expected), Some("subscribe"), Some(token), Some(challenge)) if token == expected => {
            challenge.clone().into_response()
        },
        _ => {
            warn!("messenger webhook verification rejected");
            StatusCode::FORBIDDEN.into_response()
        },
    }
}
