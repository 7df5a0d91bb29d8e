//! HTTP request handlers.
//!
//! Tenancy is resolved from the `X-Tenant-Id` header on every scoped
//! endpoint; authentication in front of the gateway is expected to have
//! validated it.

pub mod analytics;
pub mod campaigns;
pub mod health;
pub mod messages;
pub mod templates;
pub mod webhooks;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use courier_core::{Channel, CoreError, Message, MessageId, MessageStatus, TenantId};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;

pub(crate) fn tenant_id(headers: &HeaderMap) -> Result<TenantId, ApiError> {
    let raw = headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError(CoreError::InvalidRequest("missing X-Tenant-Id header".into())))?;
    raw.parse::<Uuid>()
        .map(TenantId::from)
        .map_err(|_| ApiError(CoreError::InvalidRequest("X-Tenant-Id must be a UUID".into())))
}

pub(crate) fn parse_channel(raw: &str) -> Result<Channel, ApiError> {
    Channel::parse(raw).ok_or_else(|| ApiError(CoreError::UnsupportedChannel(raw.to_string())))
}

/// Client-facing view of a message record.
#[derive(Debug, Serialize)]
pub struct MessageView {
    /// Gateway-issued message ID.
    pub message_id: MessageId,
    /// Lifecycle status at response time.
    pub status: MessageStatus,
    /// Transport channel.
    pub channel: Channel,
    /// Normalised recipient address.
    pub to: String,
    /// Adapter that accepted the send, once one has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Provider-issued message ID, once acknowledged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    /// Cost charged so far.
    pub cost: f64,
    /// Currency of `cost`.
    pub currency: String,
    /// Last error description, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Admission time.
    pub created_at: DateTime<Utc>,
    /// Deferred send time, when scheduled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Provider acknowledgement time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    /// Delivery confirmation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    /// Read receipt time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    /// Completed re-dispatch rounds.
    pub retry_count: u32,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id,
            status: message.status,
            channel: message.channel,
            to: message.to.clone(),
            provider: message.provider_name.clone(),
            provider_message_id: message.provider_message_id.clone(),
            cost: message.cost,
            currency: message.currency.clone(),
            error: message.error.clone(),
            created_at: message.created_at,
            scheduled_for: message.scheduled_for,
            sent_at: message.sent_at,
            delivered_at: message.delivered_at,
            read_at: message.read_at,
            retry_count: message.retry_count,
        }
    }
}
