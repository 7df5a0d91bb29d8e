//! The adapter contract every provider backend implements.
//!
//! A single polymorphic surface over heterogeneous vendor APIs keeps the
//! dispatcher free of channel logic: wire format, auth, address
//! normalisation, webhook verification, and pricing all live behind this
//! trait.

use std::{collections::HashMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use courier_core::{Channel, DeliveryEvent, Message, MessageStatus};
use thiserror::Error;

/// Successful send acknowledgement from a provider.
#[derive(Debug, Clone)]
pub struct SendAck {
    /// Provider-issued message identifier.
    pub provider_message_id: String,

    /// Status the provider reports at acceptance, `Sent` or `Queued`.
    pub accepted_status: MessageStatus,

    /// Cost charged for this message.
    pub cost: f64,

    /// Currency of `cost`, verbatim from the provider.
    pub currency: String,

    /// Provider's delivery estimate, when it gives one.
    pub estimated_delivery: Option<DateTime<Utc>>,
}

/// Closed failure taxonomy for provider sends.
///
/// The dispatcher's candidate walk is driven entirely by these variants;
/// vendor-specific error bodies are reduced to one of them inside the
/// adapter and kept only as diagnostic text.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// Recipient rejected by the provider (malformed, blacklisted, ...).
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Credentials rejected. The adapter is unhealthy for the window.
    #[error("authentication failed: {0}")]
    Unauthenticated(String),

    /// Provider throttled us. Not counted as a failure.
    #[error("rate limited by provider")]
    RateLimited {
        /// Provider's back-off hint, when present.
        retry_after: Option<Duration>,
    },

    /// Provider returned 5xx or is unreachable at the HTTP level.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider permanently refused this message (policy, session window,
    /// unapproved template, ...). Never retried.
    #[error("permanently rejected: {0}")]
    PermanentReject(String),

    /// Network-level failure before a provider verdict (timeout, connect
    /// error, TLS).
    #[error("transport error: {0}")]
    TransportError(String),

    /// The adapter does not implement this operation.
    #[error("operation not supported by this provider")]
    Unsupported,
}

impl SendError {
    /// Whether the dispatcher may move on to another candidate or a later
    /// retry round.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ProviderUnavailable(_)
                | Self::TransportError(_)
                | Self::Unauthenticated(_)
        )
    }

    /// Whether the failure ends the message (no other candidates tried).
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::InvalidRecipient(_) | Self::PermanentReject(_))
    }

    /// Whether the failure counts against the adapter's health.
    pub const fn counts_as_failure(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_) | Self::TransportError(_))
    }

    /// Provider back-off hint, when one applies.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Webhook verification/parsing failures.
#[derive(Debug, Clone, Error)]
pub enum WebhookError {
    /// Signature or shared-secret check failed.
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// Payload did not match the provider's documented shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// An inbound webhook request as the adapter sees it.
///
/// Header names are lowercased by the ingress before handing off. The full
/// request URL is included because some schemes (Twilio) sign over it.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Full public URL the provider posted to.
    pub url: String,
    /// Request headers, names lowercased.
    pub headers: HashMap<String, String>,
    /// Raw request body.
    pub body: bytes::Bytes,
}

impl WebhookRequest {
    /// Header lookup by lowercased name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Outcome of parsing an inbound webhook.
#[derive(Debug, Clone, Default)]
pub struct ParsedWebhook {
    /// Status updates for outbound messages, to be CAS-applied.
    pub events: Vec<DeliveryEvent>,
    /// Peer addresses that sent us an inbound message, used to refresh the
    /// session window on channels that have one.
    pub inbound_peers: Vec<String>,
}

/// Contract implemented once per provider backend.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync + fmt::Debug {
    /// Sends a message and waits for the provider's acknowledgement.
    ///
    /// The message's recipient is already normalised for the channel.
    /// Template-based messages carry `template_params` plus the
    /// provider-side template identity resolved by the dispatcher.
    async fn send(&self, message: &Message) -> Result<SendAck, SendError>;

    /// Polls the provider for a message's current status.
    ///
    /// Adapters without a polling API return [`SendError::Unsupported`].
    async fn query_status(&self, provider_message_id: &str) -> Result<MessageStatus, SendError>;

    /// Verifies the request's signature and parses it into canonical
    /// delivery events.
    fn parse_webhook(&self, request: &WebhookRequest) -> Result<ParsedWebhook, WebhookError>;

    /// Channel this adapter serves.
    fn channel(&self) -> Channel;

    /// Constant adapter identity, unique within the registry.
    fn name(&self) -> &'static str;

    /// List price per message, used as a selector tiebreaker.
    fn cost_estimate(&self) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_and_terminal_are_disjoint() {
        let errors = [
            SendError::InvalidRecipient("x".into()),
            SendError::Unauthenticated("x".into()),
            SendError::RateLimited { retry_after: None },
            SendError::ProviderUnavailable("x".into()),
            SendError::PermanentReject("x".into()),
            SendError::TransportError("x".into()),
        ];
        for error in errors {
            assert!(!(error.is_retryable() && error.is_terminal()), "{error}");
        }
    }

    #[test]
    fn rate_limit_does_not_count_as_failure() {
        let error = SendError::RateLimited { retry_after: Some(Duration::from_secs(30)) };
        assert!(!error.counts_as_failure());
        assert_eq!(error.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn transport_and_unavailable_count_as_failure() {
        assert!(SendError::TransportError("timeout".into()).counts_as_failure());
        assert!(SendError::ProviderUnavailable("502".into()).counts_as_failure());
        assert!(!SendError::Unauthenticated("bad key".into()).counts_as_failure());
    }
}
