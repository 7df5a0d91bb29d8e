//! Facebook Messenger adapter.
//!
//! Graph Send API with the page access token as a query parameter.
//! Webhooks share Meta's `X-Hub-Signature-256` scheme with WhatsApp and
//! carry delivery watermarks per message ID plus inbound messages that
//! reopen the 24h messaging window. Read receipts arrive as a watermark
//! without message IDs and cannot be attributed to a single message, so
//! they are not turned into events.

use chrono::{DateTime, Utc};
use courier_core::{Channel, DeliveryEvent, Message, MessageStatus};
use serde::Deserialize;
use tracing::debug;

use crate::{
    adapter::{ParsedWebhook, ProviderAdapter, SendAck, SendError, WebhookError, WebhookRequest},
    http::{self, HttpConfig},
    session::SessionTracker,
    signature,
};

/// Messenger page credentials and tuning.
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// Page access token.
    pub page_access_token: String,
    /// App secret used to verify webhook signatures.
    pub app_secret: String,
    /// Token echoed back during the GET verification handshake.
    pub verify_token: String,
    /// Graph API origin, overridable for tests.
    pub base_url: String,
    /// Graph API version segment, e.g. `v19.0`.
    pub api_version: String,
    /// List price per message.
    pub cost_per_message: f64,
    /// Currency of the list price.
    pub currency: String,
    /// Outbound HTTP tuning.
    pub http: HttpConfig,
}

impl MessengerConfig {
    /// Production Graph API origin.
    pub const DEFAULT_BASE_URL: &'static str = "https://graph.facebook.com";
}

/// Messenger Send API backend.
#[derive(Debug)]
pub struct MessengerAdapter {
    config: MessengerConfig,
    client: reqwest::Client,
    sessions: SessionTracker,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Deserialize)]
struct MessagingEvent {
    #[serde(default)]
    sender: Option<Participant>,
    #[serde(default)]
    delivery: Option<Delivery>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Participant {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Delivery {
    #[serde(default)]
    mids: Vec<String>,
    watermark: i64,
}

impl MessengerAdapter {
    /// Builds the adapter with a shared session tracker.
    pub fn new(config: MessengerConfig, sessions: SessionTracker) -> Result<Self, SendError> {
        let client = http::build_client(&config.http)?;
        Ok(Self { config, client, sessions })
    }

    /// Token the webhook registration handshake must present.
    pub fn verify_token(&self) -> &str {
        &self.config.verify_token
    }

    fn send_url(&self) -> String {
        format!("{}/{}/me/messages", self.config.base_url, self.config.api_version)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for MessengerAdapter {
    async fn send(&self, message: &Message) -> Result<SendAck, SendError> {
        // Messenger has no template API; outside the messaging window
        // nothing can be sent free-form.
        if message.provider_template.is_none()
            && !self.sessions.within_window(Channel::Messenger, &message.to)
        {
            return Err(SendError::PermanentReject("outside_session_window".into()));
        }

        let content = match (&message.media_url, &message.media_type) {
            (Some(url), Some(mt)) => {
                let kind = match mt.split('/').next() {
                    Some("image") => "image",
                    Some("video") => "video",
                    Some("audio") => "audio",
                    _ => "file",
                };
                serde_json::json!({
                    "attachment": { "type": kind, "payload": { "url": url } }
                })
            },
            _ => serde_json::json!({ "text": message.body }),
        };

        let payload = serde_json::json!({
            "recipient": { "id": message.to },
            "messaging_type": "RESPONSE",
            "message": content,
        });

        let response = self
            .client
            .post(self.send_url())
            .query(&[("access_token", self.config.page_access_token.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| http::transport_error(&e))?;

        if !response.status().is_success() {
            return Err(http::status_error(response).await);
        }

        let body: SendResponse = response
            .json()
            .await
            .map_err(|e| SendError::TransportError(format!("malformed response: {e}")))?;

        debug!(mid = %body.message_id, "messenger accepted message");
        Ok(SendAck {
            provider_message_id: body.message_id,
            accepted_status: MessageStatus::Sent,
            cost: self.config.cost_per_message,
            currency: self.config.currency.clone(),
            estimated_delivery: None,
        })
    }

    async fn query_status(&self, _provider_message_id: &str) -> Result<MessageStatus, SendError> {
        Err(SendError::Unsupported)
    }

    fn parse_webhook(&self, request: &WebhookRequest) -> Result<ParsedWebhook, WebhookError> {
        signature::verify_hub_signature(
            &request.body,
            request.header("x-hub-signature-256"),
            &self.config.app_secret,
        )?;

        let payload: WebhookPayload = serde_json::from_slice(&request.body)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let mut parsed = ParsedWebhook::default();
        for entry in payload.entry {
            for event in entry.messaging {
                if let Some(delivery) = event.delivery {
                    let at = DateTime::from_timestamp_millis(delivery.watermark)
                        .unwrap_or_else(Utc::now);
                    for mid in delivery.mids {
                        parsed.events.push(DeliveryEvent {
                            provider_name: self.name().to_string(),
                            provider_message_id: mid.clone(),
                            new_status: MessageStatus::Delivered,
                            at,
                            error: None,
                            raw: serde_json::json!({ "mid": mid, "watermark": delivery.watermark }),
                        });
                    }
                }
                if event.message.is_some() {
                    if let Some(sender) = event.sender {
                        self.sessions.record_inbound(Channel::Messenger, &sender.id);
                        parsed.inbound_peers.push(sender.id);
                    }
                }
            }
        }
        Ok(parsed)
    }

    fn channel(&self) -> Channel {
        Channel::Messenger
    }

    fn name(&self) -> &'static str {
        "messenger"
    }

    fn cost_estimate(&self) -> f64 {
        self.config.cost_per_message
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use courier_core::TestClock;
    use wiremock::{
        matchers::{body_partial_json, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::testutil::message;

    fn adapter(base_url: String) -> (MessengerAdapter, SessionTracker) {
        let sessions = SessionTracker::new(Arc::new(TestClock::new()));
        let adapter = MessengerAdapter::new(
            MessengerConfig {
                page_access_token: "page_tok".into(),
                app_secret: "app_secret".into(),
                verify_token: "verify_me".into(),
                base_url,
                api_version: "v19.0".into(),
                cost_per_message: 0.0,
                currency: "USD".into(),
                http: HttpConfig::default(),
            },
            sessions.clone(),
        )
        .unwrap();
        (adapter, sessions)
    }

    #[tokio::test]
    async fn send_inside_window_posts_to_send_api() {
        let server = MockServer::start().await;
        let (adapter, sessions) = adapter(server.uri());
        sessions.record_inbound(Channel::Messenger, "24085345005");

        Mock::given(method("POST"))
            .and(path("/v19.0/me/messages"))
            .and(query_param("access_token", "page_tok"))
            .and(body_partial_json(serde_json::json!({
                "recipient": { "id": "24085345005" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "recipient_id": "24085345005",
                "message_id": "m_AG5Hz"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = adapter.send(&message(Channel::Messenger, "24085345005", "hi")).await.unwrap();
        assert_eq!(ack.provider_message_id, "m_AG5Hz");
    }

    #[tokio::test]
    async fn send_outside_window_is_rejected() {
        let (adapter, _sessions) = adapter("http://unused".into());
        let err =
            adapter.send(&message(Channel::Messenger, "24085345005", "hi")).await.unwrap_err();
        assert!(matches!(err, SendError::PermanentReject(_)));
    }

    #[test]
    fn webhook_turns_delivery_mids_into_events() {
        let (adapter, sessions) = adapter("http://unused".into());
        let body = serde_json::json!({
            "entry": [{
                "messaging": [
                    {
                        "sender": { "id": "24085345005" },
                        "delivery": { "mids": ["m_AG5Hz"], "watermark": 1724490000000i64 }
                    },
                    {
                        "sender": { "id": "24085345005" },
                        "message": { "text": "hello back" }
                    }
                ]
            }]
        })
        .to_string();

        let mut headers = HashMap::new();
        headers.insert(
            "x-hub-signature-256".to_string(),
            signature::hub_signature(body.as_bytes(), "app_secret"),
        );

        let parsed = adapter
            .parse_webhook(&WebhookRequest {
                url: "https://gateway.example.com/api/v1/messenger/webhook".into(),
                headers,
                body: bytes::Bytes::from(body),
            })
            .unwrap();

        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].provider_message_id, "m_AG5Hz");
        assert_eq!(parsed.events[0].new_status, MessageStatus::Delivered);
        assert!(sessions.within_window(Channel::Messenger, "24085345005"));
    }
}
