//! WhatsApp Cloud API adapter.
//!
//! Graph API JSON with bearer auth. Free-form sends are only allowed
//! within the 24h customer-care window; outside it the provider-approved
//! template API must be used. Webhooks are signed with
//! `X-Hub-Signature-256` and carry both status updates for outbound
//! messages and inbound user messages that reopen the session window.

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

/// WhatsApp Cloud credentials and tuning.
#[derive(Debug, Clone)]
pub struct WhatsappConfig {
    /// Permanent access token for the business account.
    pub access_token: String,
    /// Phone number ID messages are sent from.
    pub phone_number_id: String,
    /// App secret used to verify webhook signatures.
    pub app_secret: String,
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

impl WhatsappConfig {
    /// Production Graph API origin.
    pub const DEFAULT_BASE_URL: &'static str = "https://graph.facebook.com";
}

/// WhatsApp Cloud backend.
#[derive(Debug)]
pub struct WhatsappAdapter {
    config: WhatsappConfig,
    client: reqwest::Client,
    sessions: SessionTracker,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

impl WhatsappAdapter {
    /// Builds the adapter with a shared session tracker.
    pub fn new(config: WhatsappConfig, sessions: SessionTracker) -> Result<Self, SendError> {
        let client = http::build_client(&config.http)?;
        Ok(Self { config, client, sessions })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/{}/messages",
            self.config.base_url, self.config.api_version, self.config.phone_number_id
        )
    }

    fn build_payload(&self, message: &Message) -> Result<serde_json::Value, SendError> {
        // Graph expects recipients without the leading plus.
        let to = message.to.trim_start_matches('+');

        if let Some(template) = &message.provider_template {
            let parameters: Vec<serde_json::Value> = template
                .params
                .iter()
                .map(|value| serde_json::json!({ "type": "text", "text": value }))
                .collect();
            return Ok(serde_json::json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "template",
                "template": {
                    "name": template.provider_template_id,
                    "language": { "code": template.language },
                    "components": [{ "type": "body", "parameters": parameters }],
                }
            }));
        }

        if !self.sessions.within_window(Channel::Whatsapp, &message.to) {
            return Err(SendError::PermanentReject("outside_session_window".into()));
        }

        if let (Some(media_url), Some(media_type)) = (&message.media_url, &message.media_type) {
            let kind = match media_type.split('/').next() {
                Some("image") => "image",
                Some("video") => "video",
                Some("audio") => "audio",
                _ => "document",
            };
            return Ok(serde_json::json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": kind,
                kind: { "link": media_url, "caption": message.body },
            }));
        }

        Ok(serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": message.body },
        }))
    }
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    value: ChangeValue,
}

#[derive(Debug, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    statuses: Vec<StatusUpdate>,
    #[serde(default)]
    messages: Vec<InboundMessage>,
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    id: String,
    status: String,
    timestamp: String,
    #[serde(default)]
    errors: Vec<StatusError>,
}

#[derive(Debug, Deserialize)]
struct StatusError {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    from: String,
}

fn status_from_wire(status: &str) -> Option<MessageStatus> {
    match status {
        "sent" => Some(MessageStatus::Sent),
        "delivered" => Some(MessageStatus::Delivered),
        "read" => Some(MessageStatus::Read),
        "failed" => Some(MessageStatus::Failed),
        _ => None,
    }
}

fn unix_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

#[async_trait::async_trait]
impl ProviderAdapter for WhatsappAdapter {
    async fn send(&self, message: &Message) -> Result<SendAck, SendError> {
        let payload = self.build_payload(message)?;

        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.config.access_token)
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
        let sent = body
            .messages
            .into_iter()
            .next()
            .ok_or_else(|| SendError::TransportError("empty messages array".into()))?;

        debug!(wamid = %sent.id, "whatsapp accepted message");
        Ok(SendAck {
            provider_message_id: sent.id,
            accepted_status: MessageStatus::Sent,
            cost: self.config.cost_per_message,
            currency: self.config.currency.clone(),
            estimated_delivery: None,
        })
    }

    async fn query_status(&self, _provider_message_id: &str) -> Result<MessageStatus, SendError> {
        // The Cloud API has no status polling; updates come via webhook.
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
            for change in entry.changes {
                for status in change.value.statuses {
                    let Some(new_status) = status_from_wire(&status.status) else { continue };
                    parsed.events.push(DeliveryEvent {
                        provider_name: self.name().to_string(),
                        provider_message_id: status.id.clone(),
                        new_status,
                        at: unix_timestamp(&status.timestamp),
                        error: status.errors.first().and_then(|e| e.title.clone()),
                        raw: serde_json::json!({ "id": status.id, "status": status.status }),
                    });
                }
                for inbound in change.value.messages {
                    let peer = format!("+{}", inbound.from.trim_start_matches('+'));
                    self.sessions.record_inbound(Channel::Whatsapp, &peer);
                    parsed.inbound_peers.push(peer);
                }
            }
        }
        Ok(parsed)
    }

    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    fn name(&self) -> &'static str {
        "whatsapp_cloud"
    }

    fn cost_estimate(&self) -> f64 {
        self.config.cost_per_message
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use courier_core::{ProviderTemplate, TestClock};
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::testutil::message;

    fn adapter(base_url: String) -> (WhatsappAdapter, SessionTracker) {
        let sessions = SessionTracker::new(Arc::new(TestClock::new()));
        let adapter = WhatsappAdapter::new(
            WhatsappConfig {
                access_token: "tok".into(),
                phone_number_id: "555000111".into(),
                app_secret: "app_secret".into(),
                base_url,
                api_version: "v19.0".into(),
                cost_per_message: 0.02,
                currency: "USD".into(),
                http: HttpConfig::default(),
            },
            sessions.clone(),
        )
        .unwrap();
        (adapter, sessions)
    }

    #[tokio::test]
    async fn free_form_outside_window_is_rejected() {
        let (adapter, _sessions) = adapter("http://unused".into());
        let msg = message(Channel::Whatsapp, "+14155550123", "hi");

        let err = adapter.send(&msg).await.unwrap_err();
        match err {
            SendError::PermanentReject(reason) => assert_eq!(reason, "outside_session_window"),
            other => panic!("expected PermanentReject, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn free_form_inside_window_sends_text() {
        let server = MockServer::start().await;
        let (adapter, sessions) = adapter(server.uri());
        sessions.record_inbound(Channel::Whatsapp, "+14155550123");

        Mock::given(method("POST"))
            .and(path("/v19.0/555000111/messages"))
            .and(header("Authorization", "Bearer tok"))
            .and(body_partial_json(serde_json::json!({
                "type": "text",
                "to": "14155550123",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{ "id": "wamid.A1" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = adapter.send(&message(Channel::Whatsapp, "+14155550123", "hi")).await.unwrap();
        assert_eq!(ack.provider_message_id, "wamid.A1");
        assert_eq!(ack.accepted_status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn template_send_bypasses_window() {
        let server = MockServer::start().await;
        let (adapter, _sessions) = adapter(server.uri());

        Mock::given(method("POST"))
            .and(path("/v19.0/555000111/messages"))
            .and(body_partial_json(serde_json::json!({
                "type": "template",
                "template": { "name": "order_update", "language": { "code": "en_US" } },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{ "id": "wamid.B2" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut msg = message(Channel::Whatsapp, "+14155550123", "");
        msg.provider_template = Some(ProviderTemplate {
            provider_template_id: "order_update".into(),
            language: "en_US".into(),
            params: vec!["Ada".into()],
        });

        let ack = adapter.send(&msg).await.unwrap();
        assert_eq!(ack.provider_message_id, "wamid.B2");
    }

    #[test]
    fn webhook_parses_statuses_and_reopens_sessions() {
        let (adapter, sessions) = adapter("http://unused".into());
        let body = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "statuses": [
                            { "id": "wamid.A1", "status": "delivered", "timestamp": "1724490000" }
                        ],
                        "messages": [ { "from": "14155550123" } ]
                    }
                }]
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
                url: "https://gateway.example.com/api/v1/whatsapp/webhook".into(),
                headers,
                body: bytes::Bytes::from(body),
            })
            .unwrap();

        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].new_status, MessageStatus::Delivered);
        assert_eq!(parsed.events[0].at.timestamp(), 1_724_490_000);
        assert_eq!(parsed.inbound_peers, vec!["+14155550123".to_string()]);
        assert!(sessions.within_window(Channel::Whatsapp, "+14155550123"));
    }
}
