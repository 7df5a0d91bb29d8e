//! Telegram Bot API adapter.
//!
//! JSON API keyed by the bot token in the URL. Telegram has no delivery
//! receipts; a successful `sendMessage` is as far as its status story
//! goes, so the adapter acknowledges with `Sent` and its webhook produces
//! inbound updates only. Webhook authenticity uses the secret token header
//! registered with `setWebhook`.

use chrono::Utc;
use courier_core::{Channel, Message, MessageStatus};
use serde::Deserialize;
use tracing::debug;

use crate::{
    adapter::{ParsedWebhook, ProviderAdapter, SendAck, SendError, WebhookError, WebhookRequest},
    http::{self, HttpConfig},
    signature,
};

/// Telegram bot credentials and tuning.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather.
    pub bot_token: String,
    /// API origin, overridable for tests.
    pub base_url: String,
    /// Secret token registered with `setWebhook`, echoed back in
    /// `X-Telegram-Bot-Api-Secret-Token`.
    pub webhook_secret: String,
    /// List price per message (typically zero).
    pub cost_per_message: f64,
    /// Currency of the list price.
    pub currency: String,
    /// Outbound HTTP tuning.
    pub http: HttpConfig,
}

impl TelegramConfig {
    /// Production API origin.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.telegram.org";
}

/// Telegram Bot backend.
#[derive(Debug)]
pub struct TelegramAdapter {
    config: TelegramConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<SentMessage>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Update {
    #[serde(default)]
    message: Option<InboundMessage>,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

impl TelegramAdapter {
    /// Builds the adapter and its pooled client.
    pub fn new(config: TelegramConfig) -> Result<Self, SendError> {
        let client = http::build_client(&config.http)?;
        Ok(Self { config, client })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.config.base_url, self.config.bot_token, method)
    }

    fn payload_for(&self, message: &Message) -> (&'static str, serde_json::Value) {
        match (&message.media_url, message.media_type.as_deref()) {
            (Some(url), Some(mt)) if mt.starts_with("image/") => (
                "sendPhoto",
                serde_json::json!({
                    "chat_id": message.to,
                    "photo": url,
                    "caption": message.body,
                }),
            ),
            (Some(url), _) => (
                "sendDocument",
                serde_json::json!({
                    "chat_id": message.to,
                    "document": url,
                    "caption": message.body,
                }),
            ),
            (None, _) => (
                "sendMessage",
                serde_json::json!({
                    "chat_id": message.to,
                    "text": message.body,
                }),
            ),
        }
    }

    fn api_error(body: ApiResponse) -> SendError {
        let description = body.description.unwrap_or_else(|| "unknown error".into());
        if let Some(retry_after) = body.parameters.and_then(|p| p.retry_after) {
            return SendError::RateLimited {
                retry_after: Some(std::time::Duration::from_secs(retry_after)),
            };
        }
        if description.contains("chat not found") || description.contains("user is deactivated") {
            return SendError::InvalidRecipient(description);
        }
        if description.contains("bot was blocked") {
            return SendError::PermanentReject(description);
        }
        SendError::ProviderUnavailable(description)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for TelegramAdapter {
    async fn send(&self, message: &Message) -> Result<SendAck, SendError> {
        let (method, payload) = self.payload_for(message);

        let response = self
            .client
            .post(self.method_url(method))
            .json(&payload)
            .send()
            .await
            .map_err(|e| http::transport_error(&e))?;

        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| SendError::TransportError(format!("malformed response: {e}")))?;

        if !body.ok {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(SendError::Unauthenticated(
                    body.description.unwrap_or_else(|| "401".into()),
                ));
            }
            return Err(Self::api_error(body));
        }

        let sent = body
            .result
            .ok_or_else(|| SendError::TransportError("ok response without result".into()))?;

        debug!(message_id = sent.message_id, "telegram accepted message");
        Ok(SendAck {
            provider_message_id: sent.message_id.to_string(),
            accepted_status: MessageStatus::Sent,
            cost: self.config.cost_per_message,
            currency: self.config.currency.clone(),
            estimated_delivery: Some(Utc::now()),
        })
    }

    async fn query_status(&self, _provider_message_id: &str) -> Result<MessageStatus, SendError> {
        Err(SendError::Unsupported)
    }

    fn parse_webhook(&self, request: &WebhookRequest) -> Result<ParsedWebhook, WebhookError> {
        signature::verify_shared_secret(
            "X-Telegram-Bot-Api-Secret-Token",
            request.header("x-telegram-bot-api-secret-token"),
            &self.config.webhook_secret,
        )?;

        let update: Update = serde_json::from_slice(&request.body)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let mut parsed = ParsedWebhook::default();
        if let Some(inbound) = update.message {
            parsed.inbound_peers.push(inbound.chat.id.to_string());
        }
        Ok(parsed)
    }

    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    fn name(&self) -> &'static str {
        "telegram_bot"
    }

    fn cost_estimate(&self) -> f64 {
        self.config.cost_per_message
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use wiremock::{
        matchers::{body_partial_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::testutil::message;

    fn adapter(base_url: String) -> TelegramAdapter {
        TelegramAdapter::new(TelegramConfig {
            bot_token: "123:abc".into(),
            base_url,
            webhook_secret: "wh_secret".into(),
            cost_per_message: 0.0,
            currency: "USD".into(),
            http: HttpConfig::default(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn send_text_uses_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(serde_json::json!({ "chat_id": "987654321" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": { "message_id": 44 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ack =
            adapter(server.uri()).send(&message(Channel::Telegram, "987654321", "hi")).await.unwrap();
        assert_eq!(ack.provider_message_id, "44");
        assert_eq!(ack.accepted_status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn chat_not_found_is_invalid_recipient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "ok": false,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let err =
            adapter(server.uri()).send(&message(Channel::Telegram, "1", "hi")).await.unwrap_err();
        assert!(matches!(err, SendError::InvalidRecipient(_)));
    }

    #[tokio::test]
    async fn flood_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "ok": false,
                "description": "Too Many Requests: retry after 7",
                "parameters": { "retry_after": 7 }
            })))
            .mount(&server)
            .await;

        let err =
            adapter(server.uri()).send(&message(Channel::Telegram, "1", "hi")).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(7)));
    }

    #[test]
    fn webhook_checks_secret_token_and_extracts_peer() {
        let adapter = adapter("http://unused".into());
        let body = serde_json::json!({ "message": { "chat": { "id": 987654321 } } }).to_string();

        let mut headers = HashMap::new();
        headers.insert("x-telegram-bot-api-secret-token".to_string(), "wh_secret".to_string());
        let parsed = adapter
            .parse_webhook(&WebhookRequest {
                url: "https://gateway.example.com/api/v1/telegram/webhook".into(),
                headers,
                body: bytes::Bytes::from(body.clone()),
            })
            .unwrap();
        assert!(parsed.events.is_empty());
        assert_eq!(parsed.inbound_peers, vec!["987654321".to_string()]);

        let err = adapter
            .parse_webhook(&WebhookRequest {
                url: "https://gateway.example.com/api/v1/telegram/webhook".into(),
                headers: HashMap::new(),
                body: bytes::Bytes::from(body),
            })
            .unwrap_err();
        assert!(matches!(err, WebhookError::SignatureInvalid(_)));
    }
}
