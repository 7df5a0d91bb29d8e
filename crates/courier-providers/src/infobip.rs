//! Infobip SMS adapter.
//!
//! JSON REST API authenticated with an `App` API key. Delivery reports
//! arrive as JSON posts carrying a configurable shared-secret header.

use chrono::{DateTime, Utc};
use courier_core::{Channel, DeliveryEvent, Message, MessageStatus};
use serde::Deserialize;
use tracing::debug;

use crate::{
    adapter::{ParsedWebhook, ProviderAdapter, SendAck, SendError, WebhookError, WebhookRequest},
    http::{self, HttpConfig},
    signature,
};

/// Infobip credentials and tuning.
#[derive(Debug, Clone)]
pub struct InfobipConfig {
    /// API key sent as `Authorization: App <key>`.
    pub api_key: String,
    /// Account-specific API origin, e.g. `https://xxxxx.api.infobip.com`.
    pub base_url: String,
    /// List price per message.
    pub cost_per_message: f64,
    /// Currency of the list price.
    pub currency: String,
    /// Header name the delivery-report subscription is configured to send.
    pub webhook_secret_header: String,
    /// Expected value of that header.
    pub webhook_secret: String,
    /// Outbound HTTP tuning.
    pub http: HttpConfig,
}

/// Infobip SMS backend.
#[derive(Debug)]
pub struct InfobipAdapter {
    config: InfobipConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    #[serde(rename = "messageId")]
    message_id: String,
    status: GroupStatus,
}

#[derive(Debug, Deserialize)]
struct GroupStatus {
    #[serde(rename = "groupName")]
    group_name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeliveryReport {
    results: Vec<ReportEntry>,
}

#[derive(Debug, Deserialize)]
struct ReportEntry {
    #[serde(rename = "messageId")]
    message_id: String,
    status: GroupStatus,
    #[serde(rename = "doneAt", default)]
    done_at: Option<DateTime<Utc>>,
    #[serde(default)]
    error: Option<GroupStatus>,
}

fn group_status(group_name: &str) -> Option<MessageStatus> {
    match group_name {
        "PENDING" => Some(MessageStatus::Queued),
        "DELIVERED" => Some(MessageStatus::Delivered),
        "REJECTED" | "UNDELIVERABLE" | "EXPIRED" => Some(MessageStatus::Failed),
        _ => None,
    }
}

impl InfobipAdapter {
    /// Builds the adapter and its pooled client.
    pub fn new(config: InfobipConfig) -> Result<Self, SendError> {
        let client = http::build_client(&config.http)?;
        Ok(Self { config, client })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for InfobipAdapter {
    async fn send(&self, message: &Message) -> Result<SendAck, SendError> {
        let payload = serde_json::json!({
            "messages": [{
                "from": message.from,
                "destinations": [{ "to": message.to }],
                "text": message.body,
            }]
        });

        let response = self
            .client
            .post(format!("{}/sms/2/text/advanced", self.config.base_url))
            .header("Authorization", format!("App {}", self.config.api_key))
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

        // A rejected group name on a 200 response is still a rejection.
        if sent.status.group_name == "REJECTED" {
            let reason = sent.status.description.unwrap_or_else(|| "rejected".into());
            return Err(SendError::PermanentReject(reason));
        }

        debug!(message_id = %sent.message_id, group = %sent.status.group_name, "infobip accepted message");
        Ok(SendAck {
            provider_message_id: sent.message_id,
            accepted_status: MessageStatus::Queued,
            cost: self.config.cost_per_message,
            currency: self.config.currency.clone(),
            estimated_delivery: None,
        })
    }

    async fn query_status(&self, provider_message_id: &str) -> Result<MessageStatus, SendError> {
        let response = self
            .client
            .get(format!("{}/sms/1/reports", self.config.base_url))
            .query(&[("messageId", provider_message_id)])
            .header("Authorization", format!("App {}", self.config.api_key))
            .send()
            .await
            .map_err(|e| http::transport_error(&e))?;

        if !response.status().is_success() {
            return Err(http::status_error(response).await);
        }

        let report: DeliveryReport = response
            .json()
            .await
            .map_err(|e| SendError::TransportError(format!("malformed response: {e}")))?;

        report
            .results
            .first()
            .and_then(|entry| group_status(&entry.status.group_name))
            .ok_or(SendError::Unsupported)
    }

    fn parse_webhook(&self, request: &WebhookRequest) -> Result<ParsedWebhook, WebhookError> {
        signature::verify_shared_secret(
            &self.config.webhook_secret_header,
            request.header(&self.config.webhook_secret_header.to_lowercase()),
            &self.config.webhook_secret,
        )?;

        let report: DeliveryReport = serde_json::from_slice(&request.body)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let mut parsed = ParsedWebhook::default();
        for entry in report.results {
            let Some(new_status) = group_status(&entry.status.group_name) else { continue };
            if new_status == MessageStatus::Queued {
                continue;
            }
            parsed.events.push(DeliveryEvent {
                provider_name: self.name().to_string(),
                provider_message_id: entry.message_id.clone(),
                new_status,
                at: entry.done_at.unwrap_or_else(Utc::now),
                error: entry.error.and_then(|e| e.description),
                raw: serde_json::json!({
                    "messageId": entry.message_id,
                    "status": entry.status.group_name,
                }),
            });
        }
        Ok(parsed)
    }

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn name(&self) -> &'static str {
        "infobip"
    }

    fn cost_estimate(&self) -> f64 {
        self.config.cost_per_message
    }
}
