//! Africa's Talking SMS adapter.
//!
//! Form-encoded API keyed with an `apiKey` header; the response nests
//! per-recipient results with a cost string like `"KES 0.8000"`. Delivery
//! reports are form-encoded posts guarded by a shared-secret header.

use chrono::Utc;
use courier_core::{Channel, DeliveryEvent, Message, MessageStatus};
use serde::Deserialize;
use tracing::debug;

use crate::{
    adapter::{ParsedWebhook, ProviderAdapter, SendAck, SendError, WebhookError, WebhookRequest},
    http::{self, HttpConfig},
    signature,
};

/// Africa's Talking credentials and tuning.
#[derive(Debug, Clone)]
pub struct AfricasTalkingConfig {
    /// Application username.
    pub username: String,
    /// API key sent in the `apiKey` header.
    pub api_key: String,
    /// API origin, overridable for tests.
    pub base_url: String,
    /// List price per message.
    pub cost_per_message: f64,
    /// Currency of the list price.
    pub currency: String,
    /// Header name carrying the delivery-report shared secret.
    pub webhook_secret_header: String,
    /// Expected value of that header.
    pub webhook_secret: String,
    /// Outbound HTTP tuning.
    pub http: HttpConfig,
}

impl AfricasTalkingConfig {
    /// Production API origin.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.africastalking.com";
}

/// Africa's Talking SMS backend.
#[derive(Debug)]
pub struct AfricasTalkingAdapter {
    config: AfricasTalkingConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(rename = "SMSMessageData")]
    data: SmsMessageData,
}

#[derive(Debug, Deserialize)]
struct SmsMessageData {
    #[serde(rename = "Recipients")]
    recipients: Vec<Recipient>,
}

#[derive(Debug, Deserialize)]
struct Recipient {
    #[serde(rename = "messageId")]
    message_id: String,
    #[serde(rename = "status")]
    status: String,
    #[serde(rename = "cost", default)]
    cost: Option<String>,
}

/// Splits `"KES 0.8000"` into amount and currency.
fn parse_cost(cost: &str) -> Option<(f64, String)> {
    let (currency, amount) = cost.split_once(' ')?;
    Some((amount.parse().ok()?, currency.to_string()))
}

impl AfricasTalkingAdapter {
    /// Builds the adapter and its pooled client.
    pub fn new(config: AfricasTalkingConfig) -> Result<Self, SendError> {
        let client = http::build_client(&config.http)?;
        Ok(Self { config, client })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AfricasTalkingAdapter {
    async fn send(&self, message: &Message) -> Result<SendAck, SendError> {
        let form = [
            ("username", self.config.username.as_str()),
            ("to", message.to.as_str()),
            ("from", message.from.as_str()),
            ("message", message.body.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/version1/messaging", self.config.base_url))
            .header("apiKey", &self.config.api_key)
            .header("Accept", "application/json")
            .form(&form)
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
        let recipient = body
            .data
            .recipients
            .into_iter()
            .next()
            .ok_or_else(|| SendError::InvalidRecipient("no recipients accepted".into()))?;

        if recipient.status != "Success" {
            return Err(SendError::PermanentReject(recipient.status));
        }

        let (cost, currency) = recipient
            .cost
            .as_deref()
            .and_then(parse_cost)
            .unwrap_or((self.config.cost_per_message, self.config.currency.clone()));

        debug!(message_id = %recipient.message_id, "africas talking accepted message");
        Ok(SendAck {
            provider_message_id: recipient.message_id,
            accepted_status: MessageStatus::Sent,
            cost,
            currency,
            estimated_delivery: None,
        })
    }

    async fn query_status(&self, _provider_message_id: &str) -> Result<MessageStatus, SendError> {
        // No polling API for individual messages; status comes via
        // delivery reports only.
        Err(SendError::Unsupported)
    }

    fn parse_webhook(&self, request: &WebhookRequest) -> Result<ParsedWebhook, WebhookError> {
        signature::verify_shared_secret(
            &self.config.webhook_secret_header,
            request.header(&self.config.webhook_secret_header.to_lowercase()),
            &self.config.webhook_secret,
        )?;

        let params: Vec<(String, String)> = form_urlencoded::parse(&request.body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let lookup =
            |name: &str| params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());

        let id = lookup("id")
            .ok_or_else(|| WebhookError::MalformedPayload("id missing".into()))?;
        let status = lookup("status")
            .ok_or_else(|| WebhookError::MalformedPayload("status missing".into()))?;

        let new_status = match status {
            "Success" => MessageStatus::Delivered,
            "Sent" | "Submitted" | "Buffered" => MessageStatus::Sent,
            "Failed" | "Rejected" => MessageStatus::Failed,
            other => {
                return Err(WebhookError::MalformedPayload(format!("unknown status: {other}")))
            },
        };

        Ok(ParsedWebhook {
            events: vec![DeliveryEvent {
                provider_name: self.name().to_string(),
                provider_message_id: id.to_string(),
                new_status,
                at: Utc::now(),
                error: lookup("failureReason").map(str::to_string),
                raw: serde_json::json!({ "id": id, "status": status }),
            }],
            inbound_peers: Vec::new(),
        })
    }

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn name(&self) -> &'static str {
        "africas_talking"
    }

    fn cost_estimate(&self) -> f64 {
        self.config.cost_per_message
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::testutil::sms_message;

    fn adapter(base_url: String) -> AfricasTalkingAdapter {
        AfricasTalkingAdapter::new(AfricasTalkingConfig {
            username: "sandbox".into(),
            api_key: "atsk_123".into(),
            base_url,
            cost_per_message: 0.01,
            currency: "KES".into(),
            webhook_secret_header: "X-Courier-Token".into(),
            webhook_secret: "hunter2".into(),
            http: HttpConfig::default(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn send_parses_cost_string() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/version1/messaging"))
            .and(header("apiKey", "atsk_123"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "SMSMessageData": {
                    "Recipients": [{
                        "messageId": "ATXid_1",
                        "status": "Success",
                        "cost": "KES 0.8000"
                    }]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = adapter(server.uri()).send(&sms_message("+254711222333", "hi")).await.unwrap();
        assert_eq!(ack.provider_message_id, "ATXid_1");
        assert!((ack.cost - 0.8).abs() < f64::EPSILON);
        assert_eq!(ack.currency, "KES");
    }

    #[tokio::test]
    async fn non_success_recipient_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/version1/messaging"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "SMSMessageData": {
                    "Recipients": [{
                        "messageId": "none",
                        "status": "InvalidPhoneNumber"
                    }]
                }
            })))
            .mount(&server)
            .await;

        let err = adapter(server.uri()).send(&sms_message("+254711", "hi")).await.unwrap_err();
        assert!(matches!(err, SendError::PermanentReject(_)));
    }

    #[test]
    fn delivery_report_maps_success_to_delivered() {
        let adapter = adapter("http://unused".into());
        let mut headers = HashMap::new();
        headers.insert("x-courier-token".to_string(), "hunter2".to_string());

        let parsed = adapter
            .parse_webhook(&WebhookRequest {
                url: "https://gateway.example.com/api/v1/sms/webhook/africas_talking".into(),
                headers,
                body: bytes::Bytes::from_static(b"id=ATXid_1&status=Success"),
            })
            .unwrap();

        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].new_status, MessageStatus::Delivered);
    }
}
