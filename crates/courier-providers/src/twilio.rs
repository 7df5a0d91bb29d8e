//! Twilio SMS adapter.
//!
//! Form-encoded REST API with basic auth. Status callbacks arrive as
//! form-encoded POSTs signed with `X-Twilio-Signature` (HMAC-SHA1 over the
//! callback URL plus sorted parameters).

use chrono::Utc;
use courier_core::{Channel, DeliveryEvent, Message, MessageStatus};
use serde::Deserialize;
use tracing::debug;

use crate::{
    adapter::{ParsedWebhook, ProviderAdapter, SendAck, SendError, WebhookError, WebhookRequest},
    http::{self, HttpConfig},
    signature,
};

/// Twilio credentials and tuning.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    /// Account SID, also the basic-auth username.
    pub account_sid: String,
    /// Auth token; signs webhooks too.
    pub auth_token: String,
    /// API origin, overridable for tests.
    pub base_url: String,
    /// List price per message, selector tiebreaker and fallback cost.
    pub cost_per_message: f64,
    /// Currency of the list price.
    pub currency: String,
    /// Public URL Twilio posts status callbacks to; part of the signature.
    pub status_callback_url: String,
    /// Outbound HTTP tuning.
    pub http: HttpConfig,
}

impl TwilioConfig {
    /// Production API origin.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.twilio.com";
}

/// Twilio SMS backend.
#[derive(Debug)]
pub struct TwilioAdapter {
    config: TwilioConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
    status: String,
    price: Option<String>,
    price_unit: Option<String>,
}

impl TwilioAdapter {
    /// Builds the adapter and its pooled client.
    pub fn new(config: TwilioConfig) -> Result<Self, SendError> {
        let client = http::build_client(&config.http)?;
        Ok(Self { config, client })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url, self.config.account_sid
        )
    }

    fn ack_from_resource(&self, resource: MessageResource) -> SendAck {
        // Twilio reports price as a negative decimal string, often null at
        // creation time.
        let cost = resource
            .price
            .as_deref()
            .and_then(|p| p.parse::<f64>().ok())
            .map_or(self.config.cost_per_message, f64::abs);
        let currency = resource.price_unit.unwrap_or_else(|| self.config.currency.clone());
        let accepted_status = match resource.status.as_str() {
            "sent" | "delivered" => MessageStatus::Sent,
            _ => MessageStatus::Queued,
        };

        SendAck {
            provider_message_id: resource.sid,
            accepted_status,
            cost,
            currency,
            estimated_delivery: None,
        }
    }
}

fn event_status(twilio_status: &str) -> Option<MessageStatus> {
    match twilio_status {
        "sent" => Some(MessageStatus::Sent),
        "delivered" => Some(MessageStatus::Delivered),
        "read" => Some(MessageStatus::Read),
        "failed" | "undelivered" => Some(MessageStatus::Failed),
        // queued/accepted/sending carry no new information for the lattice.
        _ => None,
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for TwilioAdapter {
    async fn send(&self, message: &Message) -> Result<SendAck, SendError> {
        let mut form = vec![
            ("To", message.to.as_str()),
            ("From", message.from.as_str()),
            ("Body", message.body.as_str()),
        ];
        if let Some(media_url) = &message.media_url {
            form.push(("MediaUrl", media_url.as_str()));
        }

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| http::transport_error(&e))?;

        if !response.status().is_success() {
            return Err(http::status_error(response).await);
        }

        let resource: MessageResource = response
            .json()
            .await
            .map_err(|e| SendError::TransportError(format!("malformed response: {e}")))?;

        debug!(sid = %resource.sid, status = %resource.status, "twilio accepted message");
        Ok(self.ack_from_resource(resource))
    }

    async fn query_status(&self, provider_message_id: &str) -> Result<MessageStatus, SendError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages/{}.json",
            self.config.base_url, self.config.account_sid, provider_message_id
        );

        let response = self
            .client
            .get(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .send()
            .await
            .map_err(|e| http::transport_error(&e))?;

        if !response.status().is_success() {
            return Err(http::status_error(response).await);
        }

        let resource: MessageResource = response
            .json()
            .await
            .map_err(|e| SendError::TransportError(format!("malformed response: {e}")))?;

        Ok(event_status(&resource.status).unwrap_or(MessageStatus::Queued))
    }

    fn parse_webhook(&self, request: &WebhookRequest) -> Result<ParsedWebhook, WebhookError> {
        let params: Vec<(String, String)> = form_urlencoded::parse(&request.body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        signature::verify_twilio_signature(
            &self.config.status_callback_url,
            &params,
            request.header("x-twilio-signature"),
            &self.config.auth_token,
        )?;

        let lookup = |name: &str| {
            params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
        };

        let sid = lookup("MessageSid")
            .or_else(|| lookup("SmsSid"))
            .ok_or_else(|| WebhookError::MalformedPayload("MessageSid missing".into()))?;
        let status = lookup("MessageStatus")
            .or_else(|| lookup("SmsStatus"))
            .ok_or_else(|| WebhookError::MalformedPayload("MessageStatus missing".into()))?;

        let mut parsed = ParsedWebhook::default();
        if let Some(new_status) = event_status(status) {
            parsed.events.push(DeliveryEvent {
                provider_name: self.name().to_string(),
                provider_message_id: sid.to_string(),
                new_status,
                at: Utc::now(),
                error: lookup("ErrorMessage").map(str::to_string),
                raw: serde_json::json!({ "MessageSid": sid, "MessageStatus": status }),
            });
        }
        Ok(parsed)
    }

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn name(&self) -> &'static str {
        "twilio"
    }

    fn cost_estimate(&self) -> f64 {
        self.config.cost_per_message
    }
}
