//! Scripted adapters and message builders shared by dispatch tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use chrono::Utc;
use courier_core::{Channel, Message, MessageId, MessageStatus, TenantId};
use courier_providers::{
    ParsedWebhook, ProviderAdapter, SendAck, SendError, WebhookError, WebhookRequest,
};

/// A minimal pending message.
pub fn test_message(channel: Channel, to: &str) -> Message {
    Message {
        id: MessageId::new(),
        tenant_id: TenantId::new(),
        campaign_id: None,
        channel,
        from: "+15550001111".to_string(),
        to: to.to_string(),
        body: "hi".to_string(),
        media_url: None,
        media_type: None,
        template_id: None,
        template_params: HashMap::new(),
        provider_template: None,
        priority: 5,
        scheduled_for: None,
        status: MessageStatus::Pending,
        provider_name: None,
        provider_message_id: None,
        cost: 0.0,
        currency: String::new(),
        error: None,
        metadata: HashMap::new(),
        created_at: Utc::now(),
        sent_at: None,
        delivered_at: None,
        read_at: None,
        retry_count: 0,
        max_retries: 3,
    }
}

/// Adapter whose outcomes are scripted per call.
///
/// Each `send` pops the next scripted outcome; when the script is empty the
/// send succeeds with a generated provider message ID.
#[derive(Debug)]
pub struct ScriptedAdapter {
    name: &'static str,
    channel: Channel,
    cost: f64,
    outcomes: Mutex<VecDeque<Result<SendAck, SendError>>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    /// Creates an always-succeeding adapter.
    pub fn new(name: &'static str, channel: Channel, cost: f64) -> Self {
        Self { name, channel, cost, outcomes: Mutex::new(VecDeque::new()), calls: AtomicUsize::new(0) }
    }

    /// Appends a scripted failure.
    pub fn push_err(&self, error: SendError) {
        self.outcomes.lock().unwrap().push_back(Err(error));
    }

    /// Appends a scripted success.
    pub fn push_ok(&self, provider_message_id: &str) {
        self.outcomes.lock().unwrap().push_back(Ok(self.ack(provider_message_id.to_string())));
    }

    /// Number of `send` calls observed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn ack(&self, provider_message_id: String) -> SendAck {
        SendAck {
            provider_message_id,
            accepted_status: MessageStatus::Sent,
            cost: self.cost,
            currency: "USD".to_string(),
            estimated_delivery: None,
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for ScriptedAdapter {
    async fn send(&self, _message: &Message) -> Result<SendAck, SendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(self.ack(format!("{}-{}", self.name, call))),
        }
    }

    async fn query_status(&self, _provider_message_id: &str) -> Result<MessageStatus, SendError> {
        Err(SendError::Unsupported)
    }

    fn parse_webhook(&self, _request: &WebhookRequest) -> Result<ParsedWebhook, WebhookError> {
        Ok(ParsedWebhook::default())
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn cost_estimate(&self) -> f64 {
        self.cost
    }
}
