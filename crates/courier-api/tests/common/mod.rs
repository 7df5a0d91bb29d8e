//! Shared harness for API integration tests.
//!
//! Builds a full router over an in-memory dispatch plane with stub
//! provider adapters, so tests exercise routing, extraction, and error
//! mapping without real provider traffic.

use std::sync::Arc;

use axum::Router;
use courier_api::{create_router, AppState};
use courier_core::{
    Bus, Cache, Channel, Clock, DeliveryEvent, MemoryBus, MemoryCache, Message, MessageStatus,
    TenantId, TestClock,
};
use courier_dispatch::{
    CampaignRunner, CampaignStore, Dispatcher, DispatcherConfig, RetryPolicy, Scheduler,
    TemplateStore,
};
use courier_providers::{
    ParsedWebhook, ProviderAdapter, ProviderRegistry, SendAck, SendError, WebhookError,
    WebhookRequest,
};
use serde::Deserialize;
use tower::ServiceExt;

/// Shared secret the stub adapter expects on webhooks.
pub const STUB_WEBHOOK_TOKEN: &str = "stub-token-1";

/// Always-succeeding adapter with a shared-secret webhook scheme.
///
/// Webhook bodies are JSON: `{"provider_message_id": "...", "status":
/// "delivered", "error": null}`, authenticated by the `x-stub-token`
/// header.
#[derive(Debug)]
pub struct StubAdapter {
    name: &'static str,
    channel: Channel,
}

impl StubAdapter {
    pub fn new(name: &'static str, channel: Channel) -> Self {
        Self { name, channel }
    }
}

#[derive(Debug, Deserialize)]
struct StubEvent {
    provider_message_id: String,
    status: MessageStatus,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait::async_trait]
impl ProviderAdapter for StubAdapter {
    async fn send(&self, message: &Message) -> Result<SendAck, SendError> {
        Ok(SendAck {
            provider_message_id: format!("{}-{}", self.name, message.id),
            accepted_status: MessageStatus::Sent,
            cost: 0.01,
            currency: "USD".to_string(),
            estimated_delivery: None,
        })
    }

    async fn query_status(&self, _provider_message_id: &str) -> Result<MessageStatus, SendError> {
        Err(SendError::Unsupported)
    }

    fn parse_webhook(&self, request: &WebhookRequest) -> Result<ParsedWebhook, WebhookError> {
        if request.header("x-stub-token") != Some(STUB_WEBHOOK_TOKEN) {
            return Err(WebhookError::SignatureInvalid("x-stub-token mismatch".into()));
        }
        let event: StubEvent = serde_json::from_slice(&request.body)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
        Ok(ParsedWebhook {
            events: vec![DeliveryEvent {
                provider_name: self.name.to_string(),
                provider_message_id: event.provider_message_id,
                new_status: event.status,
                at: chrono::Utc::now(),
                error: event.error,
                raw: serde_json::Value::Null,
            }],
            inbound_peers: Vec::new(),
        })
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn cost_estimate(&self) -> f64 {
        0.01
    }
}

/// A router over in-memory state, plus the pieces tests poke at.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub tenant: TenantId,
}

/// Builds an app with the given adapters registered.
pub fn test_app(adapters: Vec<Arc<dyn ProviderAdapter>>) -> TestApp {
    let config =
        DispatcherConfig { retry: RetryPolicy::deterministic(), ..DispatcherConfig::default() };
    test_app_with_config(config, adapters)
}

/// Builds an app with explicit dispatcher tuning.
pub fn test_app_with_config(
    config: DispatcherConfig,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
) -> TestApp {
    let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(clock.clone()));
    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::default());

    let mut registry = ProviderRegistry::new();
    for adapter in adapters {
        registry.register(adapter);
    }
    let registry = Arc::new(registry);

    let templates = Arc::new(TemplateStore::new(clock.clone()));
    let campaigns = Arc::new(CampaignStore::new(clock.clone()));
    let dispatcher = Dispatcher::new(
        config,
        registry.clone(),
        templates,
        campaigns.clone(),
        cache,
        bus,
        clock.clone(),
    );
    let runner = CampaignRunner::new(dispatcher.clone(), campaigns, clock.clone());
    let scheduler = Arc::new(Scheduler::new(clock));

    let state = AppState {
        dispatcher,
        runner,
        scheduler,
        registry,
        messenger_verify_token: Some("verify-me".to_string()),
        public_base_url: "http://gateway.test".to_string(),
    };
    let router = create_router(state.clone(), std::time::Duration::from_secs(30));

    TestApp { router, state, tenant: TenantId::new() }
}

/// Builds an app with a single SMS stub adapter named `stub_sms`.
pub fn sms_app() -> TestApp {
    test_app(vec![Arc::new(StubAdapter::new("stub_sms", Channel::Sms))])
}

impl TestApp {
    /// Sends a request through the router and returns status and parsed
    /// JSON body.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (axum::http::StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("x-tenant-id", self.tenant.to_string());
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                axum::body::Body::from(json.to_string())
            },
            None => axum::body::Body::empty(),
        };
        let request = builder.body(body).expect("failed to build request");

        let response =
            self.router.clone().oneshot(request).await.expect("failed to make request");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }
}
