//! The concurrent send core.
//!
//! Admission validates and normalises requests into [`Message`] records;
//! the dispatch loop walks the selector's candidate list, reports outcomes
//! to the health monitor, and either lands on a terminal state or
//! re-enqueues with backoff. Bounded queues and semaphores enforce the
//! per-tenant and global in-flight caps; a full queue surfaces
//! `Overloaded` to the caller instead of buffering.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use courier_core::{
    Bus, Cache, Channel, Clock, CoreError, Message, MessageId, MessageStatus, Result, TemplateId,
    TenantId,
};
use courier_providers::{address, ProviderAdapter, ProviderRegistry, SendError};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    analytics::AnalyticsEmitter,
    campaign::CampaignStore,
    health::{HealthConfig, HealthMonitor, HealthSnapshot},
    inflight::{EventApplied, InflightStore},
    ratelimit::TenantRateLimiter,
    retry::{RetryDecision, RetryPolicy},
    selector::{AffinityMap, ProviderSelector, SelectorConfig},
    template::{self, TemplateStore},
};

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Worker tasks draining the send queue.
    pub workers: usize,
    /// Bounded send queue depth; a full queue means `Overloaded`.
    pub queue_capacity: usize,
    /// In-flight sends allowed per tenant.
    pub per_tenant_inflight: usize,
    /// In-flight sends allowed across all tenants.
    pub global_inflight: usize,
    /// Deadline for a single adapter call.
    pub adapter_deadline: Duration,
    /// How far ahead `scheduled_for` may point.
    pub schedule_horizon: Duration,
    /// `Retry-After` hint returned with `Overloaded`.
    pub overload_retry_after: Duration,
    /// Default per-tenant admissions per second.
    pub tenant_rate_per_sec: u32,
    /// How long records stay resolvable for late webhooks.
    pub grace_window: Duration,
    /// Backoff policy for exhausted candidate lists.
    pub retry: RetryPolicy,
    /// Candidate ordering tuning.
    pub selector: SelectorConfig,
    /// Health scoring tuning.
    pub health: HealthConfig,
    /// Per-tenant preferred adapter names.
    pub tenant_pins: HashMap<TenantId, String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 64,
            queue_capacity: 1024,
            per_tenant_inflight: 100,
            global_inflight: 1000,
            adapter_deadline: Duration::from_secs(15),
            schedule_horizon: Duration::from_secs(30 * 24 * 3600),
            overload_retry_after: Duration::from_secs(5),
            tenant_rate_per_sec: 100,
            grace_window: Duration::from_secs(72 * 3600),
            retry: RetryPolicy::default(),
            selector: SelectorConfig::default(),
            health: HealthConfig::default(),
            tenant_pins: HashMap::new(),
        }
    }
}

/// A validated-on-admission send request.
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Tenant issuing the send.
    pub tenant_id: TenantId,
    /// Transport channel.
    pub channel: Channel,
    /// Sender identity.
    pub from: String,
    /// Recipient address, normalised during admission.
    pub to: String,
    /// Literal body. Mutually exclusive with `template_id`.
    pub body: Option<String>,
    /// Attached media URL.
    pub media_url: Option<String>,
    /// MIME type of the attached media.
    pub media_type: Option<String>,
    /// Template to render the body from.
    pub template_id: Option<TemplateId>,
    /// Parameters substituted into the template.
    pub template_params: HashMap<String, String>,
    /// Priority 1..=10; defaults to 5. Advisory: it is validated and
    /// carried on the record, but the dispatch queue drains in FIFO
    /// order.
    pub priority: Option<u8>,
    /// Deferred send time.
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Caller-supplied opaque metadata.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Campaign the message belongs to, when fanned out by the runner.
    pub campaign_id: Option<courier_core::CampaignId>,
}

impl Default for SendRequest {
    fn default() -> Self {
        Self {
            tenant_id: TenantId::new(),
            channel: Channel::Sms,
            from: String::new(),
            to: String::new(),
            body: None,
            media_url: None,
            media_type: None,
            template_id: None,
            template_params: HashMap::new(),
            priority: None,
            scheduled_for: None,
            metadata: HashMap::new(),
            campaign_id: None,
        }
    }
}

enum RoundOutcome {
    /// Terminal state reached, stop.
    Done,
    /// Candidates exhausted; retry after the backoff.
    Backoff(Duration),
}

struct Inner {
    config: DispatcherConfig,
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthMonitor>,
    selector: ProviderSelector,
    affinity: Arc<AffinityMap>,
    inflight: InflightStore,
    templates: Arc<TemplateStore>,
    campaigns: Arc<CampaignStore>,
    analytics: AnalyticsEmitter,
    rate: TenantRateLimiter,
    clock: Arc<dyn Clock>,
    queue_tx: mpsc::Sender<Message>,
    queue_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    global_slots: Arc<Semaphore>,
    tenant_slots: std::sync::Mutex<HashMap<TenantId, Arc<Semaphore>>>,
    cancel: CancellationToken,
}

/// Concurrent send core. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Wires the dispatcher over its collaborators.
    pub fn new(
        config: DispatcherConfig,
        registry: Arc<ProviderRegistry>,
        templates: Arc<TemplateStore>,
        campaigns: Arc<CampaignStore>,
        cache: Arc<dyn Cache>,
        bus: Arc<dyn Bus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let health = Arc::new(HealthMonitor::new(config.health.clone(), clock.clone()));
        let affinity =
            Arc::new(AffinityMap::new(config.selector.affinity_window, clock.clone()));
        let inflight = InflightStore::new(cache.clone(), config.grace_window);
        let analytics = AnalyticsEmitter::new(bus, cache.clone(), clock.clone());
        let rate = TenantRateLimiter::new(cache, clock.clone(), config.tenant_rate_per_sec);
        let global_slots = Arc::new(Semaphore::new(config.global_inflight));
        let selector = ProviderSelector::new(config.selector.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                health,
                selector,
                affinity,
                inflight,
                templates,
                campaigns,
                analytics,
                rate,
                clock,
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                global_slots,
                tenant_slots: std::sync::Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Health scores as the selector would see them.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.inner.health.snapshot()
    }

    /// The inflight record store.
    pub fn inflight(&self) -> &InflightStore {
        &self.inner.inflight
    }

    /// The template store.
    pub fn templates(&self) -> &Arc<TemplateStore> {
        &self.inner.templates
    }

    /// The campaign store.
    pub fn campaigns(&self) -> &Arc<CampaignStore> {
        &self.inner.campaigns
    }

    /// Per-tenant rate buckets.
    pub fn rate_limiter(&self) -> &TenantRateLimiter {
        &self.inner.rate
    }

    /// The analytics emitter, used by the overview endpoint.
    pub fn analytics(&self) -> &AnalyticsEmitter {
        &self.inner.analytics
    }

    /// The shared clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Spawns the worker pool. Call once at startup.
    pub async fn start(&self) {
        let receiver = {
            let mut slot = self.inner.queue_rx.lock().await;
            slot.take()
        };
        let Some(receiver) = receiver else {
            warn!("dispatcher workers already started");
            return;
        };
        let receiver = Arc::new(Mutex::new(receiver));

        for worker in 0..self.inner.config.workers {
            let dispatcher = self.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                dispatcher.worker_loop(worker, receiver).await;
            });
        }
        info!(workers = self.inner.config.workers, "dispatch workers started");
    }

    /// Stops workers and in-progress backoff waits.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    async fn worker_loop(&self, worker: usize, receiver: Arc<Mutex<mpsc::Receiver<Message>>>) {
        loop {
            let message = {
                let mut receiver = receiver.lock().await;
                tokio::select! {
                    () = self.inner.cancel.cancelled() => return,
                    message = receiver.recv() => match message {
                        Some(message) => message,
                        None => return,
                    },
                }
            };
            let id = message.id;
            if let Err(error) = self.dispatch(message).await {
                error!(message_id = %id, worker, %error, "dispatch failed");
            }
        }
    }

    /// Validates a request and builds the message record. No side effects.
    pub fn admit(&self, request: SendRequest) -> Result<Message> {
        let priority = request.priority.unwrap_or(5);
        if !(1..=10).contains(&priority) {
            return Err(CoreError::InvalidRequest(format!(
                "priority must be in 1..=10, got {priority}"
            )));
        }

        self.inner.registry.candidates(request.channel)?;
        let to = address::normalize(request.channel, &request.to)?;

        let (body, provider_template) = match request.template_id {
            Some(template_id) => {
                let template =
                    self.inner.templates.get(request.tenant_id, template_id)?;
                let body = template::render(&template, &request.template_params)?;
                let provider_template =
                    template::provider_template(&template, &request.template_params);
                // WhatsApp only accepts business-initiated sends through
                // provider-approved templates.
                if request.channel == Channel::Whatsapp && provider_template.is_none() {
                    return Err(CoreError::Conflict(format!(
                        "template {template_id} has no approved provider registration"
                    )));
                }
                (body, provider_template)
            },
            None => {
                let body = request.body.clone().ok_or_else(|| {
                    CoreError::InvalidRequest("body or template_id is required".into())
                })?;
                (body, None)
            },
        };

        if let Some(scheduled_for) = request.scheduled_for {
            let now = self.inner.clock.now_utc();
            if scheduled_for <= now {
                return Err(CoreError::InvalidSchedule("scheduled_for is in the past".into()));
            }
            let horizon = now
                + chrono::Duration::from_std(self.inner.config.schedule_horizon)
                    .unwrap_or_else(|_| chrono::Duration::days(30));
            if scheduled_for > horizon {
                return Err(CoreError::InvalidSchedule(
                    "scheduled_for is beyond the scheduling horizon".into(),
                ));
            }
        }

        Ok(Message {
            id: MessageId::new(),
            tenant_id: request.tenant_id,
            campaign_id: request.campaign_id,
            channel: request.channel,
            from: request.from,
            to,
            body,
            media_url: request.media_url,
            media_type: request.media_type,
            template_id: request.template_id,
            template_params: request.template_params,
            provider_template,
            priority,
            scheduled_for: request.scheduled_for,
            status: MessageStatus::Pending,
            provider_name: None,
            provider_message_id: None,
            cost: 0.0,
            currency: String::new(),
            error: None,
            metadata: request.metadata,
            created_at: self.inner.clock.now_utc(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
            retry_count: 0,
            max_retries: self.inner.config.retry.max_retries,
        })
    }

    /// Admits and dispatches synchronously, waiting for the provider
    /// acknowledgement (or terminal failure).
    pub async fn send_now(&self, request: SendRequest) -> Result<Message> {
        let message = self.admit(request)?;
        self.inner.rate.acquire(message.tenant_id).await?;
        self.inner.inflight.put(&message).await?;
        self.inner.analytics.record_admitted(&message).await;
        self.dispatch(message).await
    }

    /// Admits and queues for asynchronous dispatch by the worker pool.
    ///
    /// # Errors
    ///
    /// [`CoreError::Overloaded`] when the queue is full; no record is
    /// created in that case.
    pub async fn enqueue(&self, request: SendRequest) -> Result<Message> {
        let message = self.admit(request)?;
        self.inner.rate.acquire(message.tenant_id).await?;

        let permit = self.inner.queue_tx.try_reserve().map_err(|_| CoreError::Overloaded {
            retry_after_secs: self.inner.config.overload_retry_after.as_secs(),
        })?;
        self.inner.inflight.put(&message).await?;
        self.inner.analytics.record_admitted(&message).await;
        permit.send(message.clone());
        Ok(message)
    }

    /// Like [`Dispatcher::enqueue`] but waits for queue space instead of
    /// returning `Overloaded`. Used by the campaign runner, which already
    /// paces itself.
    pub async fn enqueue_waiting(&self, request: SendRequest) -> Result<Message> {
        let message = self.admit(request)?;
        self.inner.inflight.put(&message).await?;
        self.inner.analytics.record_admitted(&message).await;
        self.inner
            .queue_tx
            .send(message.clone())
            .await
            .map_err(|_| CoreError::Internal("dispatch queue closed".into()))?;
        Ok(message)
    }

    /// Admits and stores a deferred message without queueing it. The
    /// scheduler hands it back at its due time via
    /// [`Dispatcher::requeue`].
    pub async fn admit_deferred(&self, request: SendRequest) -> Result<Message> {
        let message = self.admit(request)?;
        self.inner.rate.acquire(message.tenant_id).await?;
        self.inner.inflight.put(&message).await?;
        self.inner.analytics.record_admitted(&message).await;
        Ok(message)
    }

    /// Re-queues a stored message for dispatch. Missing records (expired or
    /// cancelled) are skipped silently.
    pub async fn requeue(&self, id: MessageId) -> Result<()> {
        let Some(message) = self.inner.inflight.get(id).await? else {
            debug!(message_id = %id, "requeue skipped, record gone");
            return Ok(());
        };
        if message.status.is_terminal() {
            return Ok(());
        }
        self.inner
            .queue_tx
            .send(message)
            .await
            .map_err(|_| CoreError::Internal("dispatch queue closed".into()))
    }

    /// Folds a webhook-derived delivery event into the message it refers
    /// to, publishing analytics and updating affinity and campaign
    /// counters on real transitions.
    pub async fn apply_delivery_event(
        &self,
        event: &courier_core::DeliveryEvent,
    ) -> Result<EventApplied> {
        let applied = self.inner.inflight.apply_event(event).await?;
        if applied.transitioned {
            self.inner
                .analytics
                .record_transition(&applied.message, applied.previous_status, None)
                .await;

            let message = &applied.message;
            match message.status {
                MessageStatus::Delivered => {
                    if let Some(provider) = message.provider_name.as_deref() {
                        self.inner.affinity.record_delivery(message.channel, &message.to, provider);
                    }
                    if let Some(campaign_id) = message.campaign_id {
                        self.inner.campaigns.record_delivered(campaign_id);
                    }
                },
                MessageStatus::Read => {
                    if let Some(campaign_id) = message.campaign_id {
                        self.inner.campaigns.record_read(campaign_id);
                    }
                },
                MessageStatus::Failed => {
                    if let Some(campaign_id) = message.campaign_id {
                        self.inner.campaigns.record_failed(campaign_id);
                    }
                },
                _ => {},
            }
        }
        Ok(applied)
    }

    fn tenant_semaphore(&self, tenant_id: TenantId) -> Arc<Semaphore> {
        let mut slots = self.inner.tenant_slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Semaphore::new(self.inner.config.per_tenant_inflight)))
            .clone()
    }

    /// Owns a message from (re-)admission through terminal state or
    /// shutdown. Caps are held per round, not across backoff sleeps.
    async fn dispatch(&self, mut message: Message) -> Result<Message> {
        let tenant_slots = self.tenant_semaphore(message.tenant_id);
        loop {
            let global = self
                .inner
                .global_slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| CoreError::Internal("dispatcher closed".into()))?;
            let tenant = tenant_slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| CoreError::Internal("dispatcher closed".into()))?;

            let outcome = self.dispatch_round(&mut message).await?;
            drop(tenant);
            drop(global);

            match outcome {
                RoundOutcome::Done => return Ok(message),
                RoundOutcome::Backoff(delay) => {
                    debug!(message_id = %message.id, ?delay, "backing off before retry");
                    self.inner.clock.sleep(delay).await;
                    if self.inner.cancel.is_cancelled() {
                        return Ok(message);
                    }
                },
            }
        }
    }

    async fn dispatch_round(&self, message: &mut Message) -> Result<RoundOutcome> {
        // A cancelled campaign abandons everything it queued: the message
        // is failed without ever reaching a provider.
        if let Some(campaign_id) = message.campaign_id {
            if self.inner.campaigns.is_cancelled(campaign_id) {
                self.fail_terminal(message, "campaign cancelled".into()).await?;
                return Ok(RoundOutcome::Done);
            }
        }

        if message.status == MessageStatus::Pending {
            let (updated, _) = self
                .inner
                .inflight
                .update(message.id, |record| {
                    if record.status == MessageStatus::Pending {
                        record.status = MessageStatus::Queued;
                    }
                })
                .await?;
            *message = updated;
            self.inner
                .analytics
                .record_transition(message, MessageStatus::Pending, None)
                .await;
        }

        let candidates = self.inner.registry.candidates(message.channel)?;
        let snapshot = self.inner.health.snapshot();
        let affinity = self.inner.affinity.lookup(message.channel, &message.to);
        let pinned = self.inner.config.tenant_pins.get(&message.tenant_id).map(String::as_str);
        let ordered =
            self.inner.selector.select(&snapshot, candidates, affinity.as_deref(), pinned);

        let mut last_error = String::from("no eligible provider");
        let mut index = 0;
        let mut waited_for_rate_limit = false;

        while index < ordered.len() {
            let adapter = &ordered[index];
            let started = self.inner.clock.now();
            let result = match tokio::time::timeout(
                self.inner.config.adapter_deadline,
                adapter.send(message),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SendError::TransportError("send deadline exceeded".into())),
            };
            let latency = self.inner.clock.now().duration_since(started);

            match result {
                Ok(ack) => {
                    self.inner.health.record_success(adapter.name(), message.channel, latency);
                    return self.complete_sent(message, adapter, ack, latency).await;
                },
                Err(SendError::RateLimited { retry_after }) => {
                    // Not a failure; the provider asked us to slow down.
                    last_error = "provider rate limited".into();
                    if index + 1 < ordered.len() {
                        index += 1;
                    } else if !waited_for_rate_limit {
                        waited_for_rate_limit = true;
                        let wait = retry_after.unwrap_or(Duration::from_secs(1));
                        debug!(message_id = %message.id, provider = adapter.name(), ?wait,
                            "sole candidate rate limited, waiting");
                        self.inner.clock.sleep(wait).await;
                    } else {
                        index += 1;
                    }
                },
                Err(SendError::Unauthenticated(reason)) => {
                    warn!(provider = adapter.name(), %reason, "provider rejected credentials");
                    self.inner.health.record_unauthenticated(adapter.name(), message.channel);
                    last_error = format!("{}: authentication failed", adapter.name());
                    index += 1;
                },
                Err(error @ (SendError::InvalidRecipient(_) | SendError::PermanentReject(_))) => {
                    self.inner.health.record_reject(adapter.name(), message.channel);
                    self.fail_terminal(message, error.to_string()).await?;
                    return Ok(RoundOutcome::Done);
                },
                Err(error @ (SendError::ProviderUnavailable(_) | SendError::TransportError(_))) => {
                    self.inner.health.record_failure(adapter.name(), message.channel, latency);
                    last_error = error.to_string();
                    index += 1;
                },
                Err(SendError::Unsupported) => {
                    last_error = format!("{} cannot send on this channel", adapter.name());
                    index += 1;
                },
            }
        }

        match self.inner.config.retry.decide(message.retry_count) {
            RetryDecision::Retry { delay } => {
                let (updated, _) = self
                    .inner
                    .inflight
                    .update(message.id, |record| record.retry_count += 1)
                    .await?;
                *message = updated;
                Ok(RoundOutcome::Backoff(delay))
            },
            RetryDecision::Exhausted => {
                self.fail_terminal(message, last_error).await?;
                Ok(RoundOutcome::Done)
            },
        }
    }

    async fn complete_sent(
        &self,
        message: &mut Message,
        adapter: &Arc<dyn ProviderAdapter>,
        ack: courier_providers::SendAck,
        latency: Duration,
    ) -> Result<RoundOutcome> {
        let from = message.status;
        let now = self.inner.clock.now_utc();
        let provider = adapter.name().to_string();
        let (updated, _) = self
            .inner
            .inflight
            .update(message.id, |record| {
                if record.status.can_transition_to(MessageStatus::Sent) {
                    record.status = MessageStatus::Sent;
                }
                // A provider message ID never changes once assigned.
                if record.provider_message_id.is_none() {
                    record.provider_name = Some(provider.clone());
                    record.provider_message_id = Some(ack.provider_message_id.clone());
                    record.cost = ack.cost;
                    record.currency = ack.currency.clone();
                }
                record.record_timestamp(MessageStatus::Sent, now);
            })
            .await?;
        *message = updated;

        self.inner.inflight.index_provider(message).await?;
        self.inner.analytics.record_transition(message, from, Some(latency)).await;
        if let Some(campaign_id) = message.campaign_id {
            self.inner.campaigns.record_sent(campaign_id, message.cost);
        }
        debug!(message_id = %message.id, provider = %provider, "send acknowledged");
        Ok(RoundOutcome::Done)
    }

    async fn fail_terminal(&self, message: &mut Message, reason: String) -> Result<()> {
        let from = message.status;
        let (updated, _) = self
            .inner
            .inflight
            .update(message.id, |record| {
                if record.status.can_transition_to(MessageStatus::Failed) {
                    record.status = MessageStatus::Failed;
                    record.error = Some(reason.clone());
                }
            })
            .await?;
        *message = updated;
        self.inner.analytics.record_transition(message, from, None).await;
        if let Some(campaign_id) = message.campaign_id {
            self.inner.campaigns.record_failed(campaign_id);
        }
        info!(message_id = %message.id, %reason, "message failed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use courier_core::{DeliveryEvent, MemoryBus, MemoryCache, TestClock};
    use courier_providers::{ParsedWebhook, SendAck, WebhookError, WebhookRequest};

    use super::*;
    use crate::testutil::ScriptedAdapter;

    struct Harness {
        dispatcher: Dispatcher,
        clock: Arc<TestClock>,
        bus: Arc<MemoryBus>,
    }

    fn harness(adapters: Vec<Arc<dyn ProviderAdapter>>, config: DispatcherConfig) -> Harness {
        let clock = Arc::new(TestClock::new());
        let clock_dyn: Arc<dyn Clock> = clock.clone();
        let cache = Arc::new(MemoryCache::new(clock_dyn.clone()));
        let bus = Arc::new(MemoryBus::default());
        let mut registry = ProviderRegistry::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        let templates = Arc::new(TemplateStore::new(clock_dyn.clone()));
        let campaigns = Arc::new(crate::campaign::CampaignStore::new(clock_dyn.clone()));
        let dispatcher = Dispatcher::new(
            config,
            Arc::new(registry),
            templates,
            campaigns,
            cache,
            bus.clone(),
            clock_dyn,
        );
        Harness { dispatcher, clock, bus }
    }

    fn deterministic_config() -> DispatcherConfig {
        DispatcherConfig { retry: RetryPolicy::deterministic(), ..DispatcherConfig::default() }
    }

    fn sms_request(to: &str) -> SendRequest {
        SendRequest {
            channel: Channel::Sms,
            from: "+15550001111".into(),
            to: to.into(),
            body: Some("hi".into()),
            ..SendRequest::default()
        }
    }

    #[tokio::test]
    async fn happy_path_routes_to_best_adapter_then_delivers() {
        let cheap = Arc::new(ScriptedAdapter::new("cheap", Channel::Sms, 0.005));
        let pricey = Arc::new(ScriptedAdapter::new("pricey", Channel::Sms, 0.02));
        let h = harness(vec![cheap.clone(), pricey.clone()], deterministic_config());

        let message = h.dispatcher.send_now(sms_request("+14155550123")).await.unwrap();

        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.provider_name.as_deref(), Some("cheap"));
        assert!((message.cost - 0.005).abs() < 1e-9);
        assert_eq!(cheap.calls(), 1);
        assert_eq!(pricey.calls(), 0);
        assert_eq!(h.bus.published_on("messages.sent").await.len(), 1);

        let event = DeliveryEvent {
            provider_name: "cheap".into(),
            provider_message_id: message.provider_message_id.clone().unwrap(),
            new_status: MessageStatus::Delivered,
            at: h.clock.now_utc(),
            error: None,
            raw: serde_json::Value::Null,
        };
        let applied = h.dispatcher.apply_delivery_event(&event).await.unwrap();
        assert!(applied.transitioned);
        assert_eq!(applied.message.status, MessageStatus::Delivered);
        assert_eq!(h.bus.published_on("messages.delivered").await.len(), 1);
    }

    #[tokio::test]
    async fn failover_tries_next_candidate_and_degrades_health() {
        let first = Arc::new(ScriptedAdapter::new("aaa", Channel::Sms, 0.005));
        first.push_err(SendError::ProviderUnavailable("503".into()));
        let second = Arc::new(ScriptedAdapter::new("bbb", Channel::Sms, 0.02));
        let h = harness(vec![first.clone(), second.clone()], deterministic_config());

        let message = h.dispatcher.send_now(sms_request("+14155550123")).await.unwrap();

        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(message.provider_name.as_deref(), Some("bbb"));
        assert!(h.dispatcher.health_snapshot().score("aaa") < 100.0);
    }

    #[tokio::test]
    async fn retries_with_exponential_backoff_then_succeeds() {
        let adapter = Arc::new(ScriptedAdapter::new("only", Channel::Sms, 0.01));
        for _ in 0..3 {
            adapter.push_err(SendError::TransportError("reset".into()));
        }
        let h = harness(vec![adapter.clone()], deterministic_config());

        let message = h.dispatcher.send_now(sms_request("+14155550123")).await.unwrap();

        assert_eq!(adapter.calls(), 4);
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.retry_count, 3);
        // Backoffs of 2, 4, and 8 seconds of virtual time.
        assert_eq!(h.clock.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test]
    async fn retries_exhausted_ends_failed() {
        let adapter = Arc::new(ScriptedAdapter::new("only", Channel::Sms, 0.01));
        for _ in 0..4 {
            adapter.push_err(SendError::TransportError("reset".into()));
        }
        let h = harness(vec![adapter.clone()], deterministic_config());

        let message = h.dispatcher.send_now(sms_request("+14155550123")).await.unwrap();

        assert_eq!(message.status, MessageStatus::Failed);
        assert!(message.error.is_some());
        assert_eq!(h.bus.published_on("messages.failed").await.len(), 1);
    }

    #[tokio::test]
    async fn rate_limited_is_not_a_failure_and_fails_over() {
        let limited = Arc::new(ScriptedAdapter::new("aaa", Channel::Sms, 0.005));
        limited.push_err(SendError::RateLimited { retry_after: None });
        let fallback = Arc::new(ScriptedAdapter::new("bbb", Channel::Sms, 0.02));
        let h = harness(vec![limited.clone(), fallback], deterministic_config());

        let message = h.dispatcher.send_now(sms_request("+14155550123")).await.unwrap();

        assert_eq!(message.provider_name.as_deref(), Some("bbb"));
        // A throttle does not count against the adapter's success rate.
        assert_eq!(h.dispatcher.health_snapshot().score("aaa"), 100.0);
    }

    #[tokio::test]
    async fn sole_candidate_rate_limit_waits_then_retries_once() {
        let adapter = Arc::new(ScriptedAdapter::new("only", Channel::Sms, 0.01));
        adapter.push_err(SendError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        });
        let h = harness(vec![adapter.clone()], deterministic_config());

        let message = h.dispatcher.send_now(sms_request("+14155550123")).await.unwrap();

        assert_eq!(adapter.calls(), 2);
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(h.clock.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn permanent_reject_is_terminal_without_failover() {
        let first = Arc::new(ScriptedAdapter::new("aaa", Channel::Sms, 0.005));
        first.push_err(SendError::InvalidRecipient("unknown subscriber".into()));
        let second = Arc::new(ScriptedAdapter::new("bbb", Channel::Sms, 0.02));
        let h = harness(vec![first, second.clone()], deterministic_config());

        let message = h.dispatcher.send_now(sms_request("+14155550123")).await.unwrap();

        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn unauthenticated_zeroes_adapter_and_fails_over() {
        let broken = Arc::new(ScriptedAdapter::new("aaa", Channel::Sms, 0.005));
        broken.push_err(SendError::Unauthenticated("expired key".into()));
        let fallback = Arc::new(ScriptedAdapter::new("bbb", Channel::Sms, 0.02));
        let h = harness(vec![broken, fallback], deterministic_config());

        let message = h.dispatcher.send_now(sms_request("+14155550123")).await.unwrap();

        assert_eq!(message.provider_name.as_deref(), Some("bbb"));
        assert_eq!(h.dispatcher.health_snapshot().score("aaa"), 0.0);
    }

    #[tokio::test]
    async fn full_queue_returns_overloaded_without_a_record() {
        let adapter = Arc::new(ScriptedAdapter::new("only", Channel::Sms, 0.01));
        let config = DispatcherConfig { queue_capacity: 1, ..deterministic_config() };
        let h = harness(vec![adapter], config);

        h.dispatcher.enqueue(sms_request("+14155550123")).await.unwrap();
        let err = h.dispatcher.enqueue(sms_request("+14155550124")).await.unwrap_err();

        assert!(matches!(err, CoreError::Overloaded { retry_after_secs: 5 }));
    }

    #[tokio::test]
    async fn admission_rejects_before_any_adapter_call() {
        let adapter = Arc::new(ScriptedAdapter::new("only", Channel::Sms, 0.01));
        let h = harness(vec![adapter.clone()], deterministic_config());

        let err = h.dispatcher.send_now(sms_request("not-a-number")).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidRecipient(_)));

        let err = h
            .dispatcher
            .send_now(SendRequest { priority: Some(11), ..sms_request("+14155550123") })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));

        let past = h.clock.now_utc() - chrono::Duration::seconds(1);
        let err = h
            .dispatcher
            .send_now(SendRequest { scheduled_for: Some(past), ..sms_request("+14155550123") })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchedule(_)));

        let far = h.clock.now_utc() + chrono::Duration::days(31);
        let err = h
            .dispatcher
            .send_now(SendRequest { scheduled_for: Some(far), ..sms_request("+14155550123") })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchedule(_)));

        assert_eq!(adapter.calls(), 0);
    }

    #[tokio::test]
    async fn missing_template_variable_fails_fast() {
        let adapter = Arc::new(ScriptedAdapter::new("only", Channel::Sms, 0.01));
        let h = harness(vec![adapter.clone()], deterministic_config());

        let tenant = TenantId::new();
        let template = h.dispatcher.templates().create(courier_core::Template {
            id: courier_core::TemplateId::new(),
            tenant_id: tenant,
            name: "welcome".into(),
            channel: Channel::Sms,
            body: "Hi {{name}}".into(),
            variables: vec!["name".into()],
            provider_template_id: None,
            language: None,
            created_at: h.clock.now_utc(),
            updated_at: h.clock.now_utc(),
        });

        let err = h
            .dispatcher
            .send_now(SendRequest {
                tenant_id: tenant,
                template_id: Some(template.id),
                body: None,
                ..sms_request("+14155550123")
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::MissingVariable(_)));
        assert_eq!(adapter.calls(), 0);
    }

    #[tokio::test]
    async fn whatsapp_template_without_approval_conflicts() {
        let adapter = Arc::new(ScriptedAdapter::new("whatsapp_cloud", Channel::Whatsapp, 0.03));
        let h = harness(vec![adapter], deterministic_config());

        let tenant = TenantId::new();
        let template = h.dispatcher.templates().create(courier_core::Template {
            id: courier_core::TemplateId::new(),
            tenant_id: tenant,
            name: "welcome".into(),
            channel: Channel::Whatsapp,
            body: "Hi {{name}}".into(),
            variables: vec!["name".into()],
            provider_template_id: None,
            language: None,
            created_at: h.clock.now_utc(),
            updated_at: h.clock.now_utc(),
        });

        let err = h
            .dispatcher
            .send_now(SendRequest {
                tenant_id: tenant,
                channel: Channel::Whatsapp,
                template_id: Some(template.id),
                body: None,
                template_params: HashMap::from([("name".into(), "Amina".into())]),
                ..sms_request("+14155550123")
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn tenant_pin_overrides_ranking() {
        let cheap = Arc::new(ScriptedAdapter::new("cheap", Channel::Sms, 0.005));
        let pinned = Arc::new(ScriptedAdapter::new("pinned", Channel::Sms, 0.02));
        let tenant = TenantId::new();
        let config = DispatcherConfig {
            tenant_pins: HashMap::from([(tenant, "pinned".to_string())]),
            ..deterministic_config()
        };
        let h = harness(vec![cheap.clone(), pinned.clone()], config);

        let message = h
            .dispatcher
            .send_now(SendRequest { tenant_id: tenant, ..sms_request("+14155550123") })
            .await
            .unwrap();

        assert_eq!(message.provider_name.as_deref(), Some("pinned"));
        assert_eq!(cheap.calls(), 0);
    }

    /// Adapter that tracks its maximum observed concurrency.
    #[derive(Debug)]
    struct GaugeAdapter {
        current: AtomicUsize,
        max: AtomicUsize,
        total: AtomicUsize,
    }

    impl GaugeAdapter {
        fn new() -> Self {
            Self {
                current: AtomicUsize::new(0),
                max: AtomicUsize::new(0),
                total: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ProviderAdapter for GaugeAdapter {
        async fn send(&self, _message: &Message) -> std::result::Result<SendAck, SendError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            let n = self.total.fetch_add(1, Ordering::SeqCst);
            Ok(SendAck {
                provider_message_id: format!("g-{n}"),
                accepted_status: MessageStatus::Sent,
                cost: 0.0,
                currency: "USD".into(),
                estimated_delivery: None,
            })
        }

        async fn query_status(
            &self,
            _provider_message_id: &str,
        ) -> std::result::Result<MessageStatus, SendError> {
            Err(SendError::Unsupported)
        }

        fn parse_webhook(
            &self,
            _request: &WebhookRequest,
        ) -> std::result::Result<ParsedWebhook, WebhookError> {
            Ok(ParsedWebhook::default())
        }

        fn channel(&self) -> Channel {
            Channel::Sms
        }

        fn name(&self) -> &'static str {
            "gauge"
        }

        fn cost_estimate(&self) -> f64 {
            0.0
        }
    }

    #[tokio::test]
    async fn workers_respect_the_global_inflight_cap() {
        let adapter = Arc::new(GaugeAdapter::new());
        let config = DispatcherConfig { workers: 8, global_inflight: 2, ..deterministic_config() };
        let h = harness(vec![adapter.clone()], config);
        h.dispatcher.start().await;

        for i in 0..10 {
            h.dispatcher.enqueue(sms_request(&format!("+1415555{i:04}"))).await.unwrap();
        }

        for _ in 0..200 {
            if adapter.total.load(Ordering::SeqCst) == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(adapter.total.load(Ordering::SeqCst), 10);
        assert!(adapter.max.load(Ordering::SeqCst) <= 2);
        h.dispatcher.shutdown();
    }

    #[tokio::test]
    async fn campaign_fans_out_and_completes() {
        let adapter = Arc::new(ScriptedAdapter::new("only", Channel::Sms, 0.01));
        let config = DispatcherConfig { workers: 4, ..deterministic_config() };
        let h = harness(vec![adapter.clone()], config);
        h.dispatcher.start().await;

        let tenant = TenantId::new();
        let campaign = h.dispatcher.campaigns().create(courier_core::Campaign {
            id: courier_core::CampaignId::new(),
            tenant_id: tenant,
            name: "promo".into(),
            channel: Channel::Sms,
            status: courier_core::CampaignStatus::Draft,
            from: "+15550001111".into(),
            recipients: vec![
                "+14155550123".into(),
                "+14155550124".into(),
                "+14155550125".into(),
            ],
            body: "hello".into(),
            template_id: None,
            template_params: HashMap::new(),
            rate_cap: 2,
            scheduled_at: None,
            cursor: 0,
            stats: Default::default(),
            created_at: h.clock.now_utc(),
            started_at: None,
            completed_at: None,
        });

        let runner = crate::campaign::CampaignRunner::new(
            h.dispatcher.clone(),
            h.dispatcher.campaigns().clone(),
            h.dispatcher.clock().clone(),
        );
        runner.start(tenant, campaign.id).unwrap();

        let mut finished = None;
        for _ in 0..200 {
            let current = h.dispatcher.campaigns().get(tenant, campaign.id).unwrap();
            if current.status == courier_core::CampaignStatus::Completed
                && current.stats.sent == 3
            {
                finished = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let finished = finished.expect("campaign did not complete");
        assert_eq!(finished.cursor, 3);
        assert_eq!(finished.stats.total_recipients, 3);
        assert!((finished.stats.total_cost - 0.03).abs() < 1e-9);
        h.dispatcher.shutdown();
    }

    #[tokio::test]
    async fn cancelled_campaign_abandons_queued_messages() {
        let adapter = Arc::new(ScriptedAdapter::new("only", Channel::Sms, 0.01));
        let h = harness(vec![adapter.clone()], deterministic_config());

        let tenant = TenantId::new();
        let campaign = h.dispatcher.campaigns().create(courier_core::Campaign {
            id: courier_core::CampaignId::new(),
            tenant_id: tenant,
            name: "promo".into(),
            channel: Channel::Sms,
            status: courier_core::CampaignStatus::Draft,
            from: "+15550001111".into(),
            recipients: vec!["+14155550123".into()],
            body: "hello".into(),
            template_id: None,
            template_params: HashMap::new(),
            rate_cap: 1,
            scheduled_at: None,
            cursor: 0,
            stats: Default::default(),
            created_at: h.clock.now_utc(),
            started_at: None,
            completed_at: None,
        });
        h.dispatcher.campaigns().mark_running(tenant, campaign.id).unwrap();

        // Queued while no worker is running, then the campaign is
        // cancelled before anything drains the queue.
        let message = h
            .dispatcher
            .enqueue_waiting(SendRequest {
                tenant_id: tenant,
                campaign_id: Some(campaign.id),
                ..sms_request("+14155550123")
            })
            .await
            .unwrap();
        h.dispatcher.campaigns().mark_cancelled(tenant, campaign.id).unwrap();

        h.dispatcher.start().await;
        let mut abandoned = None;
        for _ in 0..200 {
            let current = h.dispatcher.inflight().get(message.id).await.unwrap().unwrap();
            if current.status == MessageStatus::Failed {
                abandoned = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let abandoned = abandoned.expect("queued message was not abandoned");
        assert_eq!(adapter.calls(), 0);
        assert_eq!(abandoned.error.as_deref(), Some("campaign cancelled"));
        assert_eq!(h.dispatcher.campaigns().get(tenant, campaign.id).unwrap().stats.failed, 1);
        h.dispatcher.shutdown();
    }
}
