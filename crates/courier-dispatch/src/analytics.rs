//! Event emission and live counters.
//!
//! Every status transition produces a structured event on the bus for a
//! downstream aggregator, plus canonical `messages.{status}` events the
//! rest of the platform subscribes to. Short-window counters live in the
//! cache keyed by tenant and day bucket so the overview endpoint never
//! touches the event consumer.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use courier_core::{
    AnalyticsOverview, Bus, Cache, Channel, ChannelStats, Clock, Message, MessageStatus,
    ProviderStats, Result, TenantId,
};
use serde::Serialize;
use tracing::warn;

/// Topic carrying every status transition.
pub const TRANSITIONS_TOPIC: &str = "courier.message.transitions";

/// Counter keys retire two days after their bucket closes.
const COUNTER_TTL: Duration = Duration::from_secs(3 * 24 * 3600);

/// Structured transition event for the downstream aggregator.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionEvent {
    /// Tenant that owns the message.
    pub tenant_id: TenantId,
    /// Transport channel.
    pub channel: String,
    /// Adapter involved, once one accepted the send.
    pub provider: Option<String>,
    /// Status before the transition.
    pub from_status: MessageStatus,
    /// Status after the transition.
    pub to_status: MessageStatus,
    /// Message cost so far.
    pub cost: f64,
    /// Send latency, present on `sent` transitions.
    pub latency_ms: Option<u64>,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

/// Publishes transition events and maintains day-bucket counters.
#[derive(Debug, Clone)]
pub struct AnalyticsEmitter {
    bus: Arc<dyn Bus>,
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
}

impl AnalyticsEmitter {
    /// Creates an emitter over the given collaborators.
    pub fn new(bus: Arc<dyn Bus>, cache: Arc<dyn Cache>, clock: Arc<dyn Clock>) -> Self {
        Self { bus, cache, clock }
    }

    fn bucket(&self) -> String {
        self.clock.now_utc().format("%Y-%m-%d").to_string()
    }

    fn counter_key(tenant_id: TenantId, bucket: &str, field: &str) -> String {
        format!("analytics:{tenant_id}:{bucket}:{field}")
    }

    async fn incr(&self, key: String) {
        if let Err(error) = self.cache.incr_by(&key, 1).await {
            warn!(%error, key, "analytics counter update failed");
            return;
        }
        let _ = self.cache.expire(&key, COUNTER_TTL).await;
    }

    async fn incr_float(&self, key: String, by: f64) {
        if let Err(error) = self.cache.incr_by_float(&key, by).await {
            warn!(%error, key, "analytics counter update failed");
            return;
        }
        let _ = self.cache.expire(&key, COUNTER_TTL).await;
    }

    /// Bumps a counter on the tenant level plus the channel and, when the
    /// message has been routed, provider dimensions.
    async fn bump(&self, message: &Message, field: &str) {
        let bucket = self.bucket();
        self.incr(Self::counter_key(message.tenant_id, &bucket, field)).await;
        self.incr(Self::counter_key(
            message.tenant_id,
            &bucket,
            &format!("channel:{}:{field}", message.channel),
        ))
        .await;
        if let Some(provider) = message.provider_name.as_deref() {
            self.incr(Self::counter_key(
                message.tenant_id,
                &bucket,
                &format!("provider:{provider}:{field}"),
            ))
            .await;
        }
    }

    /// Counts an admitted message toward the tenant's daily total.
    pub async fn record_admitted(&self, message: &Message) {
        self.bump(message, "total").await;
    }

    /// Publishes a transition and updates the affected counters.
    ///
    /// Counter or bus failures are logged, never propagated: analytics must
    /// not fail a send.
    pub async fn record_transition(
        &self,
        message: &Message,
        from: MessageStatus,
        latency: Option<Duration>,
    ) {
        let at = self.clock.now_utc();
        let event = TransitionEvent {
            tenant_id: message.tenant_id,
            channel: message.channel.to_string(),
            provider: message.provider_name.clone(),
            from_status: from,
            to_status: message.status,
            cost: message.cost,
            latency_ms: latency.map(|l| l.as_millis() as u64),
            at,
        };
        self.publish(TRANSITIONS_TOPIC, &event).await;

        // Canonical event other services key off, one topic per status.
        let canonical = serde_json::json!({
            "tenant_id": message.tenant_id,
            "message_id": message.id,
            "channel": message.channel,
            "provider": message.provider_name,
            "status": message.status,
            "at": at,
            "cost": message.cost,
            "error": message.error,
        });
        let topic = format!("messages.{}", message.status);
        if let Err(error) = self.bus.publish(&topic, canonical).await {
            warn!(%error, topic, "bus publish failed");
        }

        match message.status {
            MessageStatus::Sent => {
                self.bump(message, "sent").await;
                let bucket = self.bucket();
                if message.cost != 0.0 {
                    self.incr_float(
                        Self::counter_key(message.tenant_id, &bucket, "cost"),
                        message.cost,
                    )
                    .await;
                    self.incr_float(
                        Self::counter_key(
                            message.tenant_id,
                            &bucket,
                            &format!("channel:{}:cost", message.channel),
                        ),
                        message.cost,
                    )
                    .await;
                }
                if let Some(provider) = message.provider_name.as_deref() {
                    if message.cost != 0.0 {
                        self.incr_float(
                            Self::counter_key(
                                message.tenant_id,
                                &bucket,
                                &format!("provider:{provider}:cost"),
                            ),
                            message.cost,
                        )
                        .await;
                    }
                    if let Some(latency) = latency {
                        self.incr_float(
                            Self::counter_key(
                                message.tenant_id,
                                &bucket,
                                &format!("provider:{provider}:latency_ms"),
                            ),
                            latency.as_millis() as f64,
                        )
                        .await;
                    }
                }
            },
            MessageStatus::Delivered => self.bump(message, "delivered").await,
            MessageStatus::Read => self.bump(message, "read").await,
            MessageStatus::Failed => self.bump(message, "failed").await,
            MessageStatus::Pending | MessageStatus::Queued => {},
        }
    }

    async fn publish<E: Serialize>(&self, topic: &str, event: &E) {
        match serde_json::to_value(event) {
            Ok(payload) => {
                if let Err(error) = self.bus.publish(topic, payload).await {
                    warn!(%error, topic, "bus publish failed");
                }
            },
            Err(error) => warn!(%error, topic, "event serialisation failed"),
        }
    }

    /// Live counters for a tenant's current day bucket.
    pub async fn overview(&self, tenant_id: TenantId) -> Result<AnalyticsOverview> {
        let bucket = self.bucket();
        let read_counter = |field: &'static str| {
            let key = Self::counter_key(tenant_id, &bucket, field);
            let cache = self.cache.clone();
            async move {
                Ok::<u64, courier_core::CoreError>(
                    cache.get(&key).await?.and_then(|v| v.as_u64()).unwrap_or(0),
                )
            }
        };

        let total_messages = read_counter("total").await?;
        let sent = read_counter("sent").await?;
        let delivered = read_counter("delivered").await?;
        let failed = read_counter("failed").await?;
        let read = read_counter("read").await?;
        let total_cost = self
            .cache
            .get(&Self::counter_key(tenant_id, &bucket, "cost"))
            .await?
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        Ok(AnalyticsOverview {
            period: bucket,
            total_messages,
            sent,
            delivered,
            failed,
            read,
            delivery_rate: if sent == 0 { 0.0 } else { delivered as f64 / sent as f64 },
            total_cost,
        })
    }

    async fn read_u64(&self, tenant_id: TenantId, bucket: &str, field: &str) -> Result<u64> {
        let key = Self::counter_key(tenant_id, bucket, field);
        Ok(self.cache.get(&key).await?.and_then(|v| v.as_u64()).unwrap_or(0))
    }

    async fn read_f64(&self, tenant_id: TenantId, bucket: &str, field: &str) -> Result<f64> {
        let key = Self::counter_key(tenant_id, bucket, field);
        Ok(self.cache.get(&key).await?.and_then(|v| v.as_f64()).unwrap_or(0.0))
    }

    /// Current-day counters broken down by channel. Channels with no
    /// traffic are omitted.
    pub async fn by_channel(&self, tenant_id: TenantId) -> Result<Vec<ChannelStats>> {
        let bucket = self.bucket();
        let mut out = Vec::new();
        for channel in Channel::ALL {
            let field = |name: &str| format!("channel:{channel}:{name}");
            let total = self.read_u64(tenant_id, &bucket, &field("total")).await?;
            let sent = self.read_u64(tenant_id, &bucket, &field("sent")).await?;
            let delivered = self.read_u64(tenant_id, &bucket, &field("delivered")).await?;
            let failed = self.read_u64(tenant_id, &bucket, &field("failed")).await?;
            if total == 0 && sent == 0 && failed == 0 {
                continue;
            }
            let total_cost = self.read_f64(tenant_id, &bucket, &field("cost")).await?;
            out.push(ChannelStats {
                channel,
                total,
                sent,
                delivered,
                failed,
                delivery_rate: if sent == 0 { 0.0 } else { delivered as f64 / sent as f64 },
                total_cost,
                avg_cost: if sent == 0 { 0.0 } else { total_cost / sent as f64 },
            });
        }
        Ok(out)
    }

    /// Current-day counters broken down by provider, for the given adapter
    /// names. Providers with no routed traffic are omitted; the health
    /// score is left at zero for the caller to fill in.
    pub async fn by_provider(
        &self,
        tenant_id: TenantId,
        providers: &[String],
    ) -> Result<Vec<ProviderStats>> {
        let bucket = self.bucket();
        let mut out = Vec::new();
        for provider in providers {
            let field = |name: &str| format!("provider:{provider}:{name}");
            let sent = self.read_u64(tenant_id, &bucket, &field("sent")).await?;
            let delivered = self.read_u64(tenant_id, &bucket, &field("delivered")).await?;
            let failed = self.read_u64(tenant_id, &bucket, &field("failed")).await?;
            if sent == 0 && delivered == 0 && failed == 0 {
                continue;
            }
            let total_cost = self.read_f64(tenant_id, &bucket, &field("cost")).await?;
            let latency_sum = self.read_f64(tenant_id, &bucket, &field("latency_ms")).await?;
            out.push(ProviderStats {
                provider: provider.clone(),
                sent,
                delivered,
                failed,
                delivery_rate: if sent == 0 { 0.0 } else { delivered as f64 / sent as f64 },
                avg_latency_ms: if sent == 0 { 0.0 } else { latency_sum / sent as f64 },
                total_cost,
                health_score: 0.0,
            });
        }
        Ok(out)
    }
}
