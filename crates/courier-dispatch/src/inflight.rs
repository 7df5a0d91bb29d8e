//! Cache-backed store of live message records.
//!
//! Two indices: the message ID and, once a provider accepts the send, the
//! `(provider, provider_message_id)` pair webhooks arrive with. All status
//! changes go through a compare-and-swap loop so concurrent webhook events
//! cannot regress state, and every handler observes a consistent record.
//! Entries expire after the grace window.

use std::{sync::Arc, time::Duration};

use courier_core::{
    Cache, CoreError, DeliveryEvent, Message, MessageId, MessageStatus, Result,
};
use tracing::warn;

/// How long terminal records stay resolvable for late webhooks.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(72 * 3600);

/// Bound on CAS retries before reporting contention.
const MAX_CAS_ATTEMPTS: usize = 16;

/// Outcome of applying a delivery event.
#[derive(Debug, Clone)]
pub struct EventApplied {
    /// The record after the event was folded in.
    pub message: Message,
    /// Status the record held before the event.
    pub previous_status: MessageStatus,
    /// Whether the event advanced the status. Duplicate or out-of-order
    /// events patch timestamps only and report `false`.
    pub transitioned: bool,
}

/// Ephemeral message index used to correlate webhooks.
#[derive(Debug, Clone)]
pub struct InflightStore {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl InflightStore {
    /// Creates a store expiring records after `ttl`.
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn message_key(id: MessageId) -> String {
        format!("message:{id}")
    }

    fn provider_key(provider: &str, provider_message_id: &str) -> String {
        format!("provider:{provider}:{provider_message_id}")
    }

    fn encode(message: &Message) -> Result<serde_json::Value> {
        serde_json::to_value(message)
            .map_err(|e| CoreError::Internal(format!("encode message: {e}")))
    }

    fn decode(value: serde_json::Value) -> Result<Message> {
        serde_json::from_value(value)
            .map_err(|e| CoreError::Internal(format!("decode message: {e}")))
    }

    /// Stores a fresh record under its message ID.
    pub async fn put(&self, message: &Message) -> Result<()> {
        self.cache
            .set(&Self::message_key(message.id), Self::encode(message)?, Some(self.ttl))
            .await
    }

    /// Looks a record up by internal ID.
    pub async fn get(&self, id: MessageId) -> Result<Option<Message>> {
        match self.cache.get(&Self::message_key(id)).await? {
            Some(value) => Ok(Some(Self::decode(value)?)),
            None => Ok(None),
        }
    }

    /// Looks a record up by the provider-issued ID webhooks carry.
    pub async fn get_by_provider(
        &self,
        provider: &str,
        provider_message_id: &str,
    ) -> Result<Option<Message>> {
        let key = Self::provider_key(provider, provider_message_id);
        let Some(value) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        let id = value
            .as_str()
            .and_then(|s| s.parse::<uuid::Uuid>().ok())
            .map(MessageId::from)
            .ok_or_else(|| CoreError::Internal(format!("corrupt provider index at {key}")))?;
        self.get(id).await
    }

    /// Adds the `(provider, provider_message_id)` index entry for an
    /// accepted send.
    pub async fn index_provider(&self, message: &Message) -> Result<()> {
        let (Some(provider), Some(pmid)) =
            (message.provider_name.as_deref(), message.provider_message_id.as_deref())
        else {
            return Err(CoreError::Internal("provider index requires an accepted send".into()));
        };
        self.cache
            .set(
                &Self::provider_key(provider, pmid),
                serde_json::Value::from(message.id.to_string()),
                Some(self.ttl),
            )
            .await
    }

    /// Read-modify-write with compare-and-swap.
    ///
    /// `apply` may run several times under contention; it must be a pure
    /// function of the record.
    pub async fn update<F, R>(&self, id: MessageId, apply: F) -> Result<(Message, R)>
    where
        F: Fn(&mut Message) -> R,
    {
        let key = Self::message_key(id);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(current) = self.cache.get(&key).await? else {
                return Err(CoreError::NotFound(format!("message {id}")));
            };
            let mut message = Self::decode(current.clone())?;
            let result = apply(&mut message);
            let updated = Self::encode(&message)?;
            if self
                .cache
                .compare_and_swap(&key, Some(&current), updated, Some(self.ttl))
                .await?
            {
                return Ok((message, result));
            }
        }
        warn!(message_id = %id, "inflight CAS contention exceeded bound");
        Err(CoreError::Internal(format!("update contention on message {id}")))
    }

    /// Folds a webhook event into the record it refers to.
    ///
    /// Advances status when the lattice allows it; otherwise only patches
    /// the event's timestamp so late events keep their timing information.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] when no record matches the provider ID, e.g.
    /// after the grace window expired.
    pub async fn apply_event(&self, event: &DeliveryEvent) -> Result<EventApplied> {
        let message = self
            .get_by_provider(&event.provider_name, &event.provider_message_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "no inflight message for {}:{}",
                    event.provider_name, event.provider_message_id
                ))
            })?;

        let (message, (previous_status, transitioned)) =
            self.update(message.id, |record| {
                let previous = record.status;
                let transitioned = previous.can_transition_to(event.new_status);
                if transitioned {
                    record.status = event.new_status;
                    if event.new_status == MessageStatus::Failed {
                        record.error = event.error.clone();
                    }
                }
                record.record_timestamp(event.new_status, event.at);
                (previous, transitioned)
            })
            .await?;

        Ok(EventApplied { message, previous_status, transitioned })
    }

    /// Drops both index entries for a record.
    pub async fn expire(&self, message: &Message) -> Result<()> {
        self.cache.delete(&Self::message_key(message.id)).await?;
        if let (Some(provider), Some(pmid)) =
            (message.provider_name.as_deref(), message.provider_message_id.as_deref())
        {
            self.cache.delete(&Self::provider_key(provider, pmid)).await?;
        }
        Ok(())
    }
}
