//! Channel to adapter mapping, constant after boot.

use std::{collections::HashMap, sync::Arc};

use courier_core::{Channel, CoreError};

use crate::adapter::ProviderAdapter;

/// Immutable set of registered adapters.
///
/// Built once from configuration; hot-swap is not supported, a restart
/// picks up provider changes. SMS typically registers several adapters,
/// the other channels one each.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    by_channel: HashMap<Channel, Vec<Arc<dyn ProviderAdapter>>>,
    by_name: HashMap<&'static str, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter. Registration order fixes the base candidate
    /// order for the channel.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.by_name.insert(adapter.name(), adapter.clone());
        self.by_channel.entry(adapter.channel()).or_default().push(adapter);
    }

    /// Ordered candidate adapters for a channel.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedChannel`] when no adapter is
    /// registered for the channel.
    pub fn candidates(&self, channel: Channel) -> Result<&[Arc<dyn ProviderAdapter>], CoreError> {
        match self.by_channel.get(&channel) {
            Some(adapters) if !adapters.is_empty() => Ok(adapters),
            _ => Err(CoreError::UnsupportedChannel(channel.to_string())),
        }
    }

    /// Looks up an adapter by its constant name.
    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.by_name.get(name)
    }

    /// All registered adapters, in no particular order.
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn ProviderAdapter>> {
        self.by_name.values()
    }

    /// Channels with at least one adapter.
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.by_channel.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{Message, MessageStatus};

    use super::*;
    use crate::adapter::{ParsedWebhook, SendAck, SendError, WebhookError, WebhookRequest};

    #[derive(Debug)]
    struct FakeAdapter {
        name: &'static str,
        channel: Channel,
    }

    #[async_trait::async_trait]
    impl ProviderAdapter for FakeAdapter {
        async fn send(&self, _message: &Message) -> Result<SendAck, SendError> {
            Err(SendError::Unsupported)
        }

        async fn query_status(&self, _id: &str) -> Result<MessageStatus, SendError> {
            Err(SendError::Unsupported)
        }

        fn parse_webhook(&self, _req: &WebhookRequest) -> Result<ParsedWebhook, WebhookError> {
            Ok(ParsedWebhook::default())
        }

        fn channel(&self) -> Channel {
            self.channel
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn cost_estimate(&self) -> f64 {
            0.0
        }
    }

    #[test]
    fn candidates_preserve_registration_order() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FakeAdapter { name: "twilio", channel: Channel::Sms }));
        registry.register(Arc::new(FakeAdapter { name: "infobip", channel: Channel::Sms }));

        let names: Vec<&str> =
            registry.candidates(Channel::Sms).unwrap().iter().map(|a| a.name()).collect();
        assert_eq!(names, ["twilio", "infobip"]);
    }

    #[test]
    fn missing_channel_is_unsupported() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.candidates(Channel::Telegram),
            Err(CoreError::UnsupportedChannel(_))
        ));
    }

    #[test]
    fn lookup_by_name() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FakeAdapter { name: "telegram_bot", channel: Channel::Telegram }));
        assert!(registry.by_name("telegram_bot").is_some());
        assert!(registry.by_name("nope").is_none());
    }
}
