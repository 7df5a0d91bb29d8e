//! Shared application state.
//!
//! Built once at startup from configuration: every enabled provider
//! adapter is constructed and registered, then the dispatcher, campaign
//! runner, and scheduler are wired over shared infrastructure (cache,
//! bus, clock).

use std::sync::Arc;

use anyhow::{Context, Result};
use courier_core::{Bus, Cache, Clock};
use courier_dispatch::{CampaignRunner, CampaignStore, Dispatcher, Scheduler, TemplateStore};
use courier_providers::{
    AfricasTalkingAdapter, AfricasTalkingConfig, InfobipAdapter, InfobipConfig, MessengerAdapter,
    MessengerConfig, ProviderAdapter, ProviderRegistry, SessionTracker, TelegramAdapter,
    TelegramConfig, TwilioAdapter, TwilioConfig, WhatsappAdapter, WhatsappConfig,
};
use tracing::info;

use crate::config::Config;

const GRAPH_API_VERSION: &str = "v19.0";

/// State handed to every handler. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The send core.
    pub dispatcher: Dispatcher,
    /// Campaign emission tasks.
    pub runner: CampaignRunner,
    /// Deferred-send timer.
    pub scheduler: Arc<Scheduler>,
    /// Registered provider adapters.
    pub registry: Arc<ProviderRegistry>,
    /// Token the Messenger webhook handshake must present, when the
    /// adapter is enabled.
    pub messenger_verify_token: Option<String>,
    /// Public origin webhooks are registered under.
    pub public_base_url: String,
}

/// Constructs the full state graph from configuration.
///
/// # Errors
///
/// Fails when an enabled adapter cannot build its HTTP client.
pub fn build_state(
    config: &Config,
    cache: Arc<dyn Cache>,
    bus: Arc<dyn Bus>,
    clock: Arc<dyn Clock>,
) -> Result<AppState> {
    let registry = Arc::new(build_registry(config, &clock)?);
    for adapter in registry.all() {
        info!(provider = adapter.name(), channel = %adapter.channel(), "provider registered");
    }

    let templates = Arc::new(TemplateStore::new(clock.clone()));
    let campaigns = Arc::new(CampaignStore::new(clock.clone()));
    let dispatcher = Dispatcher::new(
        config.dispatcher_config(),
        registry.clone(),
        templates,
        campaigns.clone(),
        cache,
        bus,
        clock.clone(),
    );
    let runner = CampaignRunner::new(dispatcher.clone(), campaigns, clock.clone());
    let scheduler = Arc::new(Scheduler::new(clock));

    let messenger_verify_token = config
        .providers
        .messenger
        .enabled
        .then(|| config.providers.messenger.verify_token.clone());

    Ok(AppState {
        dispatcher,
        runner,
        scheduler,
        registry,
        messenger_verify_token,
        public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
    })
}

fn build_registry(config: &Config, clock: &Arc<dyn Clock>) -> Result<ProviderRegistry> {
    let http = config.http_config();
    let base = config.public_base_url.trim_end_matches('/');
    let mut registry = ProviderRegistry::new();

    let providers = &config.providers;
    if providers.twilio.enabled {
        let adapter = TwilioAdapter::new(TwilioConfig {
            account_sid: providers.twilio.account_sid.clone(),
            auth_token: providers.twilio.auth_token.clone(),
            base_url: TwilioConfig::DEFAULT_BASE_URL.into(),
            cost_per_message: providers.twilio.cost_per_message,
            currency: providers.twilio.currency.clone(),
            status_callback_url: format!("{base}/api/v1/sms/webhook/twilio"),
            http: http.clone(),
        })
        .context("failed to build twilio adapter")?;
        registry.register(Arc::new(adapter));
    }
    if providers.infobip.enabled {
        let adapter = InfobipAdapter::new(InfobipConfig {
            api_key: providers.infobip.api_key.clone(),
            base_url: providers.infobip.base_url.clone(),
            cost_per_message: providers.infobip.cost_per_message,
            currency: providers.infobip.currency.clone(),
            webhook_secret_header: "X-Courier-Token".into(),
            webhook_secret: providers.infobip.webhook_secret.clone(),
            http: http.clone(),
        })
        .context("failed to build infobip adapter")?;
        registry.register(Arc::new(adapter));
    }
    if providers.africas_talking.enabled {
        let adapter = AfricasTalkingAdapter::new(AfricasTalkingConfig {
            username: providers.africas_talking.username.clone(),
            api_key: providers.africas_talking.api_key.clone(),
            base_url: AfricasTalkingConfig::DEFAULT_BASE_URL.into(),
            cost_per_message: providers.africas_talking.cost_per_message,
            currency: providers.africas_talking.currency.clone(),
            webhook_secret_header: "X-Courier-Token".into(),
            webhook_secret: providers.africas_talking.webhook_secret.clone(),
            http: http.clone(),
        })
        .context("failed to build africas_talking adapter")?;
        registry.register(Arc::new(adapter));
    }
    if providers.whatsapp.enabled {
        let adapter = WhatsappAdapter::new(
            WhatsappConfig {
                access_token: providers.whatsapp.access_token.clone(),
                phone_number_id: providers.whatsapp.phone_number_id.clone(),
                app_secret: providers.whatsapp.app_secret.clone(),
                base_url: WhatsappConfig::DEFAULT_BASE_URL.into(),
                api_version: GRAPH_API_VERSION.into(),
                cost_per_message: providers.whatsapp.cost_per_message,
                currency: providers.whatsapp.currency.clone(),
                http: http.clone(),
            },
            SessionTracker::new(clock.clone()),
        )
        .context("failed to build whatsapp adapter")?;
        registry.register(Arc::new(adapter));
    }
    if providers.telegram.enabled {
        let adapter = TelegramAdapter::new(TelegramConfig {
            bot_token: providers.telegram.bot_token.clone(),
            base_url: TelegramConfig::DEFAULT_BASE_URL.into(),
            webhook_secret: providers.telegram.webhook_secret.clone(),
            cost_per_message: 0.0,
            currency: "USD".into(),
            http: http.clone(),
        })
        .context("failed to build telegram adapter")?;
        registry.register(Arc::new(adapter));
    }
    if providers.messenger.enabled {
        let adapter = MessengerAdapter::new(
            MessengerConfig {
                page_access_token: providers.messenger.page_access_token.clone(),
                app_secret: providers.messenger.app_secret.clone(),
                verify_token: providers.messenger.verify_token.clone(),
                base_url: MessengerConfig::DEFAULT_BASE_URL.into(),
                api_version: GRAPH_API_VERSION.into(),
                cost_per_message: 0.0,
                currency: "USD".into(),
                http,
            },
            SessionTracker::new(clock.clone()),
        )
        .context("failed to build messenger adapter")?;
        registry.register(Arc::new(adapter));
    }

    Ok(registry)
}
