//! Configuration for the messaging gateway.
//!
//! Loaded in priority order: environment variables (prefixed `COURIER_`,
//! nested keys separated by `__`), then `config.toml`, then built-in
//! defaults. The gateway starts with no configuration at all, though no
//! provider will be enabled until credentials are supplied.

use std::{collections::HashMap, net::SocketAddr, time::Duration};

use anyhow::{bail, Context, Result};
use courier_core::Channel;
use courier_dispatch::{DispatcherConfig, HealthConfig, RetryPolicy, SelectorConfig};
use courier_providers::HttpConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Public origin webhooks are registered under, e.g.
    /// `https://gateway.example.com`. Twilio signs callbacks over the full
    /// URL, so this must match what the provider sees.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Dispatch worker pool size.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bounded dispatch queue depth.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// In-flight sends allowed per tenant.
    #[serde(default = "default_per_tenant_inflight")]
    pub per_tenant_inflight: usize,
    /// In-flight sends allowed across all tenants.
    #[serde(default = "default_global_inflight")]
    pub global_inflight: usize,
    /// Per-tenant admissions per second.
    #[serde(default = "default_tenant_rate_per_sec")]
    pub tenant_rate_per_sec: u32,
    /// Deadline for a single provider call, in seconds.
    #[serde(default = "default_adapter_deadline")]
    pub adapter_deadline_secs: u64,
    /// How long terminal records stay resolvable for late webhooks, in
    /// hours.
    #[serde(default = "default_grace_window_hours")]
    pub grace_window_hours: u64,

    /// Maximum re-dispatch rounds per message.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base retry backoff in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_delay_ms: u64,
    /// Retry backoff cap in milliseconds.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_delay_ms: u64,

    /// Per-channel send latency SLAs in milliseconds, keyed by channel
    /// name.
    #[serde(default = "default_sla_ms")]
    pub sla_ms: HashMap<String, u64>,

    /// Tenant-pinned adapter names, keyed by tenant UUID.
    #[serde(default)]
    pub tenant_pins: HashMap<String, String>,

    /// Provider credentials and switches.
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Per-provider settings. A section is ignored unless `enabled` is true.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Twilio SMS.
    #[serde(default)]
    pub twilio: TwilioSettings,
    /// Infobip SMS.
    #[serde(default)]
    pub infobip: InfobipSettings,
    /// Africa's Talking SMS.
    #[serde(default)]
    pub africas_talking: AfricasTalkingSettings,
    /// WhatsApp Cloud API.
    #[serde(default)]
    pub whatsapp: WhatsappSettings,
    /// Telegram Bot API.
    #[serde(default)]
    pub telegram: TelegramSettings,
    /// Facebook Messenger.
    #[serde(default)]
    pub messenger: MessengerSettings,
}

/// Twilio credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwilioSettings {
    /// Whether the adapter is registered at boot.
    #[serde(default)]
    pub enabled: bool,
    /// Account SID.
    #[serde(default)]
    pub account_sid: String,
    /// Auth token, also used to verify status callbacks.
    #[serde(default)]
    pub auth_token: String,
    /// List price per message.
    #[serde(default = "default_sms_cost")]
    pub cost_per_message: f64,
    /// Currency of the list price.
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Infobip credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfobipSettings {
    /// Whether the adapter is registered at boot.
    #[serde(default)]
    pub enabled: bool,
    /// API key.
    #[serde(default)]
    pub api_key: String,
    /// Account-specific API origin.
    #[serde(default)]
    pub base_url: String,
    /// Shared secret expected on delivery report webhooks.
    #[serde(default)]
    pub webhook_secret: String,
    /// List price per message.
    #[serde(default = "default_sms_cost")]
    pub cost_per_message: f64,
    /// Currency of the list price.
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Africa's Talking credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AfricasTalkingSettings {
    /// Whether the adapter is registered at boot.
    #[serde(default)]
    pub enabled: bool,
    /// Account username.
    #[serde(default)]
    pub username: String,
    /// API key.
    #[serde(default)]
    pub api_key: String,
    /// Shared secret expected on delivery report webhooks.
    #[serde(default)]
    pub webhook_secret: String,
    /// List price per message.
    #[serde(default = "default_sms_cost")]
    pub cost_per_message: f64,
    /// Currency of the list price.
    #[serde(default = "default_kes")]
    pub currency: String,
}

/// WhatsApp Cloud API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsappSettings {
    /// Whether the adapter is registered at boot.
    #[serde(default)]
    pub enabled: bool,
    /// Graph API access token.
    #[serde(default)]
    pub access_token: String,
    /// Business phone number ID.
    #[serde(default)]
    pub phone_number_id: String,
    /// App secret used to verify webhook signatures.
    #[serde(default)]
    pub app_secret: String,
    /// List price per message.
    #[serde(default = "default_whatsapp_cost")]
    pub cost_per_message: f64,
    /// Currency of the list price.
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Telegram bot credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramSettings {
    /// Whether the adapter is registered at boot.
    #[serde(default)]
    pub enabled: bool,
    /// Bot token.
    #[serde(default)]
    pub bot_token: String,
    /// Secret token registered with `setWebhook`.
    #[serde(default)]
    pub webhook_secret: String,
}

/// Messenger page credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessengerSettings {
    /// Whether the adapter is registered at boot.
    #[serde(default)]
    pub enabled: bool,
    /// Page access token.
    #[serde(default)]
    pub page_access_token: String,
    /// App secret used to verify webhook signatures.
    #[serde(default)]
    pub app_secret: String,
    /// Token echoed during the GET verification handshake.
    #[serde(default)]
    pub verify_token: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_workers() -> usize {
    64
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_per_tenant_inflight() -> usize {
    100
}
fn default_global_inflight() -> usize {
    1000
}
fn default_tenant_rate_per_sec() -> u32 {
    100
}
fn default_adapter_deadline() -> u64 {
    15
}
fn default_grace_window_hours() -> u64 {
    72
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    2000
}
fn default_retry_max_ms() -> u64 {
    60_000
}
fn default_sla_ms() -> HashMap<String, u64> {
    HashMap::from([
        ("sms".to_string(), 3000),
        ("whatsapp".to_string(), 2000),
        ("telegram".to_string(), 1000),
        ("messenger".to_string(), 2000),
    ])
}
fn default_sms_cost() -> f64 {
    0.01
}
fn default_whatsapp_cost() -> f64 {
    0.005
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_kes() -> String {
    "KES".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            public_base_url: default_public_base_url(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            per_tenant_inflight: default_per_tenant_inflight(),
            global_inflight: default_global_inflight(),
            tenant_rate_per_sec: default_tenant_rate_per_sec(),
            adapter_deadline_secs: default_adapter_deadline(),
            grace_window_hours: default_grace_window_hours(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_ms(),
            retry_max_delay_ms: default_retry_max_ms(),
            sla_ms: default_sla_ms(),
            tenant_pins: HashMap::new(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, `config.toml`, and environment.
    pub fn load() -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("COURIER_").split("__"))
            .extract()
            .context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        if self.global_inflight < self.per_tenant_inflight {
            bail!("global_inflight must be >= per_tenant_inflight");
        }
        if self.providers.twilio.enabled && self.providers.twilio.account_sid.is_empty() {
            bail!("twilio is enabled but account_sid is empty");
        }
        if self.providers.infobip.enabled && self.providers.infobip.base_url.is_empty() {
            bail!("infobip is enabled but base_url is empty");
        }
        if self.providers.whatsapp.enabled && self.providers.whatsapp.phone_number_id.is_empty() {
            bail!("whatsapp is enabled but phone_number_id is empty");
        }
        if self.providers.telegram.enabled && self.providers.telegram.bot_token.is_empty() {
            bail!("telegram is enabled but bot_token is empty");
        }
        if self.providers.messenger.enabled && self.providers.messenger.verify_token.is_empty() {
            bail!("messenger is enabled but verify_token is empty");
        }
        Ok(())
    }

    /// Address the server binds to.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    /// Shared HTTP client tuning for adapters.
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(self.adapter_deadline_secs),
            ..HttpConfig::default()
        }
    }

    /// Maps the flat settings onto the dispatcher's configuration.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let mut sla = HashMap::new();
        for (name, ms) in &self.sla_ms {
            if let Some(channel) = Channel::parse(name) {
                sla.insert(channel, *ms);
            }
        }
        let tenant_pins = self
            .tenant_pins
            .iter()
            .filter_map(|(tenant, adapter)| {
                tenant.parse::<uuid::Uuid>().ok().map(|id| (id.into(), adapter.clone()))
            })
            .collect();

        DispatcherConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            per_tenant_inflight: self.per_tenant_inflight,
            global_inflight: self.global_inflight,
            adapter_deadline: Duration::from_secs(self.adapter_deadline_secs),
            tenant_rate_per_sec: self.tenant_rate_per_sec,
            grace_window: Duration::from_secs(self.grace_window_hours * 3600),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
                ..RetryPolicy::default()
            },
            selector: SelectorConfig::default(),
            health: HealthConfig { sla_ms: sla, ..HealthConfig::default() },
            tenant_pins,
            ..DispatcherConfig::default()
        }
    }
}
