//! Core domain models and strongly-typed identifiers.
//!
//! Defines messages, campaigns, templates, delivery events, and newtype ID
//! wrappers for compile-time type safety. Includes the message status
//! lattice that governs every state transition in the dispatch pipeline.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed message identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. A message keeps this
/// ID through its entire lifecycle, from admission to terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Creates a new random message ID.
    ///
    /// Uses UUID v4 for globally unique identifiers without coordination.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed tenant identifier.
///
/// Provides multi-tenancy isolation. All operations are scoped to a tenant;
/// the gateway receives a validated tenant ID with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    /// Creates a new random tenant ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TenantId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed campaign identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub Uuid);

impl CampaignId {
    /// Creates a new random campaign ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CampaignId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CampaignId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed template identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub Uuid);

impl TemplateId {
    /// Creates a new random template ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TemplateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Logical transport family a message travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Plain SMS via aggregator backends.
    Sms,
    /// WhatsApp Cloud API.
    Whatsapp,
    /// Telegram Bot API.
    Telegram,
    /// Facebook Messenger Send API.
    Messenger,
}

impl Channel {
    /// All channels, in a fixed order.
    pub const ALL: [Self; 4] = [Self::Sms, Self::Whatsapp, Self::Telegram, Self::Messenger];

    /// Parses a channel from its wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sms" => Some(Self::Sms),
            "whatsapp" => Some(Self::Whatsapp),
            "telegram" => Some(Self::Telegram),
            "messenger" => Some(Self::Messenger),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sms => write!(f, "sms"),
            Self::Whatsapp => write!(f, "whatsapp"),
            Self::Telegram => write!(f, "telegram"),
            Self::Messenger => write!(f, "messenger"),
        }
    }
}

/// Message lifecycle status.
///
/// Statuses form a lattice that transitions must respect:
///
/// ```text
/// pending -> queued -> sent -> delivered -> read
///        \________\_______\-> failed
/// ```
///
/// `read` dominates `delivered` dominates `sent` dominates `queued`;
/// `failed` is accepted only from non-terminal states. Out-of-order
/// webhook events are resolved against this order, never by arrival time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Admitted but not yet picked up by a worker.
    Pending,

    /// Claimed by a dispatch worker, provider call imminent.
    Queued,

    /// Provider acknowledged the send.
    Sent,

    /// Provider reported delivery to the handset/client.
    Delivered,

    /// Recipient opened the message (channels that report it).
    Read,

    /// Permanently failed.
    Failed,
}

impl MessageStatus {
    /// Position in the happy-path order. `Failed` sits outside the chain.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Queued => 1,
            Self::Sent => 2,
            Self::Delivered => 3,
            Self::Read => 4,
            Self::Failed => 5,
        }
    }

    /// Whether this status ends the message lifecycle.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Read | Self::Failed)
    }

    /// Whether a transition from `self` to `next` is allowed.
    ///
    /// Forward moves along the chain are allowed; `Failed` is allowed only
    /// before delivery was observed. Anything else regresses state and is
    /// rejected.
    pub const fn can_transition_to(self, next: Self) -> bool {
        match next {
            Self::Failed => matches!(self, Self::Pending | Self::Queued | Self::Sent),
            _ => !matches!(self, Self::Failed) && next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Queued => write!(f, "queued"),
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Read => write!(f, "read"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Core message entity.
///
/// Created by the dispatcher at admission and mutated only by the worker
/// that owns it until a terminal state; webhook-driven updates go through
/// the inflight store's compare-and-set. Once `provider_message_id` is set
/// it is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: MessageId,

    /// Tenant that owns this message.
    pub tenant_id: TenantId,

    /// Campaign this message belongs to, if any.
    pub campaign_id: Option<CampaignId>,

    /// Transport channel.
    pub channel: Channel,

    /// Sender identity (E.164 number, WhatsApp business number, bot name,
    /// or page ID depending on channel).
    pub from: String,

    /// Recipient address in the channel's normalised form.
    pub to: String,

    /// Message text. Empty when a template fully determines the body.
    pub body: String,

    /// Attached media URL, if any.
    pub media_url: Option<String>,

    /// MIME type of the attached media.
    pub media_type: Option<String>,

    /// Template used to render the body, if any.
    pub template_id: Option<TemplateId>,

    /// Parameters substituted into the template.
    pub template_params: HashMap<String, String>,

    /// Provider-side template identity, resolved at admission for channels
    /// that require provider-approved templates.
    pub provider_template: Option<ProviderTemplate>,

    /// Priority 1..=10, 10 highest. Defaults to 5.
    pub priority: u8,

    /// When the message should be sent. Unset means immediately.
    pub scheduled_for: Option<DateTime<Utc>>,

    /// Current lifecycle status.
    pub status: MessageStatus,

    /// Adapter that accepted the send.
    pub provider_name: Option<String>,

    /// Provider-issued message ID, used to correlate webhooks.
    pub provider_message_id: Option<String>,

    /// Cost charged by the provider. Set only once the send is accepted.
    pub cost: f64,

    /// Currency of `cost`, carried verbatim from the adapter.
    pub currency: String,

    /// Last error description, if any.
    pub error: Option<String>,

    /// Caller-supplied opaque metadata.
    pub metadata: HashMap<String, serde_json::Value>,

    /// When the message was admitted.
    pub created_at: DateTime<Utc>,

    /// When the provider acknowledged the send.
    pub sent_at: Option<DateTime<Utc>>,

    /// When delivery to the recipient was reported.
    pub delivered_at: Option<DateTime<Utc>>,

    /// When the recipient read the message.
    pub read_at: Option<DateTime<Utc>>,

    /// Number of completed re-dispatch rounds.
    pub retry_count: u32,

    /// Maximum re-dispatch rounds before giving up.
    pub max_retries: u32,
}

impl Message {
    /// Records a status timestamp without touching the status itself.
    ///
    /// Used for late webhook events that cannot advance state any more but
    /// still carry useful timing information.
    pub fn record_timestamp(&mut self, status: MessageStatus, at: DateTime<Utc>) {
        match status {
            MessageStatus::Sent => self.sent_at.get_or_insert(at),
            MessageStatus::Delivered => self.delivered_at.get_or_insert(at),
            MessageStatus::Read => self.read_at.get_or_insert(at),
            MessageStatus::Pending | MessageStatus::Queued | MessageStatus::Failed => return,
        };
    }
}

/// Provider-registered template identity passed to adapters.
///
/// Built by the dispatcher from the template record; `params` carries the
/// substituted values in the template's declared variable order, which is
/// what positional template APIs (WhatsApp Cloud) expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTemplate {
    /// Provider-side template identifier or name.
    pub provider_template_id: String,
    /// BCP 47 language code the template was approved under.
    pub language: String,
    /// Parameter values in declared variable order.
    pub params: Vec<String>,
}

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Created but not yet started.
    Draft,
    /// Will start at `scheduled_at`.
    Scheduled,
    /// Actively emitting messages.
    Running,
    /// Emission stopped; cursor retained for resume.
    Paused,
    /// All recipients attempted.
    Completed,
    /// Terminally stopped; pending recipients abandoned.
    Cancelled,
}

impl CampaignStatus {
    /// Whether the campaign can still emit messages.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Monotone campaign counters.
///
/// Updated atomically per dispatch outcome; each counter only ever grows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignStats {
    /// Total recipients in the campaign.
    pub total_recipients: u64,
    /// Sends acknowledged by a provider.
    pub sent: u64,
    /// Deliveries confirmed by webhook.
    pub delivered: u64,
    /// Terminal failures.
    pub failed: u64,
    /// Read receipts observed.
    pub read: u64,
    /// Sum of per-message costs.
    pub total_cost: f64,
}

impl CampaignStats {
    /// Delivery rate over attempted sends, in [0, 1].
    pub fn delivery_rate(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.delivered as f64 / self.sent as f64
        }
    }
}

/// A bulk messaging campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// Unique identifier for this campaign.
    pub id: CampaignId,

    /// Tenant that owns this campaign.
    pub tenant_id: TenantId,

    /// Human-readable name.
    pub name: String,

    /// Transport channel for every message in the campaign.
    pub channel: Channel,

    /// Current lifecycle status.
    pub status: CampaignStatus,

    /// Sender identity.
    pub from: String,

    /// Recipient addresses. Duplicates are allowed; each entry is
    /// dispatched once.
    pub recipients: Vec<String>,

    /// Literal message body, used when no template is set.
    pub body: String,

    /// Template to render per recipient, if any.
    pub template_id: Option<TemplateId>,

    /// Parameters substituted into the template.
    pub template_params: HashMap<String, String>,

    /// Maximum messages emitted per second.
    pub rate_cap: u32,

    /// When a scheduled campaign should start.
    pub scheduled_at: Option<DateTime<Utc>>,

    /// Index of the next recipient to attempt. Persisted so pause/resume
    /// continues from the first not-yet-attempted recipient.
    pub cursor: usize,

    /// Live counters.
    pub stats: CampaignStats,

    /// When the campaign was created.
    pub created_at: DateTime<Utc>,

    /// When the campaign entered `running`.
    pub started_at: Option<DateTime<Utc>>,

    /// When the campaign reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

/// A reusable, parameterised message body.
///
/// Variables substitute by `{{name}}` placeholders. Channels that require
/// provider-side template approval carry the provider's identifier and
/// language code, which adapters pass to the template send API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Unique identifier for this template.
    pub id: TemplateId,

    /// Tenant that owns this template.
    pub tenant_id: TenantId,

    /// Human-readable name.
    pub name: String,

    /// Channel this template targets.
    pub channel: Channel,

    /// Body with `{{name}}` placeholders.
    pub body: String,

    /// Variables that must be supplied at send time.
    pub variables: Vec<String>,

    /// Provider-registered template identifier, for channels that need it.
    pub provider_template_id: Option<String>,

    /// BCP 47 language code of the provider-registered template.
    pub language: Option<String>,

    /// When the template was created.
    pub created_at: DateTime<Utc>,

    /// When the template was last modified.
    pub updated_at: DateTime<Utc>,
}

/// A canonical status update derived from a provider webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    /// Adapter that produced the event.
    pub provider_name: String,

    /// Provider-issued message ID the event refers to.
    pub provider_message_id: String,

    /// Status reported by the provider.
    pub new_status: MessageStatus,

    /// Provider-reported event time.
    pub at: DateTime<Utc>,

    /// Failure reason, when `new_status` is `failed`.
    pub error: Option<String>,

    /// Raw provider payload fragment, kept for diagnostics.
    pub raw: serde_json::Value,
}

/// Live counters for a tenant over a period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsOverview {
    /// Day bucket the counters cover (`YYYY-MM-DD`).
    pub period: String,
    /// Messages admitted.
    pub total_messages: u64,
    /// Sends acknowledged.
    pub sent: u64,
    /// Deliveries confirmed.
    pub delivered: u64,
    /// Terminal failures.
    pub failed: u64,
    /// Read receipts observed.
    pub read: u64,
    /// Delivered over sent, in [0, 1].
    pub delivery_rate: f64,
    /// Sum of message costs.
    pub total_cost: f64,
}

/// Per-channel counters for the analytics breakdown endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Channel the counters cover.
    pub channel: Channel,
    /// Messages admitted on the channel.
    pub total: u64,
    /// Sends acknowledged.
    pub sent: u64,
    /// Deliveries confirmed.
    pub delivered: u64,
    /// Terminal failures.
    pub failed: u64,
    /// Delivered over sent, in [0, 1].
    pub delivery_rate: f64,
    /// Sum of message costs on the channel.
    pub total_cost: f64,
    /// Cost per acknowledged send.
    pub avg_cost: f64,
}

/// Per-provider counters for the analytics breakdown endpoints.
///
/// A message gains its provider dimension when a send is acknowledged, so
/// `sent` doubles as the attempt count here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStats {
    /// Adapter name.
    pub provider: String,
    /// Sends acknowledged by this provider.
    pub sent: u64,
    /// Deliveries confirmed.
    pub delivered: u64,
    /// Failures reported after the send was acknowledged.
    pub failed: u64,
    /// Delivered over sent, in [0, 1].
    pub delivery_rate: f64,
    /// Mean send latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Sum of message costs routed through this provider.
    pub total_cost: f64,
    /// Current health score in [0, 100].
    pub health_score: f64,
}
