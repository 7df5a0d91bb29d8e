//! Core domain models and collaborator traits.
//!
//! Provides strongly-typed domain primitives, the message status lattice,
//! error taxonomy, and the cache/bus/clock seams the rest of the gateway
//! is built on. All other crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod cache;
pub mod error;
pub mod models;
pub mod time;

pub use bus::{Bus, BusEvent, MemoryBus, NoOpBus};
pub use cache::{Cache, MemoryCache};
pub use error::{CoreError, Result};
pub use models::{
    AnalyticsOverview, Campaign, CampaignId, CampaignStats, CampaignStatus, Channel,
    ChannelStats, DeliveryEvent, Message, MessageId, MessageStatus, ProviderStats,
    ProviderTemplate, Template, TemplateId, TenantId,
};
pub use time::{Clock, RealClock, TestClock};
