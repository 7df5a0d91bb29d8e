//! Dispatch plane of the messaging gateway.
//!
//! Admission, provider selection over live health signals, the concurrent
//! send loop with retry and backpressure, webhook correlation through the
//! inflight store, campaign fan-out, and analytics emission.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod analytics;
pub mod campaign;
pub mod dispatcher;
pub mod health;
pub mod inflight;
pub mod ratelimit;
pub mod retry;
pub mod scheduler;
pub mod selector;
pub mod template;

#[cfg(test)]
pub(crate) mod testutil;

pub use analytics::{AnalyticsEmitter, TransitionEvent, TRANSITIONS_TOPIC};
pub use campaign::{CampaignRunner, CampaignStore};
pub use dispatcher::{Dispatcher, DispatcherConfig, SendRequest};
pub use health::{AdapterHealth, HealthConfig, HealthMonitor, HealthSnapshot};
pub use inflight::{EventApplied, InflightStore, DEFAULT_GRACE_WINDOW};
pub use ratelimit::TenantRateLimiter;
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::Scheduler;
pub use selector::{AffinityMap, ProviderSelector, SelectorConfig};
pub use template::TemplateStore;
