//! Error taxonomy shared across the gateway.
//!
//! Defines structured errors with machine-readable codes so callers can
//! disambiguate admission failures, quota rejections, and backpressure
//! without parsing messages. Adapter errors are mapped into this taxonomy
//! before they reach a caller; they are never surfaced verbatim.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Recipient address cannot be normalised for the channel.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Template requires variables that were not supplied.
    #[error("missing template variables: {}", .0.join(", "))]
    MissingVariable(Vec<String>),

    /// No adapter is registered for the requested channel.
    #[error("unsupported channel: {0}")]
    UnsupportedChannel(String),

    /// `scheduled_for` is in the past or beyond the scheduling horizon.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Generic admission failure (bad priority, missing field, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation conflicts with current state (e.g. starting a cancelled
    /// campaign, template without provider approval).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Per-tenant quota exceeded.
    #[error("tenant quota exceeded")]
    QuotaExceeded,

    /// Dispatch queue is full; caller should back off.
    #[error("gateway overloaded, retry after {retry_after_secs}s")]
    Overloaded {
        /// Suggested client back-off in seconds.
        retry_after_secs: u64,
    },

    /// Webhook signature verification failed.
    #[error("webhook signature invalid: {0}")]
    SignatureInvalid(String),

    /// Unexpected internal failure, logged with a correlation ID.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Machine-readable code for HTTP error bodies.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRecipient(_) => "invalid_recipient",
            Self::MissingVariable(_) => "missing_variable",
            Self::UnsupportedChannel(_) => "unsupported_channel",
            Self::InvalidSchedule(_) => "invalid_schedule",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Overloaded { .. } => "overloaded",
            Self::SignatureInvalid(_) => "signature_invalid",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the caller may retry the same request later.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::Overloaded { .. } | Self::Internal(_))
    }

    /// Suggested client back-off, when one applies.
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Overloaded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
