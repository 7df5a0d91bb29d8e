//! Provider adapters for the messaging gateway.
//!
//! Each vendor API lives behind [`adapter::ProviderAdapter`], a uniform
//! surface for sending, status queries and webhook parsing. The dispatch
//! layer only ever sees that trait plus the [`registry::ProviderRegistry`]
//! that maps channels to candidate adapters.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod address;
pub mod africas_talking;
pub mod http;
pub mod infobip;
pub mod messenger;
pub mod registry;
pub mod session;
pub mod signature;
pub mod telegram;
pub mod twilio;
pub mod whatsapp;

#[cfg(test)]
pub(crate) mod testutil;

pub use adapter::{
    ParsedWebhook, ProviderAdapter, SendAck, SendError, WebhookError, WebhookRequest,
};
pub use africas_talking::{AfricasTalkingAdapter, AfricasTalkingConfig};
pub use http::HttpConfig;
pub use infobip::{InfobipAdapter, InfobipConfig};
pub use messenger::{MessengerAdapter, MessengerConfig};
pub use registry::ProviderRegistry;
pub use session::SessionTracker;
pub use telegram::{TelegramAdapter, TelegramConfig};
pub use twilio::{TwilioAdapter, TwilioConfig};
pub use whatsapp::{WhatsappAdapter, WhatsappConfig};
