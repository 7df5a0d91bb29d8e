//! HTTP surface of the messaging gateway.
//!
//! Routes send, status, webhook, campaign, template, and analytics
//! endpoints onto the dispatch plane. Configuration, state construction,
//! and server lifecycle live here; all messaging semantics live in
//! `courier-dispatch`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ErrorResponse};
pub use server::{create_router, start_server};
pub use state::{build_state, AppState};
