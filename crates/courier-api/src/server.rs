//! HTTP server setup and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement
//! 4. Handler execution
//!
//! # Graceful Shutdown
//!
//! The server handles SIGTERM and CTRL+C gracefully: it stops accepting
//! new connections and waits for in-flight requests before returning.

use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::{
    handlers::{analytics, campaigns, health, messages, templates, webhooks},
    state::AppState,
};

/// Creates the Axum router with all routes and middleware.
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics));

    let message_routes = Router::new()
        .route("/api/v1/messages/send", post(messages::send_message))
        .route("/api/v1/sms/send/bulk", post(messages::send_bulk))
        .route("/api/v1/{channel}/send", post(messages::send_on_channel))
        .route("/api/v1/{channel}/status/{message_id}", get(messages::message_status));

    let webhook_routes = Router::new()
        .route(
            "/api/v1/messenger/webhook",
            get(webhooks::messenger_verify).post(webhooks::messenger_webhook),
        )
        .route("/api/v1/{channel}/webhook", post(webhooks::channel_webhook))
        .route("/api/v1/{channel}/webhook/{provider}", post(webhooks::provider_webhook));

    let campaign_routes = Router::new()
        .route(
            "/api/v1/campaigns",
            post(campaigns::create_campaign).get(campaigns::list_campaigns),
        )
        .route(
            "/api/v1/campaigns/{id}",
            get(campaigns::get_campaign)
                .put(campaigns::update_campaign)
                .delete(campaigns::delete_campaign),
        )
        .route("/api/v1/campaigns/{id}/start", post(campaigns::start_campaign))
        .route("/api/v1/campaigns/{id}/pause", post(campaigns::pause_campaign))
        .route("/api/v1/campaigns/{id}/cancel", post(campaigns::cancel_campaign))
        .route("/api/v1/campaigns/{id}/stats", get(campaigns::campaign_stats));

    let template_routes = Router::new()
        .route(
            "/api/v1/templates",
            post(templates::create_template).get(templates::list_templates),
        )
        .route(
            "/api/v1/templates/{id}",
            get(templates::get_template)
                .put(templates::update_template)
                .delete(templates::delete_template),
        );

    let analytics_routes = Router::new()
        .route("/api/v1/analytics/overview", get(analytics::overview))
        .route("/api/v1/analytics/by-channel", get(analytics::by_channel))
        .route("/api/v1/analytics/by-provider", get(analytics::by_provider))
        .route("/api/v1/analytics/delivery-rates", get(analytics::delivery_rates))
        .route("/api/v1/analytics/cost-analysis", get(analytics::cost_analysis));

    Router::new()
        .merge(health_routes)
        .merge(message_routes)
        .merge(webhook_routes)
        .merge(campaign_routes)
        .merge(template_routes)
        .merge(analytics_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware to inject request ID into all responses.
///
/// Adds X-Request-Id header for tracing requests across services.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Starts the HTTP server with graceful shutdown support.
///
/// # Errors
///
/// Returns `std::io::Error` when the port is already in use or the
/// network interface is unavailable.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
) -> Result<(), std::io::Error> {
    let app = create_router(state, request_timeout);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
