//! Courier messaging gateway.
//!
//! Main entry point. Initializes the provider registry, dispatch plane,
//! and HTTP server, and coordinates graceful startup and shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use courier_api::{build_state, start_server, Config};
use courier_core::{Bus, Cache, Clock, MemoryBus, MemoryCache, RealClock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting Courier messaging gateway");

    let config = Config::load()?;
    let addr = config.socket_addr()?;
    info!(
        %addr,
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(RealClock);
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(clock.clone()));
    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::default());

    let state = build_state(&config, cache, bus, clock)?;

    state.dispatcher.start().await;
    info!(workers = config.workers, "Dispatch worker pool started");

    let scheduler_cancel = CancellationToken::new();
    tokio::spawn(
        state.scheduler.clone().run(state.dispatcher.clone(), scheduler_cancel.clone()),
    );

    let dispatcher = state.dispatcher.clone();
    let request_timeout = Duration::from_secs(config.request_timeout_secs);
    info!(%addr, "Courier is ready to accept sends");
    if let Err(e) = start_server(state, addr, request_timeout).await {
        error!(error = %e, "Server failed");
    }

    info!("Draining dispatch workers");
    scheduler_cancel.cancel();
    dispatcher.shutdown();

    info!("Courier shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,courier=debug,tower_http=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
