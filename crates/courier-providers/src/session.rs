//! Customer-care session window tracking.
//!
//! WhatsApp and Messenger only permit free-form outbound messages within
//! 24 hours of the recipient's last inbound message; outside the window
//! only provider-approved templates may be sent. The tracker records the
//! last inbound per (channel, peer) and answers window checks.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use courier_core::{Channel, Clock};

/// Default Meta customer-care window.
pub const SESSION_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Tracks the last inbound message per peer.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    last_inbound: Arc<Mutex<HashMap<(Channel, String), Instant>>>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionTracker {
    /// Creates a tracker with the standard 24h window.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_window(clock, SESSION_WINDOW)
    }

    /// Creates a tracker with a custom window.
    pub fn with_window(clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self { last_inbound: Arc::new(Mutex::new(HashMap::new())), window, clock }
    }

    /// Records an inbound message from `peer`, opening its window.
    pub fn record_inbound(&self, channel: Channel, peer: &str) {
        let mut map = self.last_inbound.lock().unwrap_or_else(|e| e.into_inner());
        map.insert((channel, peer.to_string()), self.clock.now());
    }

    /// Whether a free-form outbound to `peer` is currently permitted.
    pub fn within_window(&self, channel: Channel, peer: &str) -> bool {
        let map = self.last_inbound.lock().unwrap_or_else(|e| e.into_inner());
        match map.get(&(channel, peer.to_string())) {
            Some(&at) => self.clock.now().duration_since(at) < self.window,
            None => false,
        }
    }
}
