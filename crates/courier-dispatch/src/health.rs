//! Per-adapter health tracking.
//!
//! Every send attempt reports its outcome and latency here. The monitor
//! keeps a sliding window of counters plus a latency EWMA per adapter and
//! derives a score in `[0, 100]` that the selector ranks candidates by.
//! Scores are computed lazily from snapshots, so recording stays cheap on
//! the send path.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use courier_core::{Channel, Clock};

/// Health scoring parameters.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Sliding window over which counters accumulate.
    pub window: Duration,
    /// Smoothing factor for the latency EWMA.
    pub ewma_alpha: f64,
    /// Per-channel send latency SLA in milliseconds.
    pub sla_ms: HashMap<Channel, u64>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            ewma_alpha: 0.2,
            sla_ms: HashMap::from([
                (Channel::Sms, 3000),
                (Channel::Whatsapp, 2000),
                (Channel::Telegram, 1000),
                (Channel::Messenger, 2000),
            ]),
        }
    }
}

impl HealthConfig {
    /// SLA for a channel, in milliseconds. Unknown channels fall back to 3s.
    pub fn sla_for(&self, channel: Channel) -> u64 {
        self.sla_ms.get(&channel).copied().unwrap_or(3000)
    }
}

#[derive(Debug)]
struct AdapterStats {
    channel: Channel,
    window_start: Instant,
    attempts: u64,
    successes: u64,
    permanent_rejects: u64,
    transport_errors: u64,
    ewma_latency_ms: Option<f64>,
    // Score of the last completed window, decayed toward 100 while idle.
    carried_score: f64,
    last_used: Option<Instant>,
    unhealthy_until: Option<Instant>,
}

impl AdapterStats {
    fn new(channel: Channel, now: Instant) -> Self {
        Self {
            channel,
            window_start: now,
            attempts: 0,
            successes: 0,
            permanent_rejects: 0,
            transport_errors: 0,
            ewma_latency_ms: None,
            carried_score: 100.0,
            last_used: None,
            unhealthy_until: None,
        }
    }

    /// Rolls the window forward if it has elapsed, folding the finished
    /// window's score into `carried_score` with 1 point of recovery per
    /// fully idle window since.
    fn roll(&mut self, now: Instant, config: &HealthConfig) {
        let elapsed = now.duration_since(self.window_start);
        if elapsed < config.window {
            return;
        }
        let windows = (elapsed.as_secs_f64() / config.window.as_secs_f64()) as u64;
        let idle_windows = windows.saturating_sub(1);
        self.carried_score =
            (self.window_score(config) + idle_windows as f64).min(100.0);
        self.attempts = 0;
        self.successes = 0;
        self.permanent_rejects = 0;
        self.transport_errors = 0;
        self.window_start = now;
    }

    fn window_score(&self, config: &HealthConfig) -> f64 {
        if self.attempts == 0 {
            return self.carried_score;
        }
        let success_rate = self.successes as f64 / self.attempts as f64;
        let sla_ms = config.sla_for(self.channel) as f64;
        let latency_factor = match self.ewma_latency_ms {
            Some(ewma) => (1.0 - ewma / sla_ms).clamp(0.0, 1.0) * 100.0,
            None => 100.0,
        };
        0.7 * success_rate * 100.0 + 0.3 * latency_factor
    }

    fn score(&self, now: Instant, config: &HealthConfig) -> f64 {
        if let Some(until) = self.unhealthy_until {
            if now < until {
                return 0.0;
            }
        }
        self.window_score(config)
    }

    fn observe_latency(&mut self, latency: Duration, alpha: f64) {
        let ms = latency.as_secs_f64() * 1000.0;
        self.ewma_latency_ms = Some(match self.ewma_latency_ms {
            Some(prev) => alpha * ms + (1.0 - alpha) * prev,
            None => ms,
        });
    }
}

/// Health state of one adapter as seen by the selector.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterHealth {
    /// Derived score in `[0, 100]`.
    pub score: f64,
    /// Time since the adapter last carried a send, if ever.
    pub since_last_use: Option<Duration>,
}

/// Point-in-time view of all adapters, consumed by the selector.
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    adapters: HashMap<String, AdapterHealth>,
}

impl HealthSnapshot {
    /// Score for an adapter; adapters with no recorded traffic are cold
    /// and score 100.
    pub fn score(&self, name: &str) -> f64 {
        self.adapters.get(name).map_or(100.0, |h| h.score)
    }

    /// Whether the adapter carried a send within `window`.
    pub fn used_within(&self, name: &str, window: Duration) -> bool {
        self.adapters
            .get(name)
            .and_then(|h| h.since_last_use)
            .is_some_and(|since| since < window)
    }

    /// All adapters with recorded traffic and their current health.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AdapterHealth)> {
        self.adapters.iter().map(|(name, health)| (name.as_str(), health))
    }

    #[cfg(test)]
    pub(crate) fn with_scores(scores: &[(&str, f64)]) -> Self {
        Self {
            adapters: scores
                .iter()
                .map(|(name, score)| {
                    ((*name).to_string(), AdapterHealth { score: *score, since_last_use: None })
                })
                .collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn mark_used(&mut self, name: &str, since: Duration) {
        if let Some(health) = self.adapters.get_mut(name) {
            health.since_last_use = Some(since);
        }
    }
}

/// Shared health monitor. One per process, updated concurrently by
/// dispatch workers.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    clock: Arc<dyn Clock>,
    stats: Mutex<HashMap<String, AdapterStats>>,
}

impl HealthMonitor {
    /// Creates a monitor with the given scoring parameters.
    pub fn new(config: HealthConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, stats: Mutex::new(HashMap::new()) }
    }

    fn with_stats<R>(&self, name: &str, channel: Channel, f: impl FnOnce(&mut AdapterStats, &HealthConfig) -> R) -> R {
        let now = self.clock.now();
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let entry = stats
            .entry(name.to_string())
            .or_insert_with(|| AdapterStats::new(channel, now));
        entry.roll(now, &self.config);
        f(entry, &self.config)
    }

    /// Records a successful send and its end-to-end latency.
    pub fn record_success(&self, name: &str, channel: Channel, latency: Duration) {
        let now = self.clock.now();
        let alpha = self.config.ewma_alpha;
        self.with_stats(name, channel, |stats, _| {
            stats.attempts += 1;
            stats.successes += 1;
            stats.observe_latency(latency, alpha);
            stats.last_used = Some(now);
        });
    }

    /// Records a transport-level failure (connection error, 5xx).
    pub fn record_failure(&self, name: &str, channel: Channel, latency: Duration) {
        let now = self.clock.now();
        let alpha = self.config.ewma_alpha;
        self.with_stats(name, channel, |stats, _| {
            stats.attempts += 1;
            stats.transport_errors += 1;
            stats.observe_latency(latency, alpha);
            stats.last_used = Some(now);
        });
    }

    /// Records a permanent reject. Counts against the success rate but is
    /// tracked separately for diagnostics.
    pub fn record_reject(&self, name: &str, channel: Channel) {
        let now = self.clock.now();
        self.with_stats(name, channel, |stats, _| {
            stats.attempts += 1;
            stats.permanent_rejects += 1;
            stats.last_used = Some(now);
        });
    }

    /// Zeroes the adapter's score for one full window after an
    /// authentication failure.
    pub fn record_unauthenticated(&self, name: &str, channel: Channel) {
        let until = self.clock.now() + self.config.window;
        self.with_stats(name, channel, |stats, _| {
            stats.unhealthy_until = Some(until);
        });
    }

    /// Captures the current scores for the selector.
    pub fn snapshot(&self) -> HealthSnapshot {
        let now = self.clock.now();
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let adapters = stats
            .iter_mut()
            .map(|(name, s)| {
                s.roll(now, &self.config);
                let health = AdapterHealth {
                    score: s.score(now, &self.config),
                    since_last_use: s.last_used.map(|used| now.duration_since(used)),
                };
                (name.clone(), health)
            })
            .collect();
        HealthSnapshot { adapters }
    }
}

#[cfg(test)]
mod tests {
    use courier_core::TestClock;

    use super::*;

    fn monitor() -> (HealthMonitor, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new());
        (HealthMonitor::new(HealthConfig::default(), clock.clone()), clock)
    }

    #[test]
    fn cold_adapter_scores_full() {
        let (monitor, _clock) = monitor();
        assert_eq!(monitor.snapshot().score("twilio"), 100.0);
    }

    #[test]
    fn fast_successes_keep_score_high() {
        let (monitor, _clock) = monitor();
        for _ in 0..10 {
            monitor.record_success("twilio", Channel::Sms, Duration::from_millis(150));
        }
        let score = monitor.snapshot().score("twilio");
        assert!(score > 95.0, "score was {score}");
    }

    #[test]
    fn failures_drag_score_down() {
        let (monitor, _clock) = monitor();
        for _ in 0..2 {
            monitor.record_success("twilio", Channel::Sms, Duration::from_millis(200));
        }
        for _ in 0..8 {
            monitor.record_failure("twilio", Channel::Sms, Duration::from_millis(200));
        }
        // success_rate 0.2 -> 0.7 * 20 = 14, latency near-perfect -> +30ish.
        let score = monitor.snapshot().score("twilio");
        assert!(score < 50.0, "score was {score}");
    }

    #[test]
    fn latency_above_sla_zeroes_latency_factor() {
        let (monitor, _clock) = monitor();
        for _ in 0..10 {
            monitor.record_success("twilio", Channel::Sms, Duration::from_millis(4000));
        }
        let score = monitor.snapshot().score("twilio");
        assert!((score - 70.0).abs() < 1.0, "score was {score}");
    }

    #[test]
    fn unauthenticated_zeroes_score_for_one_window() {
        let (monitor, clock) = monitor();
        monitor.record_success("twilio", Channel::Sms, Duration::from_millis(100));
        monitor.record_unauthenticated("twilio", Channel::Sms);
        assert_eq!(monitor.snapshot().score("twilio"), 0.0);

        clock.advance(Duration::from_secs(61));
        assert!(monitor.snapshot().score("twilio") > 0.0);
    }

    #[test]
    fn idle_windows_recover_one_point_each() {
        let (monitor, clock) = monitor();
        for _ in 0..10 {
            monitor.record_failure("twilio", Channel::Sms, Duration::from_millis(100));
        }
        let degraded = monitor.snapshot().score("twilio");
        assert!(degraded < 40.0);

        // Five fully idle windows after the active one.
        clock.advance(Duration::from_secs(6 * 60));
        let recovered = monitor.snapshot().score("twilio");
        assert!((recovered - (degraded + 5.0)).abs() < 0.01, "recovered to {recovered}");
    }

    #[test]
    fn recency_is_visible_in_snapshot() {
        let (monitor, clock) = monitor();
        monitor.record_success("twilio", Channel::Sms, Duration::from_millis(100));

        let snapshot = monitor.snapshot();
        assert!(snapshot.used_within("twilio", Duration::from_secs(1)));

        clock.advance(Duration::from_secs(2));
        let snapshot = monitor.snapshot();
        assert!(!snapshot.used_within("twilio", Duration::from_secs(1)));
    }
}
