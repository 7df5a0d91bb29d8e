//! Candidate ordering for a single send.
//!
//! The selector is a pure function over a [`HealthSnapshot`]: given the
//! registry's candidates for a channel it returns the order in which the
//! dispatcher should attempt them. Keeping it snapshot-based makes routing
//! decisions reproducible in tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use courier_core::{Channel, Clock};
use courier_providers::ProviderAdapter;

use crate::health::HealthSnapshot;

/// Selector tuning knobs.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Adapters scoring below this are skipped unless every candidate does.
    pub score_floor: f64,
    /// Bonus applied to the adapter that recently delivered to the same
    /// recipient.
    pub affinity_bonus: f64,
    /// How long a delivery keeps its recipient affinity.
    pub affinity_window: Duration,
    /// Adapters used within this window get the recency penalty.
    pub recency_window: Duration,
    /// Multiplier applied to recently used adapters to spread load.
    pub recency_factor: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            score_floor: 20.0,
            affinity_bonus: 10.0,
            affinity_window: Duration::from_secs(3600),
            recency_window: Duration::from_secs(1),
            recency_factor: 0.8,
        }
    }
}

/// Remembers which adapter last delivered to each recipient.
///
/// Entries expire after the affinity window; lookups never return stale
/// routes.
#[derive(Debug)]
pub struct AffinityMap {
    window: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<(Channel, String), (String, Instant)>>,
}

impl AffinityMap {
    /// Creates an empty map with the given retention window.
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { window, clock, entries: Mutex::new(HashMap::new()) }
    }

    /// Records a confirmed delivery to `to` via `adapter`.
    pub fn record_delivery(&self, channel: Channel, to: &str, adapter: &str) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((channel, to.to_string()), (adapter.to_string(), now));
    }

    /// Adapter that delivered to `to` within the window, if any.
    pub fn lookup(&self, channel: Channel, to: &str) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&(channel, to.to_string())) {
            Some((adapter, at)) if now.duration_since(*at) < self.window => {
                Some(adapter.clone())
            },
            Some(_) => {
                entries.remove(&(channel, to.to_string()));
                None
            },
            None => None,
        }
    }
}

/// Orders candidate adapters for one message.
#[derive(Debug, Clone, Default)]
pub struct ProviderSelector {
    config: SelectorConfig,
}

impl ProviderSelector {
    /// Creates a selector with the given tuning.
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// Ranks `candidates` for a send.
    ///
    /// `affinity` names the adapter that recently delivered to this
    /// recipient; `pinned` is the tenant's preferred adapter. The result is
    /// never empty when `candidates` is not: if every adapter is below the
    /// floor the single best one is returned so traffic degrades instead of
    /// stopping.
    pub fn select(
        &self,
        snapshot: &HealthSnapshot,
        candidates: &[Arc<dyn ProviderAdapter>],
        affinity: Option<&str>,
        pinned: Option<&str>,
    ) -> Vec<Arc<dyn ProviderAdapter>> {
        let mut eligible: Vec<&Arc<dyn ProviderAdapter>> = candidates
            .iter()
            .filter(|a| snapshot.score(a.name()) >= self.config.score_floor)
            .collect();

        if eligible.is_empty() {
            // Whole set is degraded: keep the single best candidate alive.
            let best = candidates.iter().max_by(|a, b| {
                snapshot
                    .score(a.name())
                    .total_cmp(&snapshot.score(b.name()))
                    .then_with(|| b.cost_estimate().total_cmp(&a.cost_estimate()))
                    .then_with(|| b.name().cmp(a.name()))
            });
            return best.cloned().into_iter().collect();
        }

        let mut ranked: Vec<(f64, &Arc<dyn ProviderAdapter>)> = eligible
            .drain(..)
            .map(|adapter| {
                let mut score = snapshot.score(adapter.name());
                if affinity == Some(adapter.name()) {
                    score += self.config.affinity_bonus;
                }
                if snapshot.used_within(adapter.name(), self.config.recency_window) {
                    score *= self.config.recency_factor;
                }
                (score, adapter)
            })
            .collect();

        ranked.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| a.cost_estimate().total_cmp(&b.cost_estimate()))
                .then_with(|| a.name().cmp(b.name()))
        });

        let mut ordered: Vec<Arc<dyn ProviderAdapter>> =
            ranked.into_iter().map(|(_, a)| a.clone()).collect();

        if let Some(pinned) = pinned {
            if let Some(pos) = ordered.iter().position(|a| a.name() == pinned) {
                let preferred = ordered.remove(pos);
                ordered.insert(0, preferred);
            }
        }

        ordered
    }
}

#[cfg(test)]
mod tests {
    use courier_core::TestClock;

    use super::*;
    use crate::testutil::ScriptedAdapter;

    fn adapters(specs: &[(&'static str, f64)]) -> Vec<Arc<dyn ProviderAdapter>> {
        specs
            .iter()
            .map(|(name, cost)| {
                Arc::new(ScriptedAdapter::new(name, Channel::Sms, *cost)) as Arc<dyn ProviderAdapter>
            })
            .collect()
    }

    fn names(ordered: &[Arc<dyn ProviderAdapter>]) -> Vec<&str> {
        ordered.iter().map(|a| a.name()).collect()
    }

    #[test]
    fn ranks_by_score_descending() {
        let selector = ProviderSelector::default();
        let candidates = adapters(&[("twilio", 0.01), ("infobip", 0.01)]);
        let snapshot = HealthSnapshot::with_scores(&[("twilio", 60.0), ("infobip", 90.0)]);

        let ordered = selector.select(&snapshot, &candidates, None, None);
        assert_eq!(names(&ordered), ["infobip", "twilio"]);
    }

    #[test]
    fn ties_break_on_cost_then_name() {
        let selector = ProviderSelector::default();
        let candidates =
            adapters(&[("twilio", 0.02), ("infobip", 0.01), ("africas_talking", 0.01)]);
        let snapshot = HealthSnapshot::with_scores(&[
            ("twilio", 80.0),
            ("infobip", 80.0),
            ("africas_talking", 80.0),
        ]);

        let ordered = selector.select(&snapshot, &candidates, None, None);
        assert_eq!(names(&ordered), ["africas_talking", "infobip", "twilio"]);
    }

    #[test]
    fn below_floor_adapters_are_skipped() {
        let selector = ProviderSelector::default();
        let candidates = adapters(&[("twilio", 0.01), ("infobip", 0.01)]);
        let snapshot = HealthSnapshot::with_scores(&[("twilio", 10.0), ("infobip", 70.0)]);

        let ordered = selector.select(&snapshot, &candidates, None, None);
        assert_eq!(names(&ordered), ["infobip"]);
    }

    #[test]
    fn fully_degraded_set_keeps_best_candidate() {
        let selector = ProviderSelector::default();
        let candidates = adapters(&[("twilio", 0.01), ("infobip", 0.01)]);
        let snapshot = HealthSnapshot::with_scores(&[("twilio", 5.0), ("infobip", 12.0)]);

        let ordered = selector.select(&snapshot, &candidates, None, None);
        assert_eq!(names(&ordered), ["infobip"]);
    }

    #[test]
    fn affinity_bonus_promotes_known_route() {
        let selector = ProviderSelector::default();
        let candidates = adapters(&[("twilio", 0.01), ("infobip", 0.01)]);
        let snapshot = HealthSnapshot::with_scores(&[("twilio", 85.0), ("infobip", 90.0)]);

        let ordered = selector.select(&snapshot, &candidates, Some("twilio"), None);
        assert_eq!(names(&ordered), ["twilio", "infobip"]);
    }

    #[test]
    fn recency_penalty_spreads_load() {
        let selector = ProviderSelector::default();
        let candidates = adapters(&[("twilio", 0.01), ("infobip", 0.01)]);
        let mut snapshot = HealthSnapshot::with_scores(&[("twilio", 90.0), ("infobip", 80.0)]);
        snapshot.mark_used("twilio", Duration::from_millis(200));

        // 90 * 0.8 = 72 < 80, so the idle adapter wins.
        let ordered = selector.select(&snapshot, &candidates, None, None);
        assert_eq!(names(&ordered), ["infobip", "twilio"]);
    }

    #[test]
    fn pinned_adapter_moves_to_head_when_eligible() {
        let selector = ProviderSelector::default();
        let candidates = adapters(&[("twilio", 0.01), ("infobip", 0.01)]);
        let snapshot = HealthSnapshot::with_scores(&[("twilio", 50.0), ("infobip", 90.0)]);

        let ordered = selector.select(&snapshot, &candidates, None, Some("twilio"));
        assert_eq!(names(&ordered), ["twilio", "infobip"]);

        // Pin below the floor is ignored.
        let snapshot = HealthSnapshot::with_scores(&[("twilio", 5.0), ("infobip", 90.0)]);
        let ordered = selector.select(&snapshot, &candidates, None, Some("twilio"));
        assert_eq!(names(&ordered), ["infobip"]);
    }

    #[test]
    fn deterministic_for_equal_snapshots() {
        let selector = ProviderSelector::default();
        let candidates = adapters(&[("twilio", 0.01), ("infobip", 0.02), ("africas_talking", 0.03)]);
        let snapshot = HealthSnapshot::with_scores(&[
            ("twilio", 77.0),
            ("infobip", 93.0),
            ("africas_talking", 41.0),
        ]);

        let first_ordered = selector.select(&snapshot, &candidates, None, None);
        let first = names(&first_ordered);
        for _ in 0..10 {
            assert_eq!(names(&selector.select(&snapshot, &candidates, None, None)), first);
        }
    }

    #[test]
    fn affinity_entries_expire() {
        let clock = Arc::new(TestClock::new());
        let map = AffinityMap::new(Duration::from_secs(3600), clock.clone());

        map.record_delivery(Channel::Sms, "+14155550123", "twilio");
        assert_eq!(map.lookup(Channel::Sms, "+14155550123").as_deref(), Some("twilio"));

        clock.advance(Duration::from_secs(3601));
        assert_eq!(map.lookup(Channel::Sms, "+14155550123"), None);
    }
}
