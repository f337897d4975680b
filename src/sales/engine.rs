use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::SaleEvent;
use crate::debounce::CooldownGate;
use crate::models::{CategoryKey, DisplayZone, SmoothedSnapshot};

use super::state::{ChangeTracker, DiscardReason, PendingChange, StepRules, Transition};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, PartialEq)]
pub struct SalesSettings {
    pub confirm_intervals: u32,
    pub min_delta: u32,
    pub cooldown: Duration,
    pub pending_max_age: Duration,
}

impl Default for SalesSettings {
    fn default() -> Self {
        Self {
            confirm_intervals: 2,
            min_delta: 1,
            cooldown: Duration::seconds(10),
            pending_max_age: Duration::seconds(20),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesStats {
    pub total_sales: u64,
    pub total_quantity: u64,
    pub unattributed_sales: u64,
    pub quantity_by_category: BTreeMap<CategoryKey, u64>,
    pub noise_filtered: u64,
    pub stale_discarded: u64,
    pub pending: usize,
    pub cooling_down: usize,
}

/// Turns snapshot-to-snapshot decreases into confirmed sale events.
pub struct SalesAttributionEngine {
    settings: SalesSettings,
    zone: DisplayZone,
    tracks: BTreeMap<CategoryKey, ChangeTracker>,
    total: ChangeTracker,
    /// Pre-decrease counts of categories whose own change opened while the
    /// total had one in flight. Their drops are added back to the total so
    /// it only measures what no category explains.
    attributed_baselines: BTreeMap<CategoryKey, u64>,
    cooldown: CooldownGate<CategoryKey>,
    stats: SalesStats,
}

impl SalesAttributionEngine {
    pub fn new(settings: SalesSettings, zone: DisplayZone) -> Self {
        let cooldown = CooldownGate::new(settings.cooldown);
        Self {
            settings,
            zone,
            tracks: BTreeMap::new(),
            total: ChangeTracker::new(CategoryKey::unknown(), 0),
            attributed_baselines: BTreeMap::new(),
            cooldown,
            stats: SalesStats::default(),
        }
    }

    /// Uses a restored snapshot as the last known value for every category.
    pub fn seed(&mut self, snapshot: &SmoothedSnapshot) {
        self.tracks.clear();
        for (category, count) in snapshot.counts().iter() {
            self.tracks.insert(
                category.clone(),
                ChangeTracker::new(category.clone(), u64::from(count)),
            );
        }
        self.total.reset(snapshot.total());
        self.attributed_baselines.clear();
    }

    pub fn process(&mut self, snapshot: &SmoothedSnapshot) -> Vec<SaleEvent> {
        let now = snapshot.captured_at();
        let rules = self.rules();
        let min_delta = u64::from(self.settings.min_delta);

        let categories: BTreeSet<CategoryKey> = self
            .tracks
            .keys()
            .chain(snapshot.counts().keys())
            .cloned()
            .collect();

        let mut events = Vec::new();
        let mut opened = Vec::new();
        let mut discarded = Vec::new();

        for category in categories {
            let current = u64::from(snapshot.count(&category));
            let track = self
                .tracks
                .entry(category.clone())
                .or_insert_with(|| ChangeTracker::new(category.clone(), 0));

            let drop = track.last().saturating_sub(current);
            let opens = drop >= min_delta;

            let cooldown_open = self.cooldown.is_open(&category, now);
            match track.advance(current, opens, cooldown_open, now, rules) {
                Transition::Emit(change) => {
                    self.cooldown.mark(category.clone(), now);
                    let event = self.record_sale(change, now, true);
                    log_info!(
                        "sale confirmed: {} x{} ({} -> {})",
                        event.category,
                        event.quantity,
                        event.count_before,
                        event.count_after
                    );
                    events.push(event);
                }
                Transition::Started => {
                    opened.push((category.clone(), current + drop));
                    log_debug!("pending decrease for {category}: {} -> {current}", current + drop);
                }
                Transition::AwaitingCooldown => {
                    log_debug!("sale for {category} confirmed but cooling down");
                }
                Transition::Discarded(DiscardReason::Rebound) => {
                    self.stats.noise_filtered += 1;
                    discarded.push(category.clone());
                    log_debug!("discarded pending decrease for {category}: count rebounded to {current}");
                }
                Transition::Discarded(DiscardReason::Stale) => {
                    self.stats.stale_discarded += 1;
                    discarded.push(category.clone());
                    log_debug!("discarded stale pending decrease for {category}");
                }
                Transition::Unchanged | Transition::Confirming { .. } => {}
            }
        }

        self.tracks.retain(|_, track| !track.is_idle());

        for category in discarded {
            self.attributed_baselines.remove(&category);
        }
        for (category, baseline) in opened {
            self.attributed_baselines.entry(category).or_insert(baseline);
        }

        if let Some(event) = self.attribute_unexplained(snapshot, !events.is_empty()) {
            events.push(event);
        }

        events
    }

    fn attribute_unexplained(
        &mut self,
        snapshot: &SmoothedSnapshot,
        attributed_this_tick: bool,
    ) -> Option<SaleEvent> {
        let now = snapshot.captured_at();
        let total = snapshot.total();

        if attributed_this_tick {
            self.total.reset(total);
            self.attributed_baselines.clear();
            return None;
        }

        let explained: u64 = self
            .attributed_baselines
            .iter()
            .map(|(category, &baseline)| {
                baseline.saturating_sub(u64::from(snapshot.count(category)))
            })
            .sum();
        let adjusted = total + explained;
        let unexplained = self.total.last().saturating_sub(adjusted);
        let opens = unexplained >= 2 * u64::from(self.settings.min_delta);

        let unknown = CategoryKey::unknown();
        let cooldown_open = self.cooldown.is_open(&unknown, now);
        let rules = self.rules();
        let transition = self.total.advance(adjusted, opens, cooldown_open, now, rules);
        if self.total.state().pending_change().is_none() {
            self.total.reset(total);
            self.attributed_baselines.clear();
        }

        match transition {
            Transition::Emit(change) => {
                self.cooldown.mark(unknown, now);
                let event = self.record_sale(change, now, false);
                log_warn!(
                    "unattributed sale inferred from total drop: x{} ({} -> {})",
                    event.quantity,
                    event.count_before,
                    event.count_after
                );
                Some(event)
            }
            Transition::Discarded(DiscardReason::Rebound) => {
                self.stats.noise_filtered += 1;
                None
            }
            Transition::Discarded(DiscardReason::Stale) => {
                self.stats.stale_discarded += 1;
                None
            }
            _ => None,
        }
    }

    fn record_sale(&mut self, change: PendingChange, now: DateTime<Utc>, attributed: bool) -> SaleEvent {
        let quantity = change.quantity();
        self.stats.total_sales += 1;
        self.stats.total_quantity += quantity;
        if attributed {
            *self
                .stats
                .quantity_by_category
                .entry(change.category.clone())
                .or_insert(0) += quantity;
        } else {
            self.stats.unattributed_sales += 1;
        }

        SaleEvent {
            id: None,
            captured_at: now,
            display_time: self.zone.format(now),
            category: change.category,
            quantity,
            count_before: change.original,
            count_after: change.pending,
            attributed,
        }
    }

    fn rules(&self) -> StepRules {
        StepRules {
            confirm_intervals: self.settings.confirm_intervals,
            pending_max_age: self.settings.pending_max_age,
        }
    }

    pub fn pending_changes(&self) -> Vec<PendingChange> {
        self.tracks
            .values()
            .chain(std::iter::once(&self.total))
            .filter_map(|track| track.state().pending_change().cloned())
            .collect()
    }

    pub fn stats(&self, now: DateTime<Utc>) -> SalesStats {
        SalesStats {
            pending: self.pending_changes().len(),
            cooling_down: self.cooldown.active_keys(now).len(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryCounts;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn key(name: &str) -> CategoryKey {
        CategoryKey::normalize(name).unwrap()
    }

    fn snapshot(secs: i64, pairs: &[(&str, u32)]) -> SmoothedSnapshot {
        SmoothedSnapshot::new(at(secs), 0, CategoryCounts::from_raw(pairs.iter().copied()))
    }

    fn engine(settings: SalesSettings) -> SalesAttributionEngine {
        SalesAttributionEngine::new(settings, DisplayZone::default())
    }

    /// Feeds one category's counts at a 5s cadence; returns (tick index, event).
    fn run_series(engine: &mut SalesAttributionEngine, name: &str, series: &[u32]) -> Vec<(usize, SaleEvent)> {
        let mut emitted = Vec::new();
        for (index, &count) in series.iter().enumerate() {
            for event in engine.process(&snapshot(index as i64 * 5, &[(name, count)])) {
                emitted.push((index, event));
            }
        }
        emitted
    }

    #[test]
    fn single_dip_is_noise() {
        let mut engine = engine(SalesSettings::default());
        let emitted = run_series(&mut engine, "mango", &[5, 5, 4, 5, 5]);
        assert!(emitted.is_empty());
        assert_eq!(engine.stats(at(30)).noise_filtered, 1);
    }

    #[test]
    fn sustained_drop_emits_once_on_third_low_snapshot() {
        let mut engine = engine(SalesSettings::default());
        let emitted = run_series(&mut engine, "mango", &[5, 5, 4, 4, 4]);
        assert_eq!(emitted.len(), 1);

        let (index, event) = &emitted[0];
        assert_eq!(*index, 4);
        assert_eq!(event.category, key("mango"));
        assert_eq!(event.quantity, 1);
        assert_eq!(event.count_before, 5);
        assert_eq!(event.count_after, 4);
        assert!(event.attributed);
        assert!(event.display_time.ends_with("EST"));
    }

    #[test]
    fn cooldown_defers_second_sale() {
        let settings = SalesSettings {
            cooldown: Duration::seconds(30),
            ..SalesSettings::default()
        };
        let mut engine = engine(settings);
        // First sale at t=15; the second drop confirms at t=30 but must wait
        // until the cooldown ends at t=45.
        let emitted = run_series(&mut engine, "mango", &[5, 4, 4, 4, 3, 3, 3, 3, 3, 3, 3]);
        let indices: Vec<usize> = emitted.iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, vec![3, 9]);
        assert_eq!(emitted[1].1.count_before, 4);
        assert_eq!(emitted[1].1.count_after, 3);
    }

    #[test]
    fn second_drop_after_cooldown_emits_normally() {
        let mut engine = engine(SalesSettings::default());
        // Sale at t=15 (index 3); next drop at t=20 confirms at t=30, cooldown
        // ended at t=25.
        let emitted = run_series(&mut engine, "mango", &[5, 4, 4, 4, 3, 3, 3]);
        let indices: Vec<usize> = emitted.iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, vec![3, 6]);
    }

    #[test]
    fn categories_are_independent() {
        let mut engine = engine(SalesSettings::default());
        let frames = [
            [("mango", 5), ("kiwi", 3)],
            [("mango", 4), ("kiwi", 3)],
            [("mango", 4), ("kiwi", 2)],
            [("mango", 4), ("kiwi", 2)],
            [("mango", 4), ("kiwi", 2)],
        ];
        let mut events = Vec::new();
        for (index, pairs) in frames.iter().enumerate() {
            events.extend(engine.process(&snapshot(index as i64 * 5, pairs)));
        }
        let categories: Vec<&str> = events.iter().map(|event| event.category.as_str()).collect();
        assert_eq!(categories, vec!["mango", "kiwi"]);
    }

    #[test]
    fn restored_baseline_detects_drop_after_restart() {
        let mut engine = engine(SalesSettings::default());
        engine.seed(&snapshot(0, &[("mango", 6)]));
        let emitted = run_series(&mut engine, "mango", &[5, 5, 5]);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].1.count_before, 6);
    }

    #[test]
    fn disappearing_category_counts_as_sale() {
        let mut engine = engine(SalesSettings::default());
        let mut events = Vec::new();
        events.extend(engine.process(&snapshot(0, &[("kiwi", 1)])));
        for tick in 1..4 {
            events.extend(engine.process(&snapshot(tick * 5, &[])));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].count_after, 0);
    }

    #[test]
    fn diffuse_total_drop_is_unattributed() {
        let settings = SalesSettings {
            min_delta: 2,
            ..SalesSettings::default()
        };
        let mut engine = engine(settings);
        let full = [("a", 3), ("b", 3), ("c", 3), ("d", 3)];
        let thinned = [("a", 2), ("b", 2), ("c", 2), ("d", 2)];

        let mut events = Vec::new();
        events.extend(engine.process(&snapshot(0, &full)));
        for tick in 1..4 {
            events.extend(engine.process(&snapshot(tick * 5, &thinned)));
        }

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.category, CategoryKey::unknown());
        assert!(!event.attributed);
        assert_eq!(event.quantity, 4);
        assert_eq!((event.count_before, event.count_after), (12, 8));
        assert_eq!(engine.stats(at(20)).unattributed_sales, 1);
    }

    #[test]
    fn attributed_drop_during_unknown_confirmation_is_counted_once() {
        let settings = SalesSettings {
            min_delta: 2,
            ..SalesSettings::default()
        };
        let mut engine = engine(settings);
        let full = [("a", 3), ("b", 3), ("c", 3), ("d", 3), ("x", 5)];
        let thinned = [("a", 2), ("b", 2), ("c", 2), ("d", 2), ("x", 5)];
        let sold_x = [("a", 2), ("b", 2), ("c", 2), ("d", 2), ("x", 3)];

        let mut events = Vec::new();
        events.extend(engine.process(&snapshot(0, &full)));
        events.extend(engine.process(&snapshot(5, &thinned)));
        for tick in 2..6 {
            events.extend(engine.process(&snapshot(tick * 5, &sold_x)));
        }

        let recorded: Vec<(&str, u64)> = events
            .iter()
            .map(|event| (event.category.as_str(), event.quantity))
            .collect();
        assert_eq!(recorded, vec![("unknown", 4), ("x", 2)]);
        assert_eq!(engine.stats(at(30)).total_quantity, 6);
    }

    #[test]
    fn rebounding_category_does_not_cancel_unknown_drop() {
        let settings = SalesSettings {
            min_delta: 2,
            ..SalesSettings::default()
        };
        let mut engine = engine(settings);
        let full = [("a", 3), ("b", 3), ("c", 3), ("d", 3), ("x", 5)];
        let thinned = [("a", 2), ("b", 2), ("c", 2), ("d", 2), ("x", 5)];
        let dipped = [("a", 2), ("b", 2), ("c", 2), ("d", 2), ("x", 3)];

        let mut events = Vec::new();
        events.extend(engine.process(&snapshot(0, &full)));
        events.extend(engine.process(&snapshot(5, &thinned)));
        events.extend(engine.process(&snapshot(10, &dipped)));
        events.extend(engine.process(&snapshot(15, &thinned)));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, CategoryKey::unknown());
        assert_eq!((events[0].count_before, events[0].count_after), (17, 13));
    }

    #[test]
    fn small_total_drop_is_ignored() {
        let settings = SalesSettings {
            min_delta: 2,
            ..SalesSettings::default()
        };
        let mut engine = engine(settings);
        let mut events = Vec::new();
        events.extend(engine.process(&snapshot(0, &[("a", 3), ("b", 3)])));
        for tick in 1..5 {
            events.extend(engine.process(&snapshot(tick * 5, &[("a", 2), ("b", 2)])));
        }
        assert!(events.is_empty());
    }
}
