use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::{AlertEvent, AlertKind, AlertSeverity, FreshnessStatus};
use crate::debounce::{DebounceDecision, Debouncer};
use crate::models::{CategoryKey, DisplayZone, SmoothedSnapshot};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, PartialEq)]
pub struct AlertSettings {
    pub enabled: bool,
    pub confirm_intervals: u32,
    pub cooldown: Duration,
    pub low_stock_thresholds: BTreeMap<CategoryKey, u32>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            confirm_intervals: 2,
            cooldown: Duration::seconds(3600),
            low_stock_thresholds: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub total_fired: u64,
    pub fired_by_kind: BTreeMap<AlertKind, u64>,
    pub suppressed: u64,
    pub confirming: usize,
    pub cooling_down: usize,
}

/// Debounced low-stock and expiration alerting.
pub struct AlertEngine {
    settings: AlertSettings,
    zone: DisplayZone,
    debouncer: Debouncer<(AlertKind, CategoryKey)>,
    stats: AlertStats,
}

impl AlertEngine {
    pub fn new(settings: AlertSettings, zone: DisplayZone) -> Self {
        let debouncer = Debouncer::new(settings.confirm_intervals, settings.cooldown);
        Self {
            settings,
            zone,
            debouncer,
            stats: AlertStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Evaluates every condition against one snapshot. `freshness` carries
    /// the status of every tracked category at snapshot time.
    pub fn evaluate(
        &mut self,
        snapshot: &SmoothedSnapshot,
        freshness: &[FreshnessStatus],
    ) -> Vec<AlertEvent> {
        if !self.settings.enabled {
            return Vec::new();
        }

        let now = snapshot.captured_at();
        let mut fired = Vec::new();

        let thresholds: Vec<(CategoryKey, u32)> = self
            .settings
            .low_stock_thresholds
            .iter()
            .map(|(category, &threshold)| (category.clone(), threshold))
            .collect();
        for (category, threshold) in thresholds {
            let count = snapshot.count(&category);
            let holds = count < threshold;
            if self.decide(AlertKind::LowStock, &category, holds, now) {
                fired.push(self.low_stock_alert(category, count, threshold, now));
            }
        }

        for status in freshness {
            if self.decide(AlertKind::Expiration, &status.category, status.expired, now) {
                fired.push(self.expiration_alert(status, now));
            }
        }

        for alert in &fired {
            self.stats.total_fired += 1;
            *self.stats.fired_by_kind.entry(alert.kind).or_insert(0) += 1;
            log_info!("alert fired: {} for {} ({})", alert.kind.as_str(), alert.category, alert.severity.as_str());
        }

        fired
    }

    fn decide(&mut self, kind: AlertKind, category: &CategoryKey, holds: bool, now: DateTime<Utc>) -> bool {
        match self.debouncer.observe((kind, category.clone()), holds, now) {
            DebounceDecision::Fire => true,
            DebounceDecision::Suppressed { remaining } => {
                self.stats.suppressed += 1;
                log_debug!(
                    "{} alert for {category} suppressed, cooldown ends in {}s",
                    kind.as_str(),
                    remaining.num_seconds()
                );
                false
            }
            DebounceDecision::Idle | DebounceDecision::Confirming { .. } => false,
        }
    }

    fn low_stock_alert(&self, category: CategoryKey, count: u32, threshold: u32, now: DateTime<Utc>) -> AlertEvent {
        let (severity, status, message) = if count == 0 {
            (
                AlertSeverity::Critical,
                "out_of_stock",
                format!("{category} is out of stock (threshold {threshold})"),
            )
        } else {
            (
                AlertSeverity::Warning,
                "low_stock",
                format!("{category} is low: {count} left (threshold {threshold})"),
            )
        };

        AlertEvent {
            id: None,
            uid: Uuid::new_v4(),
            raised_at: now,
            display_time: self.zone.format(now),
            kind: AlertKind::LowStock,
            category,
            severity,
            message,
            metadata: json!({
                "current_count": count,
                "threshold": threshold,
                "status": status,
            }),
            acknowledged: false,
        }
    }

    fn expiration_alert(&self, status: &FreshnessStatus, now: DateTime<Utc>) -> AlertEvent {
        AlertEvent {
            id: None,
            uid: Uuid::new_v4(),
            raised_at: now,
            display_time: self.zone.format(now),
            kind: AlertKind::Expiration,
            category: status.category.clone(),
            severity: AlertSeverity::Warning,
            message: format!(
                "{} has been on the shelf {:.1} days (limit {} days)",
                status.category, status.age_days, status.expiration_days
            ),
            metadata: json!({
                "age_days": (status.age_days * 10.0).round() / 10.0,
                "expiration_days": status.expiration_days,
                "first_seen": status.first_seen.to_rfc3339(),
            }),
            acknowledged: false,
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> AlertStats {
        AlertStats {
            confirming: self.debouncer.pending(),
            cooling_down: self.debouncer.cooling_down(now).len(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FreshnessRecord;
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

    fn engine_with_threshold(name: &str, threshold: u32) -> AlertEngine {
        let settings = AlertSettings {
            low_stock_thresholds: BTreeMap::from([(key(name), threshold)]),
            ..AlertSettings::default()
        };
        AlertEngine::new(settings, DisplayZone::default())
    }

    #[test]
    fn alternating_low_stock_never_fires() {
        let mut engine = engine_with_threshold("mango", 3);
        for tick in 0..20 {
            let count = if tick % 2 == 0 { 1 } else { 5 };
            let fired = engine.evaluate(&snapshot(tick * 5, &[("mango", count)]), &[]);
            assert!(fired.is_empty(), "tick {tick} fired");
        }
    }

    #[test]
    fn sustained_low_stock_fires_once_per_cooldown() {
        let mut engine = engine_with_threshold("mango", 3);
        let mut fired = Vec::new();
        for tick in 0..20 {
            fired.extend(engine.evaluate(&snapshot(tick * 5, &[("mango", 2)]), &[]));
        }
        assert_eq!(fired.len(), 1);

        let alert = &fired[0];
        assert_eq!(alert.kind, AlertKind::LowStock);
        assert_eq!(alert.severity, AlertSeverity::Warning);
        assert_eq!(alert.metadata["current_count"], 2);
        assert_eq!(alert.metadata["status"], "low_stock");
        assert_eq!(alert.raised_at, at(5));

        let after_cooldown = engine.evaluate(&snapshot(3605, &[("mango", 2)]), &[]);
        assert_eq!(after_cooldown.len(), 1);
    }

    #[test]
    fn threshold_is_strict() {
        let mut engine = engine_with_threshold("mango", 3);
        for tick in 0..4 {
            assert!(engine.evaluate(&snapshot(tick * 5, &[("mango", 3)]), &[]).is_empty());
        }
    }

    #[test]
    fn empty_shelf_is_critical() {
        let mut engine = engine_with_threshold("kiwi", 2);
        engine.evaluate(&snapshot(0, &[]), &[]);
        let fired = engine.evaluate(&snapshot(5, &[]), &[]);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].severity, AlertSeverity::Critical);
        assert_eq!(fired[0].metadata["status"], "out_of_stock");
    }

    #[test]
    fn expired_category_raises_expiration_alert() {
        let mut engine = AlertEngine::new(AlertSettings::default(), DisplayZone::default());
        let record = FreshnessRecord::first_observed(key("banana"), at(-6 * 86_400), 5);

        let first = engine.evaluate(&snapshot(0, &[("banana", 4)]), &[record.status(at(0))]);
        assert!(first.is_empty());
        let second = engine.evaluate(&snapshot(5, &[("banana", 4)]), &[record.status(at(5))]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind, AlertKind::Expiration);
        assert_eq!(second[0].metadata["expiration_days"], 5);
    }

    #[test]
    fn low_stock_and_expiration_are_debounced_separately() {
        let mut engine = engine_with_threshold("banana", 5);
        let record = FreshnessRecord::first_observed(key("banana"), at(-6 * 86_400), 5);
        let mut fired = Vec::new();
        for tick in 0..2 {
            let now = at(tick * 5);
            fired.extend(engine.evaluate(&snapshot(tick * 5, &[("banana", 1)]), &[record.status(now)]));
        }
        assert_eq!(fired.len(), 2);
        assert_eq!(engine.stats(at(10)).cooling_down, 2);
    }

    #[test]
    fn disabled_engine_is_silent() {
        let settings = AlertSettings {
            enabled: false,
            low_stock_thresholds: BTreeMap::from([(key("mango"), 3)]),
            ..AlertSettings::default()
        };
        let mut engine = AlertEngine::new(settings, DisplayZone::default());
        for tick in 0..5 {
            assert!(engine.evaluate(&snapshot(tick * 5, &[]), &[]).is_empty());
        }
    }
}
