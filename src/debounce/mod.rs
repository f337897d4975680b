//! Confirm-then-cooldown primitives shared by sales attribution and alerting.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

/// Minimum spacing between events for the same key.
#[derive(Debug, Clone)]
pub struct CooldownGate<K: Ord> {
    window: Duration,
    last_fired: BTreeMap<K, DateTime<Utc>>,
}

impl<K: Ord + Clone> CooldownGate<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: BTreeMap::new(),
        }
    }

    pub fn is_open(&self, key: &K, now: DateTime<Utc>) -> bool {
        self.remaining(key, now).is_none()
    }

    /// Time left before `key` may fire again, if any.
    pub fn remaining(&self, key: &K, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_fired.get(key)?;
        match self.reopens_at(*last) {
            Some(reopens_at) => (now < reopens_at).then(|| reopens_at - now),
            // Past the representable range: closed for good.
            None => Some(self.window),
        }
    }

    fn reopens_at(&self, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
        last.checked_add_signed(self.window)
    }

    pub fn mark(&mut self, key: K, now: DateTime<Utc>) {
        self.last_fired.insert(key, now);
    }

    pub fn active_keys(&self, now: DateTime<Utc>) -> Vec<K> {
        self.last_fired
            .iter()
            .filter(|(_, &last)| self.reopens_at(last).map_or(true, |reopens_at| now < reopens_at))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceDecision {
    /// Condition does not hold.
    Idle,
    /// Condition holds but has not been confirmed yet.
    Confirming { streak: u32 },
    /// Confirmed, but the key is cooling down.
    Suppressed { remaining: Duration },
    Fire,
}

/// Requires a condition to hold for `confirm_intervals` consecutive
/// observations, then rate-limits firing per key.
#[derive(Debug, Clone)]
pub struct Debouncer<K: Ord> {
    confirm_intervals: u32,
    streaks: BTreeMap<K, u32>,
    cooldown: CooldownGate<K>,
}

impl<K: Ord + Clone> Debouncer<K> {
    pub fn new(confirm_intervals: u32, cooldown: Duration) -> Self {
        Self {
            confirm_intervals: confirm_intervals.max(1),
            streaks: BTreeMap::new(),
            cooldown: CooldownGate::new(cooldown),
        }
    }

    pub fn observe(&mut self, key: K, holds: bool, now: DateTime<Utc>) -> DebounceDecision {
        if !holds {
            self.streaks.remove(&key);
            return DebounceDecision::Idle;
        }

        let streak = self.streaks.entry(key.clone()).or_insert(0);
        *streak = streak.saturating_add(1);
        if *streak < self.confirm_intervals {
            return DebounceDecision::Confirming { streak: *streak };
        }

        if let Some(remaining) = self.cooldown.remaining(&key, now) {
            return DebounceDecision::Suppressed { remaining };
        }

        self.streaks.remove(&key);
        self.cooldown.mark(key, now);
        DebounceDecision::Fire
    }

    pub fn pending(&self) -> usize {
        self.streaks.len()
    }

    pub fn cooling_down(&self, now: DateTime<Utc>) -> Vec<K> {
        self.cooldown.active_keys(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn fires_after_confirmation() {
        let mut debouncer = Debouncer::new(2, Duration::seconds(3600));
        assert_eq!(
            debouncer.observe("kiwi", true, at(0)),
            DebounceDecision::Confirming { streak: 1 }
        );
        assert_eq!(debouncer.observe("kiwi", true, at(5)), DebounceDecision::Fire);
    }

    #[test]
    fn alternating_condition_never_fires() {
        let mut debouncer = Debouncer::new(2, Duration::seconds(3600));
        for step in 0..20 {
            let decision = debouncer.observe("kiwi", step % 2 == 0, at(step * 5));
            assert_ne!(decision, DebounceDecision::Fire);
        }
    }

    #[test]
    fn cooldown_suppresses_then_reopens() {
        let mut debouncer = Debouncer::new(1, Duration::seconds(60));
        assert_eq!(debouncer.observe("kiwi", true, at(0)), DebounceDecision::Fire);
        assert_eq!(
            debouncer.observe("kiwi", true, at(30)),
            DebounceDecision::Suppressed {
                remaining: Duration::seconds(30)
            }
        );
        assert_eq!(debouncer.observe("kiwi", true, at(60)), DebounceDecision::Fire);
    }

    #[test]
    fn keys_are_independent() {
        let mut debouncer = Debouncer::new(1, Duration::seconds(60));
        assert_eq!(debouncer.observe("kiwi", true, at(0)), DebounceDecision::Fire);
        assert_eq!(debouncer.observe("mango", true, at(1)), DebounceDecision::Fire);
        assert_eq!(debouncer.cooling_down(at(2)).len(), 2);
    }

    #[test]
    fn gate_reports_remaining_time() {
        let mut gate = CooldownGate::new(Duration::seconds(10));
        assert!(gate.is_open(&"mango", at(0)));
        gate.mark("mango", at(0));
        assert_eq!(gate.remaining(&"mango", at(4)), Some(Duration::seconds(6)));
        assert!(gate.is_open(&"mango", at(10)));
    }

    #[test]
    fn unrepresentable_reopen_time_stays_closed() {
        let window = Duration::milliseconds(i64::MAX);
        let mut gate = CooldownGate::new(window);
        gate.mark("mango", at(0));
        assert_eq!(gate.remaining(&"mango", at(5)), Some(window));
        assert_eq!(gate.active_keys(at(5)), vec!["mango"]);
    }
}
