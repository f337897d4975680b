use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::CategoryKey;

/// A decrease that has been observed but not yet turned into a sale.
/// Lives in memory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub category: CategoryKey,
    pub original: u64,
    pub pending: u64,
    pub first_observed_at: DateTime<Utc>,
    pub confirmations: u32,
}

impl PendingChange {
    pub fn delta(&self) -> i64 {
        self.pending as i64 - self.original as i64
    }

    pub fn quantity(&self) -> u64 {
        self.original.saturating_sub(self.pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "change", rename_all = "snake_case")]
pub enum AttributionState {
    Stable,
    PendingDecrease(PendingChange),
    /// Confirmed but still inside the category's cooldown.
    Confirmed(PendingChange),
}

impl AttributionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionState::Stable => "stable",
            AttributionState::PendingDecrease(_) => "pending_decrease",
            AttributionState::Confirmed(_) => "confirmed",
        }
    }

    pub fn pending_change(&self) -> Option<&PendingChange> {
        match self {
            AttributionState::Stable => None,
            AttributionState::PendingDecrease(change) | AttributionState::Confirmed(change) => {
                Some(change)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Count came back to its pre-decrease value.
    Rebound,
    /// Pending too long without confirming.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Started,
    Confirming { confirmations: u32 },
    AwaitingCooldown,
    Discarded(DiscardReason),
    Emit(PendingChange),
}

/// Rules that drive one counter through the attribution states.
#[derive(Debug, Clone, Copy)]
pub struct StepRules {
    pub confirm_intervals: u32,
    pub pending_max_age: Duration,
}

/// Attribution state for one counter: a category, or the shelf total.
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    category: CategoryKey,
    last: u64,
    state: AttributionState,
}

impl ChangeTracker {
    pub fn new(category: CategoryKey, baseline: u64) -> Self {
        Self {
            category,
            last: baseline,
            state: AttributionState::Stable,
        }
    }

    pub fn last(&self) -> u64 {
        self.last
    }

    pub fn state(&self) -> &AttributionState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, AttributionState::Stable) && self.last == 0
    }

    /// Drops any in-flight change and rebases on `current`.
    pub fn reset(&mut self, current: u64) {
        self.last = current;
        self.state = AttributionState::Stable;
    }

    /// Advances one snapshot. `opens` says whether the drop from the previous
    /// value is large enough to start a pending change; `cooldown_open` gates
    /// emission.
    pub fn advance(
        &mut self,
        current: u64,
        opens: bool,
        cooldown_open: bool,
        now: DateTime<Utc>,
        rules: StepRules,
    ) -> Transition {
        let previous = self.last;
        self.last = current;

        match std::mem::replace(&mut self.state, AttributionState::Stable) {
            AttributionState::Stable => {
                if current < previous && opens {
                    self.state = AttributionState::PendingDecrease(PendingChange {
                        category: self.category.clone(),
                        original: previous,
                        pending: current,
                        first_observed_at: now,
                        confirmations: 0,
                    });
                    Transition::Started
                } else {
                    Transition::Unchanged
                }
            }
            AttributionState::PendingDecrease(mut change) => {
                if current >= change.original {
                    return Transition::Discarded(DiscardReason::Rebound);
                }
                if now - change.first_observed_at > rules.pending_max_age {
                    return Transition::Discarded(DiscardReason::Stale);
                }

                if current <= change.pending {
                    change.pending = current;
                    change.confirmations += 1;
                } else {
                    // Partial rebound: re-measure from the new level.
                    change.pending = current;
                    change.confirmations = 0;
                    change.first_observed_at = now;
                }

                if change.confirmations >= rules.confirm_intervals {
                    self.settle(change, cooldown_open)
                } else {
                    let confirmations = change.confirmations;
                    self.state = AttributionState::PendingDecrease(change);
                    Transition::Confirming { confirmations }
                }
            }
            AttributionState::Confirmed(mut change) => {
                if current >= change.original {
                    return Transition::Discarded(DiscardReason::Rebound);
                }
                change.pending = current;
                self.settle(change, cooldown_open)
            }
        }
    }

    fn settle(&mut self, change: PendingChange, cooldown_open: bool) -> Transition {
        if cooldown_open {
            self.state = AttributionState::Stable;
            Transition::Emit(change)
        } else {
            self.state = AttributionState::Confirmed(change);
            Transition::AwaitingCooldown
        }
    }
}
