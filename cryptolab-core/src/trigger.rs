//! Price-movement trigger.
//!
//! A pure predicate over two snapshots of the same asset. An external
//! scheduler evaluates it and decides whether to start the analytics job.

use serde::{Deserialize, Serialize};

use crate::analysis::percent_change;
use crate::domain::MarketSnapshot;
use crate::storage::{Storage, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceMovementTrigger {
    /// Absolute percent move that fires the trigger.
    pub threshold_pct: f64,
}

impl Default for PriceMovementTrigger {
    fn default() -> Self {
        Self { threshold_pct: 5.0 }
    }
}

/// Outcome of evaluating the trigger for one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerDecision {
    pub asset_id: String,
    /// Percent move between the two latest snapshots, if there were two.
    pub change_pct: Option<f64>,
    pub fired: bool,
}

impl PriceMovementTrigger {
    pub fn new(threshold_pct: f64) -> Self {
        Self { threshold_pct }
    }

    /// Percent move from `previous` to `latest`, or `None` if the pair is not
    /// comparable (different assets, not strictly newer, zero baseline).
    pub fn movement(&self, latest: &MarketSnapshot, previous: &MarketSnapshot) -> Option<f64> {
        if latest.asset_id != previous.asset_id || latest.as_of_date <= previous.as_of_date {
            return None;
        }
        percent_change(previous.price, latest.price)
    }

    pub fn should_trigger(&self, latest: &MarketSnapshot, previous: &MarketSnapshot) -> bool {
        self.movement(latest, previous)
            .is_some_and(|change| change.abs() >= self.threshold_pct)
    }

    /// Evaluate every asset against its two most recent stored snapshots.
    pub fn evaluate(
        &self,
        storage: &Storage,
        asset_ids: &[String],
    ) -> Result<Vec<TriggerDecision>, StorageError> {
        let mut decisions = Vec::with_capacity(asset_ids.len());
        for asset_id in asset_ids {
            let recent = storage.latest_snapshots(asset_id, 2)?;
            let (change_pct, fired) = match recent.as_slice() {
                [latest, previous] => (
                    self.movement(latest, previous),
                    self.should_trigger(latest, previous),
                ),
                _ => (None, false),
            };
            if fired {
                tracing::info!(asset = %asset_id, ?change_pct, "price movement trigger fired");
            }
            decisions.push(TriggerDecision {
                asset_id: asset_id.clone(),
                change_pct,
                fired,
            });
        }
        Ok(decisions)
    }
}

/// Free-function form of [`PriceMovementTrigger::should_trigger`].
pub fn should_trigger(latest: &MarketSnapshot, previous: &MarketSnapshot, threshold_pct: f64) -> bool {
    PriceMovementTrigger::new(threshold_pct).should_trigger(latest, previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn snap(asset: &str, day: u32, price: f64) -> MarketSnapshot {
        MarketSnapshot::new(asset, NaiveDate::from_ymd_opt(2024, 3, day).unwrap(), price)
    }

    #[test]
    fn fires_at_threshold_either_direction() {
        let t = PriceMovementTrigger::default();
        assert!(t.should_trigger(&snap("bitcoin", 2, 105.0), &snap("bitcoin", 1, 100.0)));
        assert!(t.should_trigger(&snap("bitcoin", 2, 94.0), &snap("bitcoin", 1, 100.0)));
        assert!(!t.should_trigger(&snap("bitcoin", 2, 104.9), &snap("bitcoin", 1, 100.0)));
    }

    #[test]
    fn requires_same_asset_and_newer_latest() {
        let t = PriceMovementTrigger::default();
        assert!(!t.should_trigger(&snap("ethereum", 2, 200.0), &snap("bitcoin", 1, 100.0)));
        assert!(!t.should_trigger(&snap("bitcoin", 1, 200.0), &snap("bitcoin", 2, 100.0)));
        assert!(!t.should_trigger(&snap("bitcoin", 1, 200.0), &snap("bitcoin", 1, 100.0)));
    }

    #[test]
    fn zero_baseline_never_fires() {
        assert!(!should_trigger(&snap("bitcoin", 2, 1.0), &snap("bitcoin", 1, 0.0), 5.0));
    }
}
