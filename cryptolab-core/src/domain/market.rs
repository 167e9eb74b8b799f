//! MarketSnapshot: one point-in-time market record for an asset.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily market snapshot, unique per `(asset_id, as_of_date)`.
///
/// A later write for the same key replaces every value (last write wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub asset_id: String,
    pub as_of_date: NaiveDate,
    pub price: f64,
    pub market_cap: Option<f64>,
    pub volume: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub price_change_pct_24h: Option<f64>,
}

impl MarketSnapshot {
    /// Snapshot with only the required fields populated.
    pub fn new(asset_id: impl Into<String>, as_of_date: NaiveDate, price: f64) -> Self {
        Self {
            asset_id: asset_id.into(),
            as_of_date,
            price,
            market_cap: None,
            volume: None,
            high_24h: None,
            low_24h: None,
            price_change_pct_24h: None,
        }
    }

    /// Storage key.
    pub fn key(&self) -> (&str, NaiveDate) {
        (&self.asset_id, self.as_of_date)
    }
}
