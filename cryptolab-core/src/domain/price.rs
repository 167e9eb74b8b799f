//! PricePoint: a single timestamped price observation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Price observation, unique per `(asset_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub asset_id: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub market_cap: Option<f64>,
    pub total_volume: Option<f64>,
}

impl PricePoint {
    pub fn new(asset_id: impl Into<String>, timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            asset_id: asset_id.into(),
            timestamp,
            price,
            market_cap: None,
            total_volume: None,
        }
    }

    /// Storage key.
    pub fn key(&self) -> (&str, DateTime<Utc>) {
        (&self.asset_id, self.timestamp)
    }
}

/// Extract the price column from a series.
pub fn prices(points: &[PricePoint]) -> Vec<f64> {
    points.iter().map(|p| p.price).collect()
}
