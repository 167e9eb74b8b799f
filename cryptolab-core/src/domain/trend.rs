//! TrendSummary: derived trend statistics for one asset over one period.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisError;

/// Derived, disposable trend statistics.
///
/// Always recomputable from stored price points. `pct_change` is `None` when
/// the period held fewer than two points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub asset_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub moving_avg: f64,
    pub pct_change: Option<f64>,
    /// Moving-average window the summary was computed with.
    pub window: usize,
    /// Number of price points in the period.
    pub points: usize,
}

impl TrendSummary {
    /// Percent change, or `InsufficientData` if it could not be computed.
    pub fn pct_change(&self) -> Result<f64, AnalysisError> {
        self.pct_change.ok_or_else(|| AnalysisError::InsufficientData {
            asset_id: self.asset_id.clone(),
            points: self.points,
            required: 2,
        })
    }
}
