//! Trend analysis over stored price history.
//!
//! A `TrendAnalyzer` reads one asset's price points for a period, reduces
//! them to daily closes and derives a `TrendSummary`: the trailing moving
//! average and the percent change across the period.

pub mod moving_average;
pub mod pct_change;

pub use moving_average::{moving_average_series, trailing_mean};
pub use pct_change::{percent_change, period_change, rebase};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DateRange, PricePoint, TrendSummary};
use crate::error::ErrorClass;
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("insufficient data for {asset_id}: {points} point(s), need at least {required}")]
    InsufficientData {
        asset_id: String,
        points: usize,
        required: usize,
    },

    #[error("invalid trend config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AnalysisError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AnalysisError::InsufficientData { .. } => ErrorClass::InsufficientData,
            AnalysisError::InvalidConfig(_) => ErrorClass::InvalidRequest,
            AnalysisError::Storage(e) => e.class(),
        }
    }
}

/// Where the analyzer reads price history from.
pub trait PriceSource {
    /// Points for `asset_id` inside `range`, ascending by timestamp.
    fn price_history(&self, asset_id: &str, range: DateRange)
        -> Result<Vec<PricePoint>, StorageError>;
}

impl PriceSource for Storage {
    fn price_history(
        &self,
        asset_id: &str,
        range: DateRange,
    ) -> Result<Vec<PricePoint>, StorageError> {
        self.query_price_history(asset_id, range)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Moving-average window, in daily closes.
    pub window_days: usize,
    /// Percent-change baseline: this many closes before the last one.
    /// `None` compares against the first close of the period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_offset: Option<usize>,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            comparison_offset: None,
        }
    }
}

impl TrendConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.window_days == 0 {
            return Err(AnalysisError::InvalidConfig("window_days must be >= 1".into()));
        }
        if self.comparison_offset == Some(0) {
            return Err(AnalysisError::InvalidConfig(
                "comparison_offset must be >= 1 when set".into(),
            ));
        }
        Ok(())
    }
}

/// Computes trend summaries from stored price history.
pub struct TrendAnalyzer<'a> {
    source: &'a dyn PriceSource,
    config: TrendConfig,
}

impl<'a> TrendAnalyzer<'a> {
    /// Fails with `InvalidConfig` on a zero window or a zero comparison offset.
    pub fn new(source: &'a dyn PriceSource, config: TrendConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self { source, config })
    }

    /// Trend summary of `asset_id` over `period`.
    ///
    /// An empty period is `InsufficientData`. A single close yields a summary
    /// whose `pct_change` is `None`.
    pub fn compute_trends(
        &self,
        asset_id: &str,
        period: DateRange,
    ) -> Result<TrendSummary, AnalysisError> {
        let points = self.source.price_history(asset_id, period)?;
        let closes = daily_closes(&points);
        summarize(asset_id, period, &closes, &self.config)
    }
}

/// Reduce a timestamp-ordered series to the last price of each UTC day.
pub fn daily_closes(points: &[PricePoint]) -> Vec<(NaiveDate, f64)> {
    let mut closes: Vec<(NaiveDate, f64)> = Vec::new();
    for p in points {
        let day = p.timestamp.date_naive();
        match closes.last_mut() {
            Some((d, price)) if *d == day => *price = p.price,
            _ => closes.push((day, p.price)),
        }
    }
    closes
}

/// Summarize daily closes of one asset over `period`.
pub fn summarize(
    asset_id: &str,
    period: DateRange,
    closes: &[(NaiveDate, f64)],
    config: &TrendConfig,
) -> Result<TrendSummary, AnalysisError> {
    let prices: Vec<f64> = closes.iter().map(|(_, p)| *p).collect();
    let moving_avg = trailing_mean(&prices, config.window_days).ok_or_else(|| {
        AnalysisError::InsufficientData {
            asset_id: asset_id.to_string(),
            points: 0,
            required: 1,
        }
    })?;

    Ok(TrendSummary {
        asset_id: asset_id.to_string(),
        period_start: period.start(),
        period_end: period.end(),
        moving_avg,
        pct_change: period_change(&prices, config.comparison_offset),
        window: config.window_days,
        points: prices.len(),
    })
}

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
