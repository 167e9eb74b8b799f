//! Market-data provider trait and structured fetch errors.
//!
//! The `MarketDataProvider` trait abstracts over the upstream REST API so the
//! pipeline units can be driven by a scripted provider in tests.

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{Asset, DateRange, MarketSnapshot, PricePoint};
use crate::error::ErrorClass;

/// Errors from the API client.
///
/// Displayable in CLI output and in the run log.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid request{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    InvalidRequest {
        status: Option<u16>,
        message: String,
    },

    #[error("rate limited by provider, gave up after {attempts} attempt(s)")]
    RateLimitExceeded { attempts: u32 },

    #[error("upstream unavailable after {attempts} attempt(s): {reason}")]
    UpstreamUnavailable { attempts: u32, reason: String },

    #[error("provider blocked: circuit breaker open for another {remaining_secs}s")]
    CircuitBreakerTripped { remaining_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("cancelled before completion")]
    Cancelled,
}

impl FetchError {
    pub fn invalid(message: impl Into<String>) -> Self {
        FetchError::InvalidRequest {
            status: None,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            FetchError::InvalidRequest { .. } => ErrorClass::InvalidRequest,
            FetchError::RateLimitExceeded { .. } => ErrorClass::RateLimitExceeded,
            FetchError::UpstreamUnavailable { .. }
            | FetchError::CircuitBreakerTripped { .. }
            | FetchError::ResponseFormat(_) => ErrorClass::UpstreamUnavailable,
            FetchError::Cancelled => ErrorClass::Cancelled,
        }
    }
}

/// Read-only access to the market-data provider.
///
/// Implementations own transport, rate limiting and retries. They keep no
/// state between calls beyond request pacing.
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Every asset the provider knows about.
    fn fetch_asset_list(&self) -> Result<Vec<Asset>, FetchError>;

    /// Market snapshots for `asset_ids`, stamped with `as_of`.
    ///
    /// Paged internally when `asset_ids` exceeds the provider's per-call limit.
    fn fetch_market_data(
        &self,
        asset_ids: &[String],
        as_of: NaiveDate,
    ) -> Result<Vec<MarketSnapshot>, FetchError>;

    /// Price history for one asset, ascending by timestamp, no duplicates.
    fn fetch_price_history(
        &self,
        asset_id: &str,
        range: DateRange,
    ) -> Result<Vec<PricePoint>, FetchError>;

    /// False while the provider is refusing requests (circuit breaker open).
    fn is_available(&self) -> bool;
}

/// Progress callback for multi-asset fetches.
pub trait FetchProgress: Send + Sync {
    fn on_start(&self, asset_id: &str, index: usize, total: usize);

    fn on_complete(
        &self,
        asset_id: &str,
        index: usize,
        total: usize,
        result: &Result<usize, FetchError>,
    );

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that emits `tracing` events.
pub struct LogProgress;

impl FetchProgress for LogProgress {
    fn on_start(&self, asset_id: &str, index: usize, total: usize) {
        tracing::debug!("[{}/{}] fetching {asset_id}", index + 1, total);
    }

    fn on_complete(
        &self,
        asset_id: &str,
        _index: usize,
        _total: usize,
        result: &Result<usize, FetchError>,
    ) {
        match result {
            Ok(rows) => tracing::info!(asset = asset_id, rows, "fetched"),
            Err(e) => tracing::warn!(asset = asset_id, error = %e, "fetch failed"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!("fetch complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_taxonomy() {
        assert_eq!(
            FetchError::invalid("empty id").class(),
            ErrorClass::InvalidRequest
        );
        assert_eq!(
            FetchError::RateLimitExceeded { attempts: 5 }.class(),
            ErrorClass::RateLimitExceeded
        );
        assert_eq!(
            FetchError::CircuitBreakerTripped { remaining_secs: 10 }.class(),
            ErrorClass::UpstreamUnavailable
        );
        assert_eq!(FetchError::Cancelled.class(), ErrorClass::Cancelled);
    }

    #[test]
    fn invalid_request_display_includes_status() {
        let e = FetchError::InvalidRequest {
            status: Some(404),
            message: "coin not found".into(),
        };
        assert_eq!(e.to_string(), "invalid request (HTTP 404): coin not found");
        assert_eq!(
            FetchError::invalid("no ids").to_string(),
            "invalid request: no ids"
        );
    }
}
