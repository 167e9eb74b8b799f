//! cryptolab core: domain types, market-data API client, DuckDB storage,
//! trend analysis and the price-movement trigger.
//!
//! - Domain types (assets, market snapshots, price points, trend summaries)
//! - CoinGecko client with rate limiting, retries and a circuit breaker
//! - Storage layer with idempotent, transactional batch writes
//! - Trend analyzer (moving average, percent change)
//! - Error classification shared by every layer

pub mod analysis;
pub mod api;
pub mod cancel;
pub mod domain;
pub mod error;
pub mod storage;
pub mod trigger;

pub use cancel::CancelToken;
pub use error::ErrorClass;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types handed to worker threads are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Asset>();
        require_sync::<domain::Asset>();
        require_send::<domain::MarketSnapshot>();
        require_sync::<domain::MarketSnapshot>();
        require_send::<domain::PricePoint>();
        require_sync::<domain::PricePoint>();
        require_send::<domain::TrendSummary>();
        require_sync::<domain::TrendSummary>();

        require_send::<api::CoinGeckoClient>();
        require_sync::<api::CoinGeckoClient>();
        require_send::<api::CircuitBreaker>();
        require_sync::<api::CircuitBreaker>();
        require_send::<api::FetchError>();

        require_send::<storage::Storage>();
        require_sync::<storage::Storage>();
        require_send::<CancelToken>();
        require_sync::<CancelToken>();
    }

    #[test]
    fn every_error_type_maps_to_a_class() {
        let fetch = api::FetchError::RateLimitExceeded { attempts: 5 };
        assert!(fetch.class().is_retryable());

        let analysis = analysis::AnalysisError::InsufficientData {
            asset_id: "bitcoin".into(),
            points: 1,
            required: 2,
        };
        assert!(analysis.class().is_recoverable());

        let storage = storage::StorageError::UnknownAsset {
            table: "crypto_market_data",
            ids: vec!["dogecoin".into()],
        };
        assert_eq!(storage.class(), ErrorClass::StorageWriteFailure);
    }
}
