//! Client-to-storage integration over a scripted transport.

use chrono::NaiveDate;
use std::sync::Arc;

use cryptolab_core::analysis::{TrendAnalyzer, TrendConfig};
use cryptolab_core::api::{
    ApiSettings, CoinGeckoClient, FetchError, HttpResponse, MarketDataProvider, RetryPolicy,
    ScriptedTransport,
};
use cryptolab_core::domain::DateRange;
use cryptolab_core::storage::Storage;
use cryptolab_core::ErrorClass;

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

fn client(transport: Arc<ScriptedTransport>) -> CoinGeckoClient {
    let settings = ApiSettings {
        base_url: "https://api.test/v3".into(),
        min_request_interval_ms: 0,
        retry: RetryPolicy::immediate(5, 3),
        ..ApiSettings::default()
    };
    CoinGeckoClient::with_transport(&settings, transport).with_as_of(as_of())
}

const COIN_LIST: &str = r#"[
    {"id":"bitcoin","symbol":"btc","name":"Bitcoin"},
    {"id":"ethereum","symbol":"eth","name":"Ethereum"}
]"#;

const MARKETS: &str = r#"[
    {"id":"bitcoin","current_price":61000.0,"market_cap":1.2e12,"total_volume":3.0e10,
     "high_24h":62000.0,"low_24h":60000.0,"price_change_percentage_24h":-1.5},
    {"id":"ethereum","current_price":3400.0,"market_cap":4.1e11,"total_volume":1.5e10,
     "high_24h":3500.0,"low_24h":3300.0,"price_change_percentage_24h":0.7}
]"#;

#[test]
fn rate_limited_fetch_stores_exactly_the_final_payload() {
    let transport = Arc::new(ScriptedTransport::new([Ok(HttpResponse::ok(COIN_LIST))]));
    for _ in 0..3 {
        transport.push(Ok(HttpResponse::with_status(429, "")));
    }
    transport.push(Ok(HttpResponse::ok(MARKETS)));
    let client = client(transport.clone());
    let storage = Storage::in_memory().unwrap();

    let assets = client.fetch_asset_list().unwrap();
    storage.upsert_assets(&assets).unwrap();

    let ids: Vec<String> = assets.iter().map(|a| a.id.clone()).collect();
    let snapshots = client.fetch_market_data(&ids, as_of()).unwrap();
    storage.upsert_market_snapshots(&snapshots).unwrap();

    assert_eq!(transport.request_count(), 5);
    let stored = storage.snapshots_between(DateRange::day(as_of())).unwrap();
    assert_eq!(stored, snapshots);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].asset_id, "bitcoin");
    assert_eq!(stored[0].price, 61000.0);
    assert_eq!(stored[1].high_24h, Some(3500.0));
}

#[test]
fn exhausted_rate_limit_leaves_storage_untouched() {
    let transport = Arc::new(ScriptedTransport::always(Ok(HttpResponse::with_status(429, ""))));
    let client = client(transport.clone());
    let storage = Storage::in_memory().unwrap();

    let err = client
        .fetch_market_data(&["bitcoin".to_string()], as_of())
        .unwrap_err();
    assert!(matches!(err, FetchError::RateLimitExceeded { attempts: 5 }));
    assert_eq!(err.class(), ErrorClass::RateLimitExceeded);
    assert_eq!(storage.table_counts().unwrap().market_snapshots, 0);
}

#[test]
fn history_flows_into_trend_summary() {
    // 2024-01-01, 01-02, 01-03 at 00:00 UTC
    let chart = r#"{
        "prices": [[1704067200000, 100.0], [1704153600000, 110.0], [1704240000000, 121.0]],
        "market_caps": [[1704067200000, 1.0], [1704153600000, 1.1], [1704240000000, 1.21]],
        "total_volumes": [[1704067200000, 5.0], [1704153600000, 5.0], [1704240000000, 5.0]]
    }"#;
    let transport = Arc::new(ScriptedTransport::new([
        Ok(HttpResponse::ok(COIN_LIST)),
        Ok(HttpResponse::ok(chart)),
    ]));
    let client = client(transport.clone());
    let storage = Storage::in_memory().unwrap();
    storage.upsert_assets(&client.fetch_asset_list().unwrap()).unwrap();

    let period = DateRange::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
    )
    .unwrap();
    let points = client.fetch_price_history("bitcoin", period).unwrap();
    assert_eq!(storage.append_price_points(&points).unwrap(), 3);

    let request = &transport.requests()[1];
    assert!(request.url.ends_with("/coins/bitcoin/market_chart/range"));
    assert_eq!(request.query_value("from"), Some("1704067200"));
    assert_eq!(request.query_value("to"), Some("1704326399"));

    let config = TrendConfig {
        window_days: 2,
        comparison_offset: None,
    };
    let summary = TrendAnalyzer::new(&storage, config)
        .unwrap()
        .compute_trends("bitcoin", period)
        .unwrap();
    assert!((summary.moving_avg - 115.5).abs() < 1e-9);
    assert!((summary.pct_change().unwrap() - 21.0).abs() < 1e-9);

    storage.replace_trend_summaries(&[summary.clone()]).unwrap();
    assert_eq!(storage.trend_summaries("bitcoin").unwrap(), vec![summary]);
}
