//! CoinGecko v3 provider.
//!
//! Endpoints used:
//! - `/coins/list` for asset metadata
//! - `/coins/markets` for daily snapshots (ids batched per call)
//! - `/coins/{id}/market_chart/range` for price history
//!
//! Every request goes through the rate limiter, the circuit breaker and the
//! retry loop in `execute`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::circuit_breaker::{BreakerSettings, CircuitBreaker};
use super::provider::{FetchError, MarketDataProvider};
use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;
use super::transport::{HttpRequest, HttpTransport, ReqwestTransport};
use crate::cancel::CancelToken;
use crate::domain::asset::is_valid_asset_id;
use crate::domain::{Asset, DateRange, MarketSnapshot, PricePoint};

/// Hard per-call limit on `ids` for `/coins/markets`.
pub const PROVIDER_MAX_IDS_PER_CALL: usize = 250;

/// Client settings, usually the `[api]` section of the pipeline config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub vs_currency: String,
    pub timeout_secs: u64,
    pub min_request_interval_ms: u64,
    pub max_ids_per_call: usize,
    pub retry: RetryPolicy,
    pub circuit_breaker: BreakerSettings,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.coingecko.com/api/v3".into(),
            vs_currency: "usd".into(),
            timeout_secs: 30,
            min_request_interval_ms: 2_000,
            max_ids_per_call: PROVIDER_MAX_IDS_PER_CALL,
            retry: RetryPolicy::default(),
            circuit_breaker: BreakerSettings::default(),
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CoinListEntry {
    id: String,
    symbol: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MarketEntry {
    id: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    total_volume: Option<f64>,
    high_24h: Option<f64>,
    low_24h: Option<f64>,
    price_change_percentage_24h: Option<f64>,
}

/// `[[unix_ms, value], ...]` series. Values may be null.
type ChartSeries = Vec<(f64, Option<f64>)>;

#[derive(Debug, Deserialize)]
struct MarketChart {
    prices: ChartSeries,
    #[serde(default)]
    market_caps: ChartSeries,
    #[serde(default)]
    total_volumes: ChartSeries,
}

// ── Client ──────────────────────────────────────────────────────────

/// Blocking CoinGecko client.
///
/// Every request waits on the rate limiter, passes the circuit breaker and is
/// retried per `RetryPolicy`. A cancelled token stops it before the next
/// request or backoff sleep.
pub struct CoinGeckoClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    vs_currency: String,
    max_ids_per_call: usize,
    retry: RetryPolicy,
    limiter: RateLimiter,
    breaker: Arc<CircuitBreaker>,
    cancel: CancelToken,
    as_of: Option<NaiveDate>,
}

impl CoinGeckoClient {
    /// Client over a real HTTP transport with the configured timeout.
    pub fn new(settings: &ApiSettings) -> Result<Self, FetchError> {
        let transport = ReqwestTransport::new(Duration::from_secs(settings.timeout_secs.max(1)))
            .map_err(|e| FetchError::UpstreamUnavailable {
                attempts: 0,
                reason: e.to_string(),
            })?;
        Ok(Self::with_transport(settings, Arc::new(transport)))
    }

    /// Client over any transport; tests pass a scripted one.
    pub fn with_transport(settings: &ApiSettings, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            vs_currency: settings.vs_currency.clone(),
            max_ids_per_call: settings.max_ids_per_call.clamp(1, PROVIDER_MAX_IDS_PER_CALL),
            retry: settings.retry.clone(),
            limiter: RateLimiter::new(Duration::from_millis(settings.min_request_interval_ms)),
            breaker: Arc::new(CircuitBreaker::from_settings(&settings.circuit_breaker)),
            cancel: CancelToken::new(),
            as_of: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Date stamped as `first_seen` on fetched assets (default: today, UTC).
    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn check_cancelled(&self) -> Result<(), FetchError> {
        if self.cancel.is_cancelled() {
            Err(FetchError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep in short slices so cancellation is noticed promptly.
    fn sleep(&self, delay: Duration) -> Result<(), FetchError> {
        let deadline = Instant::now() + delay;
        loop {
            self.check_cancelled()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(100)));
        }
    }

    fn get_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, FetchError> {
        let body = self.execute(&request)?;
        serde_json::from_str(&body).map_err(|e| {
            FetchError::ResponseFormat(format!("failed to parse response from {}: {e}", request.url))
        })
    }

    /// Send one logical request with rate limiting, retries and the breaker.
    fn execute(&self, request: &HttpRequest) -> Result<String, FetchError> {
        let mut attempts = 0u32;
        let mut rate_limited = 0u32;
        let mut server_failures = 0u32;

        loop {
            self.check_cancelled()?;
            if !self.breaker.is_allowed() {
                return Err(FetchError::CircuitBreakerTripped {
                    remaining_secs: self.breaker.remaining_cooldown().as_secs(),
                });
            }

            self.limiter.acquire();
            attempts += 1;
            tracing::debug!(url = %request.url, attempt = attempts, "GET");

            let retry_after = match self.transport.get(request) {
                Ok(resp) if (200..300).contains(&resp.status) => {
                    self.breaker.record_success();
                    return Ok(resp.body);
                }
                Ok(resp) if resp.status == 429 => {
                    rate_limited += 1;
                    if rate_limited >= self.retry.max_attempts.max(1) {
                        self.breaker.record_failure();
                        return Err(FetchError::RateLimitExceeded { attempts });
                    }
                    tracing::warn!(url = %request.url, attempt = attempts, "rate limited, backing off");
                    resp.retry_after
                }
                Ok(resp) if resp.status == 403 => {
                    // Treated as an IP ban.
                    self.breaker.trip();
                    return Err(FetchError::InvalidRequest {
                        status: Some(403),
                        message: snippet(&resp.body),
                    });
                }
                Ok(resp) if (400..500).contains(&resp.status) => {
                    return Err(FetchError::InvalidRequest {
                        status: Some(resp.status),
                        message: snippet(&resp.body),
                    });
                }
                Ok(resp) => {
                    server_failures += 1;
                    let reason = format!("HTTP {}", resp.status);
                    if server_failures > self.retry.max_server_retries {
                        self.breaker.record_failure();
                        return Err(FetchError::UpstreamUnavailable { attempts, reason });
                    }
                    tracing::warn!(url = %request.url, attempt = attempts, %reason, "server error, retrying");
                    None
                }
                Err(e) => {
                    server_failures += 1;
                    if server_failures > self.retry.max_server_retries {
                        self.breaker.record_failure();
                        return Err(FetchError::UpstreamUnavailable {
                            attempts,
                            reason: e.to_string(),
                        });
                    }
                    tracing::warn!(url = %request.url, attempt = attempts, error = %e, "transport error, retrying");
                    None
                }
            };

            self.sleep(self.retry.next_delay(attempts - 1, retry_after))?;
        }
    }
}

impl MarketDataProvider for CoinGeckoClient {
    fn name(&self) -> &str {
        "coingecko"
    }

    fn fetch_asset_list(&self) -> Result<Vec<Asset>, FetchError> {
        let entries: Vec<CoinListEntry> = self.get_json(HttpRequest::get(self.url("/coins/list")))?;
        let first_seen = self.as_of.unwrap_or_else(|| Utc::now().date_naive());
        let total = entries.len();

        let mut by_id: BTreeMap<String, Asset> = BTreeMap::new();
        for e in entries {
            if !is_valid_asset_id(&e.id) {
                continue;
            }
            by_id
                .entry(e.id.clone())
                .or_insert_with(|| Asset::new(e.id, e.symbol, e.name, first_seen));
        }
        if by_id.len() < total {
            tracing::warn!(
                "dropped {} malformed or duplicate entries from coin list",
                total - by_id.len()
            );
        }
        Ok(by_id.into_values().collect())
    }

    fn fetch_market_data(
        &self,
        asset_ids: &[String],
        as_of: NaiveDate,
    ) -> Result<Vec<MarketSnapshot>, FetchError> {
        let ids = validate_ids(asset_ids)?;
        let mut snapshots: BTreeMap<String, MarketSnapshot> = BTreeMap::new();

        for chunk in ids.chunks(self.max_ids_per_call) {
            let request = HttpRequest::get(self.url("/coins/markets"))
                .param("vs_currency", &self.vs_currency)
                .param("ids", chunk.join(","))
                .param("per_page", chunk.len())
                .param("page", 1);
            let entries: Vec<MarketEntry> = self.get_json(request)?;

            for e in entries {
                if !chunk.contains(&e.id.as_str()) {
                    continue;
                }
                let Some(price) = e.current_price.filter(|p| p.is_finite()) else {
                    tracing::warn!(asset = %e.id, "no current price in market data, skipped");
                    continue;
                };
                snapshots.insert(
                    e.id.clone(),
                    MarketSnapshot {
                        asset_id: e.id,
                        as_of_date: as_of,
                        price,
                        market_cap: e.market_cap,
                        volume: e.total_volume,
                        high_24h: e.high_24h,
                        low_24h: e.low_24h,
                        price_change_pct_24h: e.price_change_percentage_24h,
                    },
                );
            }
        }

        Ok(snapshots.into_values().collect())
    }

    fn fetch_price_history(
        &self,
        asset_id: &str,
        range: DateRange,
    ) -> Result<Vec<PricePoint>, FetchError> {
        if !is_valid_asset_id(asset_id) {
            return Err(FetchError::invalid(format!("invalid asset id '{asset_id}'")));
        }
        let request = HttpRequest::get(self.url(&format!("/coins/{asset_id}/market_chart/range")))
            .param("vs_currency", &self.vs_currency)
            .param("from", range.start_instant().timestamp())
            .param("to", range.end_instant_exclusive().timestamp() - 1);
        let chart: MarketChart = self.get_json(request)?;
        parse_market_chart(asset_id, &chart, range)
    }

    fn is_available(&self) -> bool {
        self.breaker.is_allowed()
    }
}

/// Sorted, de-duplicated ids; rejects empty input and malformed ids.
fn validate_ids(asset_ids: &[String]) -> Result<Vec<&str>, FetchError> {
    if asset_ids.is_empty() {
        return Err(FetchError::invalid("no asset ids given"));
    }
    let mut ids = BTreeSet::new();
    for id in asset_ids {
        if !is_valid_asset_id(id) {
            return Err(FetchError::invalid(format!("invalid asset id '{id}'")));
        }
        ids.insert(id.as_str());
    }
    Ok(ids.into_iter().collect())
}

/// Join the parallel chart series into price points inside `range`.
///
/// Side series (market cap, volume) are attached only when they line up
/// index-for-index with the price series.
fn parse_market_chart(
    asset_id: &str,
    chart: &MarketChart,
    range: DateRange,
) -> Result<Vec<PricePoint>, FetchError> {
    let n = chart.prices.len();
    let aligned = chart.market_caps.len() == n && chart.total_volumes.len() == n;
    if !aligned {
        tracing::debug!(asset = asset_id, "chart series lengths differ, dropping side series");
    }

    let side = |series: &ChartSeries, i: usize, ts_ms: f64| -> Option<f64> {
        if !aligned {
            return None;
        }
        series
            .get(i)
            .filter(|(t, _)| *t == ts_ms)
            .and_then(|(_, v)| *v)
            .filter(|v| v.is_finite())
    };

    let mut points: BTreeMap<DateTime<Utc>, PricePoint> = BTreeMap::new();
    for (i, &(ts_ms, price)) in chart.prices.iter().enumerate() {
        let Some(price) = price.filter(|p| p.is_finite()) else {
            continue;
        };
        let timestamp = DateTime::from_timestamp_millis(ts_ms as i64)
            .ok_or_else(|| FetchError::ResponseFormat(format!("invalid timestamp {ts_ms}")))?;
        if !range.contains(timestamp) {
            continue;
        }
        points.entry(timestamp).or_insert_with(|| PricePoint {
            asset_id: asset_id.to_string(),
            timestamp,
            price,
            market_cap: side(&chart.market_caps, i, ts_ms),
            total_volume: side(&chart.total_volumes, i, ts_ms),
        });
    }

    Ok(points.into_values().collect())
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".into();
    }
    trimmed.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::scripted::ScriptedTransport;
    use crate::api::transport::{HttpResponse, TransportError};

    fn settings() -> ApiSettings {
        ApiSettings {
            base_url: "https://api.test/v3".into(),
            min_request_interval_ms: 0,
            retry: RetryPolicy::immediate(4, 2),
            ..ApiSettings::default()
        }
    }

    fn client(transport: &Arc<ScriptedTransport>) -> CoinGeckoClient {
        CoinGeckoClient::with_transport(&settings(), transport.clone())
            .with_as_of(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
    }

    fn too_many() -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::with_status(429, ""))
    }

    const MARKETS: &str = r#"[
        {"id":"bitcoin","current_price":50000.0,"market_cap":1.0e12,"total_volume":5.0e10,
         "high_24h":51000.0,"low_24h":49000.0,"price_change_percentage_24h":2.5},
        {"id":"ethereum","current_price":3000.0,"market_cap":4.0e11,"total_volume":2.0e10,
         "high_24h":3100.0,"low_24h":2900.0,"price_change_percentage_24h":1.8}
    ]"#;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rate_limit_then_success_returns_final_payload() {
        let t = Arc::new(ScriptedTransport::new([
            too_many(),
            too_many(),
            too_many(),
            Ok(HttpResponse::ok(MARKETS)),
        ]));
        let c = client(&t);
        let as_of = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let snaps = c.fetch_market_data(&ids(&["ethereum", "bitcoin"]), as_of).unwrap();

        assert_eq!(t.request_count(), 4);
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].asset_id, "bitcoin");
        assert_eq!(snaps[0].price, 50000.0);
        assert_eq!(snaps[1].price_change_pct_24h, Some(1.8));
    }

    #[test]
    fn persistent_rate_limit_gives_up_after_max_attempts() {
        let t = Arc::new(ScriptedTransport::always(too_many()));
        let err = client(&t).fetch_asset_list().unwrap_err();
        assert!(matches!(err, FetchError::RateLimitExceeded { attempts: 4 }));
        assert_eq!(t.request_count(), 4);
    }

    #[test]
    fn server_errors_exhaust_into_upstream_unavailable() {
        let t = Arc::new(ScriptedTransport::always(Ok(HttpResponse::with_status(502, "bad gateway"))));
        let err = client(&t).fetch_asset_list().unwrap_err();
        match err {
            FetchError::UpstreamUnavailable { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("502"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn timeout_is_retried_like_a_server_error() {
        let t = Arc::new(ScriptedTransport::new([
            Err(TransportError::Timeout("30s elapsed".into())),
            Ok(HttpResponse::ok(r#"[{"id":"bitcoin","symbol":"btc","name":"Bitcoin"}]"#)),
        ]));
        let assets = client(&t).fetch_asset_list().unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].first_seen, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(t.request_count(), 2);
    }

    #[test]
    fn client_errors_fail_immediately() {
        let t = Arc::new(ScriptedTransport::always(Ok(HttpResponse::with_status(
            404,
            r#"{"error":"coin not found"}"#,
        ))));
        let range = DateRange::day(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let err = client(&t).fetch_price_history("no-such-coin", range).unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest { status: Some(404), .. }));
        assert_eq!(t.request_count(), 1);
    }

    #[test]
    fn forbidden_trips_the_breaker() {
        let t = Arc::new(ScriptedTransport::always(Ok(HttpResponse::with_status(403, "banned"))));
        let c = client(&t);
        assert!(c.fetch_asset_list().is_err());
        assert!(!c.is_available());
        let err = c.fetch_asset_list().unwrap_err();
        assert!(matches!(err, FetchError::CircuitBreakerTripped { .. }));
        assert_eq!(t.request_count(), 1);
    }

    #[test]
    fn market_ids_are_paged_by_call_limit() {
        let t = Arc::new(ScriptedTransport::always(Ok(HttpResponse::ok("[]"))));
        let s = ApiSettings {
            max_ids_per_call: 2,
            ..settings()
        };
        let c = CoinGeckoClient::with_transport(&s, t.clone());
        let as_of = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        c.fetch_market_data(&ids(&["e", "d", "c", "b", "a"]), as_of).unwrap();

        let reqs = t.requests();
        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs[0].query_value("ids"), Some("a,b"));
        assert_eq!(reqs[1].query_value("ids"), Some("c,d"));
        assert_eq!(reqs[2].query_value("ids"), Some("e"));
        assert_eq!(reqs[2].query_value("per_page"), Some("1"));
    }

    #[test]
    fn empty_or_malformed_ids_never_reach_the_network() {
        let t = Arc::new(ScriptedTransport::always(Ok(HttpResponse::ok("[]"))));
        let c = client(&t);
        let as_of = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(matches!(
            c.fetch_market_data(&[], as_of),
            Err(FetchError::InvalidRequest { .. })
        ));
        assert!(c.fetch_market_data(&ids(&["bit coin"]), as_of).is_err());
        assert_eq!(t.request_count(), 0);
    }

    #[test]
    fn cancelled_client_sends_nothing() {
        let t = Arc::new(ScriptedTransport::always(Ok(HttpResponse::ok("[]"))));
        let token = CancelToken::new();
        token.cancel();
        let c = client(&t).with_cancel(token);
        assert!(matches!(c.fetch_asset_list(), Err(FetchError::Cancelled)));
        assert_eq!(t.request_count(), 0);
    }

    #[test]
    fn chart_parsing_filters_range_and_dedupes() {
        let chart: MarketChart = serde_json::from_str(
            r#"{
                "prices": [[1704067200000, 100.0], [1704067200000, 999.0],
                           [1704153600000, null], [1704240000000, 121.0], [1704326400000, 130.0]],
                "market_caps": [[1704067200000, 1.0], [1704067200000, 2.0],
                                [1704153600000, 3.0], [1704240000000, 4.0], [1704326400000, 5.0]],
                "total_volumes": [[1704067200000, 10.0], [1704067200000, 20.0],
                                  [1704153600000, 30.0], [1704240000000, 40.0], [1704326400000, 50.0]]
            }"#,
        )
        .unwrap();
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
        )
        .unwrap();

        let points = parse_market_chart("bitcoin", &chart, range).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].price, 100.0);
        assert_eq!(points[0].market_cap, Some(1.0));
        assert_eq!(points[1].price, 121.0);
        assert_eq!(points[1].total_volume, Some(40.0));
        assert!(points[0].timestamp < points[1].timestamp);
    }

    #[test]
    fn misaligned_side_series_are_dropped() {
        let chart: MarketChart = serde_json::from_str(
            r#"{"prices": [[1704067200000, 100.0]], "market_caps": [], "total_volumes": []}"#,
        )
        .unwrap();
        let range = DateRange::day(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let points = parse_market_chart("bitcoin", &chart, range).unwrap();
        assert_eq!(points[0].market_cap, None);
    }
}
