//! Upstream market-data API: provider trait, CoinGecko client, and the
//! request plumbing it sits on (transport, rate limiting, retries, breaker).

pub mod circuit_breaker;
pub mod coingecko;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod scripted;
pub mod transport;

pub use circuit_breaker::{BreakerSettings, CircuitBreaker};
pub use coingecko::{ApiSettings, CoinGeckoClient};
pub use provider::{FetchError, FetchProgress, LogProgress, MarketDataProvider};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use scripted::ScriptedTransport;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
