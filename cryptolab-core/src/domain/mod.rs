//! Domain types: assets, market snapshots, price points, trend summaries.

pub mod asset;
pub mod market;
pub mod price;
pub mod range;
pub mod trend;

pub use asset::Asset;
pub use market::MarketSnapshot;
pub use price::PricePoint;
pub use range::{DateRange, InvalidRange, YearMonth};
pub use trend::TrendSummary;
