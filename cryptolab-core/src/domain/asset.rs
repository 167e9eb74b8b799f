//! Asset: a tracked cryptocurrency.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A tracked cryptocurrency, identified by the provider's stable id
/// (e.g. `"bitcoin"`).
///
/// `first_seen` is set once, the first time the asset is stored. Later
/// upserts only refresh `symbol` and `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub first_seen: NaiveDate,
}

impl Asset {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        name: impl Into<String>,
        first_seen: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            name: name.into(),
            first_seen,
        }
    }
}

/// Returns true if `id` looks like a provider asset id: non-empty, no
/// whitespace, no path separators or query characters.
pub fn is_valid_asset_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_provider_ids() {
        assert!(is_valid_asset_id("bitcoin"));
        assert!(is_valid_asset_id("avalanche-2"));
        assert!(is_valid_asset_id("usd-coin_bridged.e"));
    }

    #[test]
    fn rejects_ids_that_would_break_urls() {
        assert!(!is_valid_asset_id(""));
        assert!(!is_valid_asset_id("bit coin"));
        assert!(!is_valid_asset_id("../etc"));
        assert!(!is_valid_asset_id("btc?x=1"));
    }
}
