//! Staged payloads between extract and store units.
//!
//! Extract units write what they fetched as one JSON file per payload key;
//! the store unit reads it back and persists it. Files are written to a
//! `.tmp` sibling and renamed into place, so a cancelled or failed extract
//! never leaves a partial payload behind.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use cryptolab_core::domain::{Asset, DateRange, MarketSnapshot, PricePoint};

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("no staged payload '{0}'")]
    Missing(String),

    #[error("invalid payload key '{0}'")]
    InvalidKey(String),

    #[error("staging I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("staged payload '{key}' is malformed: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// What an extract unit fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StagedPayload {
    Assets {
        assets: Vec<Asset>,
    },
    MarketSnapshots {
        as_of: NaiveDate,
        snapshots: Vec<MarketSnapshot>,
    },
    PriceHistory {
        range: DateRange,
        series: BTreeMap<String, Vec<PricePoint>>,
    },
}

impl StagedPayload {
    /// Number of rows carried.
    pub fn rows(&self) -> usize {
        match self {
            StagedPayload::Assets { assets } => assets.len(),
            StagedPayload::MarketSnapshots { snapshots, .. } => snapshots.len(),
            StagedPayload::PriceHistory { series, .. } => series.values().map(Vec::len).sum(),
        }
    }

    /// Short name used in logs and store outputs.
    pub fn kind(&self) -> &'static str {
        match self {
            StagedPayload::Assets { .. } => "assets",
            StagedPayload::MarketSnapshots { .. } => "market",
            StagedPayload::PriceHistory { .. } => "history",
        }
    }
}

/// Deterministic payload keys.
pub fn assets_key(as_of: NaiveDate) -> String {
    format!("assets-{as_of}")
}

pub fn market_key(as_of: NaiveDate) -> String {
    format!("market-{as_of}")
}

pub fn history_key(range: DateRange) -> String {
    format!("history-{}_{}", range.start(), range.end())
}

/// Directory of staged payloads.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StagingError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StagingError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn io_err(path: &Path) -> impl Fn(std::io::Error) -> StagingError + '_ {
        move |source| StagingError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Write a payload atomically, replacing any previous one with the same key.
    pub fn write(&self, key: &str, payload: &StagedPayload) -> Result<PathBuf, StagingError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).map_err(Self::io_err(&self.dir))?;

        let json = serde_json::to_vec_pretty(payload).map_err(|source| StagingError::Json {
            key: key.to_string(),
            source,
        })?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(Self::io_err(&tmp_path))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StagingError::Io {
                path: path.clone(),
                source: e,
            }
        })?;

        tracing::debug!(key, kind = payload.kind(), rows = payload.rows(), "staged payload written");
        Ok(path)
    }

    pub fn read(&self, key: &str) -> Result<StagedPayload, StagingError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Err(StagingError::Missing(key.to_string()));
        }
        let bytes = fs::read(&path).map_err(Self::io_err(&path))?;
        serde_json::from_slice(&bytes).map_err(|source| StagingError::Json {
            key: key.to_string(),
            source,
        })
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.exists()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("staging"));
        let payload = StagedPayload::MarketSnapshots {
            as_of: d(1),
            snapshots: vec![MarketSnapshot::new("bitcoin", d(1), 61_000.0)],
        };

        let key = market_key(d(1));
        let path = staging.write(&key, &payload).unwrap();
        assert!(path.ends_with("market-2024-03-01.json"));
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(staging.read(&key).unwrap(), payload);
        assert_eq!(payload.rows(), 1);
    }

    #[test]
    fn missing_and_invalid_keys() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path());
        assert!(matches!(staging.read("assets-2024-03-01"), Err(StagingError::Missing(_))));
        assert!(matches!(staging.read("../etc/passwd"), Err(StagingError::InvalidKey(_))));
        assert!(!staging.exists("nope"));
    }

    #[test]
    fn history_key_names_the_range() {
        let range = DateRange::new(d(1), d(3)).unwrap();
        assert_eq!(history_key(range), "history-2024-03-01_2024-03-03");
    }
}
