//! Pipeline configuration (TOML).
//!
//! Every field has a default, so an empty file is a valid configuration.
//! The config is passed explicitly to each component; nothing is read from
//! the process environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use cryptolab_core::analysis::TrendConfig;
use cryptolab_core::api::coingecko::PROVIDER_MAX_IDS_PER_CALL;
use cryptolab_core::api::ApiSettings;
use cryptolab_core::domain::asset::is_valid_asset_id;
use cryptolab_core::trigger::PriceMovementTrigger;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/crypto.duckdb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub chart_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub run_log: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            chart_dir: PathBuf::from("data/charts"),
            staging_dir: PathBuf::from("data/staging"),
            run_log: PathBuf::from("data/runs.jsonl"),
        }
    }
}

/// `[api]`: client settings plus how history extraction is scheduled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    #[serde(flatten)]
    pub client: ApiSettings,
    /// Fetch per-asset history on a thread pool instead of one by one.
    pub parallel_history: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    #[serde(flatten)]
    pub trend: TrendConfig,
    /// Days of history fetched and analyzed, ending at the run date.
    pub history_days: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            trend: TrendConfig::default(),
            history_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Assets shown in the monthly report and market overview.
    pub top_n: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self { top_n: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    pub tracked: Vec<String>,
}

impl Default for AssetSettings {
    fn default() -> Self {
        let tracked = [
            "bitcoin",
            "ethereum",
            "solana",
            "binancecoin",
            "cardano",
            "polkadot",
            "dogecoin",
            "ripple",
            "avalanche-2",
            "tron",
        ];
        Self {
            tracked: tracked.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageSettings,
    pub output: OutputSettings,
    pub api: ApiConfig,
    pub analysis: AnalysisSettings,
    pub trigger: PriceMovementTrigger,
    pub report: ReportSettings,
    pub assets: AssetSettings,
}

impl PipelineConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assets.tracked.is_empty() {
            return Err(ConfigError::Invalid("assets.tracked must not be empty".into()));
        }
        if let Some(bad) = self.assets.tracked.iter().find(|id| !is_valid_asset_id(id)) {
            return Err(ConfigError::Invalid(format!("invalid asset id '{bad}'")));
        }

        let api = &self.api.client;
        if api.max_ids_per_call == 0 || api.max_ids_per_call > PROVIDER_MAX_IDS_PER_CALL {
            return Err(ConfigError::Invalid(format!(
                "api.max_ids_per_call must be in 1..={PROVIDER_MAX_IDS_PER_CALL}"
            )));
        }
        if api.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("api.retry.max_attempts must be >= 1".into()));
        }
        if !(api.retry.multiplier.is_finite() && api.retry.multiplier >= 1.0) {
            return Err(ConfigError::Invalid("api.retry.multiplier must be >= 1.0".into()));
        }

        self.analysis
            .trend
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.analysis.history_days == 0 {
            return Err(ConfigError::Invalid("analysis.history_days must be >= 1".into()));
        }
        if !(self.trigger.threshold_pct.is_finite() && self.trigger.threshold_pct >= 0.0) {
            return Err(ConfigError::Invalid("trigger.threshold_pct must be >= 0".into()));
        }
        if self.report.top_n == 0 {
            return Err(ConfigError::Invalid("report.top_n must be >= 1".into()));
        }
        Ok(())
    }
}
