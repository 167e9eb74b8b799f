//! Units of work.
//!
//! A unit takes explicit inputs, does one step of the pipeline and reports a
//! `UnitResult`. Units never panic and never let an error escape: failures
//! come back as a result with `status = failure` and a classified error.
//! Recoverable problems (an asset with too little data, a chart with nothing
//! to draw) become warnings and the unit finishes as `partial`.

use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;

use cryptolab_core::analysis::{AnalysisError, TrendAnalyzer};
use cryptolab_core::api::{FetchError, FetchProgress, LogProgress, MarketDataProvider};
use cryptolab_core::domain::asset::is_valid_asset_id;
use cryptolab_core::domain::{DateRange, PricePoint, YearMonth};
use cryptolab_core::storage::{Storage, StorageError};
use cryptolab_core::{CancelToken, ErrorClass};

use crate::chart::{ChartRenderer, RenderError};
use crate::config::PipelineConfig;
use crate::staging::{
    assets_key, history_key, market_key, StagedPayload, StagingArea, StagingError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    ExtractMetadata,
    ExtractMarket,
    ExtractHistory,
    Store,
    Analyze,
    Render,
    MonthlyReport,
}

impl UnitKind {
    pub const ALL: [UnitKind; 7] = [
        UnitKind::ExtractMetadata,
        UnitKind::ExtractMarket,
        UnitKind::ExtractHistory,
        UnitKind::Store,
        UnitKind::Analyze,
        UnitKind::Render,
        UnitKind::MonthlyReport,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::ExtractMetadata => "extract-metadata",
            UnitKind::ExtractMarket => "extract-market",
            UnitKind::ExtractHistory => "extract-history",
            UnitKind::Store => "store",
            UnitKind::Analyze => "analyze",
            UnitKind::Render => "render",
            UnitKind::MonthlyReport => "monthly-report",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown unit '{0}'")]
pub struct UnknownUnit(pub String);

impl FromStr for UnitKind {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnitKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownUnit(s.to_string()))
    }
}

/// Explicit inputs of a unit. Unset fields fall back to the run date, the
/// configured history window, the tracked assets and the run month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<DateRange>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub asset_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<YearMonth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_key: Option<String>,
}

impl UnitInput {
    pub fn as_of(date: NaiveDate) -> Self {
        Self {
            as_of: Some(date),
            ..Self::default()
        }
    }

    pub fn with_payload_key(mut self, key: impl Into<String>) -> Self {
        self.payload_key = Some(key.into());
        self
    }
}

/// `UnitInput` with every default filled in.
#[derive(Debug, Clone)]
struct Resolved {
    as_of: NaiveDate,
    range: DateRange,
    asset_ids: Vec<String>,
    month: YearMonth,
    payload_key: Option<String>,
}

impl Resolved {
    fn new(input: &UnitInput, config: &PipelineConfig) -> Result<Self, UnitError> {
        let as_of = input.as_of.unwrap_or_else(|| Utc::now().date_naive());
        let range = input
            .range
            .unwrap_or_else(|| DateRange::trailing(as_of, config.analysis.history_days));
        let source = if input.asset_ids.is_empty() {
            &config.assets.tracked
        } else {
            &input.asset_ids
        };
        if let Some(bad) = source.iter().find(|id| !is_valid_asset_id(id)) {
            return Err(UnitError::InvalidInput(format!("invalid asset id '{bad}'")));
        }
        let asset_ids: Vec<String> = source
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Ok(Self {
            as_of,
            range,
            asset_ids,
            month: input.month.unwrap_or_else(|| YearMonth::of(as_of)),
            payload_key: input.payload_key.clone(),
        })
    }
}

/// Outcome of a unit. `Partial` means it committed its work but recorded
/// warnings along the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Success,
    Partial,
    Failure,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Success => "success",
            UnitStatus::Partial => "partial",
            UnitStatus::Failure => "failure",
        };
        f.pad(s)
    }
}

/// Classified error of a failed unit, as written to the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub class: ErrorClass,
    pub message: String,
}

/// What a unit reports back to the executor and the run log.
///
/// `rows` counts rows written, payload rows staged or charts rendered,
/// depending on the unit. A failed unit reports zero rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit: UnitKind,
    /// Graph node the unit ran as, when run by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub status: UnitStatus,
    pub rows: usize,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<UnitFailure>,
    /// Staged payload keys, table names or artifact paths produced.
    #[serde(default)]
    pub outputs: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl UnitResult {
    pub fn is_failure(&self) -> bool {
        self.status == UnitStatus::Failure
    }
}

#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("invalid unit input: {0}")]
    InvalidInput(String),

    #[error("cancelled")]
    Cancelled,
}

impl UnitError {
    pub fn class(&self) -> ErrorClass {
        match self {
            UnitError::Fetch(e) => e.class(),
            UnitError::Storage(e) => e.class(),
            UnitError::Analysis(e) => e.class(),
            UnitError::Render(e) => e.class(),
            UnitError::Staging(StagingError::Missing(_) | StagingError::InvalidKey(_)) => {
                ErrorClass::InvalidRequest
            }
            UnitError::Staging(StagingError::Io { .. }) => ErrorClass::StorageWriteFailure,
            UnitError::Staging(StagingError::Json { .. }) => ErrorClass::StorageReadFailure,
            UnitError::InvalidInput(_) => ErrorClass::InvalidRequest,
            UnitError::Cancelled => ErrorClass::Cancelled,
        }
    }
}

/// Everything a unit may touch, handed in explicitly.
pub struct UnitContext<'a> {
    pub config: &'a PipelineConfig,
    pub provider: &'a dyn MarketDataProvider,
    pub storage: &'a Storage,
    pub staging: &'a StagingArea,
    pub renderer: &'a ChartRenderer,
    pub cancel: CancelToken,
}

#[derive(Debug, Default)]
struct Outcome {
    rows: usize,
    warnings: Vec<String>,
    outputs: Vec<String>,
}

impl Outcome {
    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }
}

/// Run one unit of work.
pub fn run_unit(ctx: &UnitContext<'_>, kind: UnitKind, input: &UnitInput) -> UnitResult {
    let started_at = Utc::now();
    let clock = Instant::now();
    tracing::info!(unit = %kind, "unit started");

    let outcome = Resolved::new(input, ctx.config).and_then(|resolved| {
        ctx.check_cancel()?;
        match kind {
            UnitKind::ExtractMetadata => extract_metadata(ctx, &resolved),
            UnitKind::ExtractMarket => extract_market(ctx, &resolved),
            UnitKind::ExtractHistory => extract_history(ctx, &resolved),
            UnitKind::Store => store(ctx, &resolved),
            UnitKind::Analyze => analyze(ctx, &resolved),
            UnitKind::Render => render(ctx, &resolved),
            UnitKind::MonthlyReport => monthly_report(ctx, &resolved),
        }
    });

    let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
    let result = match outcome {
        Ok(outcome) => UnitResult {
            unit: kind,
            node: None,
            status: if outcome.warnings.is_empty() {
                UnitStatus::Success
            } else {
                UnitStatus::Partial
            },
            rows: outcome.rows,
            warnings: outcome.warnings,
            error: None,
            outputs: outcome.outputs,
            started_at,
            duration_ms,
        },
        Err(e) => {
            let class = e.class();
            tracing::error!(unit = %kind, %class, error = %e, "unit failed");
            UnitResult {
                unit: kind,
                node: None,
                status: UnitStatus::Failure,
                rows: 0,
                warnings: Vec::new(),
                error: Some(UnitFailure {
                    class,
                    message: e.to_string(),
                }),
                outputs: Vec::new(),
                started_at,
                duration_ms,
            }
        }
    };
    tracing::info!(
        unit = %kind,
        status = %result.status,
        rows = result.rows,
        warnings = result.warnings.len(),
        duration_ms,
        "unit finished"
    );
    result
}

impl UnitContext<'_> {
    fn check_cancel(&self) -> Result<(), UnitError> {
        if self.cancel.is_cancelled() {
            Err(UnitError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn stage(
        &self,
        key: String,
        payload: &StagedPayload,
        outcome: &mut Outcome,
    ) -> Result<(), UnitError> {
        // A cancel that arrived during the last fetch still discards the payload.
        self.check_cancel()?;
        self.staging.write(&key, payload)?;
        outcome.rows = payload.rows();
        outcome.outputs.push(key);
        Ok(())
    }
}

// ── Extract ─────────────────────────────────────────────────────────

fn extract_metadata(ctx: &UnitContext<'_>, input: &Resolved) -> Result<Outcome, UnitError> {
    let assets = ctx.provider.fetch_asset_list()?;
    let mut outcome = Outcome::default();

    let listed: BTreeSet<&str> = assets.iter().map(|a| a.id.as_str()).collect();
    for id in &input.asset_ids {
        if !listed.contains(id.as_str()) {
            outcome.warn(format!("{id} is not in the provider's asset list"));
        }
    }

    let key = input
        .payload_key
        .clone()
        .unwrap_or_else(|| assets_key(input.as_of));
    ctx.stage(key, &StagedPayload::Assets { assets }, &mut outcome)?;
    Ok(outcome)
}

fn extract_market(ctx: &UnitContext<'_>, input: &Resolved) -> Result<Outcome, UnitError> {
    let snapshots = ctx
        .provider
        .fetch_market_data(&input.asset_ids, input.as_of)?;
    let mut outcome = Outcome::default();

    let returned: BTreeSet<&str> = snapshots.iter().map(|s| s.asset_id.as_str()).collect();
    for id in &input.asset_ids {
        if !returned.contains(id.as_str()) {
            outcome.warn(format!("no market data returned for {id}"));
        }
    }

    let key = input
        .payload_key
        .clone()
        .unwrap_or_else(|| market_key(input.as_of));
    let payload = StagedPayload::MarketSnapshots {
        as_of: input.as_of,
        snapshots,
    };
    ctx.stage(key, &payload, &mut outcome)?;
    Ok(outcome)
}

fn extract_history(ctx: &UnitContext<'_>, input: &Resolved) -> Result<Outcome, UnitError> {
    let progress = LogProgress;
    let total = input.asset_ids.len();
    let range = input.range;

    let fetched: Vec<(String, Result<Vec<PricePoint>, FetchError>)> =
        if ctx.config.api.parallel_history {
            input
                .asset_ids
                .par_iter()
                .enumerate()
                .map(|(i, id)| {
                    if ctx.cancel.is_cancelled() {
                        return (id.clone(), Err(FetchError::Cancelled));
                    }
                    progress.on_start(id, i, total);
                    (id.clone(), ctx.provider.fetch_price_history(id, range))
                })
                .collect()
        } else {
            let mut fetched = Vec::with_capacity(total);
            for (i, id) in input.asset_ids.iter().enumerate() {
                if ctx.cancel.is_cancelled() {
                    return Err(UnitError::Cancelled);
                }
                // Once the breaker is open every further call fails fast.
                if !ctx.provider.is_available() {
                    tracing::warn!(
                        remaining = total - i,
                        "provider unavailable, skipping remaining assets"
                    );
                    break;
                }
                progress.on_start(id, i, total);
                fetched.push((id.clone(), ctx.provider.fetch_price_history(id, range)));
            }
            fetched
        };
    ctx.check_cancel()?;

    let mut outcome = Outcome::default();
    let mut series: BTreeMap<String, Vec<PricePoint>> = BTreeMap::new();
    let mut last_error: Option<FetchError> = None;
    let (mut succeeded, mut failed) = (0, 0);

    for (i, (id, result)) in fetched.into_iter().enumerate() {
        let result = result.map(|points| {
            let n = points.len();
            series.insert(id.clone(), points);
            n
        });
        progress.on_complete(&id, i, total, &result);
        match result {
            Ok(0) => {
                succeeded += 1;
                outcome.warn(format!("{id}: no price points in {range}"));
            }
            Ok(_) => succeeded += 1,
            Err(FetchError::Cancelled) => return Err(UnitError::Cancelled),
            Err(e) => {
                failed += 1;
                outcome.warn(format!("{id}: {e}"));
                last_error = Some(e);
            }
        }
    }
    let skipped = total - succeeded - failed;
    if skipped > 0 {
        outcome.warn(format!("{skipped} asset(s) skipped: provider unavailable"));
    }
    progress.on_batch_complete(succeeded, failed, total);

    if succeeded == 0 {
        if let Some(e) = last_error {
            return Err(e.into());
        }
        if total > 0 {
            return Err(FetchError::CircuitBreakerTripped { remaining_secs: 0 }.into());
        }
    }

    let key = input
        .payload_key
        .clone()
        .unwrap_or_else(|| history_key(range));
    ctx.stage(key, &StagedPayload::PriceHistory { range, series }, &mut outcome)?;
    Ok(outcome)
}

// ── Store ───────────────────────────────────────────────────────────

fn store(ctx: &UnitContext<'_>, input: &Resolved) -> Result<Outcome, UnitError> {
    let key = input
        .payload_key
        .as_deref()
        .ok_or_else(|| UnitError::InvalidInput("store needs a payload key".into()))?;
    let payload = ctx.staging.read(key)?;
    let payload_kind = payload.kind();
    ctx.check_cancel()?;

    let mut outcome = Outcome::default();
    match payload {
        StagedPayload::Assets { assets } => {
            outcome.rows = ctx.storage.upsert_assets(&assets)?;
            outcome.outputs.push("crypto_metadata".into());
        }
        StagedPayload::MarketSnapshots { snapshots, .. } => {
            outcome.rows = ctx.storage.upsert_market_snapshots(&snapshots)?;
            outcome.outputs.push("crypto_market_data".into());
        }
        StagedPayload::PriceHistory { series, .. } => {
            // One transaction per asset. Once one has committed, later
            // failures and cancellation are warnings so `rows` stays accurate.
            let mut committed = 0usize;
            let mut last_error = None;
            for (asset_id, points) in &series {
                if ctx.cancel.is_cancelled() {
                    if committed == 0 {
                        return Err(UnitError::Cancelled);
                    }
                    outcome.warn(format!(
                        "cancelled after {committed} of {} asset(s)",
                        series.len()
                    ));
                    break;
                }
                match ctx.storage.append_price_points(points) {
                    Ok(inserted) => {
                        tracing::debug!(asset = %asset_id, received = points.len(), inserted, "price history stored");
                        committed += 1;
                        outcome.rows += inserted;
                    }
                    Err(e) => {
                        outcome.warn(format!("{asset_id}: {e}"));
                        last_error = Some(e);
                    }
                }
            }
            if committed == 0 {
                if let Some(e) = last_error {
                    return Err(e.into());
                }
            }
            outcome.outputs.push("crypto_price_history".into());
        }
    }
    tracing::debug!(key, kind = payload_kind, rows = outcome.rows, "staged payload stored");
    Ok(outcome)
}

// ── Analyze / render ────────────────────────────────────────────────

fn analyze(ctx: &UnitContext<'_>, input: &Resolved) -> Result<Outcome, UnitError> {
    let analyzer = TrendAnalyzer::new(ctx.storage, ctx.config.analysis.trend.clone())?;
    let mut outcome = Outcome::default();
    let mut summaries = Vec::with_capacity(input.asset_ids.len());

    for asset_id in &input.asset_ids {
        ctx.check_cancel()?;
        match analyzer.compute_trends(asset_id, input.range) {
            Ok(summary) => {
                if summary.pct_change.is_none() {
                    outcome.warn(format!(
                        "{asset_id}: {} point(s) in {}, percent change undefined",
                        summary.points, input.range
                    ));
                }
                summaries.push(summary);
            }
            Err(e) if e.class().is_recoverable() => outcome.warn(e.to_string()),
            Err(e) => return Err(e.into()),
        }
    }

    ctx.check_cancel()?;
    outcome.rows = ctx.storage.replace_trend_summaries(&summaries)?;
    outcome.outputs.push("crypto_trend_summary".into());
    Ok(outcome)
}

fn render(ctx: &UnitContext<'_>, input: &Resolved) -> Result<Outcome, UnitError> {
    let mut outcome = Outcome::default();
    let mut series: BTreeMap<String, Vec<PricePoint>> = BTreeMap::new();

    for asset_id in &input.asset_ids {
        ctx.check_cancel()?;
        let points = ctx.storage.query_price_history(asset_id, input.range)?;
        let rendered = ctx.renderer.render_price_trend(asset_id, &points);
        record_chart(&mut outcome, rendered)?;
        if !points.is_empty() {
            series.insert(asset_id.clone(), points);
        }
    }

    ctx.check_cancel()?;
    let comparison = ctx.renderer.render_comparison(&input.asset_ids, &series);
    record_chart(&mut outcome, comparison)?;

    let overview = ctx.renderer.render_market_overview(ctx.storage, input.as_of);
    record_chart(&mut outcome, overview)?;
    Ok(outcome)
}

fn record_chart(
    outcome: &mut Outcome,
    rendered: Result<crate::chart::ChartArtifact, RenderError>,
) -> Result<(), UnitError> {
    match rendered {
        Ok(artifact) => {
            outcome.rows += 1;
            outcome.outputs.push(artifact.path.display().to_string());
            Ok(())
        }
        Err(e) if e.class().is_recoverable() => {
            outcome.warn(e.to_string());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn monthly_report(ctx: &UnitContext<'_>, input: &Resolved) -> Result<Outcome, UnitError> {
    let mut outcome = Outcome::default();
    match ctx.renderer.render_monthly_report(ctx.storage, input.month) {
        Ok(report) => {
            outcome.rows = report.rows.len();
            outcome.outputs = vec![
                report.chart.path.display().to_string(),
                report.csv_path.display().to_string(),
                report.parquet_path.display().to_string(),
            ];
        }
        Err(e) if e.class().is_recoverable() => outcome.warn(e.to_string()),
        Err(e) => return Err(e.into()),
    }
    Ok(outcome)
}
