//! Chart rendering: SVG files from stored or derived series.
//!
//! Every chart is written to `out_dir` under a name derived from its subject
//! and period, via a `.tmp` sibling and a rename. The SVG text depends only on
//! the input data, so rendering the same series twice produces the same bytes
//! and the same content hash.

pub mod report;
pub mod svg;

pub use report::ReportRow;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use cryptolab_core::analysis::{daily_closes, moving_average_series, percent_change, rebase};
use cryptolab_core::domain::{DateRange, MarketSnapshot, PricePoint, YearMonth};
use cryptolab_core::storage::{Storage, StorageError};
use cryptolab_core::ErrorClass;

use svg::{BarEntry, LineSeries, PALETTE};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("nothing to render for {subject}")]
    NoDataToRender { subject: String },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("report export failed: {0}")]
    Export(String),
}

impl RenderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RenderError::NoDataToRender { .. } => ErrorClass::NoDataToRender,
            RenderError::Io { .. } | RenderError::Export(_) => ErrorClass::StorageWriteFailure,
            RenderError::Storage(e) => e.class(),
        }
    }

    fn no_data(subject: impl Into<String>) -> Self {
        RenderError::NoDataToRender {
            subject: subject.into(),
        }
    }
}

pub(crate) fn io_error(path: &Path) -> impl Fn(std::io::Error) -> RenderError + '_ {
    move |source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What a chart depicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChartSubject {
    Asset { id: String },
    AssetSet { ids: Vec<String> },
    Month { month: YearMonth },
    Market { date: NaiveDate },
}

/// A rendered chart file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartArtifact {
    pub path: PathBuf,
    pub subject: ChartSubject,
    pub period: DateRange,
    /// blake3 of the file contents, hex.
    pub content_hash: String,
}

/// Monthly report chart plus its exported rows.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyReport {
    pub chart: ChartArtifact,
    pub rows: Vec<ReportRow>,
    pub csv_path: PathBuf,
    pub parquet_path: PathBuf,
}

pub struct ChartRenderer {
    out_dir: PathBuf,
    top_n: usize,
    window: usize,
}

impl ChartRenderer {
    /// `top_n` bounds the bar charts; `window` is the moving-average overlay
    /// window in daily closes.
    pub fn new(out_dir: impl Into<PathBuf>, top_n: usize, window: usize) -> Self {
        Self {
            out_dir: out_dir.into(),
            top_n: top_n.max(1),
            window: window.max(1),
        }
    }


    /// Daily closing price of one asset with a moving-average overlay.
    pub fn render_price_trend(
        &self,
        asset_id: &str,
        series: &[PricePoint],
    ) -> Result<ChartArtifact, RenderError> {
        let mut points: Vec<&PricePoint> = series
            .iter()
            .filter(|p| p.asset_id == asset_id && p.price.is_finite())
            .collect();
        points.sort_by_key(|p| p.timestamp);
        let owned: Vec<PricePoint> = points.into_iter().cloned().collect();
        let closes = daily_closes(&owned);
        let (Some(first), Some(last)) = (closes.first(), closes.last()) else {
            return Err(RenderError::no_data(format!("price trend of {asset_id}")));
        };
        let period = DateRange::new(first.0, last.0)
            .map_err(|_| RenderError::no_data(format!("price trend of {asset_id}")))?;

        let labels: Vec<String> = closes.iter().map(|(d, _)| d.to_string()).collect();
        let prices: Vec<f64> = closes.iter().map(|(_, p)| *p).collect();
        let lines = vec![
            LineSeries {
                label: asset_id.to_string(),
                values: prices.clone(),
                color: PALETTE[0],
                dashed: false,
            },
            LineSeries {
                label: format!("{}-day MA", self.window),
                values: moving_average_series(&prices, self.window),
                color: PALETTE[1],
                dashed: true,
            },
        ];
        let title = format!("{asset_id} price, {period}");
        let doc = svg::line_chart(&title, &labels, &lines)
            .ok_or_else(|| RenderError::no_data(format!("price trend of {asset_id}")))?;

        let name = format!(
            "price_trend_{asset_id}_{}_{}.svg",
            period.start(),
            period.end()
        );
        self.finish(
            &name,
            &doc,
            ChartSubject::Asset {
                id: asset_id.to_string(),
            },
            period,
        )
    }

    /// Several assets on one chart, each rebased to 100 at its first close.
    /// Assets are drawn in ascending id order; assets without data are left out.
    pub fn render_comparison(
        &self,
        asset_ids: &[String],
        series: &BTreeMap<String, Vec<PricePoint>>,
    ) -> Result<ChartArtifact, RenderError> {
        let ids: BTreeSet<&str> = asset_ids.iter().map(String::as_str).collect();

        let mut per_asset: Vec<(&str, BTreeMap<NaiveDate, f64>)> = Vec::new();
        for &id in &ids {
            let Some(points) = series.get(id) else {
                continue;
            };
            let mut points: Vec<PricePoint> = points
                .iter()
                .filter(|p| p.price.is_finite())
                .cloned()
                .collect();
            points.sort_by_key(|p| p.timestamp);
            let closes = daily_closes(&points);
            let prices: Vec<f64> = closes.iter().map(|(_, p)| *p).collect();
            let rebased = rebase(&prices, 100.0);
            if rebased.is_empty() {
                continue;
            }
            let by_day = closes.iter().map(|(d, _)| *d).zip(rebased).collect();
            per_asset.push((id, by_day));
        }

        let days: BTreeSet<NaiveDate> = per_asset
            .iter()
            .flat_map(|(_, by_day)| by_day.keys().copied())
            .collect();
        let (Some(&start), Some(&end)) = (days.first(), days.last()) else {
            return Err(RenderError::no_data("asset comparison"));
        };
        let period =
            DateRange::new(start, end).map_err(|_| RenderError::no_data("asset comparison"))?;

        let labels: Vec<String> = days.iter().map(NaiveDate::to_string).collect();
        let lines: Vec<LineSeries> = per_asset
            .iter()
            .enumerate()
            .map(|(i, (id, by_day))| LineSeries {
                label: id.to_string(),
                values: days
                    .iter()
                    .map(|d| by_day.get(d).copied().unwrap_or(f64::NAN))
                    .collect(),
                color: PALETTE[i % PALETTE.len()],
                dashed: false,
            })
            .collect();
        let drawn: Vec<String> = per_asset.iter().map(|(id, _)| id.to_string()).collect();

        let title = format!("Relative performance (start = 100), {period}");
        let doc = svg::line_chart(&title, &labels, &lines)
            .ok_or_else(|| RenderError::no_data("asset comparison"))?;

        let set_hash = blake3::hash(drawn.join(",").as_bytes()).to_hex();
        let name = format!(
            "comparison_{}_{}_{}.svg",
            &set_hash.as_str()[..8],
            period.start(),
            period.end()
        );
        self.finish(&name, &doc, ChartSubject::AssetSet { ids: drawn }, period)
    }

    /// Price change over `month` for the top assets by market cap on the
    /// month's last snapshot date. Writes the chart plus the rows as CSV and
    /// Parquet.
    pub fn render_monthly_report(
        &self,
        storage: &Storage,
        month: YearMonth,
    ) -> Result<MonthlyReport, RenderError> {
        let snapshots = storage.snapshots_between(month.range())?;
        let rows = monthly_rows(&snapshots, self.top_n);
        if rows.is_empty() {
            return Err(RenderError::no_data(format!("monthly report {month}")));
        }

        let bars: Vec<BarEntry> = rows
            .iter()
            .map(|r| BarEntry {
                label: r.asset_id.clone(),
                value: r.change_pct.unwrap_or(f64::NAN),
            })
            .collect();
        let title = format!("Monthly price change, {month}");
        let doc = svg::bar_chart(&title, &bars, "%")
            .ok_or_else(|| RenderError::no_data(format!("monthly report {month}")))?;

        let chart = self.finish(
            &format!("monthly_report_{month}.svg"),
            &doc,
            ChartSubject::Month { month },
            month.range(),
        )?;
        let csv_path = self.out_dir.join(format!("monthly_report_{month}.csv"));
        report::write_report_csv(&csv_path, &rows)?;
        let parquet_path = self.out_dir.join(format!("monthly_report_{month}.parquet"));
        report::write_report_parquet(&parquet_path, &rows)?;

        tracing::info!(%month, assets = rows.len(), "monthly report written");
        Ok(MonthlyReport {
            chart,
            rows,
            csv_path,
            parquet_path,
        })
    }

    /// 24h price change of the top assets by market cap on `as_of`.
    pub fn render_market_overview(
        &self,
        storage: &Storage,
        as_of: NaiveDate,
    ) -> Result<ChartArtifact, RenderError> {
        let period = DateRange::day(as_of);
        let snapshots = storage.snapshots_between(period)?;
        let bars: Vec<BarEntry> = top_by_market_cap(snapshots.iter().collect(), self.top_n)
            .into_iter()
            .filter_map(|s| {
                s.price_change_pct_24h.map(|value| BarEntry {
                    label: s.asset_id.clone(),
                    value,
                })
            })
            .collect();

        let title = format!("24h price change, {as_of}");
        let doc = svg::bar_chart(&title, &bars, "%")
            .ok_or_else(|| RenderError::no_data(format!("market overview {as_of}")))?;
        self.finish(
            &format!("market_overview_{as_of}.svg"),
            &doc,
            ChartSubject::Market { date: as_of },
            period,
        )
    }

    fn finish(
        &self,
        file_name: &str,
        doc: &str,
        subject: ChartSubject,
        period: DateRange,
    ) -> Result<ChartArtifact, RenderError> {
        let path = self.out_dir.join(file_name);
        write_atomic(&path, doc.as_bytes())?;
        let content_hash = blake3::hash(doc.as_bytes()).to_hex().to_string();
        tracing::debug!(path = %path.display(), hash = %content_hash, "chart written");
        Ok(ChartArtifact {
            path,
            subject,
            period,
            content_hash,
        })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RenderError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let tmp_path = path.with_extension("svg.tmp");
    fs::write(&tmp_path, bytes).map_err(io_error(&tmp_path))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        RenderError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

/// Largest market cap first; ties and missing caps fall back to id order.
fn top_by_market_cap(mut snapshots: Vec<&MarketSnapshot>, n: usize) -> Vec<&MarketSnapshot> {
    snapshots.sort_by(|a, b| {
        let cap = |s: &MarketSnapshot| s.market_cap.filter(|c| c.is_finite());
        match (cap(a), cap(b)) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
        .then_with(|| a.asset_id.cmp(&b.asset_id))
    });
    snapshots.truncate(n);
    snapshots
}

/// First-to-last price change per asset within one month, limited to the
/// top `n` assets by market cap on the latest snapshot date. Input must be
/// ordered by date.
pub fn monthly_rows(snapshots: &[MarketSnapshot], n: usize) -> Vec<ReportRow> {
    let Some(last_date) = snapshots.iter().map(|s| s.as_of_date).max() else {
        return Vec::new();
    };

    let mut first: BTreeMap<&str, &MarketSnapshot> = BTreeMap::new();
    let mut last: BTreeMap<&str, &MarketSnapshot> = BTreeMap::new();
    for s in snapshots {
        first.entry(s.asset_id.as_str()).or_insert(s);
        last.insert(s.asset_id.as_str(), s);
    }

    let on_last_date: Vec<&MarketSnapshot> = snapshots
        .iter()
        .filter(|s| s.as_of_date == last_date)
        .collect();

    top_by_market_cap(on_last_date, n)
        .into_iter()
        .filter_map(|top| {
            let id = top.asset_id.as_str();
            let (f, l) = (first.get(id)?, last.get(id)?);
            Some(ReportRow {
                asset_id: id.to_string(),
                first_date: f.as_of_date,
                last_date: l.as_of_date,
                first_price: f.price,
                last_price: l.price,
                change_pct: percent_change(f.price, l.price),
                market_cap: l.market_cap,
            })
        })
        .collect()
}
