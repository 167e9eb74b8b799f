//! Monthly report data export (CSV/Parquet).

use chrono::NaiveDate;
use polars::prelude::{Column, DataFrame, NamedFrom, ParquetWriter, Series};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::Path;

use super::{io_error, RenderError};

/// One asset's line in the monthly report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub asset_id: String,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub first_price: f64,
    pub last_price: f64,
    pub change_pct: Option<f64>,
    pub market_cap: Option<f64>,
}

pub fn write_report_csv(path: &Path, rows: &[ReportRow]) -> Result<(), RenderError> {
    let tmp_path = path.with_extension("csv.tmp");
    let mut writer = csv::Writer::from_path(&tmp_path)
        .map_err(|e| RenderError::Export(format!("create {}: {e}", tmp_path.display())))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| RenderError::Export(format!("report CSV row: {e}")))?;
    }
    writer.flush().map_err(io_error(&tmp_path))?;
    drop(writer);
    fs::rename(&tmp_path, path).map_err(io_error(path))
}

pub fn write_report_parquet(path: &Path, rows: &[ReportRow]) -> Result<(), RenderError> {
    let ids: Vec<&str> = rows.iter().map(|r| r.asset_id.as_str()).collect();
    let first_dates: Vec<String> = rows.iter().map(|r| r.first_date.to_string()).collect();
    let last_dates: Vec<String> = rows.iter().map(|r| r.last_date.to_string()).collect();
    let first_prices: Vec<f64> = rows.iter().map(|r| r.first_price).collect();
    let last_prices: Vec<f64> = rows.iter().map(|r| r.last_price).collect();
    let changes: Vec<Option<f64>> = rows.iter().map(|r| r.change_pct).collect();
    let caps: Vec<Option<f64>> = rows.iter().map(|r| r.market_cap).collect();

    let mut df = DataFrame::new(vec![
        Column::from(Series::new("asset_id".into(), ids)),
        Column::from(Series::new("first_date".into(), first_dates)),
        Column::from(Series::new("last_date".into(), last_dates)),
        Column::from(Series::new("first_price".into(), first_prices)),
        Column::from(Series::new("last_price".into(), last_prices)),
        Column::from(Series::new("change_pct".into(), changes)),
        Column::from(Series::new("market_cap".into(), caps)),
    ])
    .map_err(|e| RenderError::Export(format!("report dataframe: {e}")))?;

    let tmp_path = path.with_extension("parquet.tmp");
    let mut file = File::create(&tmp_path).map_err(io_error(&tmp_path))?;
    ParquetWriter::new(&mut file)
        .finish(&mut df)
        .map_err(|e| RenderError::Export(format!("report parquet: {e}")))?;
    drop(file);
    fs::rename(&tmp_path, path).map_err(io_error(path))
}
