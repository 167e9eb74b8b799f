//! DuckDB storage layer.
//!
//! One database file holds four tables: asset metadata, daily market
//! snapshots, price history and derived trend summaries. Every write is a
//! single transaction per batch, serialized through one writer connection.
//! Reads run on cloned connections.

pub mod error;
mod migrations;

pub use error::StorageError;

use chrono::{NaiveDate, NaiveDateTime};
use duckdb::{params, Connection, Row};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::domain::{Asset, DateRange, MarketSnapshot, PricePoint, TrendSummary};
use error::write_failure;

const METADATA: &str = "crypto_metadata";
const MARKET_DATA: &str = "crypto_market_data";
const PRICE_HISTORY: &str = "crypto_price_history";
const TREND_SUMMARY: &str = "crypto_trend_summary";

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub assets: usize,
    pub market_snapshots: usize,
    pub price_points: usize,
    pub trend_summaries: usize,
}

/// DuckDB-backed store for the four pipeline tables.
///
/// Writes go through one connection behind a mutex, so batches never
/// interleave. Reads use cloned connections and do not wait on the writer.
pub struct Storage {
    writer: Mutex<Connection>,
    location: String,
}

impl Storage {
    /// Open (or create) the database file and apply pending migrations.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let location = path.display().to_string();
        let conn = Connection::open(path).map_err(|source| StorageError::Open {
            path: location.clone(),
            source,
        })?;
        Self::init(conn, location)
    }

    /// Throwaway in-memory database.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|source| StorageError::Open {
            path: ":memory:".into(),
            source,
        })?;
        Self::init(conn, ":memory:".into())
    }

    fn init(conn: Connection, location: String) -> Result<Self, StorageError> {
        migrations::run_migrations(&conn)?;
        tracing::debug!(database = %location, "storage ready");
        Ok(Self {
            writer: Mutex::new(conn),
            location,
        })
    }

    /// File path of the database, or `:memory:`.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Names of applied migrations in the order they ran.
    pub fn applied_migrations(&self) -> Result<Vec<String>, StorageError> {
        migrations::applied(&self.reader()?)
    }

    fn reader(&self) -> Result<Connection, StorageError> {
        Ok(self.writer.lock().try_clone()?)
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Insert or refresh assets. Existing rows keep their earliest
    /// `first_seen`; `symbol` and `name` take the new values.
    pub fn upsert_assets(&self, assets: &[Asset]) -> Result<usize, StorageError> {
        let batch = dedupe_last(assets, |a| a.id.as_str());
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.writer.lock();
        let tx = conn.transaction().map_err(write_failure(METADATA))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO crypto_metadata (id, symbol, name, first_seen)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT (id) DO UPDATE SET
                       symbol = excluded.symbol,
                       name = excluded.name,
                       first_seen = LEAST(crypto_metadata.first_seen, excluded.first_seen)",
                )
                .map_err(write_failure(METADATA))?;
            for a in &batch {
                stmt.execute(params![a.id, a.symbol, a.name, a.first_seen])
                    .map_err(write_failure(METADATA))?;
            }
        }
        tx.commit().map_err(write_failure(METADATA))?;

        tracing::debug!(rows = batch.len(), "upserted assets");
        Ok(batch.len())
    }

    /// Insert or overwrite daily snapshots (last write wins per asset and date).
    pub fn upsert_market_snapshots(
        &self,
        snapshots: &[MarketSnapshot],
    ) -> Result<usize, StorageError> {
        let batch = dedupe_last(snapshots, MarketSnapshot::key);
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.writer.lock();
        let tx = conn.transaction().map_err(write_failure(MARKET_DATA))?;
        ensure_assets_exist(&tx, MARKET_DATA, batch.iter().map(|s| s.asset_id.as_str()))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO crypto_market_data
                       (id, date, price, market_cap, volume, high_24h, low_24h, price_change_pct_24h)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (id, date) DO UPDATE SET
                       price = excluded.price,
                       market_cap = excluded.market_cap,
                       volume = excluded.volume,
                       high_24h = excluded.high_24h,
                       low_24h = excluded.low_24h,
                       price_change_pct_24h = excluded.price_change_pct_24h",
                )
                .map_err(write_failure(MARKET_DATA))?;
            for s in &batch {
                stmt.execute(params![
                    s.asset_id,
                    s.as_of_date,
                    s.price,
                    s.market_cap,
                    s.volume,
                    s.high_24h,
                    s.low_24h,
                    s.price_change_pct_24h,
                ])
                .map_err(write_failure(MARKET_DATA))?;
            }
        }
        tx.commit().map_err(write_failure(MARKET_DATA))?;

        tracing::debug!(rows = batch.len(), "upserted market snapshots");
        Ok(batch.len())
    }

    /// Append price points. Points whose `(asset_id, timestamp)` already
    /// exists are skipped; returns the number of new rows.
    pub fn append_price_points(&self, points: &[PricePoint]) -> Result<usize, StorageError> {
        let batch = dedupe_first(points, PricePoint::key);
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.writer.lock();
        let tx = conn.transaction().map_err(write_failure(PRICE_HISTORY))?;
        ensure_assets_exist(&tx, PRICE_HISTORY, batch.iter().map(|p| p.asset_id.as_str()))?;
        let before = count_rows(&tx, PRICE_HISTORY).map_err(write_failure(PRICE_HISTORY))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO crypto_price_history (id, timestamp, price, market_cap, total_volume)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT (id, timestamp) DO NOTHING",
                )
                .map_err(write_failure(PRICE_HISTORY))?;
            for p in &batch {
                stmt.execute(params![
                    p.asset_id,
                    p.timestamp.naive_utc(),
                    p.price,
                    p.market_cap,
                    p.total_volume,
                ])
                .map_err(write_failure(PRICE_HISTORY))?;
            }
        }
        let after = count_rows(&tx, PRICE_HISTORY).map_err(write_failure(PRICE_HISTORY))?;
        tx.commit().map_err(write_failure(PRICE_HISTORY))?;

        let inserted = after.saturating_sub(before);
        tracing::debug!(
            rows = inserted,
            skipped = batch.len() - inserted,
            "appended price points"
        );
        Ok(inserted)
    }

    /// Replace trend summaries. For each summary, every stored row for the
    /// same asset whose period overlaps it is deleted first. One transaction.
    pub fn replace_trend_summaries(
        &self,
        summaries: &[TrendSummary],
    ) -> Result<usize, StorageError> {
        if summaries.is_empty() {
            return Ok(0);
        }

        let mut conn = self.writer.lock();
        let tx = conn.transaction().map_err(write_failure(TREND_SUMMARY))?;
        ensure_assets_exist(&tx, TREND_SUMMARY, summaries.iter().map(|s| s.asset_id.as_str()))?;
        {
            let mut delete = tx
                .prepare(
                    "DELETE FROM crypto_trend_summary
                     WHERE id = ? AND period_start <= ? AND period_end >= ?",
                )
                .map_err(write_failure(TREND_SUMMARY))?;
            let mut insert = tx
                .prepare(
                    "INSERT INTO crypto_trend_summary
                       (id, period_start, period_end, moving_avg, pct_change, window_size, points)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(write_failure(TREND_SUMMARY))?;
            for s in summaries {
                delete
                    .execute(params![s.asset_id, s.period_end, s.period_start])
                    .map_err(write_failure(TREND_SUMMARY))?;
                insert
                    .execute(params![
                        s.asset_id,
                        s.period_start,
                        s.period_end,
                        s.moving_avg,
                        s.pct_change,
                        s.window as i64,
                        s.points as i64,
                    ])
                    .map_err(write_failure(TREND_SUMMARY))?;
            }
        }
        tx.commit().map_err(write_failure(TREND_SUMMARY))?;

        tracing::debug!(rows = summaries.len(), "replaced trend summaries");
        Ok(summaries.len())
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Price points for one asset within `range`, ascending by timestamp.
    pub fn query_price_history(
        &self,
        asset_id: &str,
        range: DateRange,
    ) -> Result<Vec<PricePoint>, StorageError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, price, market_cap, total_volume
             FROM crypto_price_history
             WHERE id = ? AND timestamp >= ? AND timestamp < ?
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(
                params![
                    asset_id,
                    range.start_instant().naive_utc(),
                    range.end_instant_exclusive().naive_utc(),
                ],
                price_point_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every stored asset, ordered by id.
    pub fn list_assets(&self) -> Result<Vec<Asset>, StorageError> {
        let conn = self.reader()?;
        let mut stmt =
            conn.prepare("SELECT id, symbol, name, first_seen FROM crypto_metadata ORDER BY id")?;
        let rows = stmt
            .query_map([], asset_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// One asset by id, or `None` if it was never stored.
    pub fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>, StorageError> {
        let conn = self.reader()?;
        let mut stmt = conn
            .prepare("SELECT id, symbol, name, first_seen FROM crypto_metadata WHERE id = ?")?;
        let mut rows = stmt
            .query_map([asset_id], asset_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.pop())
    }

    /// The `n` most recent snapshots of an asset, newest first.
    pub fn latest_snapshots(
        &self,
        asset_id: &str,
        n: usize,
    ) -> Result<Vec<MarketSnapshot>, StorageError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, date, price, market_cap, volume, high_24h, low_24h, price_change_pct_24h
             FROM crypto_market_data
             WHERE id = ?
             ORDER BY date DESC
             LIMIT {n}"
        ))?;
        let rows = stmt
            .query_map([asset_id], snapshot_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every snapshot dated within `range`, ordered by date then asset id.
    pub fn snapshots_between(&self, range: DateRange) -> Result<Vec<MarketSnapshot>, StorageError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, date, price, market_cap, volume, high_24h, low_24h, price_change_pct_24h
             FROM crypto_market_data
             WHERE date >= ? AND date <= ?
             ORDER BY date ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![range.start(), range.end()], snapshot_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Stored trend summaries of an asset, ordered by period.
    pub fn trend_summaries(&self, asset_id: &str) -> Result<Vec<TrendSummary>, StorageError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, period_start, period_end, moving_avg, pct_change, window_size, points
             FROM crypto_trend_summary
             WHERE id = ?
             ORDER BY period_start ASC, period_end ASC",
        )?;
        let rows = stmt
            .query_map([asset_id], |row| {
                let window: i64 = row.get(5)?;
                let points: i64 = row.get(6)?;
                Ok(TrendSummary {
                    asset_id: row.get(0)?,
                    period_start: row.get(1)?,
                    period_end: row.get(2)?,
                    moving_avg: row.get(3)?,
                    pct_change: row.get(4)?,
                    window: window.max(0) as usize,
                    points: points.max(0) as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Row count of each pipeline table.
    pub fn table_counts(&self) -> Result<TableCounts, StorageError> {
        let conn = self.reader()?;
        Ok(TableCounts {
            assets: count_rows(&conn, METADATA)?,
            market_snapshots: count_rows(&conn, MARKET_DATA)?,
            price_points: count_rows(&conn, PRICE_HISTORY)?,
            trend_summaries: count_rows(&conn, TREND_SUMMARY)?,
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Collapse duplicate keys, keeping the last occurrence. Output is key-ordered.
fn dedupe_last<'a, T, K: Ord>(rows: &'a [T], key: impl Fn(&'a T) -> K) -> Vec<&'a T> {
    let mut by_key: BTreeMap<K, &'a T> = BTreeMap::new();
    for row in rows {
        by_key.insert(key(row), row);
    }
    by_key.into_values().collect()
}

/// Collapse duplicate keys, keeping the first occurrence. Output is key-ordered.
fn dedupe_first<'a, T, K: Ord>(rows: &'a [T], key: impl Fn(&'a T) -> K) -> Vec<&'a T> {
    let mut by_key: BTreeMap<K, &'a T> = BTreeMap::new();
    for row in rows {
        by_key.entry(key(row)).or_insert(row);
    }
    by_key.into_values().collect()
}

fn ensure_assets_exist<'a>(
    conn: &Connection,
    table: &'static str,
    ids: impl IntoIterator<Item = &'a str>,
) -> Result<(), StorageError> {
    let ids: BTreeSet<&str> = ids.into_iter().collect();
    let mut stmt = conn
        .prepare("SELECT COUNT(*) FROM crypto_metadata WHERE id = ?")
        .map_err(write_failure(table))?;

    let mut missing = Vec::new();
    for id in ids {
        let n: i64 = stmt
            .query_row([id], |row| row.get(0))
            .map_err(write_failure(table))?;
        if n == 0 {
            missing.push(id.to_string());
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        tracing::warn!(table, ?missing, "rejected batch referencing unknown assets");
        Err(StorageError::UnknownAsset { table, ids: missing })
    }
}

fn count_rows(conn: &Connection, table: &str) -> duckdb::Result<usize> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(n.max(0) as usize)
}

fn asset_from_row(row: &Row<'_>) -> duckdb::Result<Asset> {
    Ok(Asset {
        id: row.get(0)?,
        symbol: row.get(1)?,
        name: row.get(2)?,
        first_seen: row.get::<_, NaiveDate>(3)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> duckdb::Result<MarketSnapshot> {
    Ok(MarketSnapshot {
        asset_id: row.get(0)?,
        as_of_date: row.get(1)?,
        price: row.get(2)?,
        market_cap: row.get(3)?,
        volume: row.get(4)?,
        high_24h: row.get(5)?,
        low_24h: row.get(6)?,
        price_change_pct_24h: row.get(7)?,
    })
}

fn price_point_from_row(row: &Row<'_>) -> duckdb::Result<PricePoint> {
    let ts: NaiveDateTime = row.get(1)?;
    Ok(PricePoint {
        asset_id: row.get(0)?,
        timestamp: ts.and_utc(),
        price: row.get(2)?,
        market_cap: row.get(3)?,
        total_volume: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn seeded() -> Storage {
        let s = Storage::in_memory().unwrap();
        s.upsert_assets(&[
            Asset::new("bitcoin", "btc", "Bitcoin", d(2024, 1, 1)),
            Asset::new("ethereum", "eth", "Ethereum", d(2024, 1, 1)),
        ])
        .unwrap();
        s
    }

    #[test]
    fn migrations_are_recorded_once() {
        let s = Storage::in_memory().unwrap();
        let applied = s.applied_migrations().unwrap();
        assert_eq!(applied.len(), 4);
        assert_eq!(applied[0], "001_crypto_metadata");
    }

    #[test]
    fn reopening_a_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("crypto.duckdb");
        {
            let s = Storage::open(&path).unwrap();
            s.upsert_assets(&[Asset::new("bitcoin", "btc", "Bitcoin", d(2024, 1, 1))])
                .unwrap();
        }
        let s = Storage::open(&path).unwrap();
        assert_eq!(s.table_counts().unwrap().assets, 1);
        assert_eq!(s.applied_migrations().unwrap().len(), 4);
    }

    #[test]
    fn asset_upsert_keeps_earliest_first_seen() {
        let s = seeded();
        s.upsert_assets(&[Asset::new("bitcoin", "BTC", "Bitcoin Core", d(2024, 6, 1))])
            .unwrap();
        let btc = s.get_asset("bitcoin").unwrap().unwrap();
        assert_eq!(btc.symbol, "BTC");
        assert_eq!(btc.name, "Bitcoin Core");
        assert_eq!(btc.first_seen, d(2024, 1, 1));
        assert!(s.get_asset("dogecoin").unwrap().is_none());
    }

    #[test]
    fn price_history_round_trips_timestamps() {
        let s = seeded();
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 13, 45, 0).unwrap();
        let mut p = PricePoint::new("bitcoin", ts, 42_000.5);
        p.total_volume = Some(1.5e10);
        assert_eq!(s.append_price_points(&[p.clone()]).unwrap(), 1);

        let got = s
            .query_price_history("bitcoin", DateRange::day(d(2024, 1, 2)))
            .unwrap();
        assert_eq!(got, vec![p]);
        assert!(s
            .query_price_history("bitcoin", DateRange::day(d(2024, 1, 3)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn trend_replace_drops_overlapping_periods() {
        let s = seeded();
        let summary = |start, end, ma| TrendSummary {
            asset_id: "bitcoin".into(),
            period_start: start,
            period_end: end,
            moving_avg: ma,
            pct_change: Some(1.0),
            window: 7,
            points: 30,
        };
        s.replace_trend_summaries(&[
            summary(d(2024, 1, 1), d(2024, 1, 31), 1.0),
            summary(d(2024, 2, 1), d(2024, 2, 29), 2.0),
        ])
        .unwrap();
        s.replace_trend_summaries(&[summary(d(2024, 1, 15), d(2024, 1, 31), 3.0)])
            .unwrap();

        let stored = s.trend_summaries("bitcoin").unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].moving_avg, 3.0);
        assert_eq!(stored[1].moving_avg, 2.0);
    }

    #[test]
    fn trend_replace_of_the_same_period_keeps_one_row() {
        let s = seeded();
        let summary = |ma| TrendSummary {
            asset_id: "bitcoin".into(),
            period_start: d(2024, 1, 1),
            period_end: d(2024, 1, 31),
            moving_avg: ma,
            pct_change: None,
            window: 7,
            points: 1,
        };
        s.replace_trend_summaries(&[summary(1.0)]).unwrap();
        assert_eq!(s.replace_trend_summaries(&[summary(2.0)]).unwrap(), 1);

        let stored = s.trend_summaries("bitcoin").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].moving_avg, 2.0);
        assert_eq!(stored[0].pct_change, None);
    }

    #[test]
    fn empty_batches_are_noops() {
        let s = seeded();
        assert_eq!(s.upsert_market_snapshots(&[]).unwrap(), 0);
        assert_eq!(s.append_price_points(&[]).unwrap(), 0);
        assert_eq!(s.replace_trend_summaries(&[]).unwrap(), 0);
    }

    #[test]
    fn dedupe_helpers_pick_the_right_duplicate() {
        let rows = [("a", 1), ("b", 2), ("a", 3)];
        let last: Vec<_> = dedupe_last(&rows, |r| r.0).into_iter().map(|r| r.1).collect();
        let first: Vec<_> = dedupe_first(&rows, |r| r.0).into_iter().map(|r| r.1).collect();
        assert_eq!(last, vec![3, 2]);
        assert_eq!(first, vec![1, 2]);
    }
}
