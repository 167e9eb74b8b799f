//! Schema migrations, applied once each and tracked by name.

use duckdb::Connection;

use super::error::StorageError;

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_crypto_metadata", CREATE_METADATA),
    ("002_crypto_market_data", CREATE_MARKET_DATA),
    ("003_crypto_price_history", CREATE_PRICE_HISTORY),
    ("004_crypto_trend_summary", CREATE_TREND_SUMMARY),
];

pub fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            name VARCHAR PRIMARY KEY,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .map_err(|source| StorageError::Migration {
        name: "migrations".into(),
        source,
    })?;

    for (name, sql) in MIGRATIONS {
        run_migration(conn, name, sql).map_err(|source| StorageError::Migration {
            name: name.to_string(),
            source,
        })?;
    }
    Ok(())
}

/// Names of migrations already applied, in order.
pub fn applied(conn: &Connection) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare("SELECT name FROM migrations ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> duckdb::Result<()> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM migrations WHERE name = ?",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("running migration {name}");
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    }
    Ok(())
}

const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS crypto_metadata (
    id VARCHAR PRIMARY KEY,
    symbol VARCHAR NOT NULL,
    name VARCHAR NOT NULL,
    first_seen DATE NOT NULL
);
"#;

const CREATE_MARKET_DATA: &str = r#"
CREATE TABLE IF NOT EXISTS crypto_market_data (
    id VARCHAR NOT NULL,
    date DATE NOT NULL,
    price DOUBLE NOT NULL,
    market_cap DOUBLE,
    volume DOUBLE,
    high_24h DOUBLE,
    low_24h DOUBLE,
    price_change_pct_24h DOUBLE,
    PRIMARY KEY (id, date)
);
"#;

const CREATE_PRICE_HISTORY: &str = r#"
CREATE TABLE IF NOT EXISTS crypto_price_history (
    id VARCHAR NOT NULL,
    timestamp TIMESTAMP NOT NULL,
    price DOUBLE NOT NULL,
    market_cap DOUBLE,
    total_volume DOUBLE,
    PRIMARY KEY (id, timestamp)
);
"#;

// No key or index: rows for an asset are deleted and re-inserted in the same
// transaction, which DuckDB's index constraint checks reject.
const CREATE_TREND_SUMMARY: &str = r#"
CREATE TABLE IF NOT EXISTS crypto_trend_summary (
    id VARCHAR NOT NULL,
    period_start DATE NOT NULL,
    period_end DATE NOT NULL,
    moving_avg DOUBLE NOT NULL,
    pct_change DOUBLE,
    window_size INTEGER NOT NULL,
    points INTEGER NOT NULL
);
"#;
