//! Storage errors.

use thiserror::Error;

use crate::error::ErrorClass;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("migration {name} failed: {source}")]
    Migration {
        name: String,
        #[source]
        source: duckdb::Error,
    },

    /// A write transaction failed and was rolled back.
    #[error("write to {table} failed: {source}")]
    WriteFailure {
        table: &'static str,
        #[source]
        source: duckdb::Error,
    },

    /// Rows referenced assets missing from `crypto_metadata`; nothing was written.
    #[error("{table} rows reference unknown asset(s): {}", ids.join(", "))]
    UnknownAsset { table: &'static str, ids: Vec<String> },

    #[error("query failed: {0}")]
    Query(#[from] duckdb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StorageError::WriteFailure { .. } | StorageError::UnknownAsset { .. } => {
                ErrorClass::StorageWriteFailure
            }
            StorageError::Open { .. }
            | StorageError::Migration { .. }
            | StorageError::Query(_)
            | StorageError::Io(_) => ErrorClass::StorageReadFailure,
        }
    }
}

/// Map a DuckDB error inside a write transaction on `table`.
pub(crate) fn write_failure(table: &'static str) -> impl Fn(duckdb::Error) -> StorageError {
    move |source| StorageError::WriteFailure { table, source }
}
