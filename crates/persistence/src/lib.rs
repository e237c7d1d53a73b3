#![deny(warnings)]

//! Persistence layer: SQLite schema and storage operations for the fleet world.
//!
//! Every operation takes a `&mut SqliteConnection` so callers can compose
//! several of them inside one transaction (`&mut *tx`). Checks that guard
//! money or hold capacity are expressed as conditional statements so they hold
//! under concurrent callers without application-level locking.

pub mod finance;
pub mod ledger;
pub mod logistics;
pub mod market;
pub mod vessels;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors raised by the storage layer.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid metadata json: {0}")]
    Json(#[from] serde_json::Error),
    /// A stored value could not be mapped back into the domain model.
    #[error("corrupt {column} value: {value}")]
    Decode { column: &'static str, value: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PersistError>;

/// Returns the default SQLite URL used for local saves.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./saves/fleet.db"
}

/// Open (creating if needed) the database at `url` and run embedded migrations.
pub async fn init_db(url: &str) -> Result<SqlitePool> {
    if let Some(path) = sqlite_file_path(url) {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
    }
    let opts = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!(url, "database ready");
    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
///
/// One connection keeps every query on the same memory database.
pub async fn memory_pool() -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

fn sqlite_file_path(url: &str) -> Option<&str> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    Some(path)
}

pub(crate) fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn opt_ms(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(to_ms)
}

pub(crate) fn from_ms(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| PersistError::Decode {
            column: "timestamp",
            value: ms.to_string(),
        })
}

pub(crate) fn from_opt_ms(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_ms).transpose()
}

pub(crate) fn parse_text<T>(column: &'static str, value: &str) -> Result<T>
where
    T: FromStr,
{
    value.parse::<T>().map_err(|_| PersistError::Decode {
        column,
        value: value.to_string(),
    })
}

pub(crate) fn parse_decimal(column: &'static str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|_| PersistError::Decode {
        column,
        value: value.to_string(),
    })
}
