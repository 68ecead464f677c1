//! Source Store access
//!
//! The engine only reads from the store. Two backends implement the same
//! trait: an embedded SQLite file for local/offline use and a Postgres
//! server for production. Both hand out pooled connections with a hard cap
//! and a bounded acquire wait.

pub mod postgres;
pub mod sqlite;


pub use postgres::PgStore;
pub use sqlite::{Fixture, SqliteStore};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::types::{PriceSnapshot, Source, SourceContract, SourceMarket};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Summary counts for the `stats` command
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total_markets: i64,
    pub total_contracts: i64,
    pub total_snapshots: i64,
    pub earliest_snapshot: Option<DateTime<Utc>>,
    pub latest_snapshot: Option<DateTime<Utc>>,
    pub snapshots_by_source: BTreeMap<String, i64>,
}

/// Read-only view of the Source Store
///
/// Every query is scoped to one source so a failure on one platform's data
/// never takes down the others.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Backend name for logging
    fn backend_name(&self) -> &'static str;

    /// All market listings for a source
    async fn markets(&self, source: Source) -> Result<Vec<SourceMarket>>;

    /// Contracts belonging to the given markets
    async fn contracts(&self, source: Source, market_ids: &[String]) -> Result<Vec<SourceContract>>;

    /// Most recent priced snapshot per contract at or before `as_of`
    async fn latest_snapshots(
        &self,
        source: Source,
        market_ids: &[String],
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PriceSnapshot>>;

    /// Every priced snapshot in `[from, to]`, ascending by time
    async fn snapshot_history(
        &self,
        source: Source,
        market_ids: &[String],
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PriceSnapshot>>;

    async fn stats(&self) -> Result<StoreStats>;

    /// Release pooled connections
    async fn close(&self);
}

/// Open the backend selected by configuration
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn SourceStore>> {
    match config.backend()? {
        StoreBackend::Embedded { path } => {
            info!("Opening embedded source store at {}", path.display());
            let store = SqliteStore::connect(&path, config).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Networked { url } => {
            info!("Connecting to networked source store");
            let store = PgStore::connect(&url, config).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Canonical text form for timestamps in the embedded store.
/// Queries still compare through `julianday()` since other writers may store naive text.
pub(crate) fn format_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // Naive timestamps are written by some ingestion jobs
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
                .map(|n| n.and_utc())
                .ok()
        })
}

/// REAL columns carry float noise; ten places is well past any quoted price
pub(crate) fn to_decimal(value: Option<f64>) -> Option<Decimal> {
    value
        .and_then(Decimal::from_f64)
        .map(|d| d.round_dp(10).normalize())
}

pub(crate) fn to_f64(value: Option<Decimal>) -> Option<f64> {
    use rust_decimal::prelude::ToPrimitive;
    value.and_then(|d| d.to_f64())
}

/// Convert rows, logging and skipping any that fail validation
pub(crate) fn collect_rows<R, T>(rows: Vec<R>, kind: &str) -> Vec<T>
where
    R: TryInto<T, Error = anyhow::Error>,
{
    rows.into_iter()
        .filter_map(|row| match row.try_into() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Skipping unreadable {} row: {:#}", kind, e);
                None
            }
        })
        .collect()
}
