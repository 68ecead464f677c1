//! Networked multi-connection store backed by Postgres
//!
//! The schema is owned by the ingestion jobs; this side never migrates or
//! writes. `snapshot_time` and `end_date` are `TIMESTAMPTZ`.

use super::{collect_rows, to_decimal, SourceStore, StoreStats};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::types::{MarketStatus, PriceSnapshot, Source, SourceContract, SourceMarket};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

/// Postgres-backed Source Store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.acquire_timeout())
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceStore for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn markets(&self, source: Source) -> Result<Vec<SourceMarket>> {
        let rows = sqlx::query_as::<_, MarketRow>(
            r#"
            SELECT source, market_id, market_name, category, status, url,
                   total_volume::float8 AS total_volume, end_date
            FROM markets
            WHERE source = $1
            ORDER BY market_id ASC
            "#,
        )
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_rows(rows, "market"))
    }

    async fn contracts(&self, source: Source, market_ids: &[String]) -> Result<Vec<SourceContract>> {
        if market_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ContractRow>(
            r#"
            SELECT source, market_id, contract_id, contract_name, short_name
            FROM contracts
            WHERE source = $1 AND market_id = ANY($2)
            ORDER BY market_id ASC, contract_id ASC
            "#,
        )
        .bind(source.as_str())
        .bind(market_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_rows(rows, "contract"))
    }

    async fn latest_snapshots(
        &self,
        source: Source,
        market_ids: &[String],
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PriceSnapshot>> {
        if market_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT DISTINCT ON (market_id, contract_id)
                   source, market_id, contract_id, snapshot_time,
                   yes_price::float8 AS yes_price, no_price::float8 AS no_price,
                   yes_bid::float8 AS yes_bid, yes_ask::float8 AS yes_ask,
                   volume::float8 AS volume
            FROM price_snapshots
            WHERE source = $1
              AND market_id = ANY($2)
              AND snapshot_time <= $3
              AND yes_price IS NOT NULL
            ORDER BY market_id, contract_id, snapshot_time DESC
            "#,
        )
        .bind(source.as_str())
        .bind(market_ids)
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        debug!("{} latest snapshots for {} as of {}", rows.len(), source, as_of);
        Ok(collect_rows(rows, "snapshot"))
    }

    async fn snapshot_history(
        &self,
        source: Source,
        market_ids: &[String],
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PriceSnapshot>> {
        if market_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT source, market_id, contract_id, snapshot_time,
                   yes_price::float8 AS yes_price, no_price::float8 AS no_price,
                   yes_bid::float8 AS yes_bid, yes_ask::float8 AS yes_ask,
                   volume::float8 AS volume
            FROM price_snapshots
            WHERE source = $1
              AND market_id = ANY($2)
              AND snapshot_time <= $3
              AND ($4::timestamptz IS NULL OR snapshot_time >= $4)
              AND yes_price IS NOT NULL
            ORDER BY snapshot_time ASC, market_id ASC, contract_id ASC
            "#,
        )
        .bind(source.as_str())
        .bind(market_ids)
        .bind(to)
        .bind(from)
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_rows(rows, "snapshot"))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let total_markets = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM markets")
            .fetch_one(&self.pool)
            .await?;
        let total_contracts = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM contracts")
            .fetch_one(&self.pool)
            .await?;
        let total_snapshots = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM price_snapshots")
            .fetch_one(&self.pool)
            .await?;

        let (earliest_snapshot, latest_snapshot) =
            sqlx::query_as::<_, (Option<DateTime<Utc>>, Option<DateTime<Utc>>)>(
                "SELECT MIN(snapshot_time), MAX(snapshot_time) FROM price_snapshots",
            )
            .fetch_one(&self.pool)
            .await?;

        let by_source = sqlx::query_as::<_, (String, i64)>(
            "SELECT source, COUNT(*) FROM price_snapshots GROUP BY source ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(StoreStats {
            total_markets,
            total_contracts,
            total_snapshots,
            earliest_snapshot,
            latest_snapshot,
            snapshots_by_source: by_source.into_iter().collect(),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MarketRow {
    source: String,
    market_id: String,
    market_name: String,
    category: Option<String>,
    status: Option<String>,
    url: Option<String>,
    total_volume: Option<f64>,
    end_date: Option<DateTime<Utc>>,
}

impl TryFrom<MarketRow> for SourceMarket {
    type Error = anyhow::Error;

    fn try_from(row: MarketRow) -> std::result::Result<Self, Self::Error> {
        Ok(SourceMarket {
            source: row.source.parse()?,
            market_id: row.market_id,
            name: row.market_name,
            category: row.category,
            status: MarketStatus::parse_lenient(row.status.as_deref()),
            url: row.url,
            total_volume: to_decimal(row.total_volume),
            end_date: row.end_date,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ContractRow {
    source: String,
    market_id: String,
    contract_id: String,
    contract_name: String,
    short_name: Option<String>,
}

impl TryFrom<ContractRow> for SourceContract {
    type Error = anyhow::Error;

    fn try_from(row: ContractRow) -> std::result::Result<Self, Self::Error> {
        Ok(SourceContract {
            source: row.source.parse()?,
            market_id: row.market_id,
            contract_id: row.contract_id,
            name: row.contract_name,
            short_name: row.short_name.filter(|s| !s.trim().is_empty()),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    source: String,
    market_id: String,
    contract_id: String,
    snapshot_time: DateTime<Utc>,
    yes_price: Option<f64>,
    no_price: Option<f64>,
    yes_bid: Option<f64>,
    yes_ask: Option<f64>,
    volume: Option<f64>,
}

impl TryFrom<SnapshotRow> for PriceSnapshot {
    type Error = anyhow::Error;

    fn try_from(row: SnapshotRow) -> std::result::Result<Self, Self::Error> {
        let yes_price = to_decimal(row.yes_price).context("missing yes_price")?;
        anyhow::ensure!(
            yes_price >= Decimal::ZERO && yes_price <= Decimal::ONE,
            "yes_price {} outside [0, 1]",
            yes_price
        );

        Ok(PriceSnapshot {
            source: row.source.parse()?,
            market_id: row.market_id,
            contract_id: row.contract_id,
            snapshot_time: row.snapshot_time,
            yes_price,
            no_price: to_decimal(row.no_price),
            yes_bid: to_decimal(row.yes_bid),
            yes_ask: to_decimal(row.yes_ask),
            volume: to_decimal(row.volume),
        })
    }
}
