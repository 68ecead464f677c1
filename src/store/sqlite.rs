//! Embedded single-writer store backed by a SQLite file
//!
//! Besides the read path this backend carries idempotent upserts so that a
//! local database can be seeded from a fixture file.

use super::{collect_rows, format_time, parse_time, to_decimal, to_f64, SourceStore, StoreStats};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::types::{MarketStatus, PriceSnapshot, Source, SourceContract, SourceMarket};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::path::Path;
use tracing::{debug, info};

/// Bulk data accepted by [`SqliteStore::import`]
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Fixture {
    #[serde(default)]
    pub markets: Vec<SourceMarket>,
    #[serde(default)]
    pub contracts: Vec<SourceContract>,
    #[serde(default)]
    pub snapshots: Vec<PriceSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub markets: usize,
    pub contracts: usize,
    pub snapshots: usize,
}

/// SQLite-backed Source Store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`
    pub async fn connect<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.acquire_timeout())
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Private in-memory database; a single connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS markets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                market_id TEXT NOT NULL,
                market_name TEXT NOT NULL,
                category TEXT,
                status TEXT,
                url TEXT,
                total_volume REAL,
                end_date TEXT,
                UNIQUE(source, market_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contracts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                market_id TEXT NOT NULL,
                contract_id TEXT NOT NULL,
                contract_name TEXT NOT NULL,
                short_name TEXT,
                UNIQUE(source, market_id, contract_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                market_id TEXT NOT NULL,
                contract_id TEXT NOT NULL,
                snapshot_time TEXT NOT NULL,
                yes_price REAL,
                no_price REAL,
                yes_bid REAL,
                yes_ask REAL,
                volume REAL,
                UNIQUE(source, market_id, contract_id, snapshot_time)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_price_snapshots_source_market
            ON price_snapshots(source, market_id, snapshot_time)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or update a market listing
    pub async fn upsert_market(&self, market: &SourceMarket) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO markets (source, market_id, market_name, category, status, url, total_volume, end_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, market_id) DO UPDATE SET
                market_name = excluded.market_name,
                category = excluded.category,
                status = excluded.status,
                url = excluded.url,
                total_volume = excluded.total_volume,
                end_date = excluded.end_date
            "#,
        )
        .bind(market.source.as_str())
        .bind(&market.market_id)
        .bind(&market.name)
        .bind(&market.category)
        .bind(market.status.as_str())
        .bind(&market.url)
        .bind(to_f64(market.total_volume))
        .bind(market.end_date.map(format_time))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or update a contract
    pub async fn upsert_contract(&self, contract: &SourceContract) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contracts (source, market_id, contract_id, contract_name, short_name)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(source, market_id, contract_id) DO UPDATE SET
                contract_name = excluded.contract_name,
                short_name = excluded.short_name
            "#,
        )
        .bind(contract.source.as_str())
        .bind(&contract.market_id)
        .bind(&contract.contract_id)
        .bind(&contract.name)
        .bind(&contract.short_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or update a snapshot keyed by contract and time
    pub async fn upsert_snapshot(&self, snapshot: &PriceSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_snapshots
            (source, market_id, contract_id, snapshot_time, yes_price, no_price, yes_bid, yes_ask, volume)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, market_id, contract_id, snapshot_time) DO UPDATE SET
                yes_price = excluded.yes_price,
                no_price = excluded.no_price,
                yes_bid = excluded.yes_bid,
                yes_ask = excluded.yes_ask,
                volume = excluded.volume
            "#,
        )
        .bind(snapshot.source.as_str())
        .bind(&snapshot.market_id)
        .bind(&snapshot.contract_id)
        .bind(format_time(snapshot.snapshot_time))
        .bind(to_f64(Some(snapshot.yes_price)))
        .bind(to_f64(snapshot.no_price))
        .bind(to_f64(snapshot.yes_bid))
        .bind(to_f64(snapshot.yes_ask))
        .bind(to_f64(snapshot.volume))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load a fixture; re-importing the same file is a no-op
    pub async fn import(&self, fixture: &Fixture) -> Result<ImportSummary> {
        for market in &fixture.markets {
            self.upsert_market(market).await?;
        }
        for contract in &fixture.contracts {
            self.upsert_contract(contract).await?;
        }
        for snapshot in &fixture.snapshots {
            self.upsert_snapshot(snapshot).await?;
        }

        let summary = ImportSummary {
            markets: fixture.markets.len(),
            contracts: fixture.contracts.len(),
            snapshots: fixture.snapshots.len(),
        };
        info!(
            "Imported {} markets, {} contracts, {} snapshots",
            summary.markets, summary.contracts, summary.snapshots
        );
        Ok(summary)
    }
}

fn push_market_filter<'a>(qb: &mut QueryBuilder<'a, Sqlite>, market_ids: &'a [String]) {
    qb.push(" AND market_id IN (");
    let mut separated = qb.separated(", ");
    for id in market_ids {
        separated.push_bind(id.as_str());
    }
    separated.push_unseparated(")");
}

#[async_trait]
impl SourceStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn markets(&self, source: Source) -> Result<Vec<SourceMarket>> {
        let rows = sqlx::query_as::<_, MarketRow>(
            r#"
            SELECT source, market_id, market_name, category, status, url, total_volume, end_date
            FROM markets
            WHERE source = ?
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

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT source, market_id, contract_id, contract_name, short_name FROM contracts WHERE source = ",
        );
        qb.push_bind(source.as_str());
        push_market_filter(&mut qb, market_ids);
        qb.push(" ORDER BY market_id ASC, contract_id ASC");

        let rows = qb
            .build_query_as::<ContractRow>()
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

        // Compare through julianday(): stored text may be naive or space separated
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT source, market_id, contract_id, snapshot_time,
                   yes_price, no_price, yes_bid, yes_ask, volume
            FROM (
                SELECT *, ROW_NUMBER() OVER (
                    PARTITION BY market_id, contract_id
                    ORDER BY julianday(snapshot_time) DESC, id DESC
                ) AS rn
                FROM price_snapshots
                WHERE yes_price IS NOT NULL AND source = "#,
        );
        qb.push_bind(source.as_str());
        qb.push(" AND julianday(snapshot_time) <= julianday(");
        qb.push_bind(format_time(as_of));
        qb.push(")");
        push_market_filter(&mut qb, market_ids);
        qb.push(
            r#"
            )
            WHERE rn = 1
            ORDER BY market_id ASC, contract_id ASC
            "#,
        );

        let rows = qb
            .build_query_as::<SnapshotRow>()
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

        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT source, market_id, contract_id, snapshot_time,
                   yes_price, no_price, yes_bid, yes_ask, volume
            FROM price_snapshots
            WHERE yes_price IS NOT NULL AND source = "#,
        );
        qb.push_bind(source.as_str());
        qb.push(" AND julianday(snapshot_time) <= julianday(");
        qb.push_bind(format_time(to));
        qb.push(")");
        if let Some(from) = from {
            qb.push(" AND julianday(snapshot_time) >= julianday(");
            qb.push_bind(format_time(from));
            qb.push(")");
        }
        push_market_filter(&mut qb, market_ids);
        qb.push(" ORDER BY julianday(snapshot_time) ASC, market_id ASC, contract_id ASC");

        let rows = qb
            .build_query_as::<SnapshotRow>()
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

        let (earliest, latest) = sqlx::query_as::<_, (Option<String>, Option<String>)>(
            r#"
            SELECT
                (SELECT snapshot_time FROM price_snapshots
                 WHERE julianday(snapshot_time) IS NOT NULL
                 ORDER BY julianday(snapshot_time) ASC LIMIT 1),
                (SELECT snapshot_time FROM price_snapshots
                 WHERE julianday(snapshot_time) IS NOT NULL
                 ORDER BY julianday(snapshot_time) DESC LIMIT 1)
            "#,
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
            earliest_snapshot: earliest.as_deref().and_then(parse_time),
            latest_snapshot: latest.as_deref().and_then(parse_time),
            snapshots_by_source: by_source.into_iter().collect(),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// SQLx row types
#[derive(Debug, sqlx::FromRow)]
struct MarketRow {
    source: String,
    market_id: String,
    market_name: String,
    category: Option<String>,
    status: Option<String>,
    url: Option<String>,
    total_volume: Option<f64>,
    end_date: Option<String>,
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
            end_date: row.end_date.as_deref().and_then(parse_time),
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
    snapshot_time: String,
    yes_price: Option<f64>,
    no_price: Option<f64>,
    yes_bid: Option<f64>,
    yes_ask: Option<f64>,
    volume: Option<f64>,
}

impl TryFrom<SnapshotRow> for PriceSnapshot {
    type Error = anyhow::Error;

    fn try_from(row: SnapshotRow) -> std::result::Result<Self, Self::Error> {
        let snapshot_time = parse_time(&row.snapshot_time)
            .with_context(|| format!("bad snapshot_time {:?}", row.snapshot_time))?;
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
            snapshot_time,
            yes_price,
            no_price: to_decimal(row.no_price),
            yes_bid: to_decimal(row.yes_bid),
            yes_ask: to_decimal(row.yes_ask),
            volume: to_decimal(row.volume),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::base_time;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    async fn insert_raw(store: &SqliteStore, snapshot_time: &str, yes_price: f64) {
        sqlx::query(
            "INSERT INTO price_snapshots (source, market_id, contract_id, snapshot_time, yes_price) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Source::Kalshi.as_str())
        .bind("KXSENATE-26")
        .bind("KXSENATE-26-D")
        .bind(snapshot_time)
        .bind(yes_price)
        .execute(&store.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_naive_timestamps_order_by_time() {
        let store = SqliteStore::in_memory().await.unwrap();
        insert_raw(&store, "2026-10-01 11:00:00", 0.60).await;
        insert_raw(&store, "2026-10-01T10:00:00Z", 0.40).await;
        let ids = vec!["KXSENATE-26".to_string()];

        let latest = store.latest_snapshots(Source::Kalshi, &ids, base_time()).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].yes_price, dec!(0.6));
        assert_eq!(latest[0].snapshot_time, base_time() - Duration::hours(1));

        let earlier = base_time() - Duration::minutes(90);
        let latest = store.latest_snapshots(Source::Kalshi, &ids, earlier).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].yes_price, dec!(0.4));

        let history = store
            .snapshot_history(Source::Kalshi, &ids, None, base_time())
            .await
            .unwrap();
        let prices: Vec<Decimal> = history.iter().map(|s| s.yes_price).collect();
        assert_eq!(prices, vec![dec!(0.4), dec!(0.6)]);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.earliest_snapshot, Some(base_time() - Duration::hours(2)));
        assert_eq!(stats.latest_snapshot, Some(base_time() - Duration::hours(1)));
    }
}
