//! Test Data Generators
//!
//! Builds source-store rows for tests and demos

use crate::store::Fixture;
use crate::types::{MarketStatus, PriceSnapshot, Source, SourceContract, SourceMarket};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

/// Fixed reference time so generated data is reproducible
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Accumulates markets, contracts and snapshots into a [`Fixture`]
#[derive(Debug, Default)]
pub struct FixtureBuilder {
    fixture: Fixture,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open market listing
    pub fn market(mut self, source: Source, market_id: &str, name: &str) -> Self {
        self.fixture.markets.push(SourceMarket {
            source,
            market_id: market_id.to_string(),
            name: name.to_string(),
            category: Some("politics".to_string()),
            status: MarketStatus::Open,
            url: None,
            total_volume: None,
            end_date: None,
        });
        self
    }

    /// Set the platform-reported volume on the last added market
    pub fn market_volume(mut self, volume: Decimal) -> Self {
        if let Some(market) = self.fixture.markets.last_mut() {
            market.total_volume = Some(volume);
        }
        self
    }

    pub fn contract(mut self, source: Source, market_id: &str, contract_id: &str, name: &str) -> Self {
        self.fixture.contracts.push(SourceContract {
            source,
            market_id: market_id.to_string(),
            contract_id: contract_id.to_string(),
            name: name.to_string(),
            short_name: None,
        });
        self
    }

    /// Add a contract that also carries a short display name
    pub fn contract_with_short_name(
        mut self,
        source: Source,
        market_id: &str,
        contract_id: &str,
        name: &str,
        short_name: &str,
    ) -> Self {
        self.fixture.contracts.push(SourceContract {
            source,
            market_id: market_id.to_string(),
            contract_id: contract_id.to_string(),
            name: name.to_string(),
            short_name: Some(short_name.to_string()),
        });
        self
    }

    /// Add a snapshot taken `hours_ago` before [`base_time`]
    pub fn snapshot(
        mut self,
        source: Source,
        market_id: &str,
        contract_id: &str,
        hours_ago: i64,
        yes_price: Decimal,
        volume: Option<Decimal>,
    ) -> Self {
        self.fixture.snapshots.push(PriceSnapshot {
            source,
            market_id: market_id.to_string(),
            contract_id: contract_id.to_string(),
            snapshot_time: base_time() - Duration::hours(hours_ago),
            yes_price,
            no_price: Some(Decimal::ONE - yes_price),
            yes_bid: None,
            yes_ask: None,
            volume,
        });
        self
    }

    /// Add a snapshot at an exact time
    pub fn snapshot_at(
        mut self,
        source: Source,
        market_id: &str,
        contract_id: &str,
        at: DateTime<Utc>,
        yes_price: Decimal,
    ) -> Self {
        self.fixture.snapshots.push(PriceSnapshot {
            source,
            market_id: market_id.to_string(),
            contract_id: contract_id.to_string(),
            snapshot_time: at,
            yes_price,
            no_price: None,
            yes_bid: None,
            yes_ask: None,
            volume: None,
        });
        self
    }

    pub fn build(self) -> Fixture {
        self.fixture
    }
}
