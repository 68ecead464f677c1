//! Cross-source price aggregation
//!
//! Merges the latest per-source prices of each candidate in a canonical
//! market into one probability:
//! - Freshness filter relative to the newest observation of the candidate
//! - Market-wide illiquidity filter per source, over the fresh quotes only
//! - Arithmetic mean of what survives
//!
//! Best cross-source quotes live in [`arbitrage`].

pub mod arbitrage;
pub mod change;


use crate::config::AggregationConfig;
use crate::types::{PriceSnapshot, Source};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Decimal places kept on aggregated probabilities
pub const PRICE_DP: u32 = 6;

/// Snapshots of one canonical market, keyed by normalized candidate key
pub type MarketSnapshots = BTreeMap<String, Vec<PriceSnapshot>>;

/// Aggregated view of one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPrice {
    /// Mean yes price of the contributing sources
    pub price: Decimal,
    /// Sum of the contributing sources' volumes
    pub volume: Decimal,
    /// Contributing snapshots, ordered by source
    pub observations: Vec<PriceSnapshot>,
}

impl AggregatedPrice {
    /// Newest contributing snapshot time
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.observations.iter().map(|s| s.snapshot_time).max()
    }

    pub fn sources(&self) -> impl Iterator<Item = Source> + '_ {
        self.observations.iter().map(|s| s.source)
    }
}

/// Freshness and illiquidity filters plus averaging
#[derive(Debug, Clone)]
pub struct Aggregator {
    staleness: Duration,
    illiquid_spread: Decimal,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(&AggregationConfig::default())
    }
}

impl Aggregator {
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            staleness: Duration::hours(config.staleness_hours),
            illiquid_spread: config.illiquid_spread,
        }
    }

    /// Aggregate every candidate of one canonical market.
    /// Candidates left without observations are absent from the result.
    pub fn aggregate_market(&self, market: &MarketSnapshots) -> BTreeMap<String, AggregatedPrice> {
        let fresh = self.fresh_per_candidate(market);
        let excluded = self.excluded_sources(&fresh);

        let mut result = BTreeMap::new();
        for (key, snapshots) in fresh {
            let surviving: Vec<&PriceSnapshot> = snapshots
                .into_iter()
                .filter(|s| !excluded.contains(&s.source))
                .collect();

            match mean(&surviving) {
                Some(aggregated) => {
                    result.insert(key.clone(), aggregated);
                }
                None => debug!("Dropping {}: no surviving observations", key),
            }
        }
        result
    }

    /// Newest snapshot per source for each candidate, stale sources removed
    fn fresh_per_candidate<'a>(
        &self,
        market: &'a MarketSnapshots,
    ) -> BTreeMap<&'a String, Vec<&'a PriceSnapshot>> {
        market
            .iter()
            .map(|(key, snapshots)| (key, self.fresh(&latest_per_source(snapshots))))
            .collect()
    }

    /// Drop snapshots older than the staleness window relative to the newest.
    /// Never returns an empty set when given a non-empty one.
    pub fn fresh<'a>(&self, snapshots: &[&'a PriceSnapshot]) -> Vec<&'a PriceSnapshot> {
        let Some(newest) = snapshots.iter().map(|s| s.snapshot_time).max() else {
            return Vec::new();
        };
        let cutoff = newest - self.staleness;

        let fresh: Vec<&PriceSnapshot> = snapshots
            .iter()
            .copied()
            .filter(|s| s.snapshot_time >= cutoff)
            .collect();

        if fresh.is_empty() {
            return snapshots.to_vec();
        }
        if fresh.len() < snapshots.len() {
            for stale in snapshots.iter().filter(|s| s.snapshot_time < cutoff) {
                debug!(
                    "Stale {} snapshot for {}/{} at {} (newest {})",
                    stale.source, stale.market_id, stale.contract_id, stale.snapshot_time, newest
                );
            }
        }
        fresh
    }

    /// Sources quoting near-identical fresh prices across a market's candidates.
    pub fn illiquid_sources(&self, market: &MarketSnapshots) -> BTreeSet<Source> {
        self.spread_check(&self.fresh_per_candidate(market))
    }

    fn spread_check(&self, latest: &BTreeMap<&String, Vec<&PriceSnapshot>>) -> BTreeSet<Source> {
        let mut by_source: BTreeMap<Source, Vec<Decimal>> = BTreeMap::new();
        for snapshots in latest.values() {
            for s in snapshots {
                by_source.entry(s.source).or_default().push(s.yes_price);
            }
        }

        by_source
            .into_iter()
            .filter(|(_, prices)| prices.len() >= 2)
            .filter(|(source, prices)| {
                let max = prices.iter().copied().max().unwrap_or_default();
                let min = prices.iter().copied().min().unwrap_or_default();
                let illiquid = max - min < self.illiquid_spread;
                if illiquid {
                    debug!(
                        "{} looks illiquid: {} contracts within {}",
                        source,
                        prices.len(),
                        max - min
                    );
                }
                illiquid
            })
            .map(|(source, _)| source)
            .collect()
    }

    /// Illiquid sources to exclude, provided another source remains
    fn excluded_sources(&self, latest: &BTreeMap<&String, Vec<&PriceSnapshot>>) -> BTreeSet<Source> {
        let illiquid = self.spread_check(latest);
        if illiquid.is_empty() {
            return illiquid;
        }

        let any_liquid = latest
            .values()
            .flatten()
            .any(|s| !illiquid.contains(&s.source));
        if any_liquid {
            illiquid
        } else {
            debug!("Every source in market is illiquid, keeping all");
            BTreeSet::new()
        }
    }
}

/// One snapshot per source: the newest, ties broken by market then contract
fn latest_per_source(snapshots: &[PriceSnapshot]) -> Vec<&PriceSnapshot> {
    let mut best: BTreeMap<Source, &PriceSnapshot> = BTreeMap::new();
    for s in snapshots {
        match best.get(&s.source) {
            Some(current)
                if (current.snapshot_time, &current.market_id, &current.contract_id)
                    >= (s.snapshot_time, &s.market_id, &s.contract_id) => {}
            _ => {
                best.insert(s.source, s);
            }
        }
    }
    best.into_values().collect()
}

fn mean(snapshots: &[&PriceSnapshot]) -> Option<AggregatedPrice> {
    if snapshots.is_empty() {
        return None;
    }

    let total: Decimal = snapshots.iter().map(|s| s.yes_price).sum();
    let price = (total / Decimal::from(snapshots.len()))
        .round_dp(PRICE_DP)
        .normalize();
    let volume: Decimal = snapshots.iter().filter_map(|s| s.volume).sum();

    let mut observations: Vec<PriceSnapshot> = snapshots.iter().map(|s| (*s).clone()).collect();
    observations.sort_by(|a, b| {
        (a.source, &a.market_id, &a.contract_id).cmp(&(b.source, &b.market_id, &b.contract_id))
    });

    Some(AggregatedPrice {
        price,
        volume,
        observations,
    })
}
