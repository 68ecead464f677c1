//! Reconciliation engine
//!
//! Read path from the Source Store to canonical markets:
//! listings -> canonical groups -> resolved contracts -> aggregated prices.
//! Every store query is issued per source with a timeout; a failing source
//! is logged and left out rather than failing the request.

pub mod cache;

#[cfg(test)]
mod tests;

pub use cache::MarketCache;

use crate::aggregate::{arbitrage, change, Aggregator, MarketSnapshots};
use crate::canonical::{CanonicalMarketType, Canonicalizer, Classification};
use crate::chart::{ChartBuilder, ChartSeries, Granularity};
use crate::config::Config;
use crate::error::{OddsError, Result};
use crate::resolver::{NameResolver, ResolvedName};
use crate::store::{SourceStore, StoreStats};
use crate::types::{
    ChangePeriod, Contract, CrossSourceQuote, Market, MarketStatus, PriceObservation,
    PriceSnapshot, Source, SourceContract, SourceMarket,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Parameters for market listings
#[derive(Debug, Clone, Default)]
pub struct MarketQuery {
    /// Canonical category: president, congress or primaries
    pub category: Option<String>,
    pub status: Option<MarketStatus>,
    pub limit: Option<usize>,
    pub change_period: ChangePeriod,
    /// Evaluation instant; `None` means now and allows cached results
    pub as_of: Option<DateTime<Utc>>,
}

/// Parameters for a chart series
#[derive(Debug, Clone)]
pub struct ChartQuery {
    pub slug: String,
    pub granularity: Granularity,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// A source market with its classification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedMarket {
    pub source: Source,
    pub market_id: String,
    pub name: String,
    pub classification: Classification,
}

/// A contract whose cross-source spread clears the requested minimum
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrageOpportunity {
    pub market: String,
    pub contract_id: String,
    pub contract_name: String,
    #[serde(flatten)]
    pub quote: CrossSourceQuote,
}

type ContractRef = (Source, String, String);

/// Contract resolutions for one request
#[derive(Debug, Default)]
struct Resolutions {
    /// (source, market_id, contract_id) -> (market type, candidate key)
    keys: HashMap<ContractRef, (CanonicalMarketType, String)>,
    /// First resolution seen for each candidate of each market
    names: HashMap<(CanonicalMarketType, String), ResolvedName>,
}

impl Resolutions {
    /// Group snapshots of one canonical market by candidate key
    fn snapshots_for(
        &self,
        market_type: CanonicalMarketType,
        snapshots: &BTreeMap<Source, Vec<PriceSnapshot>>,
    ) -> MarketSnapshots {
        let mut grouped = MarketSnapshots::new();
        for s in snapshots.values().flatten() {
            let contract = (s.source, s.market_id.clone(), s.contract_id.clone());
            if let Some((t, key)) = self.keys.get(&contract) {
                if *t == market_type {
                    grouped.entry(key.clone()).or_default().push(s.clone());
                }
            }
        }
        grouped
    }

    fn display_for(&self, market_type: CanonicalMarketType, key: &str) -> Option<&ResolvedName> {
        self.names.get(&(market_type, key.to_string()))
    }
}

pub struct OddsEngine {
    store: Arc<dyn SourceStore>,
    canonicalizer: Canonicalizer,
    resolver: NameResolver,
    aggregator: Aggregator,
    query_timeout: Duration,
    max_interpolated_points: usize,
    cache: Option<MarketCache>,
}

impl OddsEngine {
    pub fn new(store: Arc<dyn SourceStore>, config: &Config) -> Result<Self> {
        let cache = config
            .cache
            .enabled
            .then(|| MarketCache::new(config.cache.ttl_secs));

        Ok(Self {
            store,
            canonicalizer: Canonicalizer::from_config(&config.canonicalizer)?,
            resolver: NameResolver::from_config(&config.resolver)?,
            aggregator: Aggregator::new(&config.aggregation),
            query_timeout: config.store.query_timeout(),
            max_interpolated_points: config.aggregation.max_interpolated_points,
            cache,
        })
    }

    /// Canonical markets matching the query, in canonical type order
    pub async fn get_markets(&self, query: &MarketQuery) -> Result<Vec<Market>> {
        let wanted: Vec<CanonicalMarketType> = CanonicalMarketType::ALL
            .into_iter()
            .filter(|t| {
                query
                    .category
                    .as_deref()
                    .map_or(true, |c| t.category().eq_ignore_ascii_case(c.trim()))
            })
            .collect();

        let built = self
            .markets_for(&wanted, query.change_period, query.as_of)
            .await?;

        let mut markets: Vec<Market> = built
            .into_values()
            .filter(|m| query.status.map_or(true, |s| m.status == s))
            .collect();
        if let Some(limit) = query.limit {
            markets.truncate(limit);
        }

        info!("Built {} canonical markets", markets.len());
        Ok(markets)
    }

    /// One canonical market by slug; `None` when it has no surviving contracts
    pub async fn get_market(
        &self,
        slug: &str,
        change_period: ChangePeriod,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Option<Market>> {
        let market_type: CanonicalMarketType = slug.parse()?;
        let mut built = self.markets_for(&[market_type], change_period, as_of).await?;
        Ok(built.remove(&market_type))
    }

    /// Bucketed, gap-filled history of one canonical market
    pub async fn get_chart(&self, query: &ChartQuery) -> Result<ChartSeries> {
        let market_type: CanonicalMarketType = query.slug.parse()?;
        if let (Some(start), Some(end)) = (query.start, query.end) {
            if start > end {
                return Err(OddsError::InvalidArgument(format!(
                    "chart start {} is after end {}",
                    start, end
                )));
            }
        }

        let builder = ChartBuilder::new(query.granularity, self.max_interpolated_points);
        let groups = self.load_groups(&[market_type]).await?;
        if groups.is_empty() {
            return Ok(builder.build(Vec::<(String, DateTime<Utc>, Decimal)>::new()));
        }

        let ids = market_ids_by_source(&groups);
        let contracts = self.fetch_contracts(&ids).await?;
        let resolutions = self.resolve(&groups, contracts);

        let end = query.end.unwrap_or_else(Utc::now);
        let history = self.fetch_history(&ids, query.start, end).await?;
        let grouped = resolutions.snapshots_for(market_type, &history);

        let observations = grouped.iter().flat_map(|(key, snapshots)| {
            let name = resolutions
                .display_for(market_type, key)
                .map(|r| r.display.clone())
                .unwrap_or_else(|| key.clone());
            snapshots
                .iter()
                .map(move |s| (name.clone(), s.snapshot_time, s.yes_price))
        });

        let series = builder.build(observations);
        debug!("Chart for {} at {}", market_type, query.granularity);
        Ok(series)
    }

    /// Contracts with `arbitrage_spread >= min_spread`, widest spread first
    pub async fn find_arbitrage(
        &self,
        min_spread: Decimal,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<ArbitrageOpportunity>> {
        let query = MarketQuery {
            as_of,
            ..MarketQuery::default()
        };
        let markets = self.get_markets(&query).await?;

        let mut found: Vec<ArbitrageOpportunity> = markets
            .into_iter()
            .flat_map(|market| {
                let slug = market.slug;
                market.contracts.into_iter().filter_map(move |c| {
                    let quote = c.arbitrage.filter(|q| q.arbitrage_spread >= min_spread)?;
                    Some(ArbitrageOpportunity {
                        market: slug.clone(),
                        contract_id: c.id,
                        contract_name: c.name,
                        quote,
                    })
                })
            })
            .collect();
        found.sort_by(|a, b| {
            b.quote
                .arbitrage_spread
                .cmp(&a.quote.arbitrage_spread)
                .then_with(|| a.market.cmp(&b.market))
                .then_with(|| a.contract_id.cmp(&b.contract_id))
        });

        info!("{} contracts with spread >= {}", found.len(), min_spread);
        Ok(found)
    }

    /// Every source market with its classification, ordered by source then id
    pub async fn classify_all(&self) -> Result<Vec<ClassifiedMarket>> {
        let listings = self.load_listings().await?;
        Ok(listings
            .into_iter()
            .map(|m| ClassifiedMarket {
                classification: self.canonicalizer.classify(&m),
                source: m.source,
                market_id: m.market_id,
                name: m.name,
            })
            .collect())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        match tokio::time::timeout(self.query_timeout, self.store.stats()).await {
            Ok(result) => result,
            Err(_) => Err(OddsError::QueryTimeout {
                timeout_secs: self.query_timeout.as_secs(),
            }),
        }
    }

    /// Close the underlying store
    pub async fn close(&self) {
        self.store.close().await;
    }

    async fn markets_for(
        &self,
        types: &[CanonicalMarketType],
        period: ChangePeriod,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<CanonicalMarketType, Market>> {
        let live = as_of.is_none();
        let mut result = BTreeMap::new();
        let mut missing = Vec::new();

        match (&self.cache, live) {
            (Some(cache), true) => {
                for t in types {
                    match cache.get(*t, period) {
                        Some(hit) => {
                            if let Some(market) = hit {
                                result.insert(*t, market);
                            }
                        }
                        None => missing.push(*t),
                    }
                }
            }
            _ => missing.extend_from_slice(types),
        }

        if missing.is_empty() {
            debug!("All {} markets served from cache", types.len());
            return Ok(result);
        }

        let as_of = as_of.unwrap_or_else(Utc::now);
        let mut computed = self.compute(&missing, period, as_of).await?;

        for t in missing {
            let market = computed.remove(&t);
            if live {
                if let Some(cache) = &self.cache {
                    cache.insert(t, period, market.clone());
                }
            }
            if let Some(market) = market {
                result.insert(t, market);
            }
        }
        Ok(result)
    }

    async fn compute(
        &self,
        types: &[CanonicalMarketType],
        period: ChangePeriod,
        as_of: DateTime<Utc>,
    ) -> Result<BTreeMap<CanonicalMarketType, Market>> {
        let groups = self.load_groups(types).await?;
        if groups.is_empty() {
            return Ok(BTreeMap::new());
        }

        let ids = market_ids_by_source(&groups);
        let contracts = self.fetch_contracts(&ids).await?;
        let resolutions = self.resolve(&groups, contracts);

        let lookback = as_of - period.duration();
        let current = self.fetch_latest(&ids, as_of).await?;
        let history = self.fetch_latest(&ids, lookback).await?;

        let mut markets = BTreeMap::new();
        for (market_type, listings) in &groups {
            let now = resolutions.snapshots_for(*market_type, &current);
            let then = resolutions.snapshots_for(*market_type, &history);

            match self.assemble(*market_type, listings, &resolutions, &now, &then, lookback) {
                Some(market) => {
                    markets.insert(*market_type, market);
                }
                None => debug!("Omitting {}: no surviving contracts", market_type),
            }
        }
        Ok(markets)
    }

    fn assemble(
        &self,
        market_type: CanonicalMarketType,
        listings: &[SourceMarket],
        resolutions: &Resolutions,
        current: &MarketSnapshots,
        history: &MarketSnapshots,
        lookback: DateTime<Utc>,
    ) -> Option<Market> {
        let prices = self.aggregator.aggregate_market(current);
        if prices.is_empty() {
            return None;
        }

        let baseline = change::historical_set(current, history, lookback);
        let changes = change::price_changes(&self.aggregator, &prices, &baseline);

        let mut taken = HashSet::new();
        let mut contracts: Vec<Contract> = prices
            .iter()
            .map(|(key, aggregated)| {
                let resolved = resolutions.display_for(market_type, key);
                Contract {
                    id: unique_contract_id(key, &mut taken),
                    name: resolved
                        .map(|r| r.display.clone())
                        .unwrap_or_else(|| key.clone()),
                    short_name: resolved.and_then(|r| r.short_name.clone()),
                    image_url: resolved.and_then(|r| r.image_url.clone()),
                    prices: aggregated
                        .observations
                        .iter()
                        .map(PriceObservation::from)
                        .collect(),
                    aggregated_price: aggregated.price,
                    price_change: changes.get(key).copied().unwrap_or_default(),
                    total_volume: aggregated.volume,
                    arbitrage: arbitrage::cross_source_quote(&aggregated.observations),
                }
            })
            .collect();
        contracts.sort_by(|a, b| {
            b.aggregated_price
                .cmp(&a.aggregated_price)
                .then_with(|| a.id.cmp(&b.id))
        });

        let contributing: BTreeSet<(Source, &str)> = prices
            .values()
            .flat_map(|p| p.observations.iter())
            .map(|s| (s.source, s.market_id.as_str()))
            .collect();
        let contributing_markets: Vec<&SourceMarket> = listings
            .iter()
            .filter(|m| contributing.contains(&(m.source, m.market_id.as_str())))
            .collect();

        let total_volume = contributing_markets
            .iter()
            .filter_map(|m| m.total_volume)
            .reduce(|a, b| a + b)
            .unwrap_or_else(|| contracts.iter().map(|c| c.total_volume).sum());
        let status = contributing_markets
            .iter()
            .map(|m| m.status)
            .min()
            .unwrap_or(MarketStatus::Unknown);
        let end_date = contributing_markets.iter().filter_map(|m| m.end_date).min();
        let last_updated = prices.values().filter_map(|p| p.last_updated()).max()?;
        let sources_included: Vec<Source> = contributing
            .iter()
            .map(|(source, _)| *source)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Some(Market {
            id: market_type.slug().to_string(),
            slug: market_type.slug().to_string(),
            name: market_type.display_name().to_string(),
            description: market_type.description().to_string(),
            category: market_type.category().to_string(),
            status,
            contracts,
            total_volume,
            end_date,
            last_updated,
            sources_included,
        })
    }

    async fn load_listings(&self) -> Result<Vec<SourceMarket>> {
        let by_source = self
            .fan_out("markets", Source::ALL.to_vec(), |store, source| async move {
                store.markets(source).await
            })
            .await?;
        Ok(by_source.into_values().flatten().collect())
    }

    async fn load_groups(
        &self,
        types: &[CanonicalMarketType],
    ) -> Result<BTreeMap<CanonicalMarketType, Vec<SourceMarket>>> {
        let listings = self.load_listings().await?;
        let mut groups = self.canonicalizer.group(listings);
        groups.retain(|t, _| types.contains(t));
        Ok(groups)
    }

    fn resolve(
        &self,
        groups: &BTreeMap<CanonicalMarketType, Vec<SourceMarket>>,
        contracts: BTreeMap<Source, Vec<SourceContract>>,
    ) -> Resolutions {
        let market_types: HashMap<(Source, &str), CanonicalMarketType> = groups
            .iter()
            .flat_map(|(t, markets)| markets.iter().map(move |m| ((m.source, m.market_id.as_str()), *t)))
            .collect();

        let mut resolutions = Resolutions::default();
        for contract in contracts.into_values().flatten() {
            let Some(market_type) = market_types
                .get(&(contract.source, contract.market_id.as_str()))
                .copied()
            else {
                continue;
            };
            let Some(resolved) = self.resolver.resolve(&contract) else {
                continue;
            };

            resolutions.keys.insert(
                (contract.source, contract.market_id, contract.contract_id),
                (market_type, resolved.key.clone()),
            );
            resolutions
                .names
                .entry((market_type, resolved.key.clone()))
                .or_insert(resolved);
        }
        resolutions
    }

    async fn fetch_contracts(
        &self,
        ids: &BTreeMap<Source, Vec<String>>,
    ) -> Result<BTreeMap<Source, Vec<SourceContract>>> {
        let ids = Arc::new(ids.clone());
        let sources: Vec<Source> = ids.keys().copied().collect();
        self.fan_out("contracts", sources, move |store, source| {
            let market_ids = ids.get(&source).cloned().unwrap_or_default();
            async move { store.contracts(source, &market_ids).await }
        })
        .await
    }

    async fn fetch_latest(
        &self,
        ids: &BTreeMap<Source, Vec<String>>,
        as_of: DateTime<Utc>,
    ) -> Result<BTreeMap<Source, Vec<PriceSnapshot>>> {
        let ids = Arc::new(ids.clone());
        let sources: Vec<Source> = ids.keys().copied().collect();
        self.fan_out("latest snapshots", sources, move |store, source| {
            let market_ids = ids.get(&source).cloned().unwrap_or_default();
            async move { store.latest_snapshots(source, &market_ids, as_of).await }
        })
        .await
    }

    async fn fetch_history(
        &self,
        ids: &BTreeMap<Source, Vec<String>>,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<Source, Vec<PriceSnapshot>>> {
        let ids = Arc::new(ids.clone());
        let sources: Vec<Source> = ids.keys().copied().collect();
        self.fan_out("snapshot history", sources, move |store, source| {
            let market_ids = ids.get(&source).cloned().unwrap_or_default();
            async move { store.snapshot_history(source, &market_ids, from, to).await }
        })
        .await
    }

    /// Run one query per source concurrently under the query timeout.
    /// Failed sources are dropped; the request fails only if all of them do.
    async fn fan_out<T, F, Fut>(
        &self,
        what: &'static str,
        sources: Vec<Source>,
        query: F,
    ) -> Result<BTreeMap<Source, T>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn SourceStore>, Source) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for source in sources {
            let fut = query(Arc::clone(&self.store), source);
            let limit = self.query_timeout;
            tasks.spawn(async move { (source, tokio::time::timeout(limit, fut).await) });
        }

        let mut results = BTreeMap::new();
        let mut first_error: Option<OddsError> = None;

        while let Some(joined) = tasks.join_next().await {
            let error = match joined {
                Ok((source, Ok(Ok(value)))) => {
                    results.insert(source, value);
                    continue;
                }
                Ok((source, Ok(Err(e)))) => {
                    warn!("{} query failed for {}: {}", what, source, e);
                    e
                }
                Ok((source, Err(_))) => {
                    warn!(
                        "{} query for {} timed out after {}s",
                        what,
                        source,
                        self.query_timeout.as_secs()
                    );
                    OddsError::QueryTimeout {
                        timeout_secs: self.query_timeout.as_secs(),
                    }
                }
                Err(e) => {
                    warn!("{} task failed: {}", what, e);
                    OddsError::Internal(e.to_string())
                }
            };
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(e) if results.is_empty() => Err(e),
            _ => Ok(results),
        }
    }
}

fn market_ids_by_source(
    groups: &BTreeMap<CanonicalMarketType, Vec<SourceMarket>>,
) -> BTreeMap<Source, Vec<String>> {
    let mut ids: BTreeMap<Source, Vec<String>> = BTreeMap::new();
    for market in groups.values().flatten() {
        ids.entry(market.source)
            .or_default()
            .push(market.market_id.clone());
    }
    for list in ids.values_mut() {
        list.sort();
        list.dedup();
    }
    ids
}

/// Contract id unique within one market; a clash gets a numeric suffix
fn unique_contract_id(key: &str, taken: &mut HashSet<String>) -> String {
    let base = contract_slug(key);
    let mut id = base.clone();
    let mut n = 2;
    while !taken.insert(id.clone()) {
        id = format!("{}-{}", base, n);
        n += 1;
    }
    id
}

/// URL-safe contract id from a candidate key
fn contract_slug(key: &str) -> String {
    let mut slug = String::with_capacity(key.len());
    for c in key.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}
