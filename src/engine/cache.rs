//! Read-through cache for canonical markets
//!
//! Live queries (no `as_of`) reuse a built market for `ttl_secs`. The key is
//! `(CanonicalMarketType, ChangePeriod)`; a cached `None` records that the
//! market had no priced contracts. Writes sweep out lapsed entries.

use crate::canonical::CanonicalMarketType;
use crate::types::{ChangePeriod, Market};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type Key = (CanonicalMarketType, ChangePeriod);

#[derive(Debug, Clone)]
struct Built {
    market: Option<Market>,
    built_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MarketCache {
    built: Arc<RwLock<HashMap<Key, Built>>>,
    ttl: Duration,
}

impl MarketCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            built: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    fn live(&self, built: &Built, now: DateTime<Utc>) -> bool {
        now - built.built_at < self.ttl
    }

    pub fn insert(&self, market_type: CanonicalMarketType, period: ChangePeriod, market: Option<Market>) {
        let now = Utc::now();
        let mut built = self.built.write();
        built.retain(|_, b| self.live(b, now));
        built.insert((market_type, period), Built { market, built_at: now });
    }

    /// Outer `None` on a miss or a lapsed entry
    pub fn get(&self, market_type: CanonicalMarketType, period: ChangePeriod) -> Option<Option<Market>> {
        let now = Utc::now();
        let built = self.built.read();
        built
            .get(&(market_type, period))
            .filter(|b| self.live(b, now))
            .map(|b| b.market.clone())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.built.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketStatus;
    use rust_decimal::Decimal;

    fn senate() -> Market {
        Market {
            id: "senate-control-2026".to_string(),
            slug: "senate-control-2026".to_string(),
            name: "2026 Senate Control".to_string(),
            description: String::new(),
            category: "congress".to_string(),
            status: MarketStatus::Open,
            contracts: vec![],
            total_volume: Decimal::ZERO,
            end_date: None,
            last_updated: Utc::now(),
            sources_included: vec![],
        }
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = MarketCache::new(60);
        let t = CanonicalMarketType::SenateControl2026;

        assert!(cache.get(t, ChangePeriod::OneDay).is_none());

        cache.insert(t, ChangePeriod::OneDay, Some(senate()));
        assert_eq!(
            cache.get(t, ChangePeriod::OneDay).flatten().map(|m| m.slug),
            Some("senate-control-2026".to_string())
        );
        // Period is part of the key
        assert!(cache.get(t, ChangePeriod::OneWeek).is_none());
    }

    #[test]
    fn test_remembers_absence() {
        let cache = MarketCache::new(60);
        cache.insert(CanonicalMarketType::VpNominee2028, ChangePeriod::OneDay, None);
        assert_eq!(cache.get(CanonicalMarketType::VpNominee2028, ChangePeriod::OneDay), Some(None));
    }

    #[test]
    fn test_lapsed_entries_miss_and_are_swept_on_insert() {
        let cache = MarketCache::new(0);
        cache.insert(CanonicalMarketType::HouseControl2026, ChangePeriod::OneDay, Some(senate()));
        assert!(cache.get(CanonicalMarketType::HouseControl2026, ChangePeriod::OneDay).is_none());
        assert_eq!(cache.len(), 1);

        cache.insert(CanonicalMarketType::SenateControl2026, ChangePeriod::OneWeek, None);
        assert_eq!(cache.len(), 1);
    }
}
