//! Period-over-period price change
//!
//! The historical price is aggregated exactly like the current one, from each
//! source's last snapshot at or before the lookback instant. A source with
//! no history that far back uses its current price as its own baseline, which
//! pins its contribution to zero change.

use super::{latest_per_source, AggregatedPrice, Aggregator, MarketSnapshots};
use crate::types::PriceSnapshot;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Historical snapshot set for a market.
///
/// `current` holds the latest snapshots at `as_of`; `history` the snapshots
/// at or before `lookback`. Sources are taken from `current` only.
pub fn historical_set(
    current: &MarketSnapshots,
    history: &MarketSnapshots,
    lookback: DateTime<Utc>,
) -> MarketSnapshots {
    let mut result = MarketSnapshots::new();

    for (key, snapshots) in current {
        let past: Vec<&PriceSnapshot> = history
            .get(key)
            .map(|h| {
                h.iter()
                    .filter(|s| s.snapshot_time <= lookback)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let mut baseline = Vec::new();
        for latest in latest_per_source(snapshots) {
            let before = past
                .iter()
                .filter(|s| s.source == latest.source)
                .max_by(|a, b| {
                    (a.snapshot_time, &a.market_id, &a.contract_id)
                        .cmp(&(b.snapshot_time, &b.market_id, &b.contract_id))
                });

            match before {
                Some(s) => baseline.push((*s).clone()),
                None => {
                    // Stand-in positioned at the lookback instant
                    let mut stand_in = latest.clone();
                    stand_in.snapshot_time = latest.snapshot_time.min(lookback);
                    baseline.push(stand_in);
                }
            }
        }
        result.insert(key.clone(), baseline);
    }

    result
}

/// `current - historical` per candidate key present in `current_prices`
pub fn price_changes(
    aggregator: &Aggregator,
    current_prices: &BTreeMap<String, AggregatedPrice>,
    historical: &MarketSnapshots,
) -> BTreeMap<String, Decimal> {
    let past = aggregator.aggregate_market(historical);

    current_prices
        .iter()
        .map(|(key, now)| {
            let change = past
                .get(key)
                .map(|then| now.price - then.price)
                .unwrap_or(Decimal::ZERO);
            (key.clone(), change)
        })
        .collect()
}
