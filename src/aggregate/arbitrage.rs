//! Cross-source best prices and arbitrage spread
//!
//! For one canonical contract, the best YES and best NO quotes across the
//! contributing sources. The spread is `(1 - best NO) - cheapest YES`;
//! a positive value means YES can be bought on one platform below what
//! another platform implicitly pays for it.

use crate::types::{CrossSourceQuote, PriceSnapshot};
use rust_decimal::Decimal;

/// NO price quoted by a snapshot, or the YES complement when absent
fn no_price(snapshot: &PriceSnapshot) -> Decimal {
    snapshot.no_price.unwrap_or(Decimal::ONE - snapshot.yes_price)
}

/// Best quotes across sources; `None` unless two or more sources price the contract
pub fn cross_source_quote(observations: &[PriceSnapshot]) -> Option<CrossSourceQuote> {
    let priced: Vec<&PriceSnapshot> = observations
        .iter()
        .filter(|s| s.yes_price > Decimal::ZERO)
        .collect();

    let mut sources: Vec<_> = priced.iter().map(|s| s.source).collect();
    sources.sort();
    sources.dedup();
    if sources.len() < 2 {
        return None;
    }

    // Ties go to the earliest source
    let best_yes = priced.iter().copied().reduce(|best, s| {
        if s.yes_price > best.yes_price || (s.yes_price == best.yes_price && s.source < best.source) {
            s
        } else {
            best
        }
    })?;
    let best_no = priced.iter().copied().reduce(|best, s| {
        let (candidate, current) = (no_price(s), no_price(best));
        if candidate > current || (candidate == current && s.source < best.source) {
            s
        } else {
            best
        }
    })?;
    let cheapest_yes = priced.iter().map(|s| s.yes_price).min()?;

    Some(CrossSourceQuote {
        best_yes_price: best_yes.yes_price,
        best_yes_source: best_yes.source,
        best_no_price: no_price(best_no),
        best_no_source: best_no.source,
        arbitrage_spread: (Decimal::ONE - no_price(best_no) - cheapest_yes).normalize(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::base_time;
    use crate::types::Source;
    use rust_decimal_macros::dec;

    fn quote(source: Source, yes: Decimal, no: Option<Decimal>) -> PriceSnapshot {
        PriceSnapshot {
            source,
            market_id: "m".to_string(),
            contract_id: "c".to_string(),
            snapshot_time: base_time(),
            yes_price: yes,
            no_price: no,
            yes_bid: None,
            yes_ask: None,
            volume: None,
        }
    }

    #[test]
    fn test_best_prices_and_spread() {
        let q = cross_source_quote(&[
            quote(Source::Kalshi, dec!(0.40), Some(dec!(0.55))),
            quote(Source::Polymarket, dec!(0.50), Some(dec!(0.45))),
        ])
        .unwrap();

        assert_eq!(q.best_yes_price, dec!(0.50));
        assert_eq!(q.best_yes_source, Source::Polymarket);
        assert_eq!(q.best_no_price, dec!(0.55));
        assert_eq!(q.best_no_source, Source::Kalshi);
        assert_eq!(q.arbitrage_spread, dec!(0.05));
    }

    #[test]
    fn test_complementary_quotes_have_no_spread() {
        let q = cross_source_quote(&[
            quote(Source::Kalshi, dec!(0.49), None),
            quote(Source::Polymarket, dec!(0.51), None),
        ])
        .unwrap();

        assert_eq!(q.best_no_price, dec!(0.51));
        assert_eq!(q.best_no_source, Source::Kalshi);
        assert_eq!(q.arbitrage_spread, Decimal::ZERO);
    }

    #[test]
    fn test_single_source_has_no_quote() {
        assert!(cross_source_quote(&[quote(Source::Smarkets, dec!(0.30), None)]).is_none());
        assert!(cross_source_quote(&[
            quote(Source::Smarkets, dec!(0.30), None),
            quote(Source::Kalshi, dec!(0), None),
        ])
        .is_none());
    }

    #[test]
    fn test_tie_goes_to_earliest_source() {
        let q = cross_source_quote(&[
            quote(Source::Smarkets, dec!(0.30), None),
            quote(Source::PredictIt, dec!(0.30), None),
        ])
        .unwrap();
        assert_eq!(q.best_yes_source, Source::PredictIt);
        assert_eq!(q.best_no_source, Source::PredictIt);
    }
}
