//! Tests for the reconciliation engine

#[cfg(test)]
mod tests {
    use crate::canonical::{CanonicalMarketType, Classification};
    use crate::chart::Granularity;
    use crate::config::Config;
    use crate::engine::{ChartQuery, MarketQuery, OddsEngine};
    use crate::error::OddsError;
    use crate::store::{Fixture, MockSourceStore, SourceStore, SqliteStore};
    use crate::testing::{base_time, FixtureBuilder};
    use crate::types::{
        ChangePeriod, MarketStatus, PriceSnapshot, Source, SourceContract, SourceMarket,
    };
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    const KALSHI_GOP: &str = "KXPRESNOMR-28";
    const POLY_GOP: &str = "republican-presidential-nominee-2028";

    fn gop_fixture() -> FixtureBuilder {
        FixtureBuilder::new()
            .market(
                Source::Kalshi,
                KALSHI_GOP,
                "Who will win the 2028 Republican presidential nomination?",
            )
            .contract(Source::Kalshi, KALSHI_GOP, "KXPRESNOMR-28-JV", "JD Vance")
            .snapshot(Source::Kalshi, KALSHI_GOP, "KXPRESNOMR-28-JV", 1, dec!(0.49), Some(dec!(12000000)))
            .market(Source::Polymarket, POLY_GOP, "Republican Presidential Nominee 2028")
            .contract_with_short_name(
                Source::Polymarket,
                POLY_GOP,
                "0xvance",
                "Will J.D. Vance win the 2028 Republican presidential nomination?",
                "J.D. Vance",
            )
            .snapshot(Source::Polymarket, POLY_GOP, "0xvance", 0, dec!(0.51), Some(dec!(8000000)))
    }

    async fn test_engine(fixture: Fixture, config: &Config) -> OddsEngine {
        let store = SqliteStore::in_memory().await.unwrap();
        store.import(&fixture).await.unwrap();
        OddsEngine::new(Arc::new(store), config).unwrap()
    }

    fn at_base() -> MarketQuery {
        MarketQuery {
            as_of: Some(base_time()),
            ..MarketQuery::default()
        }
    }

    #[tokio::test]
    async fn test_cross_source_gop_nominee() {
        let engine = test_engine(gop_fixture().build(), &Config::default()).await;

        let markets = engine.get_markets(&at_base()).await.unwrap();
        assert_eq!(markets.len(), 1);

        let market = &markets[0];
        assert_eq!(market.slug, "gop-nominee-2028");
        assert_eq!(market.category, "primaries");
        assert_eq!(market.status, MarketStatus::Open);
        assert_eq!(market.contracts.len(), 1);
        assert_eq!(market.sources_included, vec![Source::Kalshi, Source::Polymarket]);
        assert_eq!(market.last_updated, base_time());

        let vance = &market.contracts[0];
        assert_eq!(vance.name, "JD Vance");
        assert_eq!(vance.id, "jd-vance");
        assert_eq!(vance.aggregated_price, dec!(0.50));
        assert_eq!(vance.total_volume, dec!(20000000));
        assert_eq!(market.total_volume, dec!(20000000));

        let sources: Vec<Source> = vance.prices.iter().map(|p| p.source).collect();
        assert_eq!(sources, vec![Source::Kalshi, Source::Polymarket]);
        assert_eq!(vance.prices[0].region, "US");
        assert_eq!(vance.prices[1].no_price, dec!(0.49));

        let quote = vance.arbitrage.as_ref().unwrap();
        assert_eq!(quote.best_yes_source, Source::Polymarket);
        assert_eq!(quote.arbitrage_spread, dec!(0));
    }

    #[tokio::test]
    async fn test_output_is_idempotent() {
        let engine = test_engine(gop_fixture().build(), &Config::default()).await;

        let first = serde_json::to_string(&engine.get_markets(&at_base()).await.unwrap()).unwrap();
        let second = serde_json::to_string(&engine.get_markets(&at_base()).await.unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_contracts_sorted_by_price() {
        let fixture = gop_fixture()
            .contract(Source::Kalshi, KALSHI_GOP, "KXPRESNOMR-28-MR", "Marco Rubio")
            .snapshot(Source::Kalshi, KALSHI_GOP, "KXPRESNOMR-28-MR", 1, dec!(0.12), None)
            .contract(Source::Kalshi, KALSHI_GOP, "KXPRESNOMR-28-DTJ", "Donald Trump Jr.")
            .snapshot(Source::Kalshi, KALSHI_GOP, "KXPRESNOMR-28-DTJ", 1, dec!(0.20), None)
            .build();
        let engine = test_engine(fixture, &Config::default()).await;

        let market = engine
            .get_market("gop-nominee-2028", ChangePeriod::OneDay, Some(base_time()))
            .await
            .unwrap()
            .unwrap();
        let names: Vec<&str> = market.contracts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["JD Vance", "Donald Trump Jr.", "Marco Rubio"]);
    }

    #[tokio::test]
    async fn test_price_change_over_period() {
        let fixture = gop_fixture()
            .snapshot(Source::Kalshi, KALSHI_GOP, "KXPRESNOMR-28-JV", 30, dec!(0.41), None)
            .snapshot(Source::Polymarket, POLY_GOP, "0xvance", 26, dec!(0.43), None)
            .build();
        let engine = test_engine(fixture, &Config::default()).await;

        let markets = engine.get_markets(&at_base()).await.unwrap();
        assert_eq!(markets[0].contracts[0].price_change, dec!(0.08));

        let week = MarketQuery {
            change_period: ChangePeriod::OneWeek,
            ..at_base()
        };
        let markets = engine.get_markets(&week).await.unwrap();
        assert_eq!(markets[0].contracts[0].price_change, dec!(0));
    }

    #[tokio::test]
    async fn test_as_of_excludes_later_snapshots() {
        let fixture = gop_fixture()
            .snapshot(Source::Kalshi, KALSHI_GOP, "KXPRESNOMR-28-JV", 30, dec!(0.41), None)
            .build();
        let engine = test_engine(fixture, &Config::default()).await;

        let query = MarketQuery {
            as_of: Some(base_time() - Duration::hours(24)),
            ..MarketQuery::default()
        };
        let markets = engine.get_markets(&query).await.unwrap();
        let vance = &markets[0].contracts[0];
        assert_eq!(vance.aggregated_price, dec!(0.41));
        assert_eq!(markets[0].sources_included, vec![Source::Kalshi]);
    }

    #[tokio::test]
    async fn test_category_status_and_limit_filters() {
        let fixture = gop_fixture()
            .market(Source::PredictIt, "8001", "Which party will win the House in 2026?")
            .contract(Source::PredictIt, "8001", "31", "Democratic")
            .contract(Source::PredictIt, "8001", "32", "Republican")
            .snapshot(Source::PredictIt, "8001", "31", 2, dec!(0.72), None)
            .snapshot(Source::PredictIt, "8001", "32", 2, dec!(0.30), None)
            .build();
        let engine = test_engine(fixture, &Config::default()).await;

        let all = engine.get_markets(&at_base()).await.unwrap();
        let slugs: Vec<&str> = all.iter().map(|m| m.slug.as_str()).collect();
        assert_eq!(slugs, vec!["house-control-2026", "gop-nominee-2028"]);

        let congress = MarketQuery {
            category: Some("congress".to_string()),
            ..at_base()
        };
        let markets = engine.get_markets(&congress).await.unwrap();
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].contracts[0].name, "Democratic Party");

        let limited = MarketQuery {
            limit: Some(1),
            ..at_base()
        };
        assert_eq!(engine.get_markets(&limited).await.unwrap().len(), 1);

        let resolved_only = MarketQuery {
            status: Some(MarketStatus::Resolved),
            ..at_base()
        };
        assert!(engine.get_markets(&resolved_only).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_market_without_prices_omitted() {
        let fixture = FixtureBuilder::new()
            .market(Source::Smarkets, "s1", "2028 Republican VP nominee")
            .contract(Source::Smarkets, "s1", "c1", "Person A")
            .snapshot(Source::Smarkets, "s1", "c1", 1, dec!(0.30), None)
            .build();
        let engine = test_engine(fixture, &Config::default()).await;

        assert!(engine.get_markets(&at_base()).await.unwrap().is_empty());
        assert!(engine
            .get_market("vp-nominee-2028", ChangePeriod::OneDay, Some(base_time()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_slug() {
        let engine = test_engine(Fixture::default(), &Config::default()).await;
        let err = engine
            .get_market("mayor-2027", ChangePeriod::OneDay, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OddsError::UnknownMarketType(_)));
    }

    #[tokio::test]
    async fn test_chart_series() {
        let fixture = gop_fixture()
            .snapshot(Source::Kalshi, KALSHI_GOP, "KXPRESNOMR-28-JV", 5, dec!(0.45), None)
            .build();
        let engine = test_engine(fixture, &Config::default()).await;

        let series = engine
            .get_chart(&ChartQuery {
                slug: "gop-nominee-2028".to_string(),
                granularity: Granularity::OneHour,
                start: None,
                end: Some(base_time()),
            })
            .await
            .unwrap();

        let points = series.to_vec();
        // Buckets at -5h, -1h and 0h with three interpolated hours between
        assert_eq!(points.len(), 6);
        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(points[0].values["JD Vance"], dec!(0.45));
        assert_eq!(points[4].values["JD Vance"], dec!(0.49));
        assert_eq!(points[5].values["JD Vance"], dec!(0.51));
        assert_eq!(series.to_vec(), points);
    }

    #[tokio::test]
    async fn test_chart_rejects_inverted_range() {
        let engine = test_engine(Fixture::default(), &Config::default()).await;
        let err = engine
            .get_chart(&ChartQuery {
                slug: "gop-nominee-2028".to_string(),
                granularity: Granularity::OneDay,
                start: Some(base_time()),
                end: Some(base_time() - Duration::days(1)),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OddsError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_classify_all() {
        let fixture = gop_fixture()
            .market(Source::Smarkets, "s9", "Texas Senate race 2026")
            .build();
        let engine = test_engine(fixture, &Config::default()).await;

        let classified = engine.classify_all().await.unwrap();
        assert_eq!(classified.len(), 3);
        assert_eq!(classified[0].source, Source::Kalshi);
        assert_eq!(
            classified[0].classification,
            Classification::Canonical(CanonicalMarketType::GopNominee2028)
        );
        assert_eq!(classified[2].source, Source::Smarkets);
        assert_eq!(classified[2].classification, Classification::Excluded);
    }

    #[tokio::test]
    async fn test_override_forces_exclusion() {
        let mut config = Config::default();
        config
            .canonicalizer
            .overrides
            .insert(format!("Polymarket/{}", POLY_GOP), "excluded".to_string());
        let engine = test_engine(gop_fixture().build(), &config).await;

        let markets = engine.get_markets(&at_base()).await.unwrap();
        assert_eq!(markets[0].sources_included, vec![Source::Kalshi]);
        assert_eq!(markets[0].contracts[0].aggregated_price, dec!(0.49));
    }

    #[tokio::test]
    async fn test_stats_through_engine() {
        let engine = test_engine(gop_fixture().build(), &Config::default()).await;
        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.total_markets, 2);
        assert_eq!(stats.total_snapshots, 2);
    }

    fn mock_listing(source: Source, market_id: &str, name: &str) -> SourceMarket {
        SourceMarket {
            source,
            market_id: market_id.to_string(),
            name: name.to_string(),
            category: None,
            status: MarketStatus::Open,
            url: None,
            total_volume: None,
            end_date: None,
        }
    }

    fn mock_store_without_kalshi() -> MockSourceStore {
        let mut store = MockSourceStore::new();
        store.expect_markets().returning(|source| match source {
            Source::Kalshi => Err(OddsError::StoreUnavailable("connection refused".to_string())),
            Source::Polymarket => Ok(vec![mock_listing(
                Source::Polymarket,
                POLY_GOP,
                "Republican Presidential Nominee 2028",
            )]),
            _ => Ok(vec![]),
        });
        store.expect_contracts().returning(|source, _| {
            Ok(vec![SourceContract {
                source,
                market_id: POLY_GOP.to_string(),
                contract_id: "0xvance".to_string(),
                name: "JD Vance".to_string(),
                short_name: None,
            }])
        });
        store.expect_latest_snapshots().returning(|source, _, as_of| {
            Ok(vec![PriceSnapshot {
                source,
                market_id: POLY_GOP.to_string(),
                contract_id: "0xvance".to_string(),
                snapshot_time: as_of,
                yes_price: dec!(0.51),
                no_price: None,
                yes_bid: Some(dec!(0.50)),
                yes_ask: Some(dec!(0.52)),
                volume: None,
            }])
        });
        store
    }

    #[tokio::test]
    async fn test_partial_outage_skips_failed_source() {
        let store: Arc<dyn SourceStore> = Arc::new(mock_store_without_kalshi());
        let engine = OddsEngine::new(store, &Config::default()).unwrap();

        let markets = engine.get_markets(&at_base()).await.unwrap();
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].sources_included, vec![Source::Polymarket]);
        assert_eq!(markets[0].contracts[0].aggregated_price, dec!(0.51));
        assert_eq!(markets[0].contracts[0].prices[0].yes_bid, Some(dec!(0.50)));
    }

    #[tokio::test]
    async fn test_total_outage_is_an_error() {
        let mut store = MockSourceStore::new();
        store
            .expect_markets()
            .returning(|_| Err(OddsError::StoreUnavailable("pool closed".to_string())));
        let engine = OddsEngine::new(Arc::new(store), &Config::default()).unwrap();

        let err = engine.get_markets(&at_base()).await.unwrap_err();
        assert!(matches!(err, OddsError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_live_queries_use_cache() {
        let mut store = MockSourceStore::new();
        store.expect_markets().times(4).returning(|source| match source {
            Source::Polymarket => Ok(vec![mock_listing(
                Source::Polymarket,
                POLY_GOP,
                "Republican Presidential Nominee 2028",
            )]),
            _ => Ok(vec![]),
        });
        store.expect_contracts().times(1).returning(|source, _| {
            Ok(vec![SourceContract {
                source,
                market_id: POLY_GOP.to_string(),
                contract_id: "0xvance".to_string(),
                name: "JD Vance".to_string(),
                short_name: None,
            }])
        });
        store.expect_latest_snapshots().times(2).returning(|source, _, as_of| {
            Ok(vec![PriceSnapshot {
                source,
                market_id: POLY_GOP.to_string(),
                contract_id: "0xvance".to_string(),
                snapshot_time: as_of,
                yes_price: dec!(0.51),
                no_price: None,
                yes_bid: None,
                yes_ask: None,
                volume: None,
            }])
        });

        let mut config = Config::default();
        config.cache.enabled = true;
        let engine = OddsEngine::new(Arc::new(store), &config).unwrap();

        let first = engine.get_markets(&MarketQuery::default()).await.unwrap();
        let second = engine.get_markets(&MarketQuery::default()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn test_clashing_contract_ids_made_unique() {
        let fixture = FixtureBuilder::new()
            .market(Source::Smarkets, "s20", "2028 Democratic presidential nominee")
            .contract(Source::Smarkets, "s20", "c1", "Tim O'Neil")
            .contract(Source::Smarkets, "s20", "c2", "Tim O Neil")
            .snapshot(Source::Smarkets, "s20", "c1", 1, dec!(0.30), None)
            .snapshot(Source::Smarkets, "s20", "c2", 1, dec!(0.10), None)
            .build();
        let engine = test_engine(fixture, &Config::default()).await;

        let market = engine
            .get_market("dem-nominee-2028", ChangePeriod::OneDay, Some(base_time()))
            .await
            .unwrap()
            .unwrap();
        let ids: Vec<&str> = market.contracts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(ids, vec!["tim-o-neil-2", "tim-o-neil"]);
    }

    #[tokio::test]
    async fn test_find_arbitrage() {
        let mut fixture = gop_fixture().build();
        fixture.snapshots[0].no_price = Some(dec!(0.47));
        fixture.snapshots[1].no_price = Some(dec!(0.45));
        let engine = test_engine(fixture, &Config::default()).await;

        let found = engine
            .find_arbitrage(dec!(0.02), Some(base_time()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].market, "gop-nominee-2028");
        assert_eq!(found[0].contract_id, "jd-vance");
        assert_eq!(found[0].quote.best_yes_source, Source::Polymarket);
        assert_eq!(found[0].quote.best_no_source, Source::Kalshi);
        assert_eq!(found[0].quote.arbitrage_spread, dec!(0.04));

        let json = serde_json::to_string(&found[0]).unwrap();
        assert!(json.contains("\"arbitrageSpread\""));
        assert!(json.contains("\"contractId\""));

        assert!(engine
            .find_arbitrage(dec!(0.05), Some(base_time()))
            .await
            .unwrap()
            .is_empty());
    }
}
