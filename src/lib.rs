//! Election Odds Reconciliation Engine
//!
//! Reads raw market listings, contracts and price snapshots from several
//! prediction-market platforms and reconciles them into canonical election
//! markets with cross-source aggregated probabilities.

pub mod aggregate;
pub mod canonical;
pub mod chart;
pub mod config;
pub mod engine;
pub mod error;
pub mod resolver;
pub mod store;
pub mod testing;
pub mod types;


pub use canonical::{CanonicalMarketType, Canonicalizer, Classification};
pub use engine::{ChartQuery, MarketQuery, OddsEngine};
pub use error::{OddsError, Result};
pub use store::SourceStore;
pub use types::{Market, Source};
