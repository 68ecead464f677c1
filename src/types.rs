//! Core types shared across the engine
//!
//! Inputs mirror the Source Store tables (`markets`, `contracts`,
//! `price_snapshots`); outputs are the canonical shapes handed to the
//! presentation layer.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::OddsError;

/// One of the independent prediction-market platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    PredictIt,
    Kalshi,
    Polymarket,
    Smarkets,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::PredictIt,
        Source::Kalshi,
        Source::Polymarket,
        Source::Smarkets,
    ];

    /// Name as stored in the `source` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::PredictIt => "PredictIt",
            Source::Kalshi => "Kalshi",
            Source::Polymarket => "Polymarket",
            Source::Smarkets => "Smarkets",
        }
    }

    /// Regulatory region the platform operates in
    pub fn region(&self) -> &'static str {
        match self {
            Source::PredictIt | Source::Kalshi => "US",
            Source::Polymarket => "International",
            Source::Smarkets => "UK",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = OddsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "predictit" => Ok(Source::PredictIt),
            "kalshi" => Ok(Source::Kalshi),
            "polymarket" => Ok(Source::Polymarket),
            "smarkets" => Ok(Source::Smarkets),
            other => Err(OddsError::InvalidArgument(format!("unknown source: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Open,
    Closed,
    Resolved,
    Suspended,
    Unknown,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Open => "open",
            MarketStatus::Closed => "closed",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Suspended => "suspended",
            MarketStatus::Unknown => "unknown",
        }
    }

    /// Lenient parse of the `status` column; platforms use their own words
    pub fn parse_lenient(s: Option<&str>) -> Self {
        match s.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("open") | Some("active") => MarketStatus::Open,
            Some("closed") => MarketStatus::Closed,
            Some("resolved") | Some("settled") | Some("finalized") => MarketStatus::Resolved,
            Some("suspended") => MarketStatus::Suspended,
            _ => MarketStatus::Unknown,
        }
    }
}

impl FromStr for MarketStatus {
    type Err = OddsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match MarketStatus::parse_lenient(Some(s)) {
            MarketStatus::Unknown if !s.eq_ignore_ascii_case("unknown") => Err(
                OddsError::InvalidArgument(format!("unknown market status: {}", s)),
            ),
            status => Ok(status),
        }
    }
}

/// One platform's market listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMarket {
    pub source: Source,
    pub market_id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_status")]
    pub status: MarketStatus,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub total_volume: Option<Decimal>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

fn default_status() -> MarketStatus {
    MarketStatus::Unknown
}

/// One outcome leg within a source market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContract {
    pub source: Source,
    pub market_id: String,
    pub contract_id: String,
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
}

/// Append-only price observation for one contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub source: Source,
    pub market_id: String,
    pub contract_id: String,
    pub snapshot_time: DateTime<Utc>,
    pub yes_price: Decimal,
    #[serde(default)]
    pub no_price: Option<Decimal>,
    #[serde(default)]
    pub yes_bid: Option<Decimal>,
    #[serde(default)]
    pub yes_ask: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
}

/// Lookback window for the price change figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChangePeriod {
    #[default]
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl ChangePeriod {
    pub fn duration(&self) -> Duration {
        match self {
            ChangePeriod::OneDay => Duration::days(1),
            ChangePeriod::OneWeek => Duration::weeks(1),
            ChangePeriod::ThirtyDays => Duration::days(30),
        }
    }
}

impl fmt::Display for ChangePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangePeriod::OneDay => write!(f, "1d"),
            ChangePeriod::OneWeek => write!(f, "1w"),
            ChangePeriod::ThirtyDays => write!(f, "30d"),
        }
    }
}

impl FromStr for ChangePeriod {
    type Err = OddsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1d" => Ok(ChangePeriod::OneDay),
            "1w" => Ok(ChangePeriod::OneWeek),
            "30d" => Ok(ChangePeriod::ThirtyDays),
            other => Err(OddsError::InvalidArgument(format!(
                "change period must be 1d, 1w or 30d, got {}",
                other
            ))),
        }
    }
}

/// Canonical market handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub status: MarketStatus,
    pub contracts: Vec<Contract>,
    pub total_volume: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub sources_included: Vec<Source>,
}

/// One candidate or party within a canonical market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub prices: Vec<PriceObservation>,
    pub aggregated_price: Decimal,
    pub price_change: Decimal,
    pub total_volume: Decimal,
    /// Best quotes across sources when two or more contribute
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub arbitrage: Option<CrossSourceQuote>,
}

/// Best YES and NO quotes for one contract across sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossSourceQuote {
    pub best_yes_price: Decimal,
    pub best_yes_source: Source,
    pub best_no_price: Decimal,
    pub best_no_source: Source,
    /// `(1 - best NO) - cheapest YES`; positive means an arbitrage exists
    pub arbitrage_spread: Decimal,
}

/// A single source's contribution to an aggregated contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceObservation {
    pub source: Source,
    pub region: String,
    pub yes_price: Decimal,
    pub no_price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yes_bid: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yes_ask: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
    pub last_updated: DateTime<Utc>,
}

impl From<&PriceSnapshot> for PriceObservation {
    fn from(snapshot: &PriceSnapshot) -> Self {
        Self {
            source: snapshot.source,
            region: snapshot.source.region().to_string(),
            yes_price: snapshot.yes_price,
            no_price: snapshot
                .no_price
                .unwrap_or(Decimal::ONE - snapshot.yes_price),
            yes_bid: snapshot.yes_bid,
            yes_ask: snapshot.yes_ask,
            volume: snapshot.volume,
            last_updated: snapshot.snapshot_time,
        }
    }
}
