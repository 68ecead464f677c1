//! Market Canonicalizer
//!
//! Maps each platform's free-text market title onto a fixed set of canonical
//! market types. Platforms share no market-ID namespace, so classification is
//! keyword-driven; the rules live in [`rules::RULES`] as an ordered table.

pub mod rules;


use crate::config::CanonicalizerConfig;
use crate::error::{OddsError, Result};
use crate::types::{Source, SourceMarket};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Override value that forces a market out of aggregation
pub const EXCLUDED: &str = "excluded";

/// One real-world election question shared across platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalMarketType {
    #[serde(rename = "presidential-winner-2028")]
    PresidentialWinner2028,
    #[serde(rename = "presidential-party-2028")]
    PresidentialParty2028,
    #[serde(rename = "house-control-2026")]
    HouseControl2026,
    #[serde(rename = "senate-control-2026")]
    SenateControl2026,
    #[serde(rename = "gop-nominee-2028")]
    GopNominee2028,
    #[serde(rename = "dem-nominee-2028")]
    DemNominee2028,
    #[serde(rename = "vp-nominee-2028")]
    VpNominee2028,
}

impl CanonicalMarketType {
    /// Every type, in output order
    pub const ALL: [CanonicalMarketType; 7] = [
        CanonicalMarketType::PresidentialWinner2028,
        CanonicalMarketType::PresidentialParty2028,
        CanonicalMarketType::HouseControl2026,
        CanonicalMarketType::SenateControl2026,
        CanonicalMarketType::GopNominee2028,
        CanonicalMarketType::DemNominee2028,
        CanonicalMarketType::VpNominee2028,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            CanonicalMarketType::PresidentialWinner2028 => "presidential-winner-2028",
            CanonicalMarketType::PresidentialParty2028 => "presidential-party-2028",
            CanonicalMarketType::HouseControl2026 => "house-control-2026",
            CanonicalMarketType::SenateControl2026 => "senate-control-2026",
            CanonicalMarketType::GopNominee2028 => "gop-nominee-2028",
            CanonicalMarketType::DemNominee2028 => "dem-nominee-2028",
            CanonicalMarketType::VpNominee2028 => "vp-nominee-2028",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CanonicalMarketType::PresidentialWinner2028 => "2028 Presidential Election Winner",
            CanonicalMarketType::PresidentialParty2028 => "2028 Presidential Election: Winning Party",
            CanonicalMarketType::HouseControl2026 => "2026 House Control",
            CanonicalMarketType::SenateControl2026 => "2026 Senate Control",
            CanonicalMarketType::GopNominee2028 => "2028 Republican Presidential Nominee",
            CanonicalMarketType::DemNominee2028 => "2028 Democratic Presidential Nominee",
            CanonicalMarketType::VpNominee2028 => "2028 Vice Presidential Nominee",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CanonicalMarketType::PresidentialWinner2028 => {
                "Who will win the 2028 US presidential election?"
            }
            CanonicalMarketType::PresidentialParty2028 => {
                "Which party will win the 2028 US presidential election?"
            }
            CanonicalMarketType::HouseControl2026 => {
                "Which party will control the House after the 2026 midterms?"
            }
            CanonicalMarketType::SenateControl2026 => {
                "Which party will control the Senate after the 2026 midterms?"
            }
            CanonicalMarketType::GopNominee2028 => {
                "Who will be the Republican nominee for president in 2028?"
            }
            CanonicalMarketType::DemNominee2028 => {
                "Who will be the Democratic nominee for president in 2028?"
            }
            CanonicalMarketType::VpNominee2028 => {
                "Who will be a major party's vice presidential nominee in 2028?"
            }
        }
    }

    /// Category used by the `category` query filter
    pub fn category(&self) -> &'static str {
        match self {
            CanonicalMarketType::PresidentialWinner2028
            | CanonicalMarketType::PresidentialParty2028 => "president",
            CanonicalMarketType::HouseControl2026 | CanonicalMarketType::SenateControl2026 => {
                "congress"
            }
            CanonicalMarketType::GopNominee2028
            | CanonicalMarketType::DemNominee2028
            | CanonicalMarketType::VpNominee2028 => "primaries",
        }
    }
}

impl fmt::Display for CanonicalMarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for CanonicalMarketType {
    type Err = OddsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        CanonicalMarketType::ALL
            .into_iter()
            .find(|t| t.slug() == wanted)
            .ok_or_else(|| OddsError::UnknownMarketType(s.to_string()))
    }
}

/// Outcome of classifying one source market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "type")]
pub enum Classification {
    Excluded,
    Canonical(CanonicalMarketType),
}

impl Classification {
    pub fn market_type(&self) -> Option<CanonicalMarketType> {
        match self {
            Classification::Canonical(t) => Some(*t),
            Classification::Excluded => None,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Excluded => f.write_str(EXCLUDED),
            Classification::Canonical(t) => write!(f, "{}", t),
        }
    }
}

/// Rule table plus per-market manual overrides
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    overrides: HashMap<(Source, String), Classification>,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config, validating every override key and value
    pub fn from_config(config: &CanonicalizerConfig) -> Result<Self> {
        let mut overrides = HashMap::new();

        for (key, value) in &config.overrides {
            let (source, market_id) = key.split_once('/').ok_or_else(|| {
                OddsError::Config(format!(
                    "canonicalizer override key {:?} must be \"<Source>/<market_id>\"",
                    key
                ))
            })?;
            let source: Source = source
                .parse()
                .map_err(|e| OddsError::Config(format!("canonicalizer override {:?}: {}", key, e)))?;

            let classification = if value.trim().eq_ignore_ascii_case(EXCLUDED) {
                Classification::Excluded
            } else {
                Classification::Canonical(value.parse().map_err(|e| {
                    OddsError::Config(format!("canonicalizer override {:?}: {}", key, e))
                })?)
            };

            overrides.insert((source, market_id.to_string()), classification);
        }

        Ok(Self { overrides })
    }

    /// Classify a source market, honouring overrides
    pub fn classify(&self, market: &SourceMarket) -> Classification {
        if let Some(forced) = self
            .overrides
            .get(&(market.source, market.market_id.clone()))
        {
            debug!(
                "Override for {}/{}: {}",
                market.source, market.market_id, forced
            );
            return *forced;
        }
        classify_name(&market.name)
    }

    /// Group markets by canonical type; excluded markets are dropped
    pub fn group(&self, markets: Vec<SourceMarket>) -> BTreeMap<CanonicalMarketType, Vec<SourceMarket>> {
        let mut groups: BTreeMap<CanonicalMarketType, Vec<SourceMarket>> = BTreeMap::new();
        for market in markets {
            if let Classification::Canonical(t) = self.classify(&market) {
                groups.entry(t).or_default().push(market);
            }
        }
        groups
    }
}

/// Apply the rule table to a market title; first match wins
pub fn classify_name(name: &str) -> Classification {
    let lower = name.to_lowercase();
    let matched: Vec<&rules::Rule> = rules::RULES
        .iter()
        .filter(|rule| (rule.matches)(&lower))
        .collect();

    let Some(first) = matched.first() else {
        return Classification::Excluded;
    };

    if matches!(first.outcome, Classification::Canonical(_)) {
        let competing: Vec<&str> = matched
            .iter()
            .filter(|r| matches!(r.outcome, Classification::Canonical(_)))
            .map(|r| r.name)
            .collect();
        if competing.len() > 1 {
            warn!(
                "Ambiguous classification for {:?}: rules {:?} all match, using {}",
                name, competing, first.name
            );
        }
    }

    first.outcome
}
