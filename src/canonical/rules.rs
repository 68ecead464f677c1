//! Ordered classification rules
//!
//! Each rule is a predicate over the lower-cased market title. Rules are
//! evaluated top to bottom and the first match decides; adding a market type
//! means adding a row, not another branch.

use super::{CanonicalMarketType, Classification};
use regex::Regex;
use std::sync::LazyLock;

pub struct Rule {
    pub name: &'static str,
    pub outcome: Classification,
    pub matches: fn(&str) -> bool,
}

const US_STATES: [&str; 50] = [
    "alabama", "alaska", "arizona", "arkansas", "california", "colorado",
    "connecticut", "delaware", "florida", "georgia", "hawaii", "idaho",
    "illinois", "indiana", "iowa", "kansas", "kentucky", "louisiana",
    "maine", "maryland", "massachusetts", "michigan", "minnesota",
    "mississippi", "missouri", "montana", "nebraska", "nevada",
    "new hampshire", "new jersey", "new mexico", "new york",
    "north carolina", "north dakota", "ohio", "oklahoma", "oregon",
    "pennsylvania", "rhode island", "south carolina", "south dakota",
    "tennessee", "texas", "utah", "vermont", "virginia", "washington",
    "west virginia", "wisconsin", "wyoming",
];

static STATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b({})\b", US_STATES.join("|"))).expect("valid state regex")
});

const WINNER_PHRASES: [&str; 4] = [
    "presidential election winner",
    "win the 2028 us presidential election",
    "2028 presidential election winner",
    "next u.s. presidential election winner",
];

fn any_of(lower: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| lower.contains(n))
}

fn is_out_of_scope(lower: &str) -> bool {
    any_of(lower, &["who will run", "will run for", "district"]) || STATE_PATTERN.is_match(lower)
}

fn is_vp_nominee(lower: &str) -> bool {
    any_of(lower, &["vp nominee", "vice president"]) && lower.contains("2028")
}

fn is_presidential_winner(lower: &str) -> bool {
    any_of(lower, &WINNER_PHRASES) && !lower.contains("party")
}

fn is_presidential_party(lower: &str) -> bool {
    lower.contains("2028")
        && any_of(lower, &["which party", "party win", "party wins", "winning party"])
        && any_of(lower, &["president", "winning party"])
}

fn is_midterm(lower: &str) -> bool {
    any_of(lower, &["2026", "midterm"])
}

fn is_house_control(lower: &str) -> bool {
    is_midterm(lower)
        && lower.contains("house")
        && any_of(lower, &["which party", "party win", "control"])
}

fn is_senate_control(lower: &str) -> bool {
    is_midterm(lower)
        && lower.contains("senate")
        && any_of(lower, &["which party", "party win", "control"])
        && !any_of(lower, &["how many", "seats"])
}

fn is_presidential_nomination(lower: &str) -> bool {
    any_of(lower, &["presidential", "for president"]) && any_of(lower, &["nominee", "nomination"])
}

fn is_gop_nominee(lower: &str) -> bool {
    lower.contains("republican") && is_presidential_nomination(lower)
}

fn is_dem_nominee(lower: &str) -> bool {
    lower.contains("democratic") && is_presidential_nomination(lower)
}

pub static RULES: &[Rule] = &[
    Rule {
        name: "out-of-scope",
        outcome: Classification::Excluded,
        matches: is_out_of_scope,
    },
    Rule {
        name: "vp-nominee",
        outcome: Classification::Canonical(CanonicalMarketType::VpNominee2028),
        matches: is_vp_nominee,
    },
    Rule {
        name: "presidential-winner",
        outcome: Classification::Canonical(CanonicalMarketType::PresidentialWinner2028),
        matches: is_presidential_winner,
    },
    Rule {
        name: "presidential-party",
        outcome: Classification::Canonical(CanonicalMarketType::PresidentialParty2028),
        matches: is_presidential_party,
    },
    Rule {
        name: "house-control",
        outcome: Classification::Canonical(CanonicalMarketType::HouseControl2026),
        matches: is_house_control,
    },
    Rule {
        name: "senate-control",
        outcome: Classification::Canonical(CanonicalMarketType::SenateControl2026),
        matches: is_senate_control,
    },
    Rule {
        name: "gop-nominee",
        outcome: Classification::Canonical(CanonicalMarketType::GopNominee2028),
        matches: is_gop_nominee,
    },
    Rule {
        name: "dem-nominee",
        outcome: Classification::Canonical(CanonicalMarketType::DemNominee2028),
        matches: is_dem_nominee,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_pattern_word_boundary() {
        assert!(STATE_PATTERN.is_match("texas senate race"));
        assert!(STATE_PATTERN.is_match("new york governor"));
        assert!(STATE_PATTERN.is_match("arkansas primary"));
        assert!(!STATE_PATTERN.is_match("maineiac"));
    }

    #[test]
    fn test_each_rule_in_isolation() {
        assert!(is_out_of_scope("who will run for president in 2028?"));
        assert!(is_out_of_scope("ca-12 district race"));
        assert!(is_vp_nominee("2028 republican vp nominee"));
        assert!(!is_vp_nominee("vice president approval"));
        assert!(is_presidential_winner("presidential election winner 2028"));
        assert!(!is_presidential_winner("presidential election winner party"));
        assert!(is_presidential_party("which party wins the 2028 presidency?"));
        assert!(is_presidential_party("2028 winning party"));
        assert!(is_house_control("which party will control the house after the 2026 midterms?"));
        assert!(is_senate_control("senate control after 2026"));
        assert!(!is_senate_control("how many senate seats will democrats win in 2026?"));
        assert!(is_gop_nominee("republican nominee for president 2028"));
        assert!(is_dem_nominee("2028 democratic presidential nomination"));
        assert!(!is_dem_nominee("democratic senate nomination"));
    }

    #[test]
    fn test_rule_names_unique() {
        let mut names: Vec<&str> = RULES.iter().map(|r| r.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), RULES.len());
    }

    #[test]
    fn test_exclusion_rule_first() {
        assert_eq!(RULES[0].outcome, Classification::Excluded);
    }
}
