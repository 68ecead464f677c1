//! Per-platform naming conventions
//!
//! Each platform labels the same candidate its own way. An adapter turns a
//! contract row into the label the resolver should work from.

use crate::types::{Source, SourceContract};
use regex::Regex;
use std::sync::LazyLock;

static KALSHI_PERSON_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^KX[A-Z0-9]*PERSON[A-Z0-9]*-\d{2}-([A-Z]+)$").expect("valid kalshi id regex")
});

/// What a contract identifies its entity by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawLabel {
    /// Free text
    Name(String),
    /// Opaque platform code needing a table lookup
    Code(String),
}

/// Label for a contract according to its platform
pub fn label_for(contract: &SourceContract) -> RawLabel {
    match contract.source {
        Source::Polymarket => polymarket_label(contract),
        Source::Kalshi => kalshi_label(contract),
        Source::PredictIt | Source::Smarkets => RawLabel::Name(contract.name.clone()),
    }
}

/// The per-outcome group title beats the full question text
fn polymarket_label(contract: &SourceContract) -> RawLabel {
    match contract.short_name.as_deref().map(str::trim) {
        Some(short) if !short.is_empty() => RawLabel::Name(short.to_string()),
        _ => RawLabel::Name(contract.name.clone()),
    }
}

fn kalshi_label(contract: &SourceContract) -> RawLabel {
    match KALSHI_PERSON_ID.captures(contract.contract_id.trim()) {
        Some(caps) => RawLabel::Code(caps[1].to_string()),
        None => RawLabel::Name(contract.name.clone()),
    }
}
