//! Candidate Name Resolver
//!
//! Turns a platform's contract label into a canonical candidate (or party)
//! and a comparison key. Contracts that do not name a specific entity are
//! skipped, never guessed at.

pub mod adapters;
pub mod lookups;


pub use adapters::{label_for, RawLabel};
pub use lookups::{AliasIndex, Entity, LookupTables};

use crate::config::ResolverConfig;
use crate::error::Result;
use crate::types::SourceContract;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static DIRECTION_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*-\s*(yes|no)\s*$").expect("valid suffix regex")
});

static WILL_X_WIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^will\s+(.+?)\s+(?:win|be\s+the|control)\b").expect("valid extraction regex")
});

static LEADING_THE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^the\s+").expect("valid article regex"));

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(person [a-z]{1,2}|party [a-f])$").expect("valid placeholder regex")
});

const APOSTROPHES: [char; 5] = ['\u{2019}', '\u{2018}', '\u{02BC}', '`', '\u{00B4}'];

/// Comparison key: lower-case, no periods, one apostrophe form, single spaces
pub fn normalize_key(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| *c != '.')
        .map(|c| if APOSTROPHES.contains(&c) { '\'' } else { c })
        .collect::<String>()
        .to_lowercase();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A contract resolved to one real-world candidate or party
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    /// Uniquely identifies the entity within a canonical market
    pub key: String,
    pub display: String,
    pub short_name: Option<String>,
    pub image_url: Option<String>,
}

/// Resolver over a built alias index
#[derive(Debug, Clone)]
pub struct NameResolver {
    index: AliasIndex,
}

impl NameResolver {
    pub fn new(tables: &LookupTables) -> Result<Self> {
        Ok(Self {
            index: AliasIndex::build(tables)?,
        })
    }

    /// Built-in tables unless a lookup file is configured
    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let tables = match config.lookup_path.as_deref() {
            Some(path) => LookupTables::load(&*shellexpand::tilde(path))?,
            None => LookupTables::builtin()?,
        };
        Self::new(&tables)
    }

    /// Resolve a contract, or `None` when it should be skipped
    pub fn resolve(&self, contract: &SourceContract) -> Option<ResolvedName> {
        let resolved = match label_for(contract) {
            RawLabel::Code(code) => match self.index.person_code(&code) {
                Some(name) => self.resolve_name(name),
                None => {
                    debug!(
                        "Skipping {} contract {}: unmapped person code {}",
                        contract.source, contract.contract_id, code
                    );
                    None
                }
            },
            RawLabel::Name(name) => self.resolve_name(&name),
        };

        if resolved.is_none() {
            debug!(
                "Skipping {} contract {} ({:?})",
                contract.source, contract.contract_id, contract.name
            );
        }
        resolved
    }

    /// Resolve free text to an entity
    pub fn resolve_name(&self, raw: &str) -> Option<ResolvedName> {
        let name = extract_subject(raw)?;
        let key = normalize_key(&name);
        if key.is_empty() || is_placeholder(&key) {
            return None;
        }

        if let Some(party) = self.index.party(&key) {
            return Some(self.from_entity(party));
        }
        if let Some(entity) = self.index.entity(&key) {
            return Some(self.from_entity(entity));
        }

        Some(ResolvedName {
            key,
            display: name,
            short_name: None,
            image_url: None,
        })
    }

    fn from_entity(&self, entity: &Entity) -> ResolvedName {
        ResolvedName {
            key: normalize_key(&entity.display),
            display: entity.display.clone(),
            short_name: entity.short_name.clone(),
            image_url: entity.image_url.clone(),
        }
    }
}

/// Strip direction suffixes and question phrasing down to the named subject.
/// `None` for "No" legs and bare Yes/No labels.
fn extract_subject(raw: &str) -> Option<String> {
    let mut name = raw.trim().to_string();

    if let Some(caps) = DIRECTION_SUFFIX.captures(&name) {
        if caps[1].eq_ignore_ascii_case("no") {
            return None;
        }
        let cut = caps.get(0).map_or(name.len(), |m| m.start());
        name.truncate(cut);
    }

    if name.eq_ignore_ascii_case("yes") || name.eq_ignore_ascii_case("no") {
        return None;
    }

    if let Some(caps) = WILL_X_WIN.captures(&name) {
        name = caps[1].to_string();
    }

    let name = LEADING_THE.replace(name.trim(), "");
    let name = name.trim().trim_end_matches('?').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn is_placeholder(key: &str) -> bool {
    PLACEHOLDER.is_match(key) || key.contains("another person")
}
