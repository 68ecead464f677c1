//! Static lookup tables: candidate aliases, party labels, Kalshi person codes

use super::normalize_key;
use crate::error::{OddsError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

const BUILTIN_LOOKUPS: &str = include_str!("../../data/lookups.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct CandidateEntry {
    pub display: String,
    #[serde(default)]
    pub variants: Vec<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookupTables {
    #[serde(default)]
    pub candidates: Vec<CandidateEntry>,
    /// Canonical party label -> variants
    #[serde(default)]
    pub parties: BTreeMap<String, Vec<String>>,
    /// Opaque person code -> display name
    #[serde(default)]
    pub person_codes: BTreeMap<String, String>,
}

impl LookupTables {
    /// Tables compiled into the binary
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_LOOKUPS)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let tables = Self::parse(&content)?;
        info!(
            "Loaded lookup tables from {} ({} candidates, {} person codes)",
            path.as_ref().display(),
            tables.candidates.len(),
            tables.person_codes.len()
        );
        Ok(tables)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// A resolved real-world entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub display: String,
    pub short_name: Option<String>,
    pub image_url: Option<String>,
}

/// Normalized-variant index over the lookup tables
#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    entities: Vec<Entity>,
    by_key: HashMap<String, usize>,
    parties: HashMap<String, usize>,
    person_codes: HashMap<String, String>,
}

impl AliasIndex {
    /// Build the index, rejecting any key claimed by two entities
    pub fn build(tables: &LookupTables) -> Result<Self> {
        let mut index = AliasIndex::default();

        for candidate in &tables.candidates {
            let id = index.push_entity(Entity {
                display: candidate.display.clone(),
                short_name: candidate.short_name.clone(),
                image_url: candidate.image_url.clone(),
            });
            let names = std::iter::once(&candidate.display).chain(candidate.variants.iter());
            for name in names {
                index.claim(normalize_key(name), id, false)?;
            }
        }

        for (label, variants) in &tables.parties {
            let id = index.push_entity(Entity {
                display: label.clone(),
                short_name: None,
                image_url: None,
            });
            for name in std::iter::once(label).chain(variants.iter()) {
                index.claim(normalize_key(name), id, true)?;
            }
        }

        index.person_codes = tables
            .person_codes
            .iter()
            .map(|(code, name)| (code.trim().to_uppercase(), name.clone()))
            .collect();

        Ok(index)
    }

    fn push_entity(&mut self, entity: Entity) -> usize {
        self.entities.push(entity);
        self.entities.len() - 1
    }

    fn claim(&mut self, key: String, id: usize, party: bool) -> Result<()> {
        if key.is_empty() {
            return Ok(());
        }
        if let Some(&existing) = self.by_key.get(&key) {
            if existing != id {
                return Err(OddsError::Lookup(format!(
                    "alias {:?} maps to both {:?} and {:?}",
                    key, self.entities[existing].display, self.entities[id].display
                )));
            }
            return Ok(());
        }
        self.by_key.insert(key.clone(), id);
        if party {
            self.parties.insert(key, id);
        }
        Ok(())
    }

    /// Entity for an already-normalized key
    pub fn entity(&self, key: &str) -> Option<&Entity> {
        self.by_key.get(key).map(|&id| &self.entities[id])
    }

    /// Canonical party entity when `key` is a bare party reference
    pub fn party(&self, key: &str) -> Option<&Entity> {
        self.parties.get(key).map(|&id| &self.entities[id])
    }

    pub fn person_code(&self, code: &str) -> Option<&str> {
        self.person_codes
            .get(&code.trim().to_uppercase())
            .map(String::as_str)
    }
}
