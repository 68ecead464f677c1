//! Configuration management

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OddsError, Result};

/// Environment variable whose presence selects the networked store
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub canonicalizer: CanonicalizerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Embedded SQLite file (local/offline use)
    pub sqlite_path: Option<String>,
    /// Postgres connection string (production)
    pub database_url: Option<String>,
    /// Maximum concurrent connections in the pool
    pub max_connections: u32,
    /// How long a request waits for a free connection
    pub acquire_timeout_secs: u64,
    /// Per-query timeout applied by the engine
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Sources older than this relative to the freshest source are dropped
    pub staleness_hours: i64,
    /// Price spread across a source's contracts below which it is illiquid
    pub illiquid_spread: Decimal,
    /// Gaps needing more synthetic points than this are left open
    pub max_interpolated_points: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolverConfig {
    /// Lookup table file; the built-in table is used when unset
    pub lookup_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CanonicalizerConfig {
    /// "<Source>/<market_id>" -> canonical slug or "excluded"
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: i64,
}

/// Which Source Store backend to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Single-writer SQLite file
    Embedded { path: PathBuf },
    /// Multi-connection Postgres server
    Networked { url: String },
}

impl StoreConfig {
    /// Pick the backend; a configured connection string always wins
    pub fn backend(&self) -> Result<StoreBackend> {
        if let Some(url) = self.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(StoreBackend::Networked {
                url: url.to_string(),
            });
        }

        match self.sqlite_path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => Ok(StoreBackend::Embedded {
                path: PathBuf::from(shellexpand::tilde(path).into_owned()),
            }),
            None => Err(OddsError::Config(format!(
                "no source store configured: set {} or store.sqlite_path",
                DATABASE_URL_ENV
            ))),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Config {
    /// Load configuration from an optional file layered under the environment
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("ELECTION_ODDS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            config.store.database_url = Some(url);
        }

        Ok(config)
    }

    /// Load from default locations
    pub fn load_default() -> anyhow::Result<Self> {
        let paths = ["config.toml", "~/.config/election-odds/config.toml"];

        for path in paths {
            let expanded = shellexpand::tilde(path);
            let candidate = Path::new(&*expanded);
            if candidate.exists() {
                return Self::load(candidate);
            }
        }

        // Environment-only configuration is valid
        Self::load("config.toml")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            database_url: None,
            max_connections: 10,
            acquire_timeout_secs: 5,
            query_timeout_secs: 30,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            staleness_hours: 48,
            illiquid_spread: dec!(0.05),
            max_interpolated_points: 500,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 60,
        }
    }
}
