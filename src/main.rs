//! Election Odds CLI
//!
//! Reconciled election markets from the Source Store, printed as JSON.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use election_odds::{
    chart::Granularity,
    config::{Config, StoreBackend},
    engine::{ChartQuery, MarketQuery, OddsEngine},
    store::{self, Fixture, SourceStore, SqliteStore},
    types::{ChangePeriod, MarketStatus},
};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "election-odds")]
#[command(about = "Cross-source election prediction market reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path; ./config.toml, then ~/.config/election-odds/config.toml
    #[arg(short, long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List canonical markets
    Markets {
        /// president, congress or primaries
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        status: Option<MarketStatus>,
        #[arg(short, long)]
        limit: Option<usize>,
        /// Price change lookback: 1d, 1w or 30d
        #[arg(long, default_value = "1d")]
        change: ChangePeriod,
        /// Evaluation instant (RFC 3339), defaults to now
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },
    /// Show one canonical market
    Market {
        /// Canonical slug, e.g. gop-nominee-2028
        slug: String,
        #[arg(long, default_value = "1d")]
        change: ChangePeriod,
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },
    /// Price history of one canonical market
    Chart {
        slug: String,
        /// 5m, 15m, 1h, 6h or 1d
        #[arg(short, long, default_value = "1h")]
        granularity: Granularity,
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },
    /// Contracts whose best cross-source quotes leave a spread
    Arbitrage {
        #[arg(long, default_value = "0.02")]
        min_spread: Decimal,
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },
    /// Classify every source market
    Classify,
    /// Load a JSON fixture into the embedded store
    Import {
        /// File with { markets, contracts, snapshots }
        file: String,
    },
    /// Show store statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(&*shellexpand::tilde(path))?,
        None => Config::load_default()?,
    };

    if let Commands::Import { file } = &cli.command {
        return import_fixture(&config, file).await;
    }

    let store = store::open(&config.store).await?;
    tracing::info!("Source store: {}", store.backend_name());
    let engine = OddsEngine::new(store, &config)?;

    let result = run(&engine, cli.command).await;
    engine.close().await;
    result
}

async fn run(engine: &OddsEngine, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Markets {
            category,
            status,
            limit,
            change,
            as_of,
        } => {
            let query = MarketQuery {
                category,
                status,
                limit,
                change_period: change,
                as_of,
            };
            print_json(&engine.get_markets(&query).await?)
        }
        Commands::Market { slug, change, as_of } => {
            let market = engine
                .get_market(&slug, change, as_of)
                .await?
                .with_context(|| format!("market {} has no priced contracts", slug))?;
            print_json(&market)
        }
        Commands::Chart {
            slug,
            granularity,
            start,
            end,
        } => {
            let series = engine
                .get_chart(&ChartQuery {
                    slug,
                    granularity,
                    start,
                    end,
                })
                .await?;
            print_json(&series.to_vec())
        }
        Commands::Arbitrage { min_spread, as_of } => {
            print_json(&engine.find_arbitrage(min_spread, as_of).await?)
        }
        Commands::Classify => {
            let classified = engine.classify_all().await?;

            println!("{:<12} {:<40} {:<24} Name", "Source", "Market", "Classification");
            println!("{}", "-".repeat(110));
            for m in &classified {
                println!(
                    "{:<12} {:<40} {:<24} {}",
                    m.source.as_str(),
                    truncate(&m.market_id, 40),
                    m.classification.to_string(),
                    m.name
                );
            }
            Ok(())
        }
        Commands::Stats => print_json(&engine.stats().await?),
        Commands::Import { .. } => Ok(()),
    }
}

async fn import_fixture(config: &Config, file: &str) -> anyhow::Result<()> {
    let path = match config.store.backend()? {
        StoreBackend::Embedded { path } => path,
        StoreBackend::Networked { .. } => {
            anyhow::bail!("import writes to the embedded store; unset DATABASE_URL and set store.sqlite_path")
        }
    };

    let raw = std::fs::read_to_string(&*shellexpand::tilde(file))
        .with_context(|| format!("reading fixture {}", file))?;
    let fixture: Fixture = serde_json::from_str(&raw)?;

    let store = SqliteStore::connect(&path, &config.store).await?;
    let summary = store.import(&fixture).await?;
    store.close().await;

    tracing::info!(
        "Imported {} markets, {} contracts, {} snapshots into {}",
        summary.markets,
        summary.contracts,
        summary.snapshots,
        path.display()
    );
    print_json(&summary)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}
