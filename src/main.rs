//! Tradebot - paper-trading backend for Indian equities.
//!
//! Wires the store, price source, and account service together and runs a
//! periodic valuation tick: each configured trader's portfolio is revalued
//! (feeding the chart series) and the day's prices for held symbols are
//! written as the daily market snapshot.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use dotenv::dotenv;
use serde_json::Value;
use tokio::time::interval;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradebot_backend::market::{is_market_open, PriceSource};
use tradebot_backend::models::Config;
use tradebot_backend::service::AccountService;
use tradebot_backend::store::TradingDb;

#[derive(Parser, Debug)]
#[command(name = "tradebot", about = "Paper-trading backend for Indian equities")]
struct Args {
    /// Sqlite file backing accounts, logs, and market snapshots
    #[arg(long, env = "DATABASE_PATH")]
    db_path: Option<String>,

    /// Trader account to revalue each tick (repeatable)
    #[arg(long = "trader", value_name = "NAME")]
    traders: Vec<String>,

    /// Seconds between valuation ticks
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let mut config = Config::from_env().context("load configuration")?;
    if let Some(path) = args.db_path {
        config.database_path = path;
    }
    if let Some(secs) = args.interval_secs {
        config.valuation_interval_secs = secs;
    }
    let traders: Vec<String> = if args.traders.is_empty() {
        vec!["trader".to_string()]
    } else {
        args.traders
    };

    let db = TradingDb::open(&config.database_path).context("open database")?;
    let prices = Arc::new(PriceSource::from_config(&config));
    let service = AccountService::new(db.clone(), prices, config.initial_balance);

    info!(
        ?traders,
        interval_secs = config.valuation_interval_secs,
        live_quotes = config.groww_api_key.is_some() || config.groww_token.is_some(),
        "tradebot running"
    );

    let mut tick = interval(Duration::from_secs(config.valuation_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = run_tick(&service, &db, &traders).await {
                    warn!(error = %e, "valuation tick failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn run_tick(service: &AccountService, db: &TradingDb, traders: &[String]) -> Result<()> {
    let market_open = is_market_open(None);
    debug!(market_open, "valuation tick");

    let snapshot = service.revalue_traders(traders).await;

    let today = Utc::now().format("%Y-%m-%d").to_string();
    db.write_market(&today, &Value::Object(snapshot)).await?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradebot_backend=info,tradebot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
