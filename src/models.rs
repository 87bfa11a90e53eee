use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Activity log categories, written alongside every account mutation and by
/// external callers narrating agent activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Trace,
    Agent,
    Function,
    Generation,
    Response,
    Account,
}

impl LogKind {
    pub fn as_str(&self) -> &str {
        match self {
            LogKind::Trace => "trace",
            LogKind::Agent => "agent",
            LogKind::Function => "function",
            LogKind::Generation => "generation",
            LogKind::Response => "response",
            LogKind::Account => "account",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trace" => Some(LogKind::Trace),
            "agent" => Some(LogKind::Agent),
            "function" => Some(LogKind::Function),
            "generation" => Some(LogKind::Generation),
            "response" => Some(LogKind::Response),
            "account" => Some(LogKind::Account),
            _ => None,
        }
    }
}

/// A single activity log row, read back oldest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub message: String,
}

/// An executed trade. Quantity is signed: positive for buys, negative for
/// sells. Created only by an accepted buy/sell, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub quantity: i64,
    pub price: f64,
    pub rationale: String,
}

/// One (timestamp, total value) sample for the portfolio chart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValuationPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Full per-trader account state. This is also the JSON snapshot persisted
/// to the accounts table, so field changes must stay backward compatible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub balance: f64,
    pub holdings: BTreeMap<String, u32>,
    pub strategy: String,
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub portfolio_value_time_series: Vec<ValuationPoint>,
}

impl Account {
    pub fn new(name: &str, balance: f64) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            balance,
            holdings: BTreeMap::new(),
            strategy: String::new(),
            transactions: Vec::new(),
            portfolio_value_time_series: Vec::new(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub groww_api_key: Option<String>,
    pub groww_token: Option<String>,
    pub groww_base_url: String,
    pub cache_ttl_secs: u64,
    pub initial_balance: f64,
    pub valuation_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./tradebot.db".to_string());

        let groww_api_key = std::env::var("GROWW_API_KEY").ok().filter(|v| !v.trim().is_empty());
        let groww_token = std::env::var("GROWW_TOKEN").ok().filter(|v| !v.trim().is_empty());

        let groww_base_url = std::env::var("GROWW_BASE_URL")
            .unwrap_or_else(|_| "https://api.groww.in".to_string());

        let cache_ttl_secs = std::env::var("GROWW_CACHE_TTL_SECONDS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        let initial_balance = std::env::var("INITIAL_BALANCE")
            .unwrap_or_else(|_| "100000".to_string())
            .parse()
            .unwrap_or(100_000.0);

        let valuation_interval_secs = std::env::var("VALUATION_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        Ok(Self {
            database_path,
            groww_api_key,
            groww_token,
            groww_base_url,
            cache_ttl_secs,
            initial_balance,
            valuation_interval_secs,
        })
    }
}
