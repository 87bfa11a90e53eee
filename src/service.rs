//! Name-keyed façade over the ledger for external callers (agent tool
//! layers, dashboards). Adds no business rules of its own.
//!
//! Each trader's ledger sits behind its own async mutex, so at most one
//! mutating operation per trader is in flight at a time while operations on
//! different traders proceed independently.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ledger::Ledger;
use crate::market::PriceSource;
use crate::models::{Account, LogEntry, LogKind, Transaction};
use crate::store::TradingDb;

pub struct AccountService {
    db: TradingDb,
    prices: Arc<PriceSource>,
    initial_balance: f64,
    accounts: RwLock<HashMap<String, Arc<Mutex<Ledger>>>>,
}

impl AccountService {
    pub fn new(db: TradingDb, prices: Arc<PriceSource>, initial_balance: f64) -> Self {
        Self {
            db,
            prices,
            initial_balance,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// The ledger for `name`, loading it from the store on first use. A
    /// trader with no stored snapshot starts fresh at the configured
    /// starting balance.
    pub async fn get(&self, name: &str) -> Result<Arc<Mutex<Ledger>>> {
        let key = name.trim().to_lowercase();

        if let Some(ledger) = self.accounts.read().get(&key) {
            return Ok(ledger.clone());
        }

        let account = match self.db.read_account(&key).await? {
            Some(account) => account,
            None => {
                debug!(name = %key, "no stored account, creating fresh");
                Account::new(&key, self.initial_balance)
            }
        };
        let ledger = Arc::new(Mutex::new(Ledger::new(
            account,
            self.initial_balance,
            self.db.clone(),
            self.prices.clone(),
        )));

        // Another caller may have loaded the same trader concurrently; the
        // first insert wins so everyone shares one instance.
        let mut accounts = self.accounts.write();
        Ok(accounts.entry(key).or_insert(ledger).clone())
    }

    pub async fn get_balance(&self, name: &str) -> Result<f64> {
        let ledger = self.get(name).await?;
        let balance = ledger.lock().await.balance();
        Ok(balance)
    }

    pub async fn get_holdings(&self, name: &str) -> Result<BTreeMap<String, u32>> {
        let ledger = self.get(name).await?;
        let holdings = ledger.lock().await.holdings().clone();
        Ok(holdings)
    }

    pub async fn get_transactions(&self, name: &str) -> Result<Vec<Transaction>> {
        let ledger = self.get(name).await?;
        let transactions = ledger.lock().await.transactions().to_vec();
        Ok(transactions)
    }

    pub async fn buy_shares(
        &self,
        name: &str,
        symbol: &str,
        quantity: u32,
        rationale: &str,
    ) -> Result<String> {
        let ledger = self.get(name).await?;
        let mut guard = ledger.lock().await;
        guard.buy_shares(symbol, quantity, rationale).await
    }

    pub async fn sell_shares(
        &self,
        name: &str,
        symbol: &str,
        quantity: u32,
        rationale: &str,
    ) -> Result<String> {
        let ledger = self.get(name).await?;
        let mut guard = ledger.lock().await;
        guard.sell_shares(symbol, quantity, rationale).await
    }

    /// Reset the account to the starting balance with a fresh strategy.
    /// Used both for new-account creation and for restarts.
    pub async fn reset_account(&self, name: &str, strategy: &str) -> Result<()> {
        let ledger = self.get(name).await?;
        let mut guard = ledger.lock().await;
        guard.reset(strategy).await
    }

    pub async fn change_strategy(&self, name: &str, strategy: &str) -> Result<String> {
        let ledger = self.get(name).await?;
        let mut guard = ledger.lock().await;
        guard.change_strategy(strategy).await
    }

    pub async fn get_strategy(&self, name: &str) -> Result<String> {
        let ledger = self.get(name).await?;
        let strategy = ledger.lock().await.get_strategy().to_string();
        Ok(strategy)
    }

    pub async fn get_portfolio_value(&self, name: &str) -> Result<f64> {
        let ledger = self.get(name).await?;
        let mut guard = ledger.lock().await;
        guard.calculate_portfolio_value().await
    }

    pub async fn get_profit_loss(&self, name: &str) -> Result<f64> {
        let ledger = self.get(name).await?;
        let mut guard = ledger.lock().await;
        let value = guard.calculate_portfolio_value().await?;
        Ok(guard.calculate_profit_loss(value))
    }

    pub async fn get_report(&self, name: &str) -> Result<String> {
        let ledger = self.get(name).await?;
        let mut guard = ledger.lock().await;
        guard.report().await
    }

    /// Revalue each trader's portfolio (feeding the chart series) and
    /// collect current prices for every held symbol, keyed for the daily
    /// market snapshot. A trader whose valuation fails is skipped with a
    /// warning; the remaining traders still run.
    pub async fn revalue_traders(
        &self,
        traders: &[String],
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut snapshot = serde_json::Map::new();

        for name in traders {
            let value = match self.get_portfolio_value(name).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(trader = %name, error = %e, "portfolio valuation failed, skipping");
                    continue;
                }
            };
            info!(trader = %name, value, "portfolio valued");

            match self.get_holdings(name).await {
                Ok(holdings) => {
                    for symbol in holdings.keys() {
                        if !snapshot.contains_key(symbol) {
                            let price = self.prices.get_share_price(symbol).await;
                            snapshot.insert(symbol.clone(), json!(price));
                        }
                    }
                }
                Err(e) => warn!(trader = %name, error = %e, "holdings read failed"),
            }
        }

        snapshot
    }

    /// Append a narration entry on behalf of an external caller (agent
    /// traces, tool invocations, model responses).
    pub async fn log_activity(&self, name: &str, kind: LogKind, message: &str) -> Result<()> {
        self.db.write_log(name, kind, message).await
    }

    /// The most recent `last_n` log entries for `name`, oldest first.
    pub async fn read_logs(&self, name: &str, last_n: usize) -> Result<Vec<LogEntry>> {
        self.db.read_logs(name, last_n).await
    }
}
