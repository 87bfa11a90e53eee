//! The per-trader account ledger.
//!
//! Holds the in-memory account state and applies every state-changing
//! operation transactionally: validate against memory, stage the next
//! state, persist it (snapshot and log entry in one store transaction),
//! then commit to memory. A storage failure therefore never leaves memory
//! and disk disagreeing in either direction.
//!
//! Trade rejections (insufficient balance or holdings) are expected
//! outcomes and come back as `Ok` messages; only storage failures are
//! errors.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::market::PriceSource;
use crate::models::{Account, LogKind, Transaction, ValuationPoint};
use crate::store::TradingDb;

pub struct Ledger {
    account: Account,
    initial_balance: f64,
    db: TradingDb,
    prices: Arc<PriceSource>,
}

impl Ledger {
    pub fn new(
        account: Account,
        initial_balance: f64,
        db: TradingDb,
        prices: Arc<PriceSource>,
    ) -> Self {
        Self {
            account,
            initial_balance,
            db,
            prices,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn balance(&self) -> f64 {
        self.account.balance
    }

    pub fn holdings(&self) -> &std::collections::BTreeMap<String, u32> {
        &self.account.holdings
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.account.transactions
    }

    pub fn get_strategy(&self) -> &str {
        &self.account.strategy
    }

    /// Buy `quantity` shares of `symbol` at the current price. Returns a
    /// human-readable success or rejection message.
    pub async fn buy_shares(
        &mut self,
        symbol: &str,
        quantity: u32,
        rationale: &str,
    ) -> Result<String> {
        let symbol = symbol.trim().to_uppercase();
        if quantity == 0 {
            return Ok("Error: quantity must be a positive number of shares".to_string());
        }

        let price = self.prices.get_share_price(&symbol).await;
        let cost = price * quantity as f64;
        if cost > self.account.balance {
            warn!(
                name = %self.account.name,
                %symbol,
                quantity,
                cost,
                balance = self.account.balance,
                "buy rejected: insufficient balance"
            );
            return Ok(format!(
                "Error: insufficient balance to buy {} shares of {} at {:.2} (cost {:.2}, balance {:.2})",
                quantity, symbol, price, cost, self.account.balance
            ));
        }

        let mut next = self.account.clone();
        next.balance -= cost;
        *next.holdings.entry(symbol.clone()).or_insert(0) += quantity;
        next.transactions.push(Transaction {
            timestamp: Utc::now(),
            symbol: symbol.clone(),
            quantity: quantity as i64,
            price,
            rationale: rationale.to_string(),
        });

        let message = format!("bought {} shares of {} at {:.2}", quantity, symbol, price);
        self.commit(next, &message).await?;
        info!(name = %self.account.name, %symbol, quantity, price, "buy executed");
        Ok(format!(
            "Bought {} shares of {} at {:.2}. Balance: {:.2}",
            quantity, symbol, price, self.account.balance
        ))
    }

    /// Sell `quantity` shares of `symbol` at the current price. Returns a
    /// human-readable success or rejection message.
    pub async fn sell_shares(
        &mut self,
        symbol: &str,
        quantity: u32,
        rationale: &str,
    ) -> Result<String> {
        let symbol = symbol.trim().to_uppercase();
        if quantity == 0 {
            return Ok("Error: quantity must be a positive number of shares".to_string());
        }

        let held = self.account.holdings.get(&symbol).copied().unwrap_or(0);
        if held < quantity {
            warn!(
                name = %self.account.name,
                %symbol,
                quantity,
                held,
                "sell rejected: insufficient holdings"
            );
            return Ok(format!(
                "Error: insufficient holdings to sell {} shares of {} (held {})",
                quantity, symbol, held
            ));
        }

        let price = self.prices.get_share_price(&symbol).await;
        let proceeds = price * quantity as f64;

        let mut next = self.account.clone();
        next.balance += proceeds;
        let remaining = held - quantity;
        if remaining == 0 {
            next.holdings.remove(&symbol);
        } else {
            next.holdings.insert(symbol.clone(), remaining);
        }
        next.transactions.push(Transaction {
            timestamp: Utc::now(),
            symbol: symbol.clone(),
            quantity: -(quantity as i64),
            price,
            rationale: rationale.to_string(),
        });

        let message = format!("sold {} shares of {} at {:.2}", quantity, symbol, price);
        self.commit(next, &message).await?;
        info!(name = %self.account.name, %symbol, quantity, price, "sell executed");
        Ok(format!(
            "Sold {} shares of {} at {:.2}. Balance: {:.2}",
            quantity, symbol, price, self.account.balance
        ))
    }

    /// Restore the starting balance, clear holdings and history, and set a
    /// new strategy.
    pub async fn reset(&mut self, strategy: &str) -> Result<()> {
        let mut next = Account::new(&self.account.name, self.initial_balance);
        next.strategy = strategy.to_string();
        let message = format!("account reset with strategy: {}", strategy);
        self.commit(next, &message).await
    }

    pub async fn change_strategy(&mut self, strategy: &str) -> Result<String> {
        let mut next = self.account.clone();
        next.strategy = strategy.to_string();
        let message = format!("strategy changed to: {}", strategy);
        self.commit(next, &message).await?;
        Ok("Strategy updated".to_string())
    }

    /// Balance plus the market value of all holdings. Appends a sample to
    /// the portfolio chart series and persists the snapshot.
    pub async fn calculate_portfolio_value(&mut self) -> Result<f64> {
        let mut value = self.account.balance;
        let holdings: Vec<(String, u32)> = self
            .account
            .holdings
            .iter()
            .map(|(s, q)| (s.clone(), *q))
            .collect();
        for (symbol, quantity) in holdings {
            value += self.prices.get_share_price(&symbol).await * quantity as f64;
        }

        let mut next = self.account.clone();
        next.portfolio_value_time_series.push(ValuationPoint {
            timestamp: Utc::now(),
            value,
        });
        self.db.write_account(&next.name, &next).await?;
        self.account = next;

        Ok(value)
    }

    pub fn calculate_profit_loss(&self, portfolio_value: f64) -> f64 {
        portfolio_value - self.initial_balance
    }

    /// JSON report of the full account plus current valuation and P&L.
    pub async fn report(&mut self) -> Result<String> {
        let value = self.calculate_portfolio_value().await?;
        let pnl = self.calculate_profit_loss(value);

        let mut doc = serde_json::to_value(&self.account).context("serialize account report")?;
        doc["total_portfolio_value"] = json!(value);
        doc["total_profit_loss"] = json!(pnl);
        serde_json::to_string(&doc).context("render account report")
    }

    /// Persist the staged state, then make it current. The snapshot and its
    /// log entry land in one store transaction, so memory only advances once
    /// both are on disk, and a failed commit leaves disk untouched too.
    async fn commit(&mut self, next: Account, log_message: &str) -> Result<()> {
        self.db
            .commit_account(&next.name, &next, LogKind::Account, log_message)
            .await?;
        self.account = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{deterministic_price, OfflineQuotes, PriceSource};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const STARTING_BALANCE: f64 = 100_000.0;

    fn create_test_ledger(name: &str) -> (Ledger, TradingDb, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = TradingDb::open(temp_file.path().to_str().unwrap()).unwrap();
        let prices = Arc::new(PriceSource::with_provider(
            Box::new(OfflineQuotes),
            Duration::from_secs(5),
        ));
        let ledger = Ledger::new(
            Account::new(name, STARTING_BALANCE),
            STARTING_BALANCE,
            db.clone(),
            prices,
        );
        (ledger, db, temp_file)
    }

    #[tokio::test]
    async fn buy_then_sell_round_trips_the_balance() {
        let (mut ledger, db, _temp) = create_test_ledger("warren");
        let price = deterministic_price("TCS");

        let result = ledger.buy_shares("TCS", 10, "long term bet").await.unwrap();
        assert!(result.starts_with("Bought"), "unexpected: {}", result);
        assert!((ledger.balance() - (STARTING_BALANCE - 10.0 * price)).abs() < 1e-9);
        assert_eq!(ledger.holdings().get("TCS"), Some(&10));
        assert_eq!(ledger.transactions().len(), 1);
        assert_eq!(ledger.transactions()[0].quantity, 10);

        let result = ledger.sell_shares("TCS", 10, "take profit").await.unwrap();
        assert!(result.starts_with("Sold"), "unexpected: {}", result);
        assert!(ledger.holdings().get("TCS").is_none());
        assert!((ledger.balance() - STARTING_BALANCE).abs() < 1e-9);
        assert_eq!(ledger.transactions().len(), 2);
        assert_eq!(ledger.transactions()[1].quantity, -10);

        // The durable snapshot tracks memory.
        let stored = db.read_account("warren").await.unwrap().unwrap();
        assert_eq!(stored.transactions.len(), 2);
        assert!((stored.balance - ledger.balance()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn insufficient_balance_rejects_without_state_change() {
        let (mut ledger, db, _temp) = create_test_ledger("warren");

        let result = ledger
            .buy_shares("RELIANCE", 1_000_000, "all in")
            .await
            .unwrap();
        assert!(result.contains("insufficient balance"), "unexpected: {}", result);
        assert_eq!(ledger.balance(), STARTING_BALANCE);
        assert!(ledger.holdings().is_empty());
        assert!(ledger.transactions().is_empty());

        // Nothing was persisted either.
        assert!(db.read_account("warren").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insufficient_holdings_rejects_without_state_change() {
        let (mut ledger, _db, _temp) = create_test_ledger("warren");

        ledger.buy_shares("TCS", 5, "start").await.unwrap();
        let balance_after_buy = ledger.balance();

        let result = ledger.sell_shares("TCS", 6, "oops").await.unwrap();
        assert!(result.contains("insufficient holdings"), "unexpected: {}", result);
        assert_eq!(ledger.balance(), balance_after_buy);
        assert_eq!(ledger.holdings().get("TCS"), Some(&5));
        assert_eq!(ledger.transactions().len(), 1);

        let result = ledger.sell_shares("INFY", 1, "never held").await.unwrap();
        assert!(result.contains("insufficient holdings"));
    }

    #[tokio::test]
    async fn zero_quantity_orders_are_rejected() {
        let (mut ledger, _db, _temp) = create_test_ledger("warren");

        let buy = ledger.buy_shares("TCS", 0, "noop").await.unwrap();
        let sell = ledger.sell_shares("TCS", 0, "noop").await.unwrap();
        assert!(buy.starts_with("Error"));
        assert!(sell.starts_with("Error"));
        assert!(ledger.transactions().is_empty());
    }

    #[tokio::test]
    async fn partial_sell_keeps_the_remainder() {
        let (mut ledger, _db, _temp) = create_test_ledger("warren");

        ledger.buy_shares("INFY", 10, "").await.unwrap();
        ledger.sell_shares("INFY", 4, "").await.unwrap();
        assert_eq!(ledger.holdings().get("INFY"), Some(&6));

        ledger.sell_shares("infy", 6, "").await.unwrap();
        // Fully sold positions are pruned, not left at zero.
        assert!(ledger.holdings().is_empty());
    }

    #[tokio::test]
    async fn replaying_the_transaction_log_reproduces_final_state() {
        let (mut ledger, _db, _temp) = create_test_ledger("warren");

        ledger.buy_shares("TCS", 10, "").await.unwrap();
        ledger.buy_shares("INFY", 3, "").await.unwrap();
        ledger.sell_shares("TCS", 4, "").await.unwrap();
        ledger.buy_shares("TCS", 2, "").await.unwrap();
        ledger.sell_shares("INFY", 3, "").await.unwrap();

        let mut balance = STARTING_BALANCE;
        let mut holdings: BTreeMap<String, i64> = BTreeMap::new();
        for tx in ledger.transactions() {
            balance -= tx.quantity as f64 * tx.price;
            let entry = holdings.entry(tx.symbol.clone()).or_insert(0);
            *entry += tx.quantity;
            if *entry == 0 {
                holdings.remove(&tx.symbol);
            }
        }

        assert!((balance - ledger.balance()).abs() < 1e-9);
        let current: BTreeMap<String, i64> = ledger
            .holdings()
            .iter()
            .map(|(s, q)| (s.clone(), *q as i64))
            .collect();
        assert_eq!(holdings, current);
    }

    #[tokio::test]
    async fn store_failure_leaves_memory_and_disk_unchanged() {
        let (mut ledger, db, _temp) = create_test_ledger("warren");

        ledger.buy_shares("TCS", 5, "first").await.unwrap();
        let balance_after_first = ledger.balance();

        // Any write now fails mid-commit.
        db.execute_raw("DROP TABLE logs").await;

        let result = ledger.buy_shares("TCS", 5, "second").await;
        assert!(result.is_err());

        // Memory did not advance.
        assert_eq!(ledger.balance(), balance_after_first);
        assert_eq!(ledger.holdings().get("TCS"), Some(&5));
        assert_eq!(ledger.transactions().len(), 1);

        // And neither did the durable snapshot: the second trade left no trace.
        let stored = db.read_account("warren").await.unwrap().unwrap();
        assert_eq!(stored.transactions.len(), 1);
        assert!((stored.balance - balance_after_first).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reset_restores_the_starting_state() {
        let (mut ledger, db, _temp) = create_test_ledger("warren");

        ledger.buy_shares("TCS", 10, "").await.unwrap();
        ledger.reset("buy the dip").await.unwrap();

        assert_eq!(ledger.balance(), STARTING_BALANCE);
        assert!(ledger.holdings().is_empty());
        assert!(ledger.transactions().is_empty());
        assert_eq!(ledger.get_strategy(), "buy the dip");

        let stored = db.read_account("warren").await.unwrap().unwrap();
        assert_eq!(stored.strategy, "buy the dip");
        assert!(stored.transactions.is_empty());
    }

    #[tokio::test]
    async fn change_strategy_persists_and_logs() {
        let (mut ledger, db, _temp) = create_test_ledger("warren");

        ledger.change_strategy("momentum only").await.unwrap();
        assert_eq!(ledger.get_strategy(), "momentum only");

        let stored = db.read_account("warren").await.unwrap().unwrap();
        assert_eq!(stored.strategy, "momentum only");

        let logs = db.read_logs("warren", 5).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, LogKind::Account);
        assert!(logs[0].message.contains("momentum only"));
    }

    #[tokio::test]
    async fn portfolio_value_sums_cash_and_holdings() {
        let (mut ledger, _db, _temp) = create_test_ledger("warren");

        ledger.buy_shares("TCS", 10, "").await.unwrap();
        ledger.buy_shares("INFY", 5, "").await.unwrap();

        let expected = ledger.balance()
            + 10.0 * deterministic_price("TCS")
            + 5.0 * deterministic_price("INFY");
        let value = ledger.calculate_portfolio_value().await.unwrap();
        assert!((value - expected).abs() < 1e-9);

        // Buying and selling at the same price leaves value at the start.
        assert!((value - STARTING_BALANCE).abs() < 1e-9);
        assert!((ledger.calculate_profit_loss(value)).abs() < 1e-9);

        // Each valuation appends one chart sample.
        assert_eq!(ledger.account().portfolio_value_time_series.len(), 1);
        ledger.calculate_portfolio_value().await.unwrap();
        assert_eq!(ledger.account().portfolio_value_time_series.len(), 2);
    }

    #[tokio::test]
    async fn report_includes_valuation_and_pnl() {
        let (mut ledger, _db, _temp) = create_test_ledger("warren");
        ledger.buy_shares("TCS", 2, "").await.unwrap();

        let report = ledger.report().await.unwrap();
        let doc: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(doc["name"], "warren");
        assert!(doc["total_portfolio_value"].as_f64().is_some());
        assert!(doc["total_profit_loss"].as_f64().is_some());
        assert_eq!(doc["holdings"]["TCS"], 2);
    }

    #[tokio::test]
    async fn accepted_trades_append_account_log_entries() {
        let (mut ledger, db, _temp) = create_test_ledger("warren");

        ledger.buy_shares("TCS", 1, "").await.unwrap();
        ledger.sell_shares("TCS", 1, "").await.unwrap();

        let logs = db.read_logs("warren", 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].message.starts_with("bought"));
        assert!(logs[1].message.starts_with("sold"));
    }
}
