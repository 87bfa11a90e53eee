//! Durable storage for accounts, activity logs, and daily market snapshots.
//!
//! One sqlite file, three tables, schema created idempotently on open. All
//! access goes through a single async mutex: the backing file does not
//! support concurrent writers, and serializing reads through the same gate
//! guarantees nobody observes a torn write.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{Account, LogEntry, LogKind};

#[derive(Clone)]
pub struct TradingDb {
    conn: Arc<Mutex<Connection>>,
}

impl TradingDb {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open trading db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                name TEXT PRIMARY KEY,
                account TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                datetime TEXT NOT NULL,
                kind TEXT NOT NULL,
                message TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_logs_name_datetime ON logs(name, datetime DESC)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS market (
                date TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
            [],
        )?;

        info!(db_path, "trading db ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert-or-replace the full account snapshot, keyed by lowercased name.
    pub async fn write_account(&self, name: &str, account: &Account) -> Result<()> {
        let json = serde_json::to_string(account).context("serialize account snapshot")?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO accounts (name, account)
             VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET account = excluded.account",
            params![name.trim().to_lowercase(), json],
        )?;
        Ok(())
    }

    pub async fn read_account(&self, name: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare_cached("SELECT account FROM accounts WHERE name = ?1 LIMIT 1")?;
        let mut rows = stmt.query(params![name.trim().to_lowercase()])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let json: String = row.get(0)?;
        let account = serde_json::from_str(&json).context("deserialize account snapshot")?;
        Ok(Some(account))
    }

    /// Persist an account snapshot together with its activity log entry in
    /// one sqlite transaction: either both land or neither does.
    pub async fn commit_account(
        &self,
        name: &str,
        account: &Account,
        kind: LogKind,
        message: &str,
    ) -> Result<()> {
        let json = serde_json::to_string(account).context("serialize account snapshot")?;
        let now = Utc::now().to_rfc3339();
        let name = name.trim().to_lowercase();

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO accounts (name, account)
             VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET account = excluded.account",
            params![&name, json],
        )?;
        tx.execute(
            "INSERT INTO logs (name, datetime, kind, message) VALUES (?1, ?2, ?3, ?4)",
            params![&name, now, kind.as_str(), message],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Append one activity log row. Logs are insert-only, never updated.
    pub async fn write_log(&self, name: &str, kind: LogKind, message: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO logs (name, datetime, kind, message) VALUES (?1, ?2, ?3, ?4)",
            params![name.trim().to_lowercase(), now, kind.as_str(), message],
        )?;
        Ok(())
    }

    /// The most recent `last_n` log rows for `name`, oldest first.
    pub async fn read_logs(&self, name: &str, last_n: usize) -> Result<Vec<LogEntry>> {
        let name = name.trim().to_lowercase();
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT datetime, kind, message FROM logs
             WHERE name = ?1
             ORDER BY datetime DESC, id DESC
             LIMIT ?2",
        )?;

        let mut out: Vec<LogEntry> = Vec::new();
        let rows = stmt.query_map(params![&name, last_n as i64], |row| {
            let datetime: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let message: String = row.get(2)?;
            Ok((datetime, kind, message))
        })?;
        for row in rows {
            let (datetime, kind, message) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&datetime)
                .context("parse log timestamp")?
                .with_timezone(&Utc);
            out.push(LogEntry {
                name: name.clone(),
                timestamp,
                kind: LogKind::parse(&kind).unwrap_or(LogKind::Trace),
                message,
            });
        }

        // Selected newest-first for the LIMIT; presented oldest-first.
        out.reverse();
        Ok(out)
    }

    /// Upsert the market snapshot for a calendar date; last writer wins.
    pub async fn write_market(&self, date: &str, data: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_string(data).context("serialize market snapshot")?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO market (date, data)
             VALUES (?1, ?2)
             ON CONFLICT(date) DO UPDATE SET data = excluded.data",
            params![date, json],
        )?;
        Ok(())
    }

    pub async fn read_market(&self, date: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT data FROM market WHERE date = ?1 LIMIT 1")?;
        let mut rows = stmt.query(params![date])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let json: String = row.get(0)?;
        let data = serde_json::from_str(&json).context("deserialize market snapshot")?;
        Ok(Some(data))
    }
}

#[cfg(test)]
impl TradingDb {
    /// Test-only escape hatch for injecting storage failures (e.g. dropping
    /// a table so the next write errors).
    pub(crate) async fn execute_raw(&self, sql: &str) {
        let conn = self.conn.lock().await;
        conn.execute_batch(sql).unwrap();
    }
}
