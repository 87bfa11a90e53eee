//! Quote provider interface and the Groww REST implementation.
//!
//! The provider variant is chosen once at construction: `GrowwRestClient`
//! when an API key or bearer token is configured, `OfflineQuotes` otherwise.
//! Callers never re-check credentials at request time.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::price_source::deterministic_price;
use crate::models::Config;

const QUOTE_TIMEOUT: Duration = Duration::from_secs(4);
const HISTORY_TIMEOUT: Duration = Duration::from_secs(6);

/// A source of live prices. Implementations must not retry internally beyond
/// their timeout bound; the price source absorbs failures.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// True when this provider talks to a real upstream.
    fn is_live(&self) -> bool;

    /// Current price for `symbol` (uppercased by the caller).
    async fn quote(&self, symbol: &str) -> Result<f64>;

    /// Closing price for `symbol` on `date` (YYYY-MM-DD).
    async fn historical_close(&self, symbol: &str, date: &str) -> Result<f64>;
}

/// REST client for the Groww market data API.
pub struct GrowwRestClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    bearer_token: Option<String>,
}

impl GrowwRestClient {
    pub fn new(base_url: &str, api_key: Option<String>, bearer_token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("tradebot/1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            bearer_token,
        }
    }

    /// Returns `None` when neither credential is configured, so the caller
    /// falls back to `OfflineQuotes` instead of issuing doomed requests.
    pub fn from_config(config: &Config) -> Option<Self> {
        if config.groww_api_key.is_none() && config.groww_token.is_none() {
            return None;
        }
        Some(Self::new(
            &config.groww_base_url,
            config.groww_api_key.clone(),
            config.groww_token.clone(),
        ))
    }

    fn request(&self, path: &str, params: &[(&str, &str)]) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(params)
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn fetch_json(
        &self,
        path: &str,
        params: &[(&str, &str)],
        bound: Duration,
    ) -> Result<Value> {
        let response = timeout(bound, self.request(path, params).send())
            .await
            .with_context(|| format!("request to {} timed out", path))?
            .with_context(|| format!("request to {} failed", path))?;

        if !response.status().is_success() {
            bail!("Groww API error {} for {}", response.status(), path);
        }

        response
            .json::<Value>()
            .await
            .with_context(|| format!("failed to parse {} response body", path))
    }
}

#[async_trait]
impl QuoteProvider for GrowwRestClient {
    fn is_live(&self) -> bool {
        true
    }

    async fn quote(&self, symbol: &str) -> Result<f64> {
        let body = self
            .fetch_json("/market/v1/quotes", &[("symbol", symbol)], QUOTE_TIMEOUT)
            .await?;

        match extract_quote_price(&body) {
            Some(price) => Ok(price),
            None => {
                debug!(symbol, "quote response had no recognizable price field");
                bail!("no price in quote response for {}", symbol)
            }
        }
    }

    async fn historical_close(&self, symbol: &str, date: &str) -> Result<f64> {
        let body = self
            .fetch_json(
                "/market/v1/history",
                &[("symbol", symbol), ("date", date)],
                HISTORY_TIMEOUT,
            )
            .await?;

        extract_close_price(&body)
            .with_context(|| format!("no close in history response for {} on {}", symbol, date))
    }
}

/// Deterministic stub used when no credentials are configured. Always
/// answers with the symbol-seeded fallback price, so offline runs are
/// fully reproducible.
pub struct OfflineQuotes;

#[async_trait]
impl QuoteProvider for OfflineQuotes {
    fn is_live(&self) -> bool {
        false
    }

    async fn quote(&self, symbol: &str) -> Result<f64> {
        Ok(deterministic_price(symbol))
    }

    async fn historical_close(&self, symbol: &str, _date: &str) -> Result<f64> {
        // History fallback is keyed by symbol only; the date does not enter
        // the seed.
        Ok(deterministic_price(symbol))
    }
}

/// Providers disagree on where the price lives; accept the shapes seen in
/// the wild: top-level `last_price`, nested `data.last_price`, top-level
/// `last`. Numbers may arrive as JSON strings.
fn extract_quote_price(body: &Value) -> Option<f64> {
    [
        body.get("last_price"),
        body.get("data").and_then(|d| d.get("last_price")),
        body.get("last"),
    ]
    .into_iter()
    .flatten()
    .find_map(lenient_f64)
}

/// `close`, either top-level or nested under `data`.
fn extract_close_price(body: &Value) -> Option<f64> {
    [body.get("close"), body.get("data").and_then(|d| d.get("close"))]
        .into_iter()
        .flatten()
        .find_map(lenient_f64)
}

fn lenient_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|p| p.is_finite() && *p > 0.0)
}
