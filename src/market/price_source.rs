//! Price resolution with a short TTL cache and a deterministic fallback.
//!
//! Resolution order for a current price: cache hit within TTL, then the
//! configured provider, then the symbol-seeded fallback. Every path yields a
//! price; callers never see a lookup failure. Internally each resolved quote
//! is tagged with its origin so the degraded path stays testable.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use parking_lot::RwLock;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::quote_api::{GrowwRestClient, OfflineQuotes, QuoteProvider};
use crate::models::Config;

/// IST is UTC+05:30.
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Where a resolved price came from. Not exposed on the public price
/// accessors; callers are not supposed to care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceOrigin {
    Live,
    Fallback,
}

#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub price: f64,
    pub origin: PriceOrigin,
}

struct CachedQuote {
    quote: Quote,
    fetched_at: Instant,
}

/// Symbol price lookup backed by a provider chosen at construction time.
pub struct PriceSource {
    provider: Box<dyn QuoteProvider>,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedQuote>>,
    // Historical closes are immutable once fetched; memoized for the
    // process lifetime, no TTL.
    history: RwLock<HashMap<(String, String), f64>>,
}

impl PriceSource {
    pub fn from_config(config: &Config) -> Self {
        let provider: Box<dyn QuoteProvider> = match GrowwRestClient::from_config(config) {
            Some(client) => Box::new(client),
            None => {
                debug!("no Groww credentials configured, using offline quotes");
                Box::new(OfflineQuotes)
            }
        };
        Self::with_provider(provider, Duration::from_secs(config.cache_ttl_secs))
    }

    pub fn with_provider(provider: Box<dyn QuoteProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            cache: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Current price for `symbol` in INR. Infallible: degrades to the
    /// deterministic fallback on any provider failure.
    pub async fn get_share_price(&self, symbol: &str) -> f64 {
        self.quote(symbol).await.price
    }

    /// Tagged variant of [`get_share_price`](Self::get_share_price).
    pub async fn quote(&self, symbol: &str) -> Quote {
        let key = symbol.trim().to_uppercase();

        if let Some(cached) = self.cache.read().get(&key) {
            if cached.fetched_at.elapsed() <= self.ttl {
                return cached.quote;
            }
        }

        let quote = match self.provider.quote(&key).await {
            Ok(price) => Quote {
                price,
                origin: if self.provider.is_live() {
                    PriceOrigin::Live
                } else {
                    PriceOrigin::Fallback
                },
            },
            Err(e) => {
                warn!(symbol = %key, error = %e, "quote lookup failed, using fallback price");
                Quote {
                    price: deterministic_price(&key),
                    origin: PriceOrigin::Fallback,
                }
            }
        };

        self.cache.write().insert(
            key,
            CachedQuote {
                quote,
                fetched_at: Instant::now(),
            },
        );

        quote
    }

    /// Closing price for `symbol` on `date` (YYYY-MM-DD). Memoized forever;
    /// the fallback is keyed by symbol alone.
    pub async fn get_historical_close(&self, symbol: &str, date: &str) -> f64 {
        let key = (symbol.trim().to_uppercase(), date.to_string());

        if let Some(price) = self.history.read().get(&key) {
            return *price;
        }

        let price = match self.provider.historical_close(&key.0, date).await {
            Ok(price) => price,
            Err(e) => {
                warn!(symbol = %key.0, date, error = %e, "history lookup failed, using fallback price");
                deterministic_price(&key.0)
            }
        };

        self.history.write().insert(key, price);
        price
    }
}

/// Deterministic fallback price for a symbol: always the same value for the
/// same symbol, across calls and across processes, so offline runs are
/// repeatable. Uniform in [10, 1000) INR, rounded to paise.
pub fn deterministic_price(symbol: &str) -> f64 {
    let mut seed = [0u8; 32];
    let digest = Sha256::digest(symbol.trim().to_uppercase().as_bytes());
    seed.copy_from_slice(digest.as_slice());
    let mut rng = ChaCha8Rng::from_seed(seed);
    let price: f64 = rng.gen_range(10.0..1000.0);
    (price * 100.0).round() / 100.0
}

/// True when Indian equity markets are open at `at` (now when `None`):
/// Monday through Friday, 09:15:00 to 15:30:00 IST, both bounds inclusive.
/// Exchange holidays are not consulted; a holiday weekday reads as open.
pub fn is_market_open(at: Option<DateTime<Utc>>) -> bool {
    let now = at.unwrap_or_else(Utc::now);
    let ist = FixedOffset::east_opt(IST_OFFSET_SECS).expect("valid IST offset");
    let local = now.with_timezone(&ist);

    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }

    let open = NaiveTime::from_hms_opt(9, 15, 0).expect("valid open time");
    let close = NaiveTime::from_hms_opt(15, 30, 0).expect("valid close time");
    let t = local.time();
    t >= open && t <= close
}
