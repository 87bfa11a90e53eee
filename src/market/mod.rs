//! Market data: quote providers, the TTL price cache, and the
//! market-hours oracle for Indian equities (NSE hours, IST).

pub mod price_source;
pub mod quote_api;

pub use price_source::{deterministic_price, is_market_open, PriceOrigin, PriceSource, Quote};
pub use quote_api::{GrowwRestClient, OfflineQuotes, QuoteProvider};
