//! Tradebot Backend Library
//!
//! Exposes core modules for use by the binary and tests.

pub mod ledger;
pub mod market;
pub mod models;
pub mod service;
pub mod store;
