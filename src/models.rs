// src/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// A token identity row as stored (and served to the dashboard)
#[derive(Debug, Clone, Serialize)]
pub struct Token {
    pub id: i64,
    pub uri: String,
    pub address: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub market_cap: Option<Decimal>,
    pub total_supply: Option<Decimal>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// An append-only price observation row
#[derive(Debug, Clone, Serialize)]
pub struct Price {
    pub token_id: i64,
    pub token_uri: String,
    pub price_usd: Option<Decimal>,
    pub price_sol: Option<Decimal>,
    pub trade_at: Option<String>, // source-reported trade time, RFC3339 string
    pub timestamp: Option<String>, // block time
    pub is_latest: bool,
}

/// A normalized price candidate produced from one raw trade, before the
/// uri -> token_id lookup has run
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCandidate {
    pub token_uri: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub price_usd: Option<Decimal>,
    pub price_sol: Option<Decimal>,
    pub trade_at: Option<String>,
    pub block_time: Option<String>,
}

/// Per-token market data returned by the refresher's source query
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    pub total_supply: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

impl MarketData {
    /// True when the source yielded nothing worth writing back
    pub fn is_empty(&self) -> bool {
        self.total_supply.is_none()
            && self.market_cap.is_none()
            && self.name.is_none()
            && self.symbol.is_none()
    }
}
