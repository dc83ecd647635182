// src/bitquery.rs
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::MarketData;

/// Pump.fun bonding-curve program; its `create` instruction mints new tokens
pub const PUMP_PROGRAM: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

/// Wrapped SOL, excluded from the price feed (it is the quote side, not a memecoin)
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("missing credential: {0} is not set")]
    MissingCredentials(&'static str),
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unauthorized (HTTP 401): check BITQUERY_ACCESS_TOKEN")]
    Unauthorized,
    #[error("forbidden (HTTP 403): key not allowed for this endpoint")]
    Forbidden,
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("unexpected HTTP status {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("GraphQL errors: {0}")]
    GraphQl(String),
    #[error("response missing field `{0}`")]
    MissingField(&'static str),
    #[error("response field `{0}` is not an array")]
    NotAnArray(&'static str),
}

/// One validated trade from the price feed. Structural levels are enforced by
/// `decode_trades`; per-record fields stay optional so the pipeline can apply
/// its skip policy record by record.
#[derive(Debug, Clone, Default)]
pub struct TradeRecord {
    pub uri: Option<String>,
    pub mint: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub price_usd: Option<Decimal>,
    pub price_sol: Option<Decimal>,
    pub block_time: Option<String>,
    pub signature: Option<String>,
}

/// One validated token-creation instruction from the new-token feed
#[derive(Debug, Clone, Default)]
pub struct TokenCreationRecord {
    pub signature: Option<String>,
    pub method: Option<String>,
    pub block_time: Option<String>,
}

const NEW_TOKENS_QUERY: &str = r#"
query CreatedTokens($since: DateTime) {
  Solana {
    Instructions(
      where: {
        Instruction: {
          Program: { Address: { is: "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P" }, Method: { is: "create" } }
        }
        Transaction: { Result: { Success: true } }
        Block: { Time: { since: $since } }
      }
      orderBy: { descending: Block_Time }
      limit: { count: 100 }
    ) {
      Block { Time }
      Transaction { Signature }
      Instruction {
        Program { Address Method }
        Accounts { Address }
      }
    }
  }
}
"#;

const DEX_TRADES_QUERY: &str = r#"
query LatestTrades($since: DateTime) {
  Solana {
    DEXTrades(
      limitBy: { by: Trade_Buy_Currency_MintAddress, count: 1 }
      orderBy: { descending: Block_Time }
      limit: { count: 100 }
      where: {
        Trade: {
          Dex: { ProtocolName: { is: "pump" } }
          Buy: { Currency: { MintAddress: { notIn: ["So11111111111111111111111111111111111111112"] } } }
        }
        Transaction: { Result: { Success: true } }
        Block: { Time: { since: $since } }
      }
    ) {
      Block { Time }
      Transaction { Signature }
      Trade {
        Buy {
          Price
          PriceInUSD
          Currency { Uri Name Symbol MintAddress }
        }
        Dex { ProtocolName }
      }
    }
  }
}
"#;

const MARKET_DATA_QUERY: &str = r#"
query TokenMarketData($address: String) {
  Solana {
    TokenSupplyUpdates(
      where: { TokenSupplyUpdate: { Currency: { MintAddress: { is: $address } } } }
      orderBy: { descending: Block_Time }
      limit: { count: 1 }
    ) {
      TokenSupplyUpdate {
        PostBalance
        PostBalanceInUSD
        Currency { Name Symbol }
      }
    }
  }
}
"#;

fn credentials(cfg: &Config) -> Result<(&str, &str), FeedError> {
    let key = cfg
        .api_key
        .as_deref()
        .ok_or(FeedError::MissingCredentials("BITQUERY_API_KEY"))?;
    let token = cfg
        .access_token
        .as_deref()
        .ok_or(FeedError::MissingCredentials("BITQUERY_ACCESS_TOKEN"))?;
    Ok((key, token))
}

/// One synchronous GraphQL POST; returns the raw decoded body
async fn post_query(cfg: &Config, query: &str, variables: Value) -> Result<Value, FeedError> {
    let (api_key, access_token) = credentials(cfg)?;

    let client = Client::builder().timeout(Duration::from_secs(15)).build()?;

    let payload = json!({ "query": query, "variables": variables });

    let resp = client
        .post(&cfg.bitquery_url)
        .header("Content-Type", "application/json")
        .header("X-API-KEY", api_key)
        .bearer_auth(access_token)
        .json(&payload)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        warn!("Bitquery returned HTTP {}: {}", status, body);
        return Err(match status {
            StatusCode::UNAUTHORIZED => FeedError::Unauthorized,
            StatusCode::FORBIDDEN => FeedError::Forbidden,
            StatusCode::TOO_MANY_REQUESTS => FeedError::RateLimited,
            _ => FeedError::Http { status, body },
        });
    }

    let body: Value = resp.json().await?;

    // GraphQL-level failures arrive with HTTP 200 and an `errors` array
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<String> = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string()
                })
                .collect();
            return Err(FeedError::GraphQl(messages.join("; ")));
        }
    }

    Ok(body)
}

/// Fetch token-creation instructions since the cursor. Missing credentials are
/// logged and yield an empty result here, unlike the price feed.
pub async fn fetch_token_creations(cfg: &Config, since: &str) -> Result<Option<Value>, FeedError> {
    if credentials(cfg).is_err() {
        warn!("Bitquery credentials missing, skipping token-creation fetch");
        return Ok(None);
    }

    info!("📡 Bitquery new-token query → {} (since {})", cfg.bitquery_url, since);
    let body = post_query(cfg, NEW_TOKENS_QUERY, json!({ "since": since })).await?;
    Ok(Some(body))
}

/// Fetch the latest trade per bought mint since the cursor. Credentials are
/// required; their absence aborts before any network call.
pub async fn fetch_dex_trades(cfg: &Config, since: &str) -> Result<Value, FeedError> {
    credentials(cfg)?;

    info!("📡 Bitquery price query → {} (since {})", cfg.bitquery_url, since);
    post_query(cfg, DEX_TRADES_QUERY, json!({ "since": since })).await
}

/// Fetch latest supply/marketcap data for one mint address
pub async fn fetch_market_data(cfg: &Config, address: &str) -> Result<MarketData, FeedError> {
    let body = post_query(cfg, MARKET_DATA_QUERY, json!({ "address": address })).await?;
    decode_market_data(&body)
}

fn solana_level<'a>(body: &'a Value) -> Result<&'a Value, FeedError> {
    let data = body.get("data").ok_or(FeedError::MissingField("data"))?;
    data.get("Solana").ok_or(FeedError::MissingField("data.Solana"))
}

/// Validate a raw price-feed body level by level into trade records
pub fn decode_trades(body: &Value) -> Result<Vec<TradeRecord>, FeedError> {
    let solana = solana_level(body)?;
    let trades = solana
        .get("DEXTrades")
        .ok_or(FeedError::MissingField("data.Solana.DEXTrades"))?;
    let trades = trades
        .as_array()
        .ok_or(FeedError::NotAnArray("data.Solana.DEXTrades"))?;

    Ok(trades.iter().map(decode_trade).collect())
}

fn decode_trade(item: &Value) -> TradeRecord {
    let buy = &item["Trade"]["Buy"];
    let currency = &buy["Currency"];
    TradeRecord {
        uri: string_field(&currency["Uri"]),
        mint: string_field(&currency["MintAddress"]),
        name: string_field(&currency["Name"]),
        symbol: string_field(&currency["Symbol"]),
        price_usd: decimal_field(&buy["PriceInUSD"]),
        price_sol: decimal_field(&buy["Price"]),
        block_time: string_field(&item["Block"]["Time"]),
        signature: string_field(&item["Transaction"]["Signature"]),
    }
}

/// Validate a raw new-token body level by level into creation records
pub fn decode_token_creations(body: &Value) -> Result<Vec<TokenCreationRecord>, FeedError> {
    let solana = solana_level(body)?;
    let instructions = solana
        .get("Instructions")
        .ok_or(FeedError::MissingField("data.Solana.Instructions"))?;
    let instructions = instructions
        .as_array()
        .ok_or(FeedError::NotAnArray("data.Solana.Instructions"))?;

    Ok(instructions
        .iter()
        .map(|item| TokenCreationRecord {
            signature: string_field(&item["Transaction"]["Signature"]),
            method: string_field(&item["Instruction"]["Program"]["Method"]),
            block_time: string_field(&item["Block"]["Time"]),
        })
        .collect())
}

fn decode_market_data(body: &Value) -> Result<MarketData, FeedError> {
    let solana = solana_level(body)?;
    let updates = solana
        .get("TokenSupplyUpdates")
        .ok_or(FeedError::MissingField("data.Solana.TokenSupplyUpdates"))?;
    let updates = updates
        .as_array()
        .ok_or(FeedError::NotAnArray("data.Solana.TokenSupplyUpdates"))?;

    let Some(first) = updates.first() else {
        return Ok(MarketData::default());
    };

    let update = &first["TokenSupplyUpdate"];
    Ok(MarketData {
        total_supply: decimal_field(&update["PostBalance"]),
        market_cap: decimal_field(&update["PostBalanceInUSD"]),
        name: string_field(&update["Currency"]["Name"]),
        symbol: string_field(&update["Currency"]["Symbol"]),
    })
}

fn string_field(v: &Value) -> Option<String> {
    v.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

/// Bitquery returns numerics as strings or numbers depending on the field
fn decimal_field(v: &Value) -> Option<Decimal> {
    match v {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => n
            .as_f64()
            .and_then(Decimal::from_f64)
            .or_else(|| n.as_i64().map(Decimal::from)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trades_body() -> Value {
        json!({
            "data": {
                "Solana": {
                    "DEXTrades": [
                        {
                            "Block": { "Time": "2025-05-01T12:00:00Z" },
                            "Transaction": { "Signature": "sig1" },
                            "Trade": {
                                "Buy": {
                                    "Price": 0.0000021,
                                    "PriceInUSD": "0.00031",
                                    "Currency": {
                                        "Uri": "https://ipfs.io/ipfs/abc",
                                        "Name": "Dog Wif Hat",
                                        "Symbol": "WIF",
                                        "MintAddress": "MintAAA"
                                    }
                                },
                                "Dex": { "ProtocolName": "pump" }
                            }
                        }
                    ]
                }
            }
        })
    }

    #[test]
    fn query_documents_pin_program_and_exclude_wsol() {
        assert!(NEW_TOKENS_QUERY.contains(PUMP_PROGRAM));
        assert!(DEX_TRADES_QUERY.contains(WSOL_MINT));
        // latest-price-per-token semantics
        assert!(DEX_TRADES_QUERY.contains("limitBy: { by: Trade_Buy_Currency_MintAddress, count: 1 }"));
    }

    #[test]
    fn decodes_a_valid_trade() {
        let records = decode_trades(&sample_trades_body()).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.uri.as_deref(), Some("https://ipfs.io/ipfs/abc"));
        assert_eq!(r.symbol.as_deref(), Some("WIF"));
        assert_eq!(r.price_usd, Some(Decimal::from_str("0.00031").unwrap()));
        assert!(r.price_sol.is_some());
        assert_eq!(r.block_time.as_deref(), Some("2025-05-01T12:00:00Z"));
    }

    #[test]
    fn missing_levels_are_distinct_errors() {
        let err = decode_trades(&json!({})).unwrap_err();
        assert!(matches!(err, FeedError::MissingField("data")));

        let err = decode_trades(&json!({ "data": {} })).unwrap_err();
        assert!(matches!(err, FeedError::MissingField("data.Solana")));

        let err = decode_trades(&json!({ "data": { "Solana": {} } })).unwrap_err();
        assert!(matches!(err, FeedError::MissingField("data.Solana.DEXTrades")));

        let err = decode_trades(&json!({ "data": { "Solana": { "DEXTrades": 7 } } })).unwrap_err();
        assert!(matches!(err, FeedError::NotAnArray("data.Solana.DEXTrades")));
    }

    #[test]
    fn empty_strings_decode_as_absent() {
        let mut body = sample_trades_body();
        body["data"]["Solana"]["DEXTrades"][0]["Trade"]["Buy"]["Currency"]["Uri"] =
            Value::String(String::new());
        let records = decode_trades(&body).unwrap();
        assert!(records[0].uri.is_none());
    }

    #[test]
    fn market_data_empty_when_no_updates() {
        let body = json!({ "data": { "Solana": { "TokenSupplyUpdates": [] } } });
        let md = decode_market_data(&body).unwrap();
        assert!(md.is_empty());
    }

    #[test]
    fn market_data_parses_string_and_number_fields() {
        let body = json!({
            "data": { "Solana": { "TokenSupplyUpdates": [
                { "TokenSupplyUpdate": {
                    "PostBalance": "1000000000",
                    "PostBalanceInUSD": 54321.5,
                    "Currency": { "Name": "Dog Wif Hat", "Symbol": "WIF" }
                } }
            ] } }
        });
        let md = decode_market_data(&body).unwrap();
        assert_eq!(md.total_supply, Some(Decimal::from(1_000_000_000_i64)));
        assert!(md.market_cap.is_some());
        assert_eq!(md.symbol.as_deref(), Some("WIF"));
    }
}
