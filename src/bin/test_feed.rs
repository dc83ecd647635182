use reqwest::Client;
use serde_json::json;

// One-shot probe against the Bitquery price feed: prints the raw body so the
// archived/decoded shapes can be checked by hand.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = std::env::var("BITQUERY_URL")
        .unwrap_or_else(|_| "https://streaming.bitquery.io/eap".to_string());
    let api_key = std::env::var("BITQUERY_API_KEY")?;
    let access_token = std::env::var("BITQUERY_ACCESS_TOKEN")?;

    let query = r#"
    query LatestTrades($since: DateTime) {
      Solana {
        DEXTrades(
          limitBy: { by: Trade_Buy_Currency_MintAddress, count: 1 }
          orderBy: { descending: Block_Time }
          limit: { count: 5 }
          where: {
            Trade: { Dex: { ProtocolName: { is: "pump" } } }
            Transaction: { Result: { Success: true } }
            Block: { Time: { since: $since } }
          }
        ) {
          Block { Time }
          Trade {
            Buy {
              Price
              PriceInUSD
              Currency { Uri Name Symbol MintAddress }
            }
          }
        }
      }
    }
    "#;

    let client = Client::new();

    let body: serde_json::Value = client
        .post(&url)
        .header("X-API-KEY", &api_key)
        .bearer_auth(&access_token)
        .json(&json!({
            "query": query,
            "variables": { "since": "2025-01-01T00:00:00Z" }
        }))
        .send()
        .await?
        .json()
        .await?;

    println!("Response = {:#?}", body);

    Ok(())
}
