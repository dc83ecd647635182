use dotenvy::dotenv;
use eyre::Result;
use serde::Deserialize;
use std::env;
use tracing::info;

pub const MEMECOIN_FEED: &str = "memecoins";
pub const PRICE_FEED: &str = "prices";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bitquery_url: String,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub db_path: String,
    pub results_dir: String,
    pub port: u16,
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // load from .env file

    // Bitquery streaming endpoint (EAP)
    let bitquery_url = env::var("BITQUERY_URL")
        .unwrap_or_else(|_| "https://streaming.bitquery.io/eap".to_string());

    // Credentials are optional at load time; the price feed treats their
    // absence as fatal, the token feed logs and returns empty.
    let api_key = env::var("BITQUERY_API_KEY")
        .or_else(|_| env::var("BITQUERY_KEY")) // alias support
        .ok()
        .filter(|s| !s.is_empty());

    let access_token = env::var("BITQUERY_ACCESS_TOKEN")
        .or_else(|_| env::var("BITQUERY_TOKEN"))
        .ok()
        .filter(|s| !s.is_empty());

    // SQLite DB path (default: memecoins.db)
    let db_path = env::var("DATABASE_URL").unwrap_or_else(|_| "memecoins.db".to_string());

    // Directory for cursor files and archived responses (default: results)
    let results_dir = env::var("RESULTS_DIR").unwrap_or_else(|_| "results".to_string());

    // API port (default: 8080)
    let port = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    let cfg = Config {
        bitquery_url,
        api_key,
        access_token,
        db_path,
        results_dir,
        port,
    };

    info!(
        "Loaded config: url={} db={} results={} port={} credentials={}",
        cfg.bitquery_url,
        cfg.db_path,
        cfg.results_dir,
        cfg.port,
        if cfg.api_key.is_some() && cfg.access_token.is_some() {
            "present"
        } else {
            "MISSING"
        }
    );

    Ok(cfg)
}
