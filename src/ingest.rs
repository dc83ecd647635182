// src/ingest.rs
use chrono::Utc;
use eyre::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::config::{Config, MEMECOIN_FEED, PRICE_FEED};
use crate::cursor::{max_block_time, Cursor};
use crate::{archive, bitquery, pipeline, refresher};

/// One run-to-completion ingestion pass: token creations, then prices, then
/// the market-data refresh, strictly in sequence. An error that escapes a
/// pass's own handling propagates to the caller; remaining passes are not
/// attempted. Scheduling and run serialization belong to the external
/// trigger, not to this function.
pub async fn run_once(cfg: &Config, conn: Arc<Mutex<Connection>>) -> Result<()> {
    let results_dir = Path::new(&cfg.results_dir);

    fetch_token_creations_pass(cfg, results_dir).await?;
    fetch_prices_pass(cfg, results_dir, &conn).await?;
    refresher::run(cfg, &conn).await?;

    info!("✅ Ingestion run complete");
    Ok(())
}

async fn fetch_token_creations_pass(cfg: &Config, results_dir: &Path) -> Result<()> {
    let mut cursor = Cursor::load(results_dir, MEMECOIN_FEED);

    let Some(body) = bitquery::fetch_token_creations(cfg, &cursor.since_timestamp).await? else {
        return Ok(()); // credentials missing: already logged, nothing fetched
    };

    archive::archive_response(results_dir, MEMECOIN_FEED, &body);

    // the new-token feed is archived only; token rows are created elsewhere
    let records = bitquery::decode_token_creations(&body)?;
    info!("Fetched {} token creations", records.len());

    let watermark = max_block_time(records.iter().map(|r| r.block_time.as_deref()));
    cursor.advance(watermark, Utc::now());
    cursor.save(results_dir, MEMECOIN_FEED)?;
    Ok(())
}

async fn fetch_prices_pass(
    cfg: &Config,
    results_dir: &Path,
    conn: &Arc<Mutex<Connection>>,
) -> Result<()> {
    let mut cursor = Cursor::load(results_dir, PRICE_FEED);

    let body = bitquery::fetch_dex_trades(cfg, &cursor.since_timestamp).await?;
    archive::archive_response(results_dir, PRICE_FEED, &body);

    let trades = bitquery::decode_trades(&body)?;
    info!("Fetched {} trades", trades.len());

    {
        let mut db = conn.lock().unwrap();
        pipeline::run(&mut db, &trades, Utc::now());
    }

    // the fetch succeeded; partial pipeline failures do not hold the cursor back
    let watermark = max_block_time(trades.iter().map(|t| t.block_time.as_deref()));
    cursor.advance(watermark, Utc::now());
    cursor.save(results_dir, PRICE_FEED)?;
    Ok(())
}
