// src/refresher.rs
use chrono::Utc;
use eyre::Result;
use futures_util::future::join_all;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::bitquery;
use crate::config::Config;

/// At most this many tokens are refreshed per run
pub const RUN_CAP: usize = 50;
/// Concurrent fetches per slice
pub const REFRESH_BATCH: usize = 5;

#[derive(Debug, Default)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub empty: usize,
    pub failed: usize,
}

/// Periodic market-data pass: select stale/incomplete tokens, fetch supply
/// and marketcap per mint with fixed-delay pacing, write back whatever the
/// source yielded. Per-token errors are logged and skipped.
pub async fn run(cfg: &Config, conn: &Arc<Mutex<Connection>>) -> Result<RefreshSummary> {
    let now = Utc::now();

    let candidates = {
        let db = conn.lock().unwrap();
        crate::db::refresh_candidates(&db, now, RUN_CAP)?
    };

    let mut summary = RefreshSummary::default();
    if candidates.is_empty() {
        info!("No tokens need a market-data refresh");
        return Ok(summary);
    }

    info!("🔄 Refreshing market data for {} tokens", candidates.len());

    for (batch_no, batch) in candidates.chunks(REFRESH_BATCH).enumerate() {
        if batch_no > 0 {
            sleep(Duration::from_secs(2)).await; // pause between batches
        }

        let fetches = batch.iter().enumerate().map(|(i, (token_id, address))| {
            let cfg = cfg.clone();
            let address = address.clone();
            let token_id = *token_id;
            async move {
                // stagger fetches one second apart inside the batch
                sleep(Duration::from_secs(i as u64)).await;
                let result = bitquery::fetch_market_data(&cfg, &address).await;
                (token_id, address, result)
            }
        });

        let results = join_all(fetches).await;

        {
            let db = conn.lock().unwrap();
            for (token_id, address, result) in results {
                match result {
                    Ok(data) if data.is_empty() => {
                        info!("Source has no market data for {}, skipping", address);
                        summary.empty += 1;
                    }
                    Ok(data) => {
                        match crate::db::apply_market_data(&db, token_id, &data, Utc::now()) {
                            Ok(()) => {
                                info!(
                                    "💾 Refreshed token {} ({}): supply={:?} mcap={:?}",
                                    token_id, address, data.total_supply, data.market_cap
                                );
                                summary.refreshed += 1;
                            }
                            Err(e) => {
                                warn!("Market-data write failed for token {}: {:?}", token_id, e);
                                summary.failed += 1;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Market-data fetch failed for {}: {:?}", address, e);
                        summary.failed += 1;
                    }
                }
            }
        }
    }

    info!(
        "Market-data refresh done: {} refreshed, {} empty, {} failed",
        summary.refreshed, summary.empty, summary.failed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_cap_partitions_into_fixed_width_batches() {
        let candidates: Vec<u8> = vec![0; RUN_CAP];
        let widths: Vec<usize> = candidates
            .chunks(REFRESH_BATCH)
            .map(<[u8]>::len)
            .collect();
        assert_eq!(widths.len(), 10);
        assert!(widths.iter().all(|&w| w == 5));
    }
}
