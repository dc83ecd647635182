// src/pipeline.rs
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::bitquery::TradeRecord;
use crate::db;
use crate::models::{Price, PriceCandidate};

/// Bounds the per-lookup payload: one IN query per slice of this size
pub const BATCH_SIZE: usize = 100;

#[derive(Debug, Default, PartialEq)]
pub struct UpsertSummary {
    /// records with no usable join key or no price at all
    pub skipped: usize,
    /// candidates whose uri has no Token row
    pub dropped: usize,
    pub inserted: usize,
    pub patched: usize,
    pub failed_batches: usize,
}

/// The store's text columns reject embedded NULs
fn sanitize(s: &str) -> String {
    s.chars().filter(|&c| c != '\0').collect()
}

/// Per-record policy: a trade without a bought-currency uri (or without any
/// price) is logged and skipped, never fatal.
pub fn normalize_trades(records: &[TradeRecord]) -> (Vec<PriceCandidate>, usize) {
    let mut skipped = 0;
    let mut candidates = Vec::with_capacity(records.len());

    for rec in records {
        let uri = rec.uri.as_deref().map(sanitize).unwrap_or_default();
        if uri.is_empty() {
            warn!(
                "Trade {} has no currency uri, skipping",
                rec.signature.as_deref().unwrap_or("<unknown>")
            );
            skipped += 1;
            continue;
        }
        if rec.price_usd.is_none() && rec.price_sol.is_none() {
            warn!("Trade for {} carries no price, skipping", uri);
            skipped += 1;
            continue;
        }

        candidates.push(PriceCandidate {
            token_uri: uri,
            name: rec.name.as_deref().map(sanitize).filter(|s| !s.is_empty()),
            symbol: rec.symbol.as_deref().map(sanitize).filter(|s| !s.is_empty()),
            price_usd: rec.price_usd,
            price_sol: rec.price_sol,
            trade_at: rec.block_time.clone(),
            block_time: rec.block_time.clone(),
        });
    }

    (candidates, skipped)
}

/// Apply normalized candidates batch by batch. A failed lookup or insert
/// abandons that batch only; subsequent batches are still attempted.
pub fn upsert_candidates(
    conn: &mut Connection,
    candidates: &[PriceCandidate],
    now: DateTime<Utc>,
) -> UpsertSummary {
    let mut summary = UpsertSummary::default();

    for batch in candidates.chunks(BATCH_SIZE) {
        let uris: Vec<String> = batch.iter().map(|c| c.token_uri.clone()).collect();

        let ids = match db::lookup_token_ids(conn, &uris) {
            Ok(map) => map,
            Err(e) => {
                error!("Token lookup failed for batch of {}: {:?}", batch.len(), e);
                summary.failed_batches += 1;
                continue;
            }
        };

        let mut rows: Vec<Price> = Vec::with_capacity(batch.len());
        let mut patches: Vec<(i64, Option<String>, Option<String>)> = Vec::new();

        for c in batch {
            let Some(&token_id) = ids.get(&c.token_uri) else {
                warn!("No token row for uri {}, dropping price", c.token_uri);
                summary.dropped += 1;
                continue;
            };

            rows.push(Price {
                token_id,
                token_uri: c.token_uri.clone(),
                price_usd: c.price_usd,
                price_sol: c.price_sol,
                trade_at: c.trade_at.clone(),
                timestamp: c.block_time.clone(),
                is_latest: true, // append-only; prior rows are not demoted
            });

            if c.name.is_some() || c.symbol.is_some() {
                patches.push((token_id, c.name.clone(), c.symbol.clone()));
            }
        }

        match db::insert_prices(conn, &rows) {
            Ok(n) => summary.inserted += n,
            Err(e) => {
                error!("Price insert failed for batch of {}: {:?}", rows.len(), e);
                summary.failed_batches += 1;
                continue;
            }
        }

        // Best-effort metadata patches, drained before the batch is reported
        // complete; each failure is isolated to a warning.
        for (token_id, name, symbol) in patches {
            match db::patch_token_metadata(conn, token_id, name.as_deref(), symbol.as_deref(), now)
            {
                Ok(()) => summary.patched += 1,
                Err(e) => warn!("Metadata patch failed for token {}: {:?}", token_id, e),
            }
        }
    }

    summary
}

/// Full price pass over one raw feed's validated records
pub fn run(conn: &mut Connection, trades: &[TradeRecord], now: DateTime<Utc>) -> UpsertSummary {
    let (candidates, skipped) = normalize_trades(trades);
    let mut summary = upsert_candidates(conn, &candidates, now);
    summary.skipped = skipped;

    info!(
        "💾 Price pass: {} inserted, {} skipped, {} dropped, {} patched, {} failed batches",
        summary.inserted, summary.skipped, summary.dropped, summary.patched, summary.failed_batches
    );
    summary
}
