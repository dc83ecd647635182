mod api;
mod archive;
mod bitquery;
mod config;
mod cursor;
mod db;
mod ingest;
mod models;
mod pipeline;
mod refresher;

use std::sync::{Arc, Mutex};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("Memecoin Indexer starting...");

    // Load configuration
    let cfg = config::load()?;

    // Run DB migrations once at startup
    {
        let conn = db::connect(&cfg.db_path)?;
        db::run_migrations(&conn)?;
    }

    // Shared DB connection
    let shared_conn = Arc::new(Mutex::new(db::connect(&cfg.db_path)?));

    // `--serve` keeps the dashboard read API running; the default invocation
    // is a single run-to-completion ingestion pass, triggered by an external
    // scheduler that also serializes runs.
    let serve_mode = std::env::args().any(|a| a == "--serve");

    if serve_mode {
        let api_handle = tokio::spawn({
            let cfg = cfg.clone();
            let conn = Arc::clone(&shared_conn);
            async move { api::serve(cfg, conn).await }
        });

        tokio::select! {
            res = api_handle => match res {
                Ok(Ok(_)) => info!("API exited cleanly"),
                Ok(Err(e)) => error!("API error: {:?}", e),
                Err(e) => error!("API task panicked: {:?}", e),
            },
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received, stopping...");
            }
        }
    } else if let Err(e) = ingest::run_once(&cfg, Arc::clone(&shared_conn)).await {
        // a pass error that escaped its own handling ends the run here;
        // later passes were not attempted
        error!("Ingestion run failed: {:?}", e);
        std::process::exit(1);
    }

    info!("Memecoin Indexer stopped.");
    Ok(())
}
