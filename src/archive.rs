// src/archive.rs
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Write a raw feed response verbatim (pretty-printed) to
/// `<results>/<feed>/<feed>-<epoch-ms>.json`. The archive is a debugging
/// side-channel: failures are logged and never fail the run.
pub fn archive_response(results_dir: &Path, feed: &str, body: &Value) -> Option<PathBuf> {
    match try_archive(results_dir, feed, body) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("Failed to archive {} response: {}", feed, e);
            None
        }
    }
}

fn try_archive(results_dir: &Path, feed: &str, body: &Value) -> std::io::Result<PathBuf> {
    let dir = results_dir.join(feed);
    fs::create_dir_all(&dir)?;

    let path = dir.join(format!("{feed}-{}.json", Utc::now().timestamp_millis()));
    let pretty = serde_json::to_string_pretty(body)?;
    fs::write(&path, pretty)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_pretty_dump_under_feed_directory() {
        let dir = tempfile::tempdir().unwrap();
        let body = json!({ "data": { "Solana": { "DEXTrades": [] } } });

        let path = archive_response(dir.path(), "prices", &body).unwrap();
        assert!(path.starts_with(dir.path().join("prices")));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("prices-"));

        let raw = fs::read_to_string(&path).unwrap();
        let round: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(round, body);
    }

    #[test]
    fn unwritable_target_is_best_effort() {
        // a file where the results dir should be makes create_dir_all fail
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, b"x").unwrap();

        let out = archive_response(&blocker, "prices", &json!({}));
        assert!(out.is_none());
    }
}
