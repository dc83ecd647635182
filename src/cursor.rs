// src/cursor.rs
use chrono::{DateTime, Utc};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// First run scans from this fixed epoch
const DEFAULT_EPOCH: &str = "2024-01-01T00:00:00Z";

/// Per-feed incremental-fetch watermark. Loaded as a plain value and saved
/// explicitly by the orchestrator after a successful fetch; feeds do not
/// share cursors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub since_timestamp: String,
    pub latest_fetch_timestamp: Option<String>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            since_timestamp: DEFAULT_EPOCH.to_string(),
            latest_fetch_timestamp: None,
        }
    }
}

fn cursor_path(dir: &Path, feed: &str) -> PathBuf {
    dir.join(format!("{feed}-cursor.json"))
}

impl Cursor {
    pub fn load(dir: &Path, feed: &str) -> Self {
        let path = cursor_path(dir, feed);
        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(cursor) => cursor,
                Err(e) => {
                    warn!("Cursor file {} is malformed ({}), starting from epoch", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No cursor for feed '{}', starting from epoch", feed);
                Self::default()
            }
        }
    }

    pub fn save(&self, dir: &Path, feed: &str) -> Result<()> {
        fs::create_dir_all(dir)?;
        let path = cursor_path(dir, feed);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Advance past a successful fetch: to the max observed block time, or to
    /// `now` when the window was empty so it is never rescanned forever.
    pub fn advance(&mut self, max_block_time: Option<String>, now: DateTime<Utc>) {
        let watermark = max_block_time
            .unwrap_or_else(|| now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        self.since_timestamp = watermark.clone();
        self.latest_fetch_timestamp = Some(watermark);
    }
}

/// Max of the block times present in a set of records
pub fn max_block_time<'a>(times: impl Iterator<Item = Option<&'a str>>) -> Option<String> {
    times
        .flatten()
        .filter_map(|t| DateTime::parse_from_rfc3339(t).ok())
        .max()
        .map(|t| {
            t.with_timezone(&Utc)
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn missing_file_yields_epoch_default() {
        let dir = tempfile::tempdir().unwrap();
        let cursor = Cursor::load(dir.path(), "prices");
        assert_eq!(cursor.since_timestamp, DEFAULT_EPOCH);
        assert!(cursor.latest_fetch_timestamp.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut cursor = Cursor::default();
        cursor.advance(Some("2025-06-01T08:30:00Z".to_string()), Utc::now());
        cursor.save(dir.path(), "memecoins").unwrap();

        let loaded = Cursor::load(dir.path(), "memecoins");
        assert_eq!(loaded, cursor);
    }

    #[test]
    fn feeds_do_not_share_cursor_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Cursor::default();
        a.advance(Some("2025-06-01T08:30:00Z".to_string()), Utc::now());
        a.save(dir.path(), "prices").unwrap();

        let other = Cursor::load(dir.path(), "memecoins");
        assert_eq!(other, Cursor::default());
    }

    #[test]
    fn advance_uses_max_observed_block_time() {
        let observed = max_block_time(
            [
                Some("2025-06-01T08:30:00Z"),
                Some("2025-06-01T09:45:00Z"),
                None,
                Some("2025-06-01T07:00:00Z"),
            ]
            .into_iter(),
        );
        let mut cursor = Cursor::default();
        cursor.advance(observed, Utc::now());
        assert_eq!(cursor.since_timestamp, "2025-06-01T09:45:00Z");
        assert_eq!(
            cursor.latest_fetch_timestamp.as_deref(),
            Some("2025-06-01T09:45:00Z")
        );
    }

    #[test]
    fn empty_window_advances_to_now() {
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
        let mut cursor = Cursor::default();
        cursor.advance(None, now);
        assert_eq!(cursor.since_timestamp, "2025-07-01T12:00:00Z");
        assert_eq!(
            cursor.latest_fetch_timestamp.as_deref(),
            Some("2025-07-01T12:00:00Z")
        );
    }
}
