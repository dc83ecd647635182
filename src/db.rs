use chrono::{DateTime, Duration, SecondsFormat, Utc};
use eyre::Result;
use rusqlite::{params, params_from_iter, Connection};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use crate::models::{MarketData, Price, Token};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tokens (
  id           INTEGER PRIMARY KEY AUTOINCREMENT,
  uri          TEXT UNIQUE NOT NULL,
  address      TEXT,
  name         TEXT,
  symbol       TEXT,
  market_cap   TEXT, -- Decimal stored as string
  total_supply TEXT, -- Decimal stored as string
  last_updated TEXT
);

CREATE TABLE IF NOT EXISTS prices (
  id        INTEGER PRIMARY KEY AUTOINCREMENT,
  token_id  INTEGER NOT NULL REFERENCES tokens(id),
  token_uri TEXT NOT NULL,
  price_usd TEXT,
  price_sol TEXT,
  trade_at  TEXT,
  timestamp TEXT,
  is_latest INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_prices_token ON prices(token_id);
"#;

/// Connect to SQLite (with WAL mode for performance)
pub fn connect(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

/// Run schema migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(INIT_SQL)?;
    Ok(())
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Resolve a batch of URIs to token ids with a single IN query.
/// URIs with no Token row are simply absent from the map.
pub fn lookup_token_ids(conn: &Connection, uris: &[String]) -> Result<HashMap<String, i64>> {
    if uris.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = vec!["?"; uris.len()].join(",");
    let sql = format!("SELECT uri, id FROM tokens WHERE uri IN ({placeholders})");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(uris.iter()), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
    })?;

    let mut map = HashMap::new();
    for row in rows {
        let (uri, id) = row?;
        map.insert(uri, id);
    }
    Ok(map)
}

/// Append a batch of price rows inside one transaction
pub fn insert_prices(conn: &mut Connection, rows: &[Price]) -> Result<usize> {
    let tx = conn.transaction()?;
    for row in rows {
        tx.execute(
            r#"
            INSERT INTO prices (token_id, token_uri, price_usd, price_sol, trade_at, timestamp, is_latest)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                row.token_id,
                row.token_uri,
                row.price_usd.map(|d| d.to_string()),
                row.price_sol.map(|d| d.to_string()),
                row.trade_at,
                row.timestamp,
                row.is_latest as i64,
            ],
        )?;
    }
    tx.commit()?;
    Ok(rows.len())
}

/// Opportunistic metadata patch; only fills fields the caller actually has
pub fn patch_token_metadata(
    conn: &Connection,
    token_id: i64,
    name: Option<&str>,
    symbol: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE tokens
        SET name = COALESCE(?1, name),
            symbol = COALESCE(?2, symbol),
            last_updated = ?3
        WHERE id = ?4
        "#,
        params![name, symbol, rfc3339(now), token_id],
    )?;
    Ok(())
}

/// Tokens needing a market-data refresh: missing fields or stale by 24h,
/// restricted to rows whose mint address is known, capped per run
pub fn refresh_candidates(
    conn: &Connection,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<(i64, String)>> {
    let cutoff = rfc3339(now - Duration::hours(24));

    let mut stmt = conn.prepare(
        r#"
        SELECT id, address FROM tokens
        WHERE address IS NOT NULL
          AND (market_cap IS NULL OR total_supply IS NULL OR last_updated < ?1)
        ORDER BY id
        LIMIT ?2
        "#,
    )?;

    let rows = stmt.query_map(params![cutoff, limit as i64], |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
    })?;

    Ok(rows.filter_map(std::result::Result::ok).collect())
}

/// Write refreshed market data back to a token row
pub fn apply_market_data(
    conn: &Connection,
    token_id: i64,
    data: &MarketData,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE tokens
        SET total_supply = COALESCE(?1, total_supply),
            market_cap = COALESCE(?2, market_cap),
            name = COALESCE(?3, name),
            symbol = COALESCE(?4, symbol),
            last_updated = ?5
        WHERE id = ?6
        "#,
        params![
            data.total_supply.map(|d| d.to_string()),
            data.market_cap.map(|d| d.to_string()),
            data.name,
            data.symbol,
            rfc3339(now),
            token_id,
        ],
    )?;
    Ok(())
}

// ---------- read side (dashboard API) ----------

fn token_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Token> {
    let market_cap: Option<String> = r.get(5)?;
    let total_supply: Option<String> = r.get(6)?;
    let last_updated: Option<String> = r.get(7)?;

    Ok(Token {
        id: r.get(0)?,
        uri: r.get(1)?,
        address: r.get(2)?,
        name: r.get(3)?,
        symbol: r.get(4)?,
        market_cap: market_cap.and_then(|s| Decimal::from_str(&s).ok()),
        total_supply: total_supply.and_then(|s| Decimal::from_str(&s).ok()),
        last_updated: last_updated
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc)),
    })
}

pub fn list_tokens(conn: &Connection, limit: u32) -> Result<Vec<Token>> {
    let mut stmt = conn.prepare(
        "SELECT id, uri, address, name, symbol, market_cap, total_supply, last_updated
         FROM tokens ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |r| token_from_row(r))?;
    Ok(rows.filter_map(std::result::Result::ok).collect())
}

pub fn list_prices(conn: &Connection, token_uri: &str, limit: u32) -> Result<Vec<Price>> {
    let mut stmt = conn.prepare(
        "SELECT token_id, token_uri, price_usd, price_sol, trade_at, timestamp, is_latest
         FROM prices WHERE token_uri = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![token_uri, limit as i64], |r| {
        let price_usd: Option<String> = r.get(2)?;
        let price_sol: Option<String> = r.get(3)?;
        Ok(Price {
            token_id: r.get(0)?,
            token_uri: r.get(1)?,
            price_usd: price_usd.and_then(|s| Decimal::from_str(&s).ok()),
            price_sol: price_sol.and_then(|s| Decimal::from_str(&s).ok()),
            trade_at: r.get(4)?,
            timestamp: r.get(5)?,
            is_latest: r.get::<_, i64>(6)? != 0,
        })
    })?;
    Ok(rows.filter_map(std::result::Result::ok).collect())
}

/// Direct insert for the manual update-price endpoint; bypasses the batch
/// pipeline. Fails when the token id is unknown.
pub fn insert_manual_price(
    conn: &mut Connection,
    token_id: i64,
    price_usd: Option<Decimal>,
    price_sol: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<Price> {
    let token_uri: String = conn.query_row(
        "SELECT uri FROM tokens WHERE id = ?1",
        [token_id],
        |r| r.get(0),
    )?;

    let row = Price {
        token_id,
        token_uri,
        price_usd,
        price_sol,
        trade_at: Some(rfc3339(now)),
        timestamp: Some(rfc3339(now)),
        is_latest: true,
    };
    insert_prices(conn, std::slice::from_ref(&row))?;
    Ok(row)
}

#[cfg(test)]
pub fn insert_token(
    conn: &Connection,
    uri: &str,
    address: Option<&str>,
    market_cap: Option<&str>,
    total_supply: Option<&str>,
    last_updated: Option<DateTime<Utc>>,
) -> i64 {
    conn.execute(
        "INSERT INTO tokens (uri, address, market_cap, total_supply, last_updated)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![uri, address, market_cap, total_supply, last_updated.map(rfc3339)],
    )
    .unwrap();
    conn.last_insert_rowid()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn lookup_maps_only_known_uris() {
        let conn = test_conn();
        let id = insert_token(&conn, "uri-a", None, None, None, None);

        let map = lookup_token_ids(
            &conn,
            &["uri-a".to_string(), "uri-missing".to_string()],
        )
        .unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("uri-a"), Some(&id));
    }

    #[test]
    fn refresh_selection_follows_staleness_windows() {
        let conn = test_conn();
        let now = Utc::now();

        // missing supply, updated 2h ago -> selected
        let a = insert_token(
            &conn,
            "uri-a",
            Some("MintA"),
            Some("100"),
            None,
            Some(now - Duration::hours(2)),
        );
        // complete, updated 1h ago -> not selected
        insert_token(
            &conn,
            "uri-b",
            Some("MintB"),
            Some("100"),
            Some("1000"),
            Some(now - Duration::hours(1)),
        );
        // complete, updated 25h ago -> selected
        let c = insert_token(
            &conn,
            "uri-c",
            Some("MintC"),
            Some("100"),
            Some("1000"),
            Some(now - Duration::hours(25)),
        );
        // everything missing but no address -> never selected
        insert_token(&conn, "uri-d", None, None, None, None);

        let candidates = refresh_candidates(&conn, now, 50).unwrap();
        let ids: Vec<i64> = candidates.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn refresh_selection_is_capped() {
        let conn = test_conn();
        for i in 0..60 {
            insert_token(&conn, &format!("uri-{i}"), Some("Mint"), None, None, None);
        }
        let candidates = refresh_candidates(&conn, Utc::now(), 50).unwrap();
        assert_eq!(candidates.len(), 50);
    }

    #[test]
    fn manual_price_requires_known_token() {
        let mut conn = test_conn();
        let err = insert_manual_price(&mut conn, 42, Some(Decimal::ONE), None, Utc::now());
        assert!(err.is_err());

        let id = insert_token(&conn, "uri-a", None, None, None, None);
        let row = insert_manual_price(&mut conn, id, Some(Decimal::ONE), None, Utc::now()).unwrap();
        assert_eq!(row.token_uri, "uri-a");
        assert!(row.is_latest);

        let stored = list_prices(&conn, "uri-a", 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].price_usd, Some(Decimal::ONE));
    }

    #[test]
    fn market_data_patch_keeps_existing_fields() {
        let conn = test_conn();
        let id = insert_token(&conn, "uri-a", Some("MintA"), Some("5"), None, None);

        let data = MarketData {
            total_supply: Some(Decimal::from(1_000)),
            market_cap: None,
            name: Some("Dog Wif Hat".to_string()),
            symbol: None,
        };
        apply_market_data(&conn, id, &data, Utc::now()).unwrap();

        let tokens = list_tokens(&conn, 10).unwrap();
        let t = &tokens[0];
        assert_eq!(t.total_supply, Some(Decimal::from(1_000)));
        assert_eq!(t.market_cap, Some(Decimal::from(5))); // untouched
        assert_eq!(t.name.as_deref(), Some("Dog Wif Hat"));
        assert!(t.last_updated.is_some());
    }
}
