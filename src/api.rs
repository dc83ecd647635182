use axum::{
    extract::Query,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::Utc;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::task;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::models::{Price, Token};

#[derive(Deserialize)]
pub struct TokensQuery {
    pub limit: Option<u32>, // defaults to 50
}

#[derive(Deserialize)]
pub struct PricesQuery {
    pub token: String, // token uri
    pub limit: Option<u32>,
}

/// Manual update-price request; inserts a Price row directly, bypassing the
/// batch pipeline. Callers must supply at least one of the two price fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualPriceUpdate {
    pub token_id: i64,
    pub price_usd: Option<Decimal>,
    pub price_sol: Option<Decimal>,
}

impl ManualPriceUpdate {
    pub fn has_price(&self) -> bool {
        self.price_usd.is_some() || self.price_sol.is_some()
    }
}

pub async fn serve(cfg: Config, conn: Arc<Mutex<Connection>>) -> eyre::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "Memecoin Indexer API running" }))
        .route("/tokens", get({
            let conn = Arc::clone(&conn);
            move |q: Query<TokensQuery>| {
                let conn = Arc::clone(&conn);
                async move { Json(get_tokens(conn, q.limit.unwrap_or(50)).await) }
            }
        }))
        .route("/prices", get({
            let conn = Arc::clone(&conn);
            move |q: Query<PricesQuery>| {
                let conn = Arc::clone(&conn);
                async move { Json(get_prices(conn, &q.token, q.limit.unwrap_or(50)).await) }
            }
        }).post({
            let conn = Arc::clone(&conn);
            move |body: Json<ManualPriceUpdate>| {
                let conn = Arc::clone(&conn);
                async move { post_price(conn, body.0).await }
            }
        }))
        .layer(cors);

    let addr = SocketAddr::from(([127, 0, 0, 1], cfg.port));
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

// ---------- DB wrappers (spawn_blocking) ----------

async fn get_tokens(conn: Arc<Mutex<Connection>>, limit: u32) -> Vec<Token> {
    task::spawn_blocking(move || {
        let db = conn.lock().unwrap();
        db::list_tokens(&db, limit).unwrap_or_default()
    })
    .await
    .unwrap_or_default()
}

async fn get_prices(conn: Arc<Mutex<Connection>>, token_uri: &str, limit: u32) -> Vec<Price> {
    let token_uri = token_uri.to_string();
    task::spawn_blocking(move || {
        let db = conn.lock().unwrap();
        db::list_prices(&db, &token_uri, limit).unwrap_or_default()
    })
    .await
    .unwrap_or_default()
}

async fn post_price(
    conn: Arc<Mutex<Connection>>,
    body: ManualPriceUpdate,
) -> axum::response::Response {
    if !body.has_price() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "at least one of priceUsd/priceSol is required" })),
        )
            .into_response();
    }

    let result = task::spawn_blocking(move || {
        let mut db = conn.lock().unwrap();
        db::insert_manual_price(&mut db, body.token_id, body.price_usd, body.price_sol, Utc::now())
    })
    .await;

    match result {
        Ok(Ok(row)) => (StatusCode::CREATED, Json(row)).into_response(),
        Ok(Err(e)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("insert failed: {e}") })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("task failed: {e}") })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_update_requires_at_least_one_price() {
        let body: ManualPriceUpdate =
            serde_json::from_value(json!({ "tokenId": 1 })).unwrap();
        assert!(!body.has_price());

        let body: ManualPriceUpdate =
            serde_json::from_value(json!({ "tokenId": 1, "priceUsd": "0.5" })).unwrap();
        assert!(body.has_price());

        let body: ManualPriceUpdate =
            serde_json::from_value(json!({ "tokenId": 1, "priceSol": 0.0001 })).unwrap();
        assert!(body.has_price());
    }
}
