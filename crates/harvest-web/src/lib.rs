//! Product search API over the harvested table.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use harvest_storage::PRODUCTS_TABLE;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub const CRATE_NAME: &str = "harvest-web";

pub const MAX_LIMIT: usize = 1000;

/// Origin of the search frontend.
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

#[derive(Clone)]
pub struct AppState {
    /// `None` keeps the API up but answers searches with 503.
    pub pool: Option<PgPool>,
    /// Browser origins allowed to call the API, with credentials.
    pub cors_origins: Vec<HeaderValue>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AppState {
    pub fn new(pool: Option<PgPool>) -> Self {
        Self {
            pool,
            cors_origins: vec![HeaderValue::from_static(DEFAULT_CORS_ORIGIN)],
        }
    }

    pub fn with_cors_origins(mut self, origins: Vec<HeaderValue>) -> Self {
        self.cors_origins = origins;
        self
    }
}

/// Comma-separated origins, e.g. `http://localhost:3000,https://parts.example.com`.
pub fn parse_cors_origins(raw: &str) -> anyhow::Result<Vec<HeaderValue>> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            if origin == "*" {
                anyhow::bail!("a wildcard origin cannot be combined with credentials");
            }
            HeaderValue::from_str(origin).with_context(|| format!("invalid CORS origin {origin:?}"))
        })
        .collect()
}

fn cors_layer(origins: &[HeaderValue]) -> CorsLayer {
    // No `*` alongside credentials; methods and headers mirror the request.
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins.iter().cloned()))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Every field is an optional case-insensitive substring filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProductSearch {
    pub sku: Option<String>,
    pub type1: Option<String>,
    pub type2: Option<String>,
    pub c_to_c: Option<String>,
    pub side_a: Option<String>,
    pub side_b: Option<String>,
    pub side_a_bushing: Option<String>,
    pub side_b_bushing: Option<String>,
    pub side_a_angle: Option<String>,
    pub side_b_angle: Option<String>,
    pub shaft_dia: Option<String>,
    pub notes: Option<String>,
    pub vendor: Option<String>,
    /// Unlimited when absent; capped at [`MAX_LIMIT`].
    pub limit: Option<usize>,
}

impl ProductSearch {
    fn criteria(&self) -> [(&'static str, Option<&str>); 13] {
        [
            ("sku", self.sku.as_deref()),
            ("type1", self.type1.as_deref()),
            ("type2", self.type2.as_deref()),
            ("c_to_c", self.c_to_c.as_deref()),
            ("side_a", self.side_a.as_deref()),
            ("side_b", self.side_b.as_deref()),
            ("side_a_bushing", self.side_a_bushing.as_deref()),
            ("side_b_bushing", self.side_b_bushing.as_deref()),
            ("side_a_angle", self.side_a_angle.as_deref()),
            ("side_b_angle", self.side_b_angle.as_deref()),
            ("shaft_dia", self.shaft_dia.as_deref()),
            ("notes", self.notes.as_deref()),
            ("vendor", self.vendor.as_deref()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub sql: String,
    /// Bound as `$1..$n`, in order.
    pub patterns: Vec<String>,
    /// Bound last, when present.
    pub limit: Option<i64>,
}

/// `None` when the search carries no criteria.
pub fn build_search_query(search: &ProductSearch) -> Option<SearchQuery> {
    let mut conditions = Vec::new();
    let mut patterns = Vec::new();
    for (column, value) in search.criteria() {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            continue;
        };
        patterns.push(format!("%{value}%"));
        conditions.push(format!("{column} ILIKE ${}", patterns.len()));
    }
    if conditions.is_empty() {
        return None;
    }

    let mut sql = format!(
        "SELECT id, sku, type1, type2, c_to_c, side_a, side_b, side_a_bushing, side_b_bushing, \
         side_a_angle, side_b_angle, shaft_dia, notes, vendor FROM {PRODUCTS_TABLE} \
         WHERE {} ORDER BY id",
        conditions.join(" AND ")
    );
    let limit = search.limit.map(|limit| limit.clamp(1, MAX_LIMIT) as i64);
    if limit.is_some() {
        sql.push_str(&format!(" LIMIT ${}", patterns.len() + 1));
    }
    Some(SearchQuery { sql, patterns, limit })
}

/// One table row, keyed by the stored column names.
#[derive(Debug, Clone, Serialize)]
pub struct ProductRow {
    pub id: i32,
    pub sku: Option<String>,
    pub type1: Option<String>,
    pub type2: Option<String>,
    pub c_to_c: Option<String>,
    pub side_a: Option<String>,
    pub side_b: Option<String>,
    pub side_a_bushing: Option<String>,
    pub side_b_bushing: Option<String>,
    pub side_a_angle: Option<String>,
    pub side_b_angle: Option<String>,
    pub shaft_dia: Option<String>,
    pub notes: Option<String>,
    pub vendor: Option<String>,
}

fn product_from_row(row: &PgRow) -> Result<ProductRow, sqlx::Error> {
    Ok(ProductRow {
        id: row.try_get("id")?,
        sku: row.try_get("sku")?,
        type1: row.try_get("type1")?,
        type2: row.try_get("type2")?,
        c_to_c: row.try_get("c_to_c")?,
        side_a: row.try_get("side_a")?,
        side_b: row.try_get("side_b")?,
        side_a_bushing: row.try_get("side_a_bushing")?,
        side_b_bushing: row.try_get("side_b_bushing")?,
        side_a_angle: row.try_get("side_a_angle")?,
        side_b_angle: row.try_get("side_b_angle")?,
        shaft_dia: row.try_get("shaft_dia")?,
        notes: row.try_get("notes")?,
        vendor: row.try_get("vendor")?,
    })
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    products: Vec<ProductRow>,
}

pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);
    Router::new()
        .route("/", get(index_handler))
        .route("/api/products/search", post(search_handler))
        .layer(cors)
        .with_state(Arc::new(state))
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "product search api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("HARVEST_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let cors_origins = match std::env::var("HARVEST_CORS_ORIGIN") {
        Ok(raw) => parse_cors_origins(&raw).context("HARVEST_CORS_ORIGIN")?,
        Err(_) => vec![HeaderValue::from_static(DEFAULT_CORS_ORIGIN)],
    };
    let pool = connect_db_from_env().await;
    if pool.is_none() {
        warn!("no product database reachable; searches will answer 503");
    }
    let state = AppState::new(pool).with_cors_origins(cors_origins);
    serve(SocketAddr::from(([0, 0, 0, 0], port)), state).await
}

pub async fn connect_db_from_env() -> Option<PgPool> {
    let database_url = std::env::var("DATABASE_URL").ok()?;
    PgPool::connect(&database_url).await.ok()
}

async fn index_handler() -> Json<serde_json::Value> {
    Json(json!({ "message": "Welcome to the Product Search API" }))
}

async fn search_handler(State(state): State<Arc<AppState>>, Json(search): Json<ProductSearch>) -> Response {
    let Some(query) = build_search_query(&search) else {
        return Json(SearchResponse { products: Vec::new() }).into_response();
    };
    let Some(pool) = &state.pool else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "product database is not configured");
    };
    match run_search(pool, &query).await {
        Ok(products) => Json(SearchResponse { products }).into_response(),
        Err(err) => {
            warn!(error = %err, "product search failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

async fn run_search(pool: &PgPool, query: &SearchQuery) -> Result<Vec<ProductRow>, sqlx::Error> {
    let mut statement = sqlx::query(&query.sql);
    for pattern in &query.patterns {
        statement = statement.bind(pattern.as_str());
    }
    if let Some(limit) = query.limit {
        statement = statement.bind(limit);
    }
    let rows = statement.fetch_all(pool).await?;
    rows.iter().map(product_from_row).collect()
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}
