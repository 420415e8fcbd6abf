//! Axum HTTP surface: sync triggers and the cached product/price listing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use catsync_core::{CatalogPage, SyncKind};
use catsync_storage::listing_cache_key;
use catsync_sync::{SyncOutcome, SyncService};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub const CRATE_NAME: &str = "catsync-web";

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PER_PAGE: u32 = 15;
pub const MAX_PER_PAGE: u32 = 100;
const LISTING_PATH: &str = "/api/product-prices";

#[derive(Clone)]
pub struct AppState {
    pub service: SyncService,
    listing_cache: Arc<ListingCache>,
}

impl AppState {
    pub fn new(service: SyncService) -> Self {
        let ttl = service.config().listing_cache_ttl();
        Self {
            service,
            listing_cache: Arc::new(ListingCache::new(ttl)),
        }
    }
}

/// In-process response cache; entries expire after the TTL and old versions simply stop being hit.
struct ListingCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Value)>>,
}

impl ListingCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|(expires_at, _)| *expires_at > Instant::now())
            .map(|(_, payload)| payload.clone())
    }

    async fn put(&self, key: String, payload: Value) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (expires_at, _)| *expires_at > now);
        entries.insert(key, (now + self.ttl, payload));
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/sync/products", post(sync_products_handler))
        .route("/api/sync/prices", post(sync_prices_handler))
        .route(LISTING_PATH, get(product_prices_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(service: SyncService) -> anyhow::Result<()> {
    let port = service.config().web_port;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "http server listening");
    axum::serve(listener, app(AppState::new(service))).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    message: String,
    processed: u64,
    inserted: u64,
    updated: u64,
    deleted: u64,
}

async fn sync_products_handler(State(state): State<Arc<AppState>>) -> Response {
    let outcome = state.service.coordinator().run_product_sync().await;
    sync_response(SyncKind::Products, outcome)
}

async fn sync_prices_handler(State(state): State<Arc<AppState>>) -> Response {
    let outcome = state.service.coordinator().run_price_sync().await;
    sync_response(SyncKind::Prices, outcome)
}

fn sync_response(kind: SyncKind, outcome: SyncOutcome) -> Response {
    let counts = outcome.counts();
    let (status, message) = match outcome {
        SyncOutcome::Completed(counts) if counts.processed == 0 => (
            StatusCode::OK,
            format!("No eligible {kind} found to synchronize."),
        ),
        SyncOutcome::Completed(_) => {
            let label = match kind {
                SyncKind::Products => "Products",
                SyncKind::Prices => "Prices",
            };
            (StatusCode::OK, format!("{label} synchronized successfully."))
        }
        SyncOutcome::Conflict => (
            StatusCode::CONFLICT,
            "A synchronization is already running. Try again shortly.".to_string(),
        ),
        SyncOutcome::Failed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error during synchronization.".to_string(),
        ),
    };
    let body = SyncResponse {
        message,
        processed: counts.processed,
        inserted: counts.inserted,
        updated: counts.updated,
        deleted: counts.deleted,
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Default)]
struct ListingQuery {
    page: Option<String>,
    per_page: Option<String>,
}

impl ListingQuery {
    /// Repeated parameters keep the last value; unknown ones are ignored.
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut query = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "page" => query.page = Some(value),
                "per_page" => query.per_page = Some(value),
                _ => {}
            }
        }
        query
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pagination {
    page: u32,
    per_page: u32,
}

impl Pagination {
    /// Canonical query string: unknown parameters and formatting variants collapse.
    fn query_string(&self) -> String {
        format!("page={}&per_page={}", self.page, self.per_page)
    }
}

type FieldErrors = BTreeMap<&'static str, Vec<String>>;

fn parse_pagination(query: &ListingQuery) -> Result<Pagination, FieldErrors> {
    let mut errors = FieldErrors::new();
    let page = parse_bounded(&mut errors, "page", query.page.as_deref(), DEFAULT_PAGE, None);
    let per_page = parse_bounded(
        &mut errors,
        "per_page",
        query.per_page.as_deref(),
        DEFAULT_PER_PAGE,
        Some(MAX_PER_PAGE),
    );
    if errors.is_empty() {
        Ok(Pagination { page, per_page })
    } else {
        Err(errors)
    }
}

fn parse_bounded(
    errors: &mut FieldErrors,
    field: &'static str,
    raw: Option<&str>,
    default: u32,
    max: Option<u32>,
) -> u32 {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return default;
    }
    let Ok(value) = raw.parse::<i64>() else {
        errors
            .entry(field)
            .or_default()
            .push(format!("The {field} field must be an integer."));
        return default;
    };
    if value < 1 {
        errors
            .entry(field)
            .or_default()
            .push(format!("The {field} field must be at least 1."));
        return default;
    }
    match max {
        Some(max) if value > i64::from(max) => {
            errors
                .entry(field)
                .or_default()
                .push(format!("The {field} field must not be greater than {max}."));
            default
        }
        _ => u32::try_from(value).unwrap_or(u32::MAX),
    }
}

async fn product_prices_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let pagination = match parse_pagination(&ListingQuery::from_pairs(params)) {
        Ok(pagination) => pagination,
        Err(errors) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "message": "Invalid pagination parameters.",
                    "errors": errors,
                })),
            )
                .into_response();
        }
    };

    let cache_key = match state.service.cache_version().current().await {
        Ok(version) => Some(listing_cache_key(&version, &pagination.query_string())),
        Err(err) => {
            warn!(error = %err, "cache version unavailable; serving listing uncached");
            None
        }
    };
    if let Some(key) = &cache_key {
        if let Some(payload) = state.listing_cache.get(key).await {
            debug!(key = %key, "listing cache hit");
            return Json(payload).into_response();
        }
    }

    let page = match state
        .service
        .store()
        .list_catalog(pagination.page, pagination.per_page)
        .await
    {
        Ok(page) => page,
        Err(err) => {
            error!(error = %err, "listing query failed");
            return server_error();
        }
    };
    let payload = listing_payload(page, pagination);
    if let Some(key) = cache_key {
        state.listing_cache.put(key, payload.clone()).await;
    }
    Json(payload).into_response()
}

fn listing_payload(page: CatalogPage, pagination: Pagination) -> Value {
    let per_page = u64::from(pagination.per_page);
    let current = u64::from(pagination.page);
    let last_page = page.total.div_ceil(per_page).max(1);
    let shown = page.products.len() as u64;
    let (from, to) = if shown == 0 {
        (None, None)
    } else {
        let from = (current - 1) * per_page + 1;
        (Some(from), Some(from + shown - 1))
    };
    let link = |n: u64| format!("{LISTING_PATH}?page={n}&per_page={per_page}");

    json!({
        "data": page.products,
        "meta": {
            "current_page": current,
            "per_page": per_page,
            "total": page.total,
            "last_page": last_page,
            "from": from,
            "to": to,
        },
        "links": {
            "first": link(1),
            "last": link(last_page),
            "prev": (current > 1).then(|| link(current - 1)),
            "next": (current < last_page).then(|| link(current + 1)),
        },
    })
}

fn server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": "Internal server error." })),
    )
        .into_response()
}
