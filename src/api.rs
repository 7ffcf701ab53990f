// src/api.rs
//! Thin HTTP front end over the Selector: serves the rendered feed from a
//! TTL cache plus a couple of diagnostic routes.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tower_http::cors::CorsLayer;

use crate::publish::{render_rss, ChannelMeta};
use crate::select::{select, SelectionPolicy};
use crate::store::{ItemStore, ScoringStats};

pub const RSS_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";
const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// A rendered feed document.
#[derive(Debug, Clone)]
pub struct CachedFeed {
    pub xml: Arc<str>,
    pub etag: String,
    pub item_count: usize,
    pub built_at: Instant,
    pub built_at_utc: DateTime<Utc>,
}

/// Single-slot cache with an absolute TTL (no sliding refresh).
#[derive(Debug)]
pub struct FeedCache {
    ttl: Duration,
    slot: Mutex<Option<CachedFeed>>,
}

impl FeedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached feed if it is younger than the TTL at `now`.
    pub fn fresh(&self, now: Instant) -> Option<CachedFeed> {
        let guard = self.slot.lock().ok()?;
        guard
            .as_ref()
            .filter(|f| now.saturating_duration_since(f.built_at) < self.ttl)
            .cloned()
    }

    /// Whatever is cached, fresh or not.
    pub fn peek(&self) -> Option<CachedFeed> {
        self.slot.lock().ok().and_then(|g| g.clone())
    }

    pub fn put(&self, feed: CachedFeed) {
        if let Ok(mut g) = self.slot.lock() {
            *g = Some(feed);
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut g) = self.slot.lock() {
            *g = None;
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: ItemStore,
    pub policy: SelectionPolicy,
    pub meta: ChannelMeta,
    pub cache: Arc<FeedCache>,
}

impl AppState {
    pub fn new(store: ItemStore, policy: SelectionPolicy, meta: ChannelMeta, ttl: Duration) -> Self {
        Self {
            store,
            policy,
            meta,
            cache: Arc::new(FeedCache::new(ttl)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/", get(index))
        .route("/feed", get(feed))
        .route("/feed.xml", get(feed))
        .route("/debug", get(debug))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Internal failure surfaced as a 500 with a short body.
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(target: "api", error = ?self.0, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedParams {
    #[serde(default)]
    refresh: Option<String>,
}

impl FeedParams {
    fn wants_refresh(&self) -> bool {
        matches!(self.refresh.as_deref(), Some("1" | "true" | "yes"))
    }
}

/// Select + render + hash, off the async runtime (SQLite is blocking).
pub async fn build_feed(state: &AppState) -> anyhow::Result<CachedFeed> {
    let store = state.store.clone();
    let policy = state.policy;
    let meta = state.meta.clone();
    tokio::task::spawn_blocking(move || {
        let now = Utc::now();
        let items = select(&store, &policy, now)?;
        let xml = render_rss(&meta, &items, now)?;
        Ok::<_, anyhow::Error>(CachedFeed {
            etag: etag_for(&xml),
            xml: Arc::from(xml),
            item_count: items.len(),
            built_at: Instant::now(),
            built_at_utc: now,
        })
    })
    .await?
}

fn etag_for(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    let hex: String = digest.iter().take(12).map(|b| format!("{b:02x}")).collect();
    format!("\"{hex}\"")
}

async fn feed(
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let refresh = params.wants_refresh();
    let cached = if refresh {
        None
    } else {
        state.cache.fresh(Instant::now())
    };

    let (feed, hit) = match cached {
        Some(f) => (f, true),
        None => {
            let f = build_feed(&state).await?;
            tracing::info!(target: "api", items = f.item_count, refresh, "feed rebuilt");
            state.cache.put(f.clone());
            (f, false)
        }
    };

    let cache_header = HeaderValue::from_static(if hit { "HIT" } else { "MISS" });
    let etag = HeaderValue::from_str(&feed.etag)?;

    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .is_some_and(|v| v.as_bytes() == feed.etag.as_bytes());
    if not_modified {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(header::ETAG, etag), (X_CACHE, cache_header)],
        )
            .into_response());
    }

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(RSS_CONTENT_TYPE)),
            (header::ETAG, etag),
            (X_CACHE, cache_header),
        ],
        feed.xml.to_string(),
    )
        .into_response())
}

async fn index(State(state): State<AppState>) -> Result<String, ApiError> {
    let stats = store_stats(&state).await?;
    let cached = state
        .cache
        .peek()
        .map(|f| format!("{} items, built {}", f.item_count, f.built_at_utc.to_rfc3339()))
        .unwrap_or_else(|| "not built yet".to_string());
    Ok(format!(
        "{title}\n\n\
         items: {total}\n\
         scored: {scored} ({rate:.1}%)\n\
         kept (score >= {threshold}): {kept}\n\
         full text: {resolved}\n\
         cached feed: {cached}\n\n\
         feed: /feed.xml  (append ?refresh=1 to rebuild)\n",
        title = state.meta.title,
        total = stats.total,
        scored = stats.scored,
        rate = stats.scoring_rate(),
        threshold = state.policy.threshold,
        kept = stats.kept,
        resolved = stats.resolved,
    ))
}

#[derive(Debug, Serialize)]
pub struct CacheInfo {
    pub item_count: usize,
    pub built_at: DateTime<Utc>,
    pub age_secs: u64,
    pub ttl_secs: u64,
    pub fresh: bool,
    pub etag: String,
}

#[derive(Debug, Serialize)]
pub struct DebugInfo {
    pub stats: ScoringStats,
    pub cache: Option<CacheInfo>,
    pub threshold: f64,
    pub limit: usize,
    pub recency_days: i64,
    pub evergreen_score: f64,
}

async fn debug(State(state): State<AppState>) -> Result<Json<DebugInfo>, ApiError> {
    let stats = store_stats(&state).await?;
    let now = Instant::now();
    let ttl = state.cache.ttl();
    let cache = state.cache.peek().map(|f| {
        let age = now.saturating_duration_since(f.built_at);
        CacheInfo {
            item_count: f.item_count,
            built_at: f.built_at_utc,
            age_secs: age.as_secs(),
            ttl_secs: ttl.as_secs(),
            fresh: age < ttl,
            etag: f.etag,
        }
    });
    Ok(Json(DebugInfo {
        stats,
        cache,
        threshold: state.policy.threshold,
        limit: state.policy.limit,
        recency_days: state.policy.recency_days,
        evergreen_score: state.policy.evergreen_score,
    }))
}

async fn store_stats(state: &AppState) -> anyhow::Result<ScoringStats> {
    let store = state.store.clone();
    let threshold = state.policy.threshold;
    tokio::task::spawn_blocking(move || store.scoring_stats(threshold)).await?
}
