//! HTTP surface: the render trigger plus a few admin endpoints.

use crate::model::SiteId;
use crate::security;
use crate::service::HreflangService;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<HreflangService>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HreflangQuery {
    pub page_id: Option<u64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/sites/:site_id/hreflang", get(hreflang))
        .route("/sites/:site_id/invalidate", post(invalidate))
        .route("/sweep", post(sweep))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.cache().metrics().report())
}

/// Tag block for a page head. Resolution problems give an empty block,
/// never an error status.
async fn hreflang(
    State(state): State<AppState>,
    Path(site_id): Path<u64>,
    Query(query): Query<HreflangQuery>,
) -> Response {
    let site_id = SiteId(site_id);
    if !state.service.registry().is_active(site_id) {
        return (StatusCode::NOT_FOUND, "Unknown site").into_response();
    }

    let block = match state.service.find_page(site_id, query.page_id).await {
        Ok(Some(page)) => state.service.render_head(site_id, &page).await,
        Ok(None) => return (StatusCode::NOT_FOUND, "Unknown page").into_response(),
        Err(e) => {
            warn!(site = %site_id, "Page lookup failed, emitting no tags: {}", e);
            String::new()
        }
    };

    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        block,
    )
        .into_response()
}

async fn invalidate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(site_id): Path<u64>,
) -> Response {
    if !security::is_authorized(&headers, state.api_key.as_deref()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let site_id = SiteId(site_id);
    if state.service.registry().get(site_id).is_none() {
        return (StatusCode::NOT_FOUND, "Unknown site").into_response();
    }

    state.service.invalidate(site_id).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn sweep(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !security::is_authorized(&headers, state.api_key.as_deref()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match state.service.sweep().await {
        Some(report) => Json(report).into_response(),
        None => (StatusCode::CONFLICT, "Sweep already running").into_response(),
    }
}
