use crate::metrics::{EXPLAIN_MICROS, HTTP_REQUESTS_TOTAL};
use axum::http::{header, HeaderMap, StatusCode};
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use datasearch_backend::{JsonLinesSource, SearchService};
use datasearch_backend::supervisor::DEFAULT_BATCH;
use datasearch_core::{split_params, FilterTerms, QueryOptions, SearchError};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: SearchService,
    /// Only source a reindex reads from.
    pub data_path: Option<PathBuf>,
    pub admin_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchBody {
    pub terms: FilterTerms,
    pub options: QueryOptions,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/:endpoint", get(search_query))
        .route("/v1/:endpoint/search", post(search_body))
        .route("/admin/explain-query", post(admin_explain_query))
        .route("/admin/reindex", post(admin_reindex))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub fn error_response(e: SearchError) -> Response {
    let status = match &e {
        SearchError::Validation(_) | SearchError::Unsupported(_) => StatusCode::BAD_REQUEST,
        SearchError::UnknownEndpoint { .. } => StatusCode::NOT_FOUND,
        SearchError::Backend(_) => StatusCode::BAD_GATEWAY,
        SearchError::Dictionary(_) | SearchError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "request failed");
    }
    let body = match e {
        SearchError::Validation(issues) => json!({ "errors": issues }),
        other => json!({ "error": other.to_string() }),
    };
    (status, Json(body)).into_response()
}

fn count(route: &str, status: StatusCode) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[route, status.as_str()])
        .inc();
}

/// Checks `Authorization: Bearer <token>` against the configured admin
/// token. With no token configured every admin call is refused.
fn enforce_admin(app: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = app.admin_token.as_deref() else {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": "admin routes are disabled"})),
        )
            .into_response());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));
    match presented {
        None => Err((StatusCode::UNAUTHORIZED, Json(json!({"error": "missing token"})))
            .into_response()),
        Some(token) if !token_eq(token.as_bytes(), expected.as_bytes()) => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "bad token"})),
        )
            .into_response()),
        Some(_) => Ok(()),
    }
}

fn token_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn run_search(
    app: &AppState,
    route: &str,
    endpoint: String,
    terms: FilterTerms,
    mut options: QueryOptions,
) -> Response {
    options.endpoint = Some(endpoint);
    let resp = match app.service.search(&terms, &options).await {
        Ok(doc) => (StatusCode::OK, Json(doc)).into_response(),
        Err(e) => error_response(e),
    };
    count(route, resp.status());
    resp
}

async fn search_query(
    State(app): State<AppState>,
    Path(endpoint): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    match split_params(pairs) {
        Ok((terms, options)) => run_search(&app, "query", endpoint, terms, options).await,
        Err(e) => {
            let resp = error_response(e);
            count("query", resp.status());
            resp
        }
    }
}

async fn search_body(
    State(app): State<AppState>,
    Path(endpoint): Path<String>,
    Json(req): Json<SearchBody>,
) -> Response {
    run_search(&app, "search", endpoint, req.terms, req.options).await
}

async fn admin_explain_query(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SearchBody>,
) -> Response {
    if let Err(resp) = enforce_admin(&app, &headers) {
        count("explain", resp.status());
        return resp;
    }
    let t0 = std::time::Instant::now();
    let resp = match app.service.explain(&req.terms, &req.options) {
        Ok(plan) => {
            EXPLAIN_MICROS.observe(t0.elapsed().as_micros() as f64);
            (StatusCode::OK, Json(plan)).into_response()
        }
        Err(e) => error_response(e),
    };
    count("explain", resp.status());
    resp
}

async fn admin_reindex(State(app): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = enforce_admin(&app, &headers) {
        count("reindex", resp.status());
        return resp;
    }
    let Some(path) = app.data_path.clone() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "DATA_PATH is unset"})),
        )
            .into_response();
    };
    let source = match JsonLinesSource::open(&path, DEFAULT_BATCH).await {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    let job = app.service.reindex(Box::new(source));
    tracing::info!(path = %path.display(), generation = job.generation, "reindex requested");
    count("reindex", StatusCode::ACCEPTED);
    (
        StatusCode::ACCEPTED,
        Json(json!({"generation": job.generation, "index": job.index})),
    )
        .into_response()
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    let _ = encoder.encode(&metric_families, &mut buf);
    (StatusCode::OK, String::from_utf8(buf).unwrap_or_default())
}
