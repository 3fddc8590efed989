//! # nox-api: Axum API Service for the Nox Venue Platform
//!
//! HTTP surface over `nox-core`: payment gateway callbacks go through the
//! idempotent recorder before touching the order ledger, and venue
//! dashboards read gap-free revenue series built by the bucketizer.
//!
//! ## API Surface
//!
//! | Prefix                 | Module                 | Domain              |
//! |------------------------|------------------------|---------------------|
//! | `/v1/payments/*`       | [`routes::payments`]   | Gateway callbacks   |
//! | `/v1/orders/*`         | [`routes::orders`]     | Order ledger        |
//! | `/v1/reports/*`        | [`routes::reports`]    | Revenue reporting   |
//! | `/health/*`            | this module            | Probes              |
//! | `/metrics`             | this module            | Prometheus scrape   |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → RateLimitMiddleware → Handler
//! ```
//!
//! Probes and `/metrics` skip rate limiting.

pub mod db;
pub mod effects;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Callback bodies are small; anything larger is not a gateway.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Assemble the full application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let metrics_on = state.config.metrics_enabled;

    let mut api = Router::new()
        .merge(routes::payments::router())
        .merge(routes::orders::router())
        .merge(routes::reports::router())
        .merge(openapi::router())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(axum::Extension(state.limiter.clone()));

    if metrics_on {
        api = api
            .layer(from_fn(middleware::metrics::metrics_middleware))
            .layer(axum::Extension(state.metrics.clone()));
    }

    let api = api
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let mut unlimited = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness));

    if metrics_on {
        unlimited = unlimited.route("/metrics", axum::routing::get(prometheus_metrics));
    }

    let unlimited = unlimited.with_state(state);

    Router::new().merge(unlimited).merge(api)
}

/// Liveness probe: 200 while the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: 503 when the configured database is unreachable.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }
    (StatusCode::OK, "ready").into_response()
}

/// GET /metrics: Prometheus text exposition.
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.gather_and_encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("metrics encoding failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}
