//! # Integration Tests for nox-api
//!
//! Drives the assembled router in-process: health probes, callback
//! deduplication and its effects on the order ledger, store outages,
//! revenue series, rate limiting, and the OpenAPI document.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use nox_api::effects::{EffectError, Payment, PaymentEffects};
use nox_api::state::{AppConfig, AppState};
use nox_core::{
    InsertOutcome, MemoryEventStore, ProcessedEvent, ProcessedEventStore, RateLimitConfig,
    StoreError, Timestamp, TransactionId,
};

fn test_state() -> AppState {
    AppState::try_new().unwrap()
}

async fn send(
    app: &axum::Router,
    request: Request<Body>,
) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn callback(tx: &str, order: &str, amount: i64, status: &str) -> Value {
    json!({
        "transaction_id": tx,
        "order_id": order,
        "venue_id": "venue-a",
        "amount_minor": amount,
        "currency": "EUR",
        "status": status,
    })
}

/// Store that fails every call.
struct DownStore;

#[async_trait]
impl ProcessedEventStore for DownStore {
    async fn insert(&self, _: &ProcessedEvent) -> Result<InsertOutcome, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn find(&self, _: &TransactionId) -> Result<Option<ProcessedEvent>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn list_recorded_between(
        &self,
        _: Timestamp,
        _: Timestamp,
    ) -> Result<Vec<ProcessedEvent>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// Effects that always fail.
struct BrokenEffects;

#[async_trait]
impl PaymentEffects for BrokenEffects {
    async fn apply(&self, _: &Payment) -> Result<(), EffectError> {
        Err(EffectError::Unavailable("ledger offline".into()))
    }
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let app = nox_api::app(test_state());
    let (status, _, body) = send(&app, get("/health/liveness")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_readiness_probe_in_memory() {
    let app = nox_api::app(test_state());
    let (status, _, body) = send(&app, get("/health/readiness")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ready");
}

// -- Payment Callbacks ----------------------------------------------------------

#[tokio::test]
async fn test_callback_commits_once_then_reports_duplicate() {
    let app = nox_api::app(test_state());
    let body = callback("gw-1001", "ord-1", 4_500, "paid");

    let (status, _, first) = send(&app, post_json("/v1/payments/callback", &body)).await;
    assert_eq!(status, StatusCode::OK);
    let first: Value = serde_json::from_str(&first).unwrap();
    assert_eq!(first["committed"], true);
    assert_eq!(first["duplicate"], false);

    let (status, _, second) = send(&app, post_json("/v1/payments/callback", &body)).await;
    assert_eq!(status, StatusCode::OK);
    let second: Value = serde_json::from_str(&second).unwrap();
    assert_eq!(second["committed"], false);
    assert_eq!(second["duplicate"], true);
    assert_eq!(second["transaction_id"], "gw-1001");
}

#[tokio::test]
async fn test_committed_callback_marks_order_paid() {
    let app = nox_api::app(test_state());
    send(&app, post_json("/v1/payments/callback", &callback("gw-1", "ord-7", 1_200, "paid"))).await;

    let (status, _, body) = send(&app, get("/v1/orders/ord-7")).await;
    assert_eq!(status, StatusCode::OK);
    let order: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(order["status"], "paid");
    assert_eq!(order["paid_transaction_id"], "gw-1");
    assert_eq!(order["amount_minor"], 1_200);
}

#[tokio::test]
async fn test_duplicate_failed_callback_counts_once() {
    let app = nox_api::app(test_state());
    let body = callback("gw-f", "ord-2", 1_200, "failed");
    send(&app, post_json("/v1/payments/callback", &body)).await;
    send(&app, post_json("/v1/payments/callback", &body)).await;

    let (_, _, body) = send(&app, get("/v1/orders/ord-2")).await;
    let order: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(order["status"], "pending");
    assert_eq!(order["failed_attempts"], 1);
}

#[tokio::test]
async fn test_parallel_deliveries_apply_effects_once() {
    let state = test_state();
    let app = nox_api::app(state.clone());
    let body = callback("gw-race", "ord-race", 900, "failed");

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let app = app.clone();
            let body = body.clone();
            tokio::spawn(async move { send(&app, post_json("/v1/payments/callback", &body)).await })
        })
        .collect();

    let mut committed = 0;
    for h in handles {
        let (status, _, body) = h.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_str(&body).unwrap();
        if v["committed"] == true {
            committed += 1;
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(state.orders.get("ord-race").unwrap().failed_attempts, 1);
}

#[tokio::test]
async fn test_callback_validation_errors() {
    let app = nox_api::app(test_state());

    let (status, _, body) = send(
        &app,
        post_json("/v1/payments/callback", &callback("", "ord-1", 100, "paid")),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let err: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(err["error"]["code"], "VALIDATION_ERROR");

    let (status, _, _) = send(
        &app,
        post_json("/v1/payments/callback", &callback("gw-2", "ord-1", -5, "paid")),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _, body) = send(
        &app,
        post_json("/v1/payments/callback", &json!({"transaction_id": "gw-3"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let err: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(err["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_store_outage_is_503_and_nothing_applied() {
    let state =
        AppState::try_with_store(AppConfig::default(), Arc::new(DownStore), None).unwrap();
    let app = nox_api::app(state.clone());

    let (status, _, body) = send(
        &app,
        post_json("/v1/payments/callback", &callback("gw-9", "ord-9", 100, "paid")),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let err: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(err["error"]["code"], "SERVICE_UNAVAILABLE");
    assert!(state.orders.get("ord-9").is_none());

    let (status, _, _) = send(&app, get("/v1/payments/gw-9")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_effect_failure_after_commit_is_500() {
    let state = test_state().with_effects(Arc::new(BrokenEffects));
    let app = nox_api::app(state);
    let body = callback("gw-e", "ord-e", 100, "paid");

    let (status, _, _) = send(&app, post_json("/v1/payments/callback", &body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    // The transaction stays committed; a retry is a duplicate.
    let (status, _, body) = send(&app, post_json("/v1/payments/callback", &body)).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["duplicate"], true);
}

#[tokio::test]
async fn test_get_payment_reports_processed_state() {
    let app = nox_api::app(test_state());

    let (status, _, body) = send(&app, get("/v1/payments/gw-42")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["processed"], false);

    send(&app, post_json("/v1/payments/callback", &callback("gw-42", "ord-42", 1, "paid"))).await;

    let (_, _, body) = send(&app, get("/v1/payments/gw-42")).await;
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["processed"], true);
}

#[tokio::test]
async fn test_unknown_order_is_404() {
    let app = nox_api::app(test_state());
    let (status, _, body) = send(&app, get("/v1/orders/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let err: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(err["error"]["code"], "NOT_FOUND");
}

// -- Revenue Reports ------------------------------------------------------------

async fn seeded_store() -> MemoryEventStore {
    let store = MemoryEventStore::new();
    let events = [
        ("gw-a", "2024-03-01T22:30:00Z", "venue-a", 1_000, "paid"),
        ("gw-b", "2024-03-01T23:59:59Z", "venue-b", 2_000, "paid"),
        ("gw-c", "2024-03-03T00:00:00Z", "venue-a", 500, "paid"),
        ("gw-d", "2024-03-03T10:00:00Z", "venue-a", 9_999, "failed"),
        ("gw-e", "2024-02-28T12:00:00Z", "venue-a", 7_000, "paid"),
    ];
    for (tx, at, venue, amount, status) in events {
        let mut payload = callback(tx, "ord", amount, status);
        payload["venue_id"] = json!(venue);
        store
            .insert(&ProcessedEvent {
                transaction_id: TransactionId::new(tx).unwrap(),
                payload,
                recorded_at: Timestamp::parse(at).unwrap(),
            })
            .await
            .unwrap();
    }
    store
}

fn report_app(store: MemoryEventStore) -> axum::Router {
    let state = AppState::try_with_store(AppConfig::default(), Arc::new(store), None).unwrap();
    nox_api::app(state)
}

#[tokio::test]
async fn test_revenue_report_day_buckets_are_gap_free() {
    let app = report_app(seeded_store().await);
    let (status, _, body) =
        send(&app, get("/v1/reports/revenue?from=2024-03-01&to=2024-03-04")).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_str(&body).unwrap();

    assert_eq!(report["granularity"], "day");
    let buckets = report["buckets"].as_array().unwrap();
    let keys: Vec<&str> = buckets.iter().map(|b| b["bucket"].as_str().unwrap()).collect();
    assert_eq!(keys, ["2024-03-01", "2024-03-02", "2024-03-03", "2024-03-04"]);

    assert_eq!(buckets[0]["payments"], 2);
    assert_eq!(buckets[0]["revenue_minor"], 3_000);
    assert_eq!(buckets[1]["payments"], 0);
    assert_eq!(buckets[2]["payments"], 1);
    assert_eq!(buckets[2]["revenue_minor"], 500);
    assert_eq!(report["total"]["revenue_minor"], 3_500);
}

#[tokio::test]
async fn test_revenue_report_filters_by_venue() {
    let app = report_app(seeded_store().await);
    let (_, _, body) = send(
        &app,
        get("/v1/reports/revenue?from=2024-03-01&to=2024-03-04&venue_id=venue-b"),
    )
    .await;
    let report: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["venue_id"], "venue-b");
    assert_eq!(report["total"]["payments"], 1);
    assert_eq!(report["total"]["revenue_minor"], 2_000);
}

#[tokio::test]
async fn test_revenue_report_week_buckets_for_long_ranges() {
    let app = report_app(seeded_store().await);
    let (status, _, body) =
        send(&app, get("/v1/reports/revenue?from=2024-02-21&to=2024-03-06")).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_str(&body).unwrap();

    assert_eq!(report["granularity"], "week");
    let keys: Vec<&str> = report["buckets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["bucket"].as_str().unwrap())
        .collect();
    assert_eq!(keys, ["2024-02-19", "2024-02-26", "2024-03-04"]);
    // 2024-02-28 (7000), 2024-03-01 (1000 + 2000), 2024-03-03 (500) share the week of 02-26.
    assert_eq!(report["buckets"][1]["revenue_minor"], 10_500);
}

#[tokio::test]
async fn test_revenue_report_reversed_range_is_422() {
    let app = report_app(MemoryEventStore::new());
    let (status, _, body) =
        send(&app, get("/v1/reports/revenue?from=2024-03-05&to=2024-03-01")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let err: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(err["error"]["code"], "VALIDATION_ERROR");
    assert!(err["error"]["message"].as_str().unwrap().contains("invalid range"));
}

#[tokio::test]
async fn test_revenue_report_bad_date_is_422() {
    let app = report_app(MemoryEventStore::new());
    let (status, _, _) = send(&app, get("/v1/reports/revenue?from=03/01/2024&to=2024-03-01")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, _, _) = send(&app, get("/v1/reports/revenue?from=2024-03-01")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_revenue_report_single_day() {
    let app = report_app(seeded_store().await);
    let (_, _, body) = send(&app, get("/v1/reports/revenue?from=2024-03-01&to=2024-03-01")).await;
    let report: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["granularity"], "day");
    assert_eq!(report["buckets"].as_array().unwrap().len(), 1);
    assert_eq!(report["buckets"][0]["payments"], 2);
}

// -- Rate Limiting ----------------------------------------------------------------

#[tokio::test]
async fn test_rate_limit_per_client() {
    let config = AppConfig {
        rate_limit: RateLimitConfig {
            max_requests: 2,
            window_secs: 60,
        },
        ..AppConfig::default()
    };
    let app = nox_api::app(AppState::try_with_config(config, None).unwrap());

    let from = |ip: &str| {
        Request::builder()
            .uri("/v1/payments/gw-1")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let (status, _, _) = send(&app, from("203.0.113.7")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, headers, body) = send(&app, from("203.0.113.7")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(headers.contains_key("retry-after"));
    let err: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(err["error"]["code"], "RATE_LIMITED");

    let (status, _, _) = send(&app, from("198.51.100.2")).await;
    assert_eq!(status, StatusCode::OK);

    // Probes are never limited.
    let (status, _, _) = send(&app, get("/health/liveness")).await;
    assert_eq!(status, StatusCode::OK);
}

// -- Metrics & OpenAPI ------------------------------------------------------------

#[tokio::test]
async fn test_metrics_endpoint_counts_callbacks() {
    let app = nox_api::app(test_state());
    let body = callback("gw-m", "ord-m", 10, "paid");
    send(&app, post_json("/v1/payments/callback", &body)).await;
    send(&app, post_json("/v1/payments/callback", &body)).await;

    let (status, _, text) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("nox_callbacks_total{outcome=\"committed\"} 1"));
    assert!(text.contains("nox_callbacks_total{outcome=\"duplicate\"} 1"));
    assert!(text.contains("path=\"/v1/payments/callback\""));
}

#[tokio::test]
async fn test_metrics_can_be_disabled() {
    let config = AppConfig {
        metrics_enabled: false,
        ..AppConfig::default()
    };
    let app = nox_api::app(AppState::try_with_config(config, None).unwrap());
    let (status, _, _) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_openapi_document_served() {
    let app = nox_api::app(test_state());
    let (status, _, body) = send(&app, get("/openapi.json")).await;
    assert_eq!(status, StatusCode::OK);
    let doc: Value = serde_json::from_str(&body).unwrap();
    assert!(doc["paths"]["/v1/payments/callback"].is_object());
    assert!(doc["paths"]["/v1/reports/revenue"].is_object());
}
