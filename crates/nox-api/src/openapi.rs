//! # OpenAPI Document Assembly
//!
//! Assembles the utoipa-documented routes into one OpenAPI 3.1 document
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// Assembled OpenAPI spec for the API surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Nox API",
        version = "0.1.0",
        description = "Payment callback intake, order ledger, and revenue reporting for the Nox venue platform.",
        license(name = "AGPL-3.0-or-later")
    ),
    paths(
        crate::routes::payments::payment_callback,
        crate::routes::payments::get_payment,
        crate::routes::orders::get_order,
        crate::routes::reports::revenue_report,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        crate::effects::PaymentStatus,
        crate::state::OrderRecord,
        crate::state::OrderStatus,
        crate::routes::payments::PaymentCallbackRequest,
        crate::routes::payments::CallbackResponse,
        crate::routes::payments::PaymentStatusResponse,
        crate::routes::reports::RevenueReport,
        crate::routes::reports::RevenueBucket,
        crate::routes::reports::RevenueTotals,
    )),
    tags(
        (name = "payments", description = "Payment gateway callbacks"),
        (name = "orders", description = "Order ledger"),
        (name = "reports", description = "Venue revenue reporting"),
    )
)]
pub struct ApiDoc;

/// Serves the OpenAPI JSON spec at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_lists_every_route() {
        let spec = ApiDoc::openapi();
        for path in [
            "/v1/payments/callback",
            "/v1/payments/{transaction_id}",
            "/v1/orders/{order_id}",
            "/v1/reports/revenue",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
