//! # Order Ledger
//!
//! - **GET `/v1/orders/{order_id}`**: payment state of an order as left by
//!   committed callbacks.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::error::AppError;
use crate::state::{AppState, OrderRecord};

/// Build the orders router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/orders/{order_id}", get(get_order))
}

/// GET /v1/orders/{order_id}: Order ledger entry.
#[utoipa::path(
    get,
    path = "/v1/orders/{order_id}",
    params(("order_id" = String, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order ledger entry", body = OrderRecord),
        (status = 404, description = "No callback seen for this order", body = crate::error::ErrorBody),
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderRecord>, AppError> {
    state
        .orders
        .get(order_id.trim())
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))
}
