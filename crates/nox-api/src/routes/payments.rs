//! # Payment Callback Intake
//!
//! - **POST `/v1/payments/callback`**: gateway webhook. Commits the
//!   transaction at most once and applies its effects only on commit.
//! - **GET `/v1/payments/{transaction_id}`**: whether a transaction has
//!   been committed.
//!
//! ## Response contract with the gateway
//!
//! | Recorder outcome | HTTP | Effects |
//! |------------------|------|---------|
//! | committed        | 200  | applied once |
//! | duplicate        | 200  | none |
//! | store failure    | 503  | none; gateway retries |
//!
//! A duplicate is acknowledged with 200 so the gateway stops retrying.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use nox_core::TransactionId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::effects::{Payment, PaymentStatus};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::middleware::metrics::CallbackOutcome;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Payment gateway callback body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentCallbackRequest {
    /// Gateway transaction identifier; the deduplication key.
    pub transaction_id: String,
    pub order_id: String,
    pub venue_id: String,
    /// Amount in minor currency units (cents). Integers only.
    pub amount_minor: i64,
    /// ISO 4217 alphabetic code.
    pub currency: String,
    pub status: PaymentStatus,
}

impl Validate for PaymentCallbackRequest {
    fn validate(&self) -> Result<(), String> {
        TransactionId::new(self.transaction_id.as_str()).map_err(|e| e.to_string())?;
        if self.order_id.trim().is_empty() {
            return Err("order_id must not be empty".to_string());
        }
        if self.venue_id.trim().is_empty() {
            return Err("venue_id must not be empty".to_string());
        }
        if self.amount_minor < 0 {
            return Err("amount_minor must not be negative".to_string());
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err("currency must be a 3-letter uppercase ISO 4217 code".to_string());
        }
        Ok(())
    }
}

impl PaymentCallbackRequest {
    fn to_payment(&self) -> Result<Payment, AppError> {
        Ok(Payment {
            transaction_id: TransactionId::new(self.transaction_id.as_str())?,
            order_id: self.order_id.trim().to_string(),
            venue_id: self.venue_id.trim().to_string(),
            amount_minor: self.amount_minor,
            currency: self.currency.clone(),
            status: self.status,
        })
    }
}

/// Acknowledgement returned to the gateway.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CallbackResponse {
    pub transaction_id: String,
    /// `true` only for the delivery that committed the transaction.
    pub committed: bool,
    /// `true` when the transaction had already been committed.
    pub duplicate: bool,
}

/// Processing state of a transaction.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub transaction_id: String,
    pub processed: bool,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the payments router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/payments/callback", post(payment_callback))
        .route("/v1/payments/{transaction_id}", get(get_payment))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/payments/callback: Record a gateway callback at most once.
#[utoipa::path(
    post,
    path = "/v1/payments/callback",
    request_body = PaymentCallbackRequest,
    responses(
        (status = 200, description = "Callback acknowledged (committed or duplicate)", body = CallbackResponse),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
        (status = 503, description = "Event store unavailable; retry", body = crate::error::ErrorBody),
    ),
    tag = "payments"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    body: Result<Json<PaymentCallbackRequest>, JsonRejection>,
) -> Result<Json<CallbackResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let payment = req.to_payment()?;
    let payload = serde_json::to_value(&req).map_err(|e| AppError::Internal(e.to_string()))?;

    let outcome = match state.recorder.record_if_new(&payment.transaction_id, payload).await {
        Ok(outcome) => outcome,
        Err(e) => {
            state.metrics.record_callback(CallbackOutcome::Error);
            return Err(e.into());
        }
    };

    if outcome.is_duplicate() {
        state.metrics.record_callback(CallbackOutcome::Duplicate);
    } else {
        state.metrics.record_callback(CallbackOutcome::Committed);
        if let Err(e) = state.effects.apply(&payment).await {
            // Committed but not applied. A gateway retry is now a duplicate,
            // so this needs operator reconciliation.
            tracing::error!(
                transaction_id = %payment.transaction_id,
                order_id = %payment.order_id,
                error = %e,
                "payment committed but effects failed"
            );
            return Err(AppError::Internal(format!(
                "effects failed for committed transaction {}",
                payment.transaction_id
            )));
        }
    }

    Ok(Json(CallbackResponse {
        transaction_id: payment.transaction_id.to_string(),
        committed: outcome.committed,
        duplicate: outcome.is_duplicate(),
    }))
}

/// GET /v1/payments/{transaction_id}: Whether a transaction was committed.
#[utoipa::path(
    get,
    path = "/v1/payments/{transaction_id}",
    params(("transaction_id" = String, Path, description = "Gateway transaction ID")),
    responses(
        (status = 200, description = "Processing state", body = PaymentStatusResponse),
        (status = 422, description = "Invalid transaction ID", body = crate::error::ErrorBody),
        (status = 503, description = "Event store unavailable", body = crate::error::ErrorBody),
    ),
    tag = "payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    let id = TransactionId::new(transaction_id)?;
    let processed = state.recorder.is_processed(&id).await?;
    Ok(Json(PaymentStatusResponse {
        transaction_id: id.to_string(),
        processed,
    }))
}
