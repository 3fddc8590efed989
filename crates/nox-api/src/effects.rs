//! # Payment Effects
//!
//! What a committed payment callback changes. Runs only for the delivery
//! that committed the transaction, so implementations need not be
//! idempotent themselves.

use async_trait::async_trait;
use chrono::Utc;
use nox_core::TransactionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::state::{OrderRecord, OrderStatus, Store};

/// Gateway-reported outcome of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Failed,
}

/// A validated payment callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub transaction_id: TransactionId,
    pub order_id: String,
    pub venue_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentStatus,
}

/// A downstream effect could not be applied.
#[derive(Error, Debug)]
pub enum EffectError {
    /// The effect's target could not be updated.
    #[error("effect target unavailable: {0}")]
    Unavailable(String),
}

/// Side effects of a committed payment.
#[async_trait]
pub trait PaymentEffects: Send + Sync {
    /// Apply the effects of `payment`.
    async fn apply(&self, payment: &Payment) -> Result<(), EffectError>;
}

/// Marks orders paid in the in-memory order ledger.
#[derive(Debug, Clone)]
pub struct OrderLedgerEffects {
    orders: Store<OrderRecord>,
}

impl OrderLedgerEffects {
    pub fn new(orders: Store<OrderRecord>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl PaymentEffects for OrderLedgerEffects {
    async fn apply(&self, payment: &Payment) -> Result<(), EffectError> {
        let now = Utc::now();
        let record = self.orders.upsert(
            &payment.order_id,
            || OrderRecord {
                order_id: payment.order_id.clone(),
                venue_id: payment.venue_id.clone(),
                status: OrderStatus::Pending,
                amount_minor: None,
                currency: None,
                paid_transaction_id: None,
                failed_attempts: 0,
                updated_at: now,
            },
            |order| {
                order.updated_at = now;
                match payment.status {
                    PaymentStatus::Failed => {
                        order.failed_attempts = order.failed_attempts.saturating_add(1);
                    }
                    PaymentStatus::Paid if order.status == OrderStatus::Paid => {
                        // A second distinct transaction for a settled order.
                        tracing::warn!(
                            order_id = %order.order_id,
                            transaction_id = %payment.transaction_id,
                            paid_by = ?order.paid_transaction_id,
                            "order already paid by another transaction"
                        );
                    }
                    PaymentStatus::Paid => {
                        order.status = OrderStatus::Paid;
                        order.amount_minor = Some(payment.amount_minor);
                        order.currency = Some(payment.currency.clone());
                        order.paid_transaction_id = Some(payment.transaction_id.to_string());
                    }
                }
            },
        );

        tracing::info!(
            order_id = %record.order_id,
            status = ?record.status,
            transaction_id = %payment.transaction_id,
            "order ledger updated"
        );
        Ok(())
    }
}
