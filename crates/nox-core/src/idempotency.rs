//! # Idempotent Event Recorder
//!
//! Payment gateways retry callbacks on timeout and sometimes deliver the same
//! webhook twice in parallel. The financial effect of a payment (marking the
//! order paid, confirming the reservation) must happen once per gateway
//! transaction.
//!
//! ## Protocol
//!
//! ```text
//! record_if_new(tx) ──► store.insert(tx) ──► Inserted  ──► committed: true  ──► apply effects
//!                                       ├──► Duplicate ──► committed: false ──► 200, no effects
//!                                       └──► Err        ──► StoreUnavailable ──► retryable failure
//! ```
//!
//! The recorder issues exactly one insert and never a preceding lookup. Two
//! deliveries racing through "exists? → no → insert" would both pass the
//! check; the store's uniqueness constraint is the only arbiter.
//!
//! ## States (per transaction)
//!
//! `Unseen` → `Committed`, once, on the first successful insert. There is no
//! transition out of `Committed`. A failed or cancelled insert leaves the
//! transaction `Unseen` and safe to retry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::{RecorderError, StoreError};
use crate::identity::TransactionId;
use crate::temporal::Timestamp;

// ---------------------------------------------------------------------------
// Records & outcomes
// ---------------------------------------------------------------------------

/// A durably committed external transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Gateway transaction identifier; the uniqueness key.
    pub transaction_id: TransactionId,
    /// Callback body as received.
    pub payload: serde_json::Value,
    /// When the event was committed.
    pub recorded_at: Timestamp,
}

/// Result of a uniqueness-constrained insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was written.
    Inserted,
    /// A record with the same key already exists; nothing was written.
    Duplicate,
}

/// Outcome of [`IdempotentRecorder::record_if_new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// `true` only for the delivery that committed the transaction.
    pub committed: bool,
}

impl RecordOutcome {
    /// Outcome of the first delivery.
    pub const COMMITTED: Self = Self { committed: true };
    /// Outcome of every later delivery.
    pub const DUPLICATE: Self = Self { committed: false };

    /// Whether this delivery is a duplicate.
    pub fn is_duplicate(&self) -> bool {
        !self.committed
    }
}

// ---------------------------------------------------------------------------
// Store collaborator
// ---------------------------------------------------------------------------

/// Persistent store of processed events.
///
/// Implementations must resolve concurrent inserts of one key so that exactly
/// one returns [`InsertOutcome::Inserted`] and the rest
/// [`InsertOutcome::Duplicate`]. Any other failure is a [`StoreError`]; it
/// must never be folded into `Duplicate` or into `Ok(None)`.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Insert `event` keyed by its transaction id.
    async fn insert(&self, event: &ProcessedEvent) -> Result<InsertOutcome, StoreError>;

    /// Point lookup by transaction id.
    async fn find(&self, transaction_id: &TransactionId)
        -> Result<Option<ProcessedEvent>, StoreError>;

    /// Events recorded within `[from, to]`, oldest first.
    ///
    /// Used by reporting. The recorder never calls it.
    async fn list_recorded_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<ProcessedEvent>, StoreError>;
}

/// Single-process store.
///
/// The existence check and the write share one write-lock critical section,
/// which gives the same exactly-one-winner guarantee as a unique index within
/// one process. Horizontally scaled deployments must use a shared store.
#[derive(Debug, Default, Clone)]
pub struct MemoryEventStore {
    events: Arc<RwLock<HashMap<TransactionId, ProcessedEvent>>>,
}

impl MemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether no event has been committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProcessedEventStore for MemoryEventStore {
    async fn insert(&self, event: &ProcessedEvent) -> Result<InsertOutcome, StoreError> {
        let mut events = self.events.write();
        if events.contains_key(&event.transaction_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        events.insert(event.transaction_id.clone(), event.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn find(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<ProcessedEvent>, StoreError> {
        Ok(self.events.read().get(transaction_id).cloned())
    }

    async fn list_recorded_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<ProcessedEvent>, StoreError> {
        let mut found: Vec<ProcessedEvent> = self
            .events
            .read()
            .values()
            .filter(|e| from <= e.recorded_at && e.recorded_at <= to)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// At-most-once gate for external callbacks.
///
/// Cheap to clone; clones share the store and clock.
#[derive(Clone)]
pub struct IdempotentRecorder {
    store: Arc<dyn ProcessedEventStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for IdempotentRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotentRecorder").finish_non_exhaustive()
    }
}

impl IdempotentRecorder {
    /// Recorder over `store` using the system clock.
    pub fn new(store: Arc<dyn ProcessedEventStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Recorder over `store` stamping events with `clock`.
    pub fn with_clock(store: Arc<dyn ProcessedEventStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn ProcessedEventStore> {
        &self.store
    }

    /// Whether `transaction_id` has been committed.
    ///
    /// Informational only. Deciding whether to apply effects must go through
    /// [`record_if_new`](Self::record_if_new).
    ///
    /// # Errors
    ///
    /// [`RecorderError::StoreUnavailable`] if the lookup fails. A failed
    /// lookup is never reported as `false`.
    pub async fn is_processed(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<bool, RecorderError> {
        self.store
            .find(transaction_id)
            .await
            .map(|found| found.is_some())
            .map_err(|source| unavailable(transaction_id, source))
    }

    /// Commit `transaction_id` unless it already is.
    ///
    /// Returns `committed: true` for exactly one delivery per transaction and
    /// `committed: false` for every other. Only the committed delivery may
    /// apply side effects.
    ///
    /// # Errors
    ///
    /// [`RecorderError::StoreUnavailable`] if the insert fails for any reason
    /// other than the uniqueness constraint. The transaction stays `Unseen`.
    pub async fn record_if_new(
        &self,
        transaction_id: &TransactionId,
        payload: serde_json::Value,
    ) -> Result<RecordOutcome, RecorderError> {
        let event = ProcessedEvent {
            transaction_id: transaction_id.clone(),
            payload,
            recorded_at: Timestamp::from_utc(self.clock.now()),
        };

        match self.store.insert(&event).await {
            Ok(InsertOutcome::Inserted) => {
                tracing::info!(transaction_id = %transaction_id, "transaction committed");
                Ok(RecordOutcome::COMMITTED)
            }
            Ok(InsertOutcome::Duplicate) => {
                tracing::info!(transaction_id = %transaction_id, "duplicate delivery ignored");
                Ok(RecordOutcome::DUPLICATE)
            }
            Err(source) => {
                tracing::error!(
                    transaction_id = %transaction_id,
                    error = %source,
                    "failed to record transaction"
                );
                Err(unavailable(transaction_id, source))
            }
        }
    }
}

fn unavailable(transaction_id: &TransactionId, source: StoreError) -> RecorderError {
    RecorderError::StoreUnavailable {
        transaction_id: transaction_id.to_string(),
        source,
    }
}
