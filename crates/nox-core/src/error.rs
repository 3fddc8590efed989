//! # Error Hierarchy
//!
//! Structured error types for the Nox core, built with `thiserror`.
//!
//! The taxonomy is deliberately narrow:
//!
//! - [`BucketError`]: a time range whose bounds are reversed.
//! - [`ValidationError`]: a domain primitive failed its constructor checks.
//! - [`StoreError`]: the persistent store could not complete a request.
//! - [`RecorderError`]: what the idempotent recorder surfaces to callers.
//!
//! A duplicate delivery is **not** an error anywhere in this hierarchy. It is
//! reported as data (`RecordOutcome { committed: false }`).

use thiserror::Error;

/// Top-level error type for the Nox core.
#[derive(Error, Debug)]
pub enum NoxError {
    /// Time bucketing failure.
    #[error("bucket error: {0}")]
    Bucket(#[from] BucketError),

    /// Domain primitive validation failure.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Idempotent recording failure.
    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),

    /// Timestamp could not be parsed.
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
}

/// Errors raised while bucketing a time range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BucketError {
    /// The range's lower bound lies after its upper bound.
    #[error("invalid range: from {from} is after to {to}")]
    InvalidRange {
        /// The offending lower bound (ISO8601).
        from: String,
        /// The offending upper bound (ISO8601).
        to: String,
    },
}

/// Domain primitive validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Transaction identifier is empty or whitespace.
    #[error("transaction id must not be empty")]
    EmptyTransactionId,

    /// Transaction identifier exceeds the storage column width.
    #[error("transaction id exceeds {max} bytes (got {len})")]
    TransactionIdTooLong {
        /// Maximum accepted length in bytes.
        max: usize,
        /// Length that was supplied.
        len: usize,
    },
}

/// Failure of a store collaborator.
///
/// Covers network failures, timeouts, pool exhaustion, and internal store
/// errors. A uniqueness violation is never reported through this type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not complete the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded.
    #[error("corrupt record for {key}: {reason}")]
    Corrupt {
        /// Key of the unreadable record.
        key: String,
        /// Decoder message.
        reason: String,
    },
}

/// Errors surfaced by the idempotent recorder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    /// The store could not answer; the transaction's state is unknown.
    ///
    /// Callers must not treat this as "not processed" nor as "already
    /// processed". The safe response upstream is a retryable failure.
    #[error("store unavailable while handling {transaction_id}: {source}")]
    StoreUnavailable {
        /// Transaction being looked up or recorded.
        transaction_id: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
}

impl RecorderError {
    /// Transaction the failure relates to.
    pub fn transaction_id(&self) -> &str {
        match self {
            Self::StoreUnavailable { transaction_id, .. } => transaction_id,
        }
    }
}
