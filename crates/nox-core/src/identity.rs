//! # Identity Newtypes
//!
//! [`TransactionId`] is the gateway-assigned identifier carried by every
//! payment callback. It is opaque: the only rules are that it is non-empty
//! and fits the `processed_events.transaction_id` column.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum length of a transaction identifier in bytes.
pub const MAX_TRANSACTION_ID_LEN: usize = 255;

/// External transaction identifier, unique per payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(String);

impl TransactionId {
    /// Create a validated transaction identifier.
    ///
    /// Surrounding whitespace is trimmed. Gateways occasionally pad fields in
    /// form-encoded callbacks and the padded and unpadded forms must collide.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyTransactionId);
        }
        if trimmed.len() > MAX_TRANSACTION_ID_LEN {
            return Err(ValidationError::TransactionIdTooLong {
                max: MAX_TRANSACTION_ID_LEN,
                len: trimmed.len(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Access the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TransactionId {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
