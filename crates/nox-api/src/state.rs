//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! ## Architecture
//!
//! - **Recorder**: the idempotent gate for payment callbacks, over either
//!   the Postgres `processed_events` table or an in-memory store.
//! - **Orders**: the order ledger the committed callbacks update.
//! - **Effects**: what a committed payment does to the ledger.
//! - **Limiter**: per-client sliding-window rate limiting.
//! - **Metrics**: the Prometheus registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nox_core::{
    IdempotentRecorder, MemoryEventStore, ProcessedEventStore, RateLimitConfig,
    SlidingWindowLimiter, MAX_WINDOW_SECS,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use utoipa::ToSchema;

use crate::effects::{OrderLedgerEffects, PaymentEffects};
use crate::middleware::metrics::ApiMetrics;

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// The lock is `parking_lot` and is never held across an `.await`.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync> {
    data: Arc<RwLock<HashMap<String, T>>>,
}

impl<T: Clone + Send + Sync> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Clone + Send + Sync> Store<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Retrieve a record by key.
    pub fn get(&self, id: &str) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    /// Read-modify-write under a single write lock.
    ///
    /// `init` creates the record when the key is absent. Returns the record
    /// as left by `f`.
    pub fn upsert(&self, id: &str, init: impl FnOnce() -> T, f: impl FnOnce(&mut T)) -> T {
        let mut guard = self.data.write();
        let entry = guard.entry(id.to_string()).or_insert_with(init);
        f(entry);
        entry.clone()
    }

    /// Return the number of records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Order ledger ---------------------------------------------------------------

/// Payment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// No successful payment yet.
    Pending,
    /// A gateway transaction settled the order.
    Paid,
}

/// Order ledger entry, maintained by committed payment callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderRecord {
    pub order_id: String,
    pub venue_id: String,
    pub status: OrderStatus,
    /// Amount of the settling payment, in minor currency units.
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    /// Transaction that settled the order. Set once.
    pub paid_transaction_id: Option<String>,
    /// Failed attempts seen before (or after) settlement.
    pub failed_attempts: u32,
    pub updated_at: DateTime<Utc>,
}

// -- Configuration --------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Configuration could not be read from the environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but its value does not parse.
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Postgres connection string. `None` runs in-memory only.
    pub database_url: Option<String>,
    /// Per-client rate limit.
    pub rate_limit: RateLimitConfig,
    /// Whether `/metrics` and the metrics middleware are mounted.
    pub metrics_enabled: bool,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("rate_limit", &self.rate_limit)
            .field("metrics_enabled", &self.metrics_enabled)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            rate_limit: RateLimitConfig::default(),
            metrics_enabled: true,
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Read configuration from process environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `PORT` | 8080 |
    /// | `DATABASE_URL` | unset (in-memory) |
    /// | `NOX_RATE_LIMIT_MAX` | 100 |
    /// | `NOX_RATE_LIMIT_WINDOW_SECS` | 60 |
    /// | `NOX_METRICS_ENABLED` | true unless `false` |
    /// | `NOX_LOG_FORMAT` | `text`; `json` for JSON lines |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = parse_var(&lookup, "PORT")?.unwrap_or(defaults.port);
        let max_requests =
            parse_var(&lookup, "NOX_RATE_LIMIT_MAX")?.unwrap_or(defaults.rate_limit.max_requests);
        let window_secs: u64 = parse_var(&lookup, "NOX_RATE_LIMIT_WINDOW_SECS")?
            .unwrap_or(defaults.rate_limit.window_secs);
        if window_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "NOX_RATE_LIMIT_WINDOW_SECS",
                value: "0".to_string(),
                reason: "window must be at least one second".to_string(),
            });
        }
        if window_secs > MAX_WINDOW_SECS {
            return Err(ConfigError::Invalid {
                var: "NOX_RATE_LIMIT_WINDOW_SECS",
                value: window_secs.to_string(),
                reason: format!("window must not exceed {MAX_WINDOW_SECS} seconds"),
            });
        }

        let metrics_enabled = lookup("NOX_METRICS_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let log_format = match lookup("NOX_LOG_FORMAT").as_deref() {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "NOX_LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected \"text\" or \"json\"".to_string(),
                })
            }
        };

        Ok(Self {
            port,
            database_url: lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()),
            rate_limit: RateLimitConfig {
                max_requests,
                window_secs,
            },
            metrics_enabled,
            log_format,
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

// -- Application State ------------------------------------------------------------

/// Failure assembling [`AppState`].
#[derive(Error, Debug)]
pub enum StateError {
    /// A Prometheus collector could not be registered.
    #[error("metrics registry: {0}")]
    Metrics(String),
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub recorder: IdempotentRecorder,
    pub orders: Store<OrderRecord>,
    pub effects: Arc<dyn PaymentEffects>,
    pub limiter: SlidingWindowLimiter,
    pub metrics: ApiMetrics,
    /// Present when `DATABASE_URL` is configured.
    pub db_pool: Option<PgPool>,
    pub config: AppConfig,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("orders", &self.orders.len())
            .field("db_pool", &self.db_pool.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// In-memory state with default configuration.
    pub fn try_new() -> Result<Self, StateError> {
        Self::try_with_config(AppConfig::default(), None)
    }

    /// State over the given configuration.
    ///
    /// With a pool, processed events go to Postgres; without, to memory.
    pub fn try_with_config(config: AppConfig, db_pool: Option<PgPool>) -> Result<Self, StateError> {
        let store: Arc<dyn ProcessedEventStore> = match &db_pool {
            Some(pool) => Arc::new(crate::db::processed_events::PgEventStore::new(pool.clone())),
            None => Arc::new(MemoryEventStore::new()),
        };
        Self::try_with_store(config, store, db_pool)
    }

    /// State over an explicit processed-event store.
    pub fn try_with_store(
        config: AppConfig,
        store: Arc<dyn ProcessedEventStore>,
        db_pool: Option<PgPool>,
    ) -> Result<Self, StateError> {
        let orders = Store::new();
        Ok(Self {
            recorder: IdempotentRecorder::new(store),
            effects: Arc::new(OrderLedgerEffects::new(orders.clone())),
            orders,
            limiter: SlidingWindowLimiter::in_memory(config.rate_limit),
            metrics: ApiMetrics::try_new().map_err(|e| StateError::Metrics(e.to_string()))?,
            db_pool,
            config,
        })
    }

    /// Replace the payment effects collaborator.
    pub fn with_effects(mut self, effects: Arc<dyn PaymentEffects>) -> Self {
        self.effects = effects;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |var| {
            pairs
                .iter()
                .find(|(k, _)| *k == var)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn config_defaults() {
        let cfg = AppConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.rate_limit, RateLimitConfig::default());
        assert!(cfg.metrics_enabled);
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn config_overrides() {
        let cfg = AppConfig::from_lookup(env(&[
            ("PORT", "3000"),
            ("DATABASE_URL", "postgres://nox:secret@db/nox"),
            ("NOX_RATE_LIMIT_MAX", "5"),
            ("NOX_RATE_LIMIT_WINDOW_SECS", "10"),
            ("NOX_METRICS_ENABLED", "FALSE"),
            ("NOX_LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.rate_limit.max_requests, 5);
        assert_eq!(cfg.rate_limit.window_secs, 10);
        assert!(!cfg.metrics_enabled);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert!(!format!("{cfg:?}").contains("secret"));
    }

    #[test]
    fn config_rejects_bad_numbers() {
        let err = AppConfig::from_lookup(env(&[("NOX_RATE_LIMIT_MAX", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "NOX_RATE_LIMIT_MAX", .. }));
        assert!(AppConfig::from_lookup(env(&[("PORT", "70000")])).is_err());
        assert!(AppConfig::from_lookup(env(&[("NOX_RATE_LIMIT_WINDOW_SECS", "0")])).is_err());
        assert!(AppConfig::from_lookup(env(&[("NOX_LOG_FORMAT", "xml")])).is_err());
    }

    #[test]
    fn config_bounds_rate_limit_window() {
        let cfg =
            AppConfig::from_lookup(env(&[("NOX_RATE_LIMIT_WINDOW_SECS", "31536000")])).unwrap();
        assert_eq!(cfg.rate_limit.window_secs, MAX_WINDOW_SECS);

        let err = AppConfig::from_lookup(env(&[("NOX_RATE_LIMIT_WINDOW_SECS", "10000000000000")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "NOX_RATE_LIMIT_WINDOW_SECS",
                ..
            }
        ));
    }

    #[test]
    fn store_upsert_creates_then_mutates() {
        let store: Store<u32> = Store::new();
        assert_eq!(store.upsert("a", || 1, |v| *v += 10), 11);
        assert_eq!(store.upsert("a", || 1, |v| *v += 10), 21);
        assert_eq!(store.get("a"), Some(21));
        assert_eq!(store.len(), 1);
    }
}
