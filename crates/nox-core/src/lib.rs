//! # nox-core: Domain Core for the Nox Venue Platform
//!
//! This crate holds the parts of the platform that carry actual invariants.
//! Everything HTTP- or SQL-shaped lives in `nox-api`; this crate depends on
//! no web framework and no database driver.
//!
//! ## Components
//!
//! 1. **Bucketizer** ([`bucket`]). Partitions a date range into day or week
//!    buckets and builds a zero-initialized, gap-free ordered map so that a
//!    venue dashboard chart never has holes for quiet days.
//!
//! 2. **Idempotent Event Recorder** ([`idempotency`]). Records a payment
//!    gateway transaction identifier at most once. The store's uniqueness
//!    constraint is the arbiter; the recorder never does check-then-insert.
//!
//! 3. **Sliding-window rate limiting** ([`ratelimit`]). Per-client request
//!    accounting behind a pluggable store trait.
//!
//! ## Crate Policy
//!
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.
//! - All timestamps are UTC ([`Timestamp`]); local time zones never enter.
//! - Store failures are errors, never defaulted to "not found" or
//!   "already processed".

pub mod bucket;
pub mod clock;
pub mod error;
pub mod idempotency;
pub mod identity;
pub mod ratelimit;
pub mod temporal;

// Re-export primary types for ergonomic imports.
pub use bucket::{
    bucket_key_of, build_series, choose_granularity, generate_bucket_sequence,
    initialize_bucket_map, BucketKey, BucketMap, BucketPoint, Bucketizer, Granularity,
    SeriesBuild, TimeRange,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{BucketError, NoxError, RecorderError, StoreError, ValidationError};
pub use idempotency::{
    IdempotentRecorder, InsertOutcome, MemoryEventStore, ProcessedEvent, ProcessedEventStore,
    RecordOutcome,
};
pub use identity::TransactionId;
pub use ratelimit::{
    MemoryRateLimitStore, RateDecision, RateLimitConfig, RateLimitStore, SlidingWindowLimiter,
    WindowState, MAX_WINDOW_SECS,
};
pub use temporal::Timestamp;
