//! # HTTP Middleware
//!
//! - `metrics`: Prometheus request counters and latency histogram.
//! - `rate_limit`: per-client sliding-window limiting on `/v1/*`.

pub mod metrics;
pub mod rate_limit;
