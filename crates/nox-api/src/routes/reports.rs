//! # Revenue Reporting
//!
//! - **GET `/v1/reports/revenue?from=YYYY-MM-DD&to=YYYY-MM-DD[&venue_id=]`**
//!
//! Builds a gap-free day or week series over committed `paid` callbacks,
//! bucketed by commit time. Quiet days appear with zero counts so dashboard
//! charts have no holes. Both bounds are inclusive calendar dates in UTC.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use nox_core::{build_series, TimeRange, Timestamp};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::effects::PaymentStatus;
use crate::error::AppError;
use crate::extractors::extract_query;
use crate::routes::payments::PaymentCallbackRequest;
use crate::state::AppState;

/// Longest accepted report range, in days.
const MAX_REPORT_DAYS: i64 = 731;

/// Query parameters for the revenue report.
#[derive(Debug, Deserialize, IntoParams)]
pub struct RevenueQuery {
    /// First day, `YYYY-MM-DD`.
    pub from: String,
    /// Last day, `YYYY-MM-DD`, inclusive.
    pub to: String,
    /// Restrict to one venue.
    pub venue_id: Option<String>,
}

/// Aggregate for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RevenueTotals {
    pub payments: u64,
    /// Sum of `amount_minor` over the bucket's payments.
    pub revenue_minor: i64,
}

impl RevenueTotals {
    fn add(&mut self, amount_minor: i64) {
        self.payments += 1;
        self.revenue_minor = self.revenue_minor.saturating_add(amount_minor);
    }
}

/// One bucket of the series.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevenueBucket {
    /// Bucket key: the day, or the Monday starting the week (`YYYY-MM-DD`).
    pub bucket: String,
    #[serde(flatten)]
    pub totals: RevenueTotals,
}

/// Revenue series over a date range.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevenueReport {
    pub from: String,
    pub to: String,
    /// `day` for ranges of at most ten days, otherwise `week`.
    pub granularity: String,
    pub venue_id: Option<String>,
    pub buckets: Vec<RevenueBucket>,
    pub total: RevenueTotals,
}

/// Build the reports router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/reports/revenue", get(revenue_report))
}

/// GET /v1/reports/revenue: Gap-free revenue series.
#[utoipa::path(
    get,
    path = "/v1/reports/revenue",
    params(RevenueQuery),
    responses(
        (status = 200, description = "Revenue series", body = RevenueReport),
        (status = 422, description = "Malformed or reversed date range", body = crate::error::ErrorBody),
        (status = 503, description = "Event store unavailable", body = crate::error::ErrorBody),
    ),
    tag = "reports"
)]
pub async fn revenue_report(
    State(state): State<AppState>,
    query: Result<Query<RevenueQuery>, QueryRejection>,
) -> Result<Json<RevenueReport>, AppError> {
    let q = extract_query(query)?;
    let from = Timestamp::parse_date(q.from.trim())?;
    let to = Timestamp::end_of_date(Timestamp::parse_date(q.to.trim())?.date());
    let range = TimeRange::new(from, to)?;
    if range.span_days() > MAX_REPORT_DAYS {
        return Err(AppError::Validation(format!(
            "range spans {} days; at most {MAX_REPORT_DAYS} allowed",
            range.span_days()
        )));
    }
    let venue = q.venue_id.as_deref().map(str::trim).filter(|v| !v.is_empty());

    let events = state
        .recorder
        .store()
        .list_recorded_between(range.start(), range.end())
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;

    let mut undecodable = 0usize;
    let points: Vec<(Timestamp, i64)> = events
        .into_iter()
        .filter_map(|event| {
            match serde_json::from_value::<PaymentCallbackRequest>(event.payload) {
                Ok(p) => Some((event.recorded_at, p)),
                Err(_) => {
                    undecodable += 1;
                    None
                }
            }
        })
        .filter(|(_, p)| p.status == PaymentStatus::Paid)
        .filter(|(_, p)| venue.map_or(true, |v| p.venue_id.trim() == v))
        .map(|(at, p)| (at, p.amount_minor))
        .collect();

    if undecodable > 0 {
        tracing::warn!(undecodable, "processed events with unreadable payloads skipped");
    }

    let series = build_series(&range, points, RevenueTotals::default, |agg, amount| {
        agg.add(amount)
    });

    let mut total = RevenueTotals::default();
    let buckets: Vec<RevenueBucket> = series
        .buckets
        .into_points()
        .into_iter()
        .map(|point| {
            total.payments += point.value.payments;
            total.revenue_minor = total.revenue_minor.saturating_add(point.value.revenue_minor);
            RevenueBucket {
                bucket: point.bucket.to_string(),
                totals: point.value,
            }
        })
        .collect();

    Ok(Json(RevenueReport {
        from: range.start().date().to_string(),
        to: range.end().date().to_string(),
        granularity: series.granularity.to_string(),
        venue_id: venue.map(str::to_string),
        buckets,
        total,
    }))
}
