//! # Per-Client Rate Limiting
//!
//! Sliding-window limiter from `nox_core::ratelimit`, keyed by client
//! address. Behind a reverse proxy the first `X-Forwarded-For` hop is the
//! client; requests without it share the `"anonymous"` key.

use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use nox_core::SlidingWindowLimiter;

use crate::error::ErrorBody;

/// Rate limit key for a request.
pub(crate) fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Middleware that enforces per-client rate limits.
///
/// A limiter store failure lets the request through.
pub async fn rate_limit_middleware(request: Request, next: Next) -> Response {
    let Some(limiter) = request.extensions().get::<SlidingWindowLimiter>().cloned() else {
        return next.run(request).await;
    };

    let key = client_key(request.headers());
    let decision = match limiter.check(&key).await {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!(client = %key, error = %e, "rate limit store failed; allowing request");
            return next.run(request).await;
        }
    };

    if !decision.allowed {
        tracing::info!(client = %key, limit = decision.limit, "rate limit exceeded");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorBody::new("RATE_LIMITED", "rate limit exceeded")),
        )
            .into_response();
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(0usize));
        if let Some(secs) = decision.retry_after_secs {
            headers.insert("retry-after", HeaderValue::from(secs));
        }
        return response;
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(xff: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(v) = xff {
            h.insert("x-forwarded-for", HeaderValue::from_str(v).unwrap());
        }
        h
    }

    #[test]
    fn key_is_first_forwarded_hop() {
        assert_eq!(client_key(&headers(Some("203.0.113.7, 10.0.0.1"))), "203.0.113.7");
        assert_eq!(client_key(&headers(Some("198.51.100.2"))), "198.51.100.2");
    }

    #[test]
    fn key_falls_back_to_anonymous() {
        assert_eq!(client_key(&headers(None)), "anonymous");
        assert_eq!(client_key(&headers(Some(" , 10.0.0.1"))), "anonymous");
    }
}
