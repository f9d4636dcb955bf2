//! Rate limiting middleware for the AI Router Service
//!
//! Each route group is layered with one limiter. Allowed responses carry the
//! `X-RateLimit-*` headers; rejected requests get a 429 envelope with
//! `Retry-After` as well.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use tracing::warn;

use crate::handlers::ApiEnvelope;
use crate::rate_limiter::{RateLimitResult, RateLimiter};

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

fn set_header(headers: &mut HeaderMap, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Add the `X-RateLimit-*` headers; the reset is a unix timestamp in seconds
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    set_header(headers, LIMIT_HEADER, result.limit);
    set_header(headers, REMAINING_HEADER, result.remaining);
    set_header(headers, RESET_HEADER, result.reset_time.timestamp());
}

/// 429 response for a rejected request
pub fn rate_limited_response(limiter: &RateLimiter, result: &RateLimitResult) -> Response {
    let retry_after = result.retry_after_secs(Utc::now());
    let body = ApiEnvelope::error("rate_limited", limiter.profile().message.clone());

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, result);
    set_header(headers, "retry-after", retry_after);
    response
}

/// Rate limiting middleware function
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let result = limiter.check_request(request.headers());

    if !result.allowed {
        warn!(
            limiter = %limiter.profile().name,
            path = %request.uri().path(),
            hits = result.total_hits,
            "Rate limit exceeded"
        );
        return rate_limited_response(&limiter, &result);
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &result);
    response
}
