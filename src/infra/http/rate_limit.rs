//! Admission control in front of every route except health and metrics.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::error::ErrorReport;
use crate::limiter::RateDecision;

use super::middleware::RequestContext;
use super::state::AppState;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const CLIENT_ID_HEADER: &str = "x-client-id";
const ANONYMOUS_CLIENT: &str = "anonymous";

/// Paths that must stay reachable under load.
pub const EXEMPT_PATHS: [&str; 2] = ["/health", "/metrics"];

#[derive(Debug, Serialize)]
pub struct RateLimitedBody {
    pub error: &'static str,
    pub retry_after: u64,
}

/// Explicit client id, else the first forwarded address, else a shared anonymous bucket.
pub fn client_id(headers: &HeaderMap) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    header_value(CLIENT_ID_HEADER)
        .or_else(|| {
            header_value("x-forwarded-for")
                .and_then(|value| value.split(',').next())
                .map(str::trim)
        })
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}

fn apply_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
}

pub fn rate_limited(decision: &RateDecision) -> Response {
    let retry_after = decision.retry_after.unwrap_or(1);
    let body = RateLimitedBody {
        error: "rate limit exceeded",
        retry_after,
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    apply_headers(&mut response, decision);
    ErrorReport::from_message(
        "infra::http::rate_limit",
        StatusCode::TOO_MANY_REQUESTS,
        format!("rate_limited: retry_after={retry_after}"),
    )
    .attach(&mut response);
    response
}

pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if EXEMPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let client = match request.extensions().get::<RequestContext>() {
        Some(ctx) => ctx.client.clone(),
        None => client_id(request.headers()),
    };
    let rate = state.adaptive.current_rate().await;
    let decision = state.limiter.check_at_rate(&client, rate).await;
    if !decision.allowed {
        return rate_limited(&decision);
    }

    let mut response = next.run(request).await;
    apply_headers(&mut response, &decision);
    response
}
