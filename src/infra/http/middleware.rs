use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

use super::rate_limit::client_id;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request identity, resolved once and shared by the limiter and the response log.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub client: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: Uuid::new_v4(),
        client: client_id(request.headers()),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// Log every 4xx/5xx with the [`ErrorReport`] the handler attached.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();
    let ctx = request.extensions().get::<RequestContext>().cloned();

    let mut response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let (request_id, client) = match ctx {
        Some(ctx) => (ctx.request_id.to_string(), ctx.client),
        None => (String::new(), String::new()),
    };
    let (source, chain) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        None => ("unknown", Vec::new()),
    };
    let detail = chain.first().map(String::as_str).unwrap_or("-");
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    if status.is_server_error() {
        error!(
            target = "pressroom::http::response",
            status = status.as_u16(),
            %method,
            %path,
            elapsed_ms,
            source,
            detail,
            ?chain,
            %request_id,
            %client,
            "document request failed",
        );
    } else {
        warn!(
            target = "pressroom::http::response",
            status = status.as_u16(),
            %method,
            %path,
            elapsed_ms,
            source,
            detail,
            %request_id,
            %client,
            "document request rejected",
        );
    }

    response
}
