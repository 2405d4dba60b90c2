//! Thin HTTP surface over the document service, cache, and task pipeline.

pub mod handlers;
pub mod load;
pub mod middleware;
pub mod rate_limit;
mod state;

pub use state::AppState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};

use self::middleware::{log_responses, set_request_context};

pub fn build_router(state: AppState) -> Router {
    let rate_state = state.clone();
    let load_state = state.clone();

    Router::new()
        .route("/documents", post(handlers::build_document))
        .route("/tasks", post(handlers::submit_task))
        .route("/tasks/batch", post(handlers::submit_batch))
        .route("/tasks/{id}", get(handlers::task_status))
        .route("/metrics", get(handlers::cache_metrics))
        .route("/cache/invalidate", post(handlers::invalidate_cache))
        .route("/cache", delete(handlers::clear_cache))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(
            rate_state,
            rate_limit::enforce_rate_limit,
        ))
        .layer(axum_middleware::from_fn_with_state(
            load_state,
            load::track_load,
        ))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
