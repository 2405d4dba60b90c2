use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};

use super::state::AppState;

/// Count the request as in flight, then publish the aggregate load for the adaptive
/// controller.
pub async fn track_load(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let guard = state.load.begin();
    let response = next.run(request).await;
    drop(guard);

    state
        .load
        .maybe_publish(&state.adaptive, state.cache.hit_rate())
        .await;
    response
}
