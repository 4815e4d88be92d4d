//! HTTP router

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Router, middleware};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use super::AppState;
use super::handlers::{callback, login};
use super::middleware::auth_redirect;
use super::proxy::forward_handler;

/// Create the router.
///
/// The login and callback routes are served directly; every other path goes
/// through the gate and then the reverse proxy.
pub fn create_router(state: Arc<AppState>) -> Router {
    let proxied = Router::new()
        .fallback(forward_handler)
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth_redirect))
        .with_state(Arc::clone(&state));

    Router::new()
        .route(state.settings.login_path(), get(login))
        .route(state.settings.callback_path(), post(callback))
        .fallback_service(proxied)
        .layer(DefaultBodyLimit::max(state.settings.max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
