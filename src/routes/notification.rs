//! Notification routes. Global and per-user paths share handlers; the `:user` segment picks the scope.
//! Static `/secrets` and `/users` segments take priority over the `:resources` parameter.

use crate::handlers::{
    create, create_secret, delete as delete_handler, delete_secret, list, list_secrets, read, read_secret,
    update, update_secret, update_status,
};
use crate::state::AppState;
use axum::{routing::get, routing::put, Router};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub fn notification_routes(state: AppState) -> Router {
    let body_limit = state.config.body_limit_bytes;
    Router::new()
        .route("/secrets", get(list_secrets).post(create_secret))
        .route(
            "/secrets/:secret",
            get(read_secret).put(update_secret).delete(delete_secret),
        )
        .route("/:resources", get(list).post(create))
        .route("/:resources/:name", get(read).put(update).delete(delete_handler))
        .route("/:resources/:name/status", put(update_status))
        .route("/users/:user/:resources", get(list).post(create))
        .route(
            "/users/:user/:resources/:name",
            get(read).put(update).delete(delete_handler),
        )
        .route("/users/:user/:resources/:name/status", put(update_status))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
