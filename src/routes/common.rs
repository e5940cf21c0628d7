//! Common routes: health, readiness, version.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    store: &'static str,
    cache: &'static str,
    revision: String,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

/// Ready once the store answers and the cache is not resyncing.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyBody>) {
    let store_ok = state.store.ping().await.is_ok();
    let synced = state.cache.is_synced();
    let status = if store_ok && synced {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyBody {
            status: if status == StatusCode::OK { "ok" } else { "degraded" },
            store: if store_ok { "ok" } else { "unavailable" },
            cache: if synced { "synced" } else { "resyncing" },
            revision: state.cache.revision().to_string(),
        }),
    )
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /health, GET /ready, GET /version.
pub fn common_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/version", get(version))
        .with_state(state)
}
