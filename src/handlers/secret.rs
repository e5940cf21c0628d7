//! `/secrets` handlers. Global scope only.

use super::resource::{parse_body, request_context};
use crate::error::AppError;
use crate::response::{success_deleted, success_list, success_one_ok};
use crate::secret::Secret;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

pub async fn list_secrets(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&state);
    Ok(success_list(state.service.list_secrets(&ctx, &params).await?))
}

pub async fn read_secret(
    State(state): State<AppState>,
    Path(secret): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&state);
    Ok(success_one_ok(state.service.get_secret(&ctx, &secret).await?))
}

/// `POST /secrets`: the name comes from the body.
pub async fn create_secret(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&state);
    let secret: Secret = parse_body(body)?;
    Ok(success_one_ok(state.service.create_or_update_secret(&ctx, None, secret).await?))
}

/// `PUT /secrets/{secret}`: same operation, with the name fixed by the path.
pub async fn update_secret(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&state);
    let secret: Secret = parse_body(body)?;
    Ok(success_one_ok(
        state.service.create_or_update_secret(&ctx, Some(&name), secret).await?,
    ))
}

pub async fn delete_secret(
    State(state): State<AppState>,
    Path(secret): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&state);
    state.service.delete_secret(&ctx, &secret).await?;
    Ok(success_deleted())
}
