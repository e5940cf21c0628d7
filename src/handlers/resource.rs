//! Resource handlers. One set serves both `/{resources}/...` and `/users/{user}/{resources}/...`;
//! the optional `user` path parameter selects the scope.

use crate::context::RequestContext;
use crate::error::AppError;
use crate::model::GenericObject;
use crate::response::{success_deleted, success_list, success_one, success_one_ok};
use crate::secret::ConfigWithSecret;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct ResourcePath {
    #[serde(default)]
    pub user: Option<String>,
    pub resources: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl ResourcePath {
    fn name(&self) -> Result<&str, AppError> {
        self.name
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("missing resource name in path".into()))
    }
}

/// Decode a JSON body into `T`, reporting shape errors in the standard error envelope.
pub(crate) fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, AppError> {
    if !body.is_object() {
        return Err(AppError::BadRequest("body must be a JSON object".into()));
    }
    serde_json::from_value(body).map_err(|e| AppError::BadRequest(format!("invalid body: {}", e)))
}

pub(crate) fn request_context(state: &AppState) -> RequestContext {
    RequestContext::with_timeout(state.config.request_timeout())
}

pub async fn list(
    State(state): State<AppState>,
    Path(path): Path<ResourcePath>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&state);
    let result = state
        .service
        .list(&ctx, &path.resources, path.user.as_deref(), &params)
        .await?;
    Ok(success_list(result))
}

pub async fn read(
    State(state): State<AppState>,
    Path(path): Path<ResourcePath>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&state);
    let object = state
        .service
        .get(&ctx, &path.resources, path.user.as_deref(), path.name()?)
        .await?;
    Ok(success_one_ok(object))
}

pub async fn create(
    State(state): State<AppState>,
    Path(path): Path<ResourcePath>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&state);
    let body: ConfigWithSecret = parse_body(body)?;
    let created = state
        .service
        .create(&ctx, &path.resources, path.user.as_deref(), body)
        .await?;
    Ok(success_one(created))
}

pub async fn update(
    State(state): State<AppState>,
    Path(path): Path<ResourcePath>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&state);
    let body: ConfigWithSecret = parse_body(body)?;
    let updated = state
        .service
        .update(&ctx, &path.resources, path.user.as_deref(), path.name()?, body)
        .await?;
    Ok(success_one_ok(updated))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(path): Path<ResourcePath>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&state);
    let body: GenericObject = parse_body(body)?;
    let updated = state
        .service
        .update_status(&ctx, &path.resources, path.user.as_deref(), path.name()?, body)
        .await?;
    Ok(success_one_ok(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(path): Path<ResourcePath>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&state);
    state
        .service
        .delete(&ctx, &path.resources, path.user.as_deref(), path.name()?)
        .await?;
    Ok(success_deleted())
}
