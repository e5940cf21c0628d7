//! Standard response envelope helpers.

use crate::model::ListResult;
use axum::{http::StatusCode, Json};
use serde::Serialize;

/// Body of a successful delete.
#[derive(Serialize)]
pub struct SuccessMarker {
    pub message: &'static str,
}

pub fn success_one<T: Serialize>(data: T) -> (StatusCode, Json<T>) {
    (StatusCode::CREATED, Json(data))
}

pub fn success_one_ok<T: Serialize>(data: T) -> (StatusCode, Json<T>) {
    (StatusCode::OK, Json(data))
}

/// `{"items": [...], "totalItems": n}` where `totalItems` counts matches before paging.
pub fn success_list<T: Serialize>(result: ListResult<T>) -> (StatusCode, Json<ListResult<T>>) {
    (StatusCode::OK, Json(result))
}

pub fn success_deleted() -> (StatusCode, Json<SuccessMarker>) {
    (StatusCode::OK, Json(SuccessMarker { message: "success" }))
}
