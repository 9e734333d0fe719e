//! Standard response envelope helpers.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Header carrying the `withCount` result on list responses.
pub const COUNT_HEADER: &str = "count";

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct SuccessMany<T> {
    pub data: Vec<T>,
    pub meta: MetaCount,
}

#[derive(Serialize)]
pub struct MetaCount {
    pub count: u64,
}

/// Body of a successful delete.
#[derive(Serialize)]
pub struct DeleteResult {
    pub count: u64,
}

pub fn success_one<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::OK, Json(SuccessOne { data, meta: None }))
}

/// List envelope. `count` is the filter's match count (0 unless requested), repeated in the `count` header.
pub fn success_page<T: Serialize>(data: Vec<T>, count: u64) -> Response {
    let mut res = (
        StatusCode::OK,
        Json(SuccessMany {
            data,
            meta: MetaCount { count },
        }),
    )
        .into_response();
    res.headers_mut().insert(COUNT_HEADER, HeaderValue::from(count));
    res
}

pub fn deleted() -> (StatusCode, Json<DeleteResult>) {
    (StatusCode::OK, Json(DeleteResult { count: 1 }))
}
