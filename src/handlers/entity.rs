//! Entity CRUD handlers, generic over the record type: list, save, replace, update, read, delete.

use crate::context::ExecutionContext;
use crate::entity::{Entity, EntityDescriptor};
use crate::error::RepoError;
use crate::filter::Filter;
use crate::response::{deleted, success_one, success_page};
use crate::service::CrudService;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{Map, Value};

/// `?filter=<json>`; `?query=` is accepted for older clients.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub filter: Option<String>,
    pub query: Option<String>,
}

fn body_object(body: Value) -> Result<Map<String, Value>, RepoError> {
    match body {
        Value::Object(fields) => Ok(fields),
        _ => Err(RepoError::BadRequest("body must be a JSON object".into())),
    }
}

fn hydrate<E: Entity>(fields: Map<String, Value>) -> Result<E, RepoError> {
    EntityDescriptor::of::<E>()
        .hydrate(fields)
        .map_err(|e| RepoError::BadRequest(e.to_string()))
}

/// Fields missing from the body take their zero value.
fn decode_body<E: Entity>(body: Value) -> Result<E, RepoError> {
    hydrate(body_object(body)?)
}

/// The record plus the field names the body actually carried; only those are written.
fn decode_patch<E: Entity>(body: Value) -> Result<(E, Vec<String>), RepoError> {
    let fields = body_object(body)?;
    let supplied = fields.keys().cloned().collect();
    Ok((hydrate(fields)?, supplied))
}

pub async fn list<E: Entity>(
    State(ctx): State<ExecutionContext>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, RepoError> {
    let raw = params.filter.or(params.query).unwrap_or_default();
    let filter = Filter::parse(&raw)?;
    let (records, count) = CrudService::<E>::find_many(&ctx, &filter).await?;
    Ok(success_page(records, count))
}

pub async fn save<E: Entity>(
    State(ctx): State<ExecutionContext>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, RepoError> {
    let record = CrudService::<E>::save(&ctx, decode_body(body)?).await?;
    Ok(success_one(record))
}

pub async fn update<E: Entity>(
    State(ctx): State<ExecutionContext>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, RepoError> {
    let (record, supplied) = decode_patch::<E>(body)?;
    let fields: Vec<&str> = supplied.iter().map(String::as_str).collect();
    let record = CrudService::<E>::update_fields(&ctx, record, &fields).await?;
    Ok(success_one(record))
}

pub async fn delete_one<E: Entity>(
    State(ctx): State<ExecutionContext>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, RepoError> {
    let record: E = decode_body(body)?;
    CrudService::<E>::delete(&ctx, &record).await?;
    Ok(deleted())
}

pub async fn read<E: Entity>(
    State(ctx): State<ExecutionContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, RepoError> {
    let record = CrudService::<E>::find_by_id(&ctx, &id).await?;
    Ok(success_one(record))
}

pub async fn replace_by_id<E: Entity>(
    State(ctx): State<ExecutionContext>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, RepoError> {
    let record = CrudService::<E>::replace_by_id(&ctx, &id, decode_body(body)?).await?;
    Ok(success_one(record))
}

pub async fn update_by_id<E: Entity>(
    State(ctx): State<ExecutionContext>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, RepoError> {
    let (record, supplied) = decode_patch::<E>(body)?;
    let fields: Vec<&str> = supplied.iter().map(String::as_str).collect();
    let record = CrudService::<E>::update_fields_by_id(&ctx, &id, record, &fields).await?;
    Ok(success_one(record))
}

pub async fn delete_by_id<E: Entity>(
    State(ctx): State<ExecutionContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, RepoError> {
    CrudService::<E>::delete_by_id(&ctx, &id).await?;
    Ok(deleted())
}
