//! Generic CRUD execution. Every operation checks the context's handle first, then runs in
//! one transaction scope: commit on success, rollback on any error.

use super::query::QueryPlan;
use crate::context::ExecutionContext;
use crate::entity::{Entity, EntityDescriptor};
use crate::error::RepoError;
use crate::filter::Filter;
use crate::resolver::{assign_identity, has_zero_key, is_zero, record_identity, resolve};
use crate::sql::{self, Predicate};
use crate::store::{fetch_optional, StoreTx, TxScope};
use serde_json::{Map, Value};
use std::marker::PhantomData;

pub struct CrudService<E>(PhantomData<E>);

impl<E: Entity> CrudService<E> {
    /// Records matching `filter`, and the match count when `filter.with_count` is set (0 otherwise).
    pub async fn find_many(ctx: &ExecutionContext, filter: &Filter) -> Result<(Vec<E>, u64), RepoError> {
        let store = ctx.store()?;
        let desc = EntityDescriptor::of::<E>();
        let plan = QueryPlan::build(&desc, filter)?;
        let mut scope = TxScope::begin(store).await?;
        let result = plan.run(scope.tx(), ctx.count_scope()).await;
        let (rows, count) = scope.finish(result).await?;
        let records = rows
            .into_iter()
            .map(|mut row| {
                desc.columns_to_fields(&mut row);
                desc.hydrate(row)
            })
            .collect::<Result<Vec<E>, _>>()?;
        Ok((records, count))
    }

    /// Create when any key field is zero, otherwise overwrite the row with that identity
    /// (inserting it if absent). Returns the stored record.
    pub async fn save(ctx: &ExecutionContext, record: E) -> Result<E, RepoError> {
        let store = ctx.store()?;
        let desc = EntityDescriptor::of::<E>();
        desc.require_keys()?;
        let columns = desc.record_columns(&record)?;
        let q = if has_zero_key(&desc, &columns) {
            let values: Map<String, Value> = columns
                .into_iter()
                .filter(|(col, v)| !v.is_null() && !(desc.is_key_column(col) && is_zero(v)))
                .collect();
            sql::insert(&desc, &values)
        } else {
            sql::upsert(&desc, &columns)
        };
        let mut scope = TxScope::begin(store).await?;
        let result = returning_row(scope.tx(), &desc, &q).await;
        let row = scope.finish(result).await?;
        tracing::debug!(table = %desc.table, "record saved");
        merge_row(&desc, record, row)
    }

    /// Partial update of the row identified by the record's key. Only non-key fields holding
    /// a non-zero value are written; null, 0, "", false and empty collections are left alone.
    pub async fn update(ctx: &ExecutionContext, record: E) -> Result<E, RepoError> {
        let desc = EntityDescriptor::of::<E>();
        let values: Map<String, Value> = desc
            .record_columns(&record)?
            .into_iter()
            .filter(|(col, v)| !is_zero(v) && !desc.is_key_column(col))
            .collect();
        Self::write_update(ctx, &desc, record, values).await
    }

    /// Partial update writing exactly the named fields (serde names), zero values and nulls
    /// included. Key fields and names that are not persisted fields are ignored.
    pub async fn update_fields(ctx: &ExecutionContext, record: E, fields: &[&str]) -> Result<E, RepoError> {
        let desc = EntityDescriptor::of::<E>();
        let mut columns = desc.record_columns(&record)?;
        let values: Map<String, Value> = desc
            .fields
            .iter()
            .filter(|fc| fields.contains(&fc.field.as_str()) && !desc.is_key_column(&fc.column))
            .filter_map(|fc| columns.remove(&fc.column).map(|v| (fc.column.clone(), v)))
            .collect();
        Self::write_update(ctx, &desc, record, values).await
    }

    /// The record addressed by the context's resource id.
    pub async fn find_one(ctx: &ExecutionContext) -> Result<E, RepoError> {
        let store = ctx.store()?;
        let desc = EntityDescriptor::of::<E>();
        desc.require_keys()?;
        let key = resolvable(&desc, ctx.resource_id())?;
        let q = sql::select_by_key(&desc, &key);
        let mut scope = TxScope::begin(store).await?;
        let result = returning_row(scope.tx(), &desc, &q).await;
        let mut row = scope.finish(result).await?;
        desc.columns_to_fields(&mut row);
        desc.hydrate(row)
    }

    pub async fn find_by_id(ctx: &ExecutionContext, id: &str) -> Result<E, RepoError> {
        Self::find_one(&ctx.with_resource_id(id)).await
    }

    /// Deletes the row identified by the record's key. `NotFound` when it does not exist.
    pub async fn delete(ctx: &ExecutionContext, record: &E) -> Result<(), RepoError> {
        let store = ctx.store()?;
        let desc = EntityDescriptor::of::<E>();
        let key = record_identity(&desc, record)?.ok_or_else(|| {
            RepoError::AmbiguousIdentity(format!("delete on {} needs every key field set", desc.table))
        })?;
        Self::delete_matching(store, &desc, &key).await
    }

    pub async fn delete_by_id(ctx: &ExecutionContext, id: &str) -> Result<(), RepoError> {
        let store = ctx.store()?;
        let desc = EntityDescriptor::of::<E>();
        desc.require_keys()?;
        let key = resolvable(&desc, id)?;
        Self::delete_matching(store, &desc, &key).await
    }

    /// `save` with the identity taken from `id`.
    pub async fn replace_by_id(ctx: &ExecutionContext, id: &str, record: E) -> Result<E, RepoError> {
        ctx.store()?;
        let record = assign_identity(&EntityDescriptor::of::<E>(), record, id)?;
        Self::save(ctx, record).await
    }

    /// `update` with the identity taken from `id`.
    pub async fn update_by_id(ctx: &ExecutionContext, id: &str, record: E) -> Result<E, RepoError> {
        ctx.store()?;
        let record = assign_identity(&EntityDescriptor::of::<E>(), record, id)?;
        Self::update(ctx, record).await
    }

    /// `update_fields` with the identity taken from `id`.
    pub async fn update_fields_by_id(
        ctx: &ExecutionContext,
        id: &str,
        record: E,
        fields: &[&str],
    ) -> Result<E, RepoError> {
        ctx.store()?;
        let record = assign_identity(&EntityDescriptor::of::<E>(), record, id)?;
        Self::update_fields(ctx, record, fields).await
    }

    /// With nothing to write the row is re-read, so a missing row is still `NotFound`.
    async fn write_update(
        ctx: &ExecutionContext,
        desc: &EntityDescriptor,
        record: E,
        values: Map<String, Value>,
    ) -> Result<E, RepoError> {
        let store = ctx.store()?;
        let key = record_identity(desc, &record)?.ok_or_else(|| {
            RepoError::AmbiguousIdentity(format!("update on {} needs every key field set", desc.table))
        })?;
        let q = if values.is_empty() {
            sql::select_by_key(desc, &key)
        } else {
            sql::update(desc, &values, &key)
        };
        let mut scope = TxScope::begin(store).await?;
        let result = returning_row(scope.tx(), desc, &q).await;
        let row = scope.finish(result).await?;
        merge_row(desc, record, row)
    }

    async fn delete_matching(
        store: &dyn crate::store::Store,
        desc: &EntityDescriptor,
        key: &Predicate,
    ) -> Result<(), RepoError> {
        let mut scope = TxScope::begin(store).await?;
        let result = async {
            let tx = scope.tx();
            returning_row(tx, desc, &sql::select_by_key(desc, key)).await?;
            tx.execute(&sql::delete(desc, key)).await
        }
        .await;
        let affected = scope.finish(result).await?;
        tracing::debug!(table = %desc.table, affected, "record deleted");
        Ok(())
    }
}

fn resolvable(desc: &EntityDescriptor, id: &str) -> Result<Predicate, RepoError> {
    let key = resolve(desc, id);
    if key.is_empty() {
        return Err(RepoError::NotFound(format!("{}: no identifier", desc.table)));
    }
    Ok(key)
}

/// The single row `q` returns, or `NotFound`.
async fn returning_row(
    tx: &mut dyn StoreTx,
    desc: &EntityDescriptor,
    q: &sql::QueryBuf,
) -> Result<Map<String, Value>, RepoError> {
    fetch_optional(tx, q)
        .await?
        .ok_or_else(|| RepoError::NotFound(desc.table.clone()))
}

/// Overlays the persisted fields of a returned row onto the caller's record, so
/// server-assigned values (keys, defaults) come back and non-persisted fields survive.
fn merge_row<E: Entity>(desc: &EntityDescriptor, record: E, mut row: Map<String, Value>) -> Result<E, RepoError> {
    let mut obj = match serde_json::to_value(record)? {
        Value::Object(m) => m,
        _ => Map::new(),
    };
    for fc in &desc.fields {
        if let Some(v) = row.remove(&fc.column) {
            obj.insert(fc.field.clone(), v);
        }
    }
    Ok(serde_json::from_value(Value::Object(obj))?)
}
