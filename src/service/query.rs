//! Filtered reads: validation, optional count, main select, preloads.

use crate::config::CountScope;
use crate::entity::{EntityDescriptor, Relation, RelationKind};
use crate::error::RepoError;
use crate::filter::Filter;
use crate::sql::{self, PgBindValue, Predicate, SelectParts};
use crate::store::StoreTx;
use serde_json::{Map, Value};

/// A filter checked against one entity. Building the plan issues no statement; every
/// shape error surfaces here, before a transaction is opened.
pub(crate) struct QueryPlan<'a> {
    desc: &'a EntityDescriptor,
    filter: &'a Filter,
    preloads: Vec<(&'a Relation, Option<&'a Predicate>)>,
}

impl<'a> QueryPlan<'a> {
    pub fn build(desc: &'a EntityDescriptor, filter: &'a Filter) -> Result<Self, RepoError> {
        filter.validate()?;
        let preloads = filter
            .preloads
            .iter()
            .map(|p| {
                desc.relation(&p.relation)
                    .map(|rel| (rel, p.condition.as_ref()))
                    .ok_or_else(|| {
                        RepoError::malformed(
                            "preloads",
                            format!("{} has no relation named '{}'", desc.table, p.relation),
                        )
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QueryPlan {
            desc,
            filter,
            preloads,
        })
    }

    fn parts(&self) -> SelectParts<'a> {
        SelectParts {
            fields: &self.filter.fields,
            predicate: self.filter.predicate.as_ref(),
            joins: &self.filter.joins,
            groups: &self.filter.groups,
            order: Some(self.filter.order.as_str()),
            limit: self.filter.effective_limit(),
            offset: self.filter.offset,
        }
    }

    /// Column-keyed rows with preloaded relations attached under the relation name, plus the
    /// count (0 unless `withCount`). The count runs first and never sees pagination.
    pub async fn run(
        &self,
        tx: &mut dyn StoreTx,
        scope: CountScope,
    ) -> Result<(Vec<Map<String, Value>>, u64), RepoError> {
        let parts = self.parts();
        let count = if self.filter.with_count {
            let q = sql::count(self.desc, &parts, scope == CountScope::Query);
            tx.fetch_count(&q).await?
        } else {
            0
        };
        let mut rows = tx.fetch_rows(&sql::select(self.desc, &parts)).await?;
        for (rel, condition) in &self.preloads {
            attach_related(tx, rel, *condition, &mut rows).await?;
        }
        Ok((rows, count))
    }
}

/// One batched query per relation; matches are attached to every parent row, an empty
/// array (has_many) or null (belongs_to) when nothing matches.
async fn attach_related(
    tx: &mut dyn StoreTx,
    rel: &Relation,
    condition: Option<&Predicate>,
    rows: &mut [Map<String, Value>],
) -> Result<(), RepoError> {
    let mut keys: Vec<&Value> = Vec::new();
    for row in rows.iter() {
        if let Some(v) = row.get(rel.local_column).filter(|v| !v.is_null()) {
            if !keys.contains(&v) {
                keys.push(v);
            }
        }
    }
    // (join value, field-keyed related row)
    let related: Vec<(Value, Map<String, Value>)> = if keys.is_empty() {
        Vec::new()
    } else {
        let target = rel.target();
        let params: Vec<PgBindValue> = keys.iter().map(|v| PgBindValue::from_json(v)).collect();
        let q = sql::select_related(&target, rel.foreign_column, &params, condition);
        tx.fetch_rows(&q)
            .await?
            .into_iter()
            .map(|mut r| {
                let join = r.get(rel.foreign_column).cloned().unwrap_or(Value::Null);
                target.columns_to_fields(&mut r);
                (join, r)
            })
            .collect()
    };
    for row in rows.iter_mut() {
        let local = row.get(rel.local_column).filter(|v| !v.is_null()).cloned();
        let mut matches = related
            .iter()
            .filter(|(join, _)| Some(join) == local.as_ref())
            .map(|(_, r)| Value::Object(r.clone()));
        let attached = match rel.kind {
            RelationKind::HasMany => Value::Array(matches.collect()),
            RelationKind::BelongsTo => matches.next().unwrap_or(Value::Null),
        };
        row.insert(rel.name.to_string(), attached);
    }
    Ok(())
}
