//! Primary-key resolution: external identifier strings and record values -> key predicates.
//!
//! A composite identifier is `v1,v2,..` in declared key order. When the piece count does not
//! match the key count, the whole raw string is matched against the first key field instead.

use crate::entity::{Entity, EntityDescriptor, KeyField, KeyKind};
use crate::error::RepoError;
use crate::sql::{quoted, PgBindValue, Predicate};
use serde_json::{Map, Value};

/// `"table"."column" = ?`, or a text comparison when the piece does not parse as the key's kind.
fn key_condition(desc: &EntityDescriptor, key: &KeyField, piece: &str) -> (String, PgBindValue) {
    let col = format!("{}.{}", quoted(&desc.table), quoted(&key.column));
    let typed = match key.kind {
        KeyKind::Integer => piece.parse::<i64>().ok().map(PgBindValue::I64),
        KeyKind::Uuid => uuid::Uuid::parse_str(piece).ok().map(PgBindValue::Uuid),
        KeyKind::Text => Some(PgBindValue::String(piece.to_string())),
    };
    match typed {
        Some(v) => (format!("{} = ?", col), v),
        None => (format!("{}::text = ?", col), PgBindValue::String(piece.to_string())),
    }
}

fn conjunction(parts: Vec<(String, PgBindValue)>) -> Predicate {
    let (conds, params): (Vec<String>, Vec<PgBindValue>) = parts.into_iter().unzip();
    Predicate::new(conds.join(" AND "), params)
}

/// Splits `id` across the key fields: composite match first, then the first key with the raw id.
/// Returns None for an empty id or an entity without keys.
fn split_identifier<'a, 'k>(keys: &'k [KeyField], id: &'a str) -> Option<Vec<(&'k KeyField, &'a str)>> {
    if id.is_empty() {
        return None;
    }
    let first = keys.first()?;
    if keys.len() > 1 {
        let pieces: Vec<&str> = id.split(',').collect();
        if pieces.len() == keys.len() {
            return Some(keys.iter().zip(pieces).collect());
        }
    }
    Some(vec![(first, id)])
}

/// Predicate selecting the record identified by `id`. Empty when `id` is empty or the entity
/// has no key; callers treat an empty predicate as "cannot resolve".
pub fn resolve(desc: &EntityDescriptor, id: &str) -> Predicate {
    match split_identifier(&desc.keys, id) {
        Some(pairs) => conjunction(
            pairs
                .into_iter()
                .map(|(key, piece)| key_condition(desc, key, piece))
                .collect(),
        ),
        None => Predicate::default(),
    }
}

/// Zero value of a key: null, 0, "", false or the nil uuid.
pub fn is_zero(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || uuid::Uuid::parse_str(s).map(|u| u.is_nil()).unwrap_or(false),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// True when any key column of the column-keyed record holds its zero value.
pub fn has_zero_key(desc: &EntityDescriptor, columns: &Map<String, Value>) -> bool {
    desc.keys
        .iter()
        .any(|k| columns.get(&k.column).map(is_zero).unwrap_or(true))
}

/// Predicate on the key values carried by `record`. None when any key is zero.
pub fn record_identity<E: Entity>(desc: &EntityDescriptor, record: &E) -> Result<Option<Predicate>, RepoError> {
    let keys = desc.require_keys()?;
    let columns = desc.record_columns(record)?;
    if has_zero_key(desc, &columns) {
        return Ok(None);
    }
    let parts = keys
        .iter()
        .map(|k| {
            let v = &columns[&k.column];
            let col = format!("{}.{}", quoted(&desc.table), quoted(&k.column));
            let bound = match (k.kind, v) {
                (KeyKind::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s)
                    .map(PgBindValue::Uuid)
                    .unwrap_or_else(|_| PgBindValue::String(s.clone())),
                (_, Value::String(s)) => PgBindValue::String(s.clone()),
                _ => PgBindValue::from_json(v),
            };
            (format!("{} = ?", col), bound)
        })
        .collect();
    Ok(Some(conjunction(parts)))
}

/// Writes the key values named by `id` into `record`, using the same split rules as [`resolve`].
pub fn assign_identity<E: Entity>(desc: &EntityDescriptor, record: E, id: &str) -> Result<E, RepoError> {
    let keys = desc.require_keys()?;
    let pairs = split_identifier(keys, id)
        .ok_or_else(|| RepoError::AmbiguousIdentity("empty identifier".into()))?;
    let mut obj = match serde_json::to_value(record)? {
        Value::Object(m) => m,
        _ => return Err(RepoError::BadRequest(format!("{} must serialize to an object", desc.table))),
    };
    for (key, piece) in pairs {
        let invalid = || RepoError::BadRequest(format!("invalid {}: {}", key.field, piece));
        let v = match key.kind {
            KeyKind::Integer => piece.parse::<i64>().map(Value::from).map_err(|_| invalid())?,
            KeyKind::Uuid => uuid::Uuid::parse_str(piece)
                .map(|u| Value::String(u.to_string()))
                .map_err(|_| invalid())?,
            KeyKind::Text => Value::String(piece.to_string()),
        };
        obj.insert(key.field.clone(), v);
    }
    Ok(serde_json::from_value(Value::Object(obj))?)
}
