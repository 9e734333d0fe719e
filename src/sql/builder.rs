//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from an entity descriptor.
//!
//! Every row-returning statement wraps the row as `to_jsonb(..)` so rows decode as a single
//! JSON column regardless of column types. Writes hand the record to
//! `jsonb_populate_record` and let PostgreSQL do the JSON -> column conversion.

use crate::entity::EntityDescriptor;
use crate::sql::{quote_literal, PgBindValue};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Alias of the derived table every row-returning query selects from.
const ROW_ALIAS: &str = "sub";

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quoted(schema), quoted(table)),
        None => quoted(table),
    }
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

/// `"table"."column"`.
fn column_ref(desc: &EntityDescriptor, column: &str) -> String {
    format!("{}.{}", quoted(&desc.table), quoted(column))
}

/// Parameterized SQL fragment with `?` placeholders, bound positionally.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Predicate {
    pub template: String,
    pub params: Vec<PgBindValue>,
}

impl Predicate {
    pub fn new(template: impl Into<String>, params: Vec<PgBindValue>) -> Self {
        Predicate {
            template: template.into(),
            params,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.template.trim().is_empty()
    }
}

/// Number of `?` placeholders outside quoted literals and identifiers.
pub fn count_placeholders(template: &str) -> usize {
    let mut n = 0;
    let mut quote: Option<char> = None;
    for c in template.chars() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '?') => n += 1,
            _ => {}
        }
    }
    n
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Text standing in for one predicate value. Nulls and untyped strings become literals,
    /// arrays expand to their elements (`id IN (?)` with `[1, 2]`), the rest bind as `$n`.
    fn push_value(&mut self, v: PgBindValue) -> String {
        match v {
            PgBindValue::Null => "NULL".to_string(),
            PgBindValue::Untyped(s) => match quote_literal(&s) {
                Some(literal) => literal,
                None => format!("${}", self.push_param(PgBindValue::String(s))),
            },
            PgBindValue::Json(Value::Array(items)) => self.push_list(&items),
            other => format!("${}", self.push_param(other)),
        }
    }

    /// Nested arrays become row values: `[[1, 2], [3, 4]]` -> `(1, 2), (3, 4)`.
    fn push_list(&mut self, items: &[Value]) -> String {
        if items.is_empty() {
            return "NULL".to_string();
        }
        items
            .iter()
            .map(|item| match item {
                Value::Array(inner) => format!("({})", self.push_list(inner)),
                _ => self.push_value(PgBindValue::from_json(item)),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Rewrites each unquoted `?` of the predicate to its value's placeholder, in order.
    fn push_predicate(&mut self, pred: &Predicate) -> String {
        let mut out = String::with_capacity(pred.template.len() + 8);
        let mut params = pred.params.iter();
        let mut quote: Option<char> = None;
        for c in pred.template.chars() {
            match (quote, c) {
                (None, '\'' | '"') => {
                    quote = Some(c);
                    out.push(c);
                }
                (Some(q), c) if c == q => {
                    quote = None;
                    out.push(c);
                }
                (None, '?') => {
                    let v = params.next().cloned().unwrap_or(PgBindValue::Null);
                    let rendered = self.push_value(v);
                    out.push_str(&rendered);
                }
                _ => out.push(c),
            }
        }
        out
    }
}

/// Pieces of a filtered SELECT, already validated.
#[derive(Default)]
pub struct SelectParts<'a> {
    /// Empty means every persisted column.
    pub fields: &'a [String],
    pub predicate: Option<&'a Predicate>,
    pub joins: &'a [String],
    pub groups: &'a [String],
    pub order: Option<&'a str>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// SELECT list. A plain identifier naming one of the entity's columns (or fields) is qualified
/// with the table; anything else, joined columns and expressions alike, is passed as written.
fn select_column_list(desc: &EntityDescriptor, fields: &[String]) -> String {
    if fields.is_empty() {
        return desc
            .columns()
            .map(|c| column_ref(desc, c))
            .collect::<Vec<_>>()
            .join(", ");
    }
    fields
        .iter()
        .map(|f| {
            if !identifier_re().is_match(f) {
                return f.clone();
            }
            match desc.fields.iter().find(|fc| fc.column == *f || fc.field == *f) {
                Some(fc) => column_ref(desc, &fc.column),
                None => f.clone(),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn from_clause(q: &mut QueryBuf, desc: &EntityDescriptor, parts: &SelectParts<'_>, with_joins: bool) -> String {
    let mut sql = format!(" FROM {}", desc.qualified_table());
    if with_joins {
        for j in parts.joins {
            sql.push(' ');
            sql.push_str(j);
        }
    }
    if let Some(pred) = parts.predicate.filter(|p| !p.is_empty()) {
        let rendered = q.push_predicate(pred);
        sql.push_str(&format!(" WHERE {}", rendered));
    }
    if with_joins && !parts.groups.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", parts.groups.join(", ")));
    }
    sql
}

/// The outer select only projects the derived table, so the inner ORDER BY is the last
/// ordering step and rows come back in that order.
fn wrap_rows(inner: &str) -> String {
    format!("SELECT to_jsonb({a}) AS doc FROM ({inner}) {a}", a = ROW_ALIAS, inner = inner)
}

/// Filtered SELECT: projection, joins, predicate, grouping, order, LIMIT then OFFSET.
pub fn select(desc: &EntityDescriptor, parts: &SelectParts<'_>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cols = select_column_list(desc, parts.fields);
    let from = from_clause(&mut q, desc, parts, true);
    let mut inner = format!("SELECT {}{}", cols, from);
    if let Some(order) = parts.order.filter(|o| !o.trim().is_empty()) {
        inner.push_str(&format!(" ORDER BY {}", order));
    }
    if let Some(limit) = parts.limit {
        inner.push_str(&format!(" LIMIT {}", limit));
        if let Some(offset) = parts.offset {
            inner.push_str(&format!(" OFFSET {}", offset));
        }
    }
    q.sql = wrap_rows(&inner);
    q
}

/// COUNT over the predicate only, or over joins + predicate + groups when `with_joins`.
/// Projection, order and pagination never reach the count.
pub fn count(desc: &EntityDescriptor, parts: &SelectParts<'_>, with_joins: bool) -> QueryBuf {
    let mut q = QueryBuf::new();
    let from = from_clause(&mut q, desc, parts, with_joins);
    q.sql = if with_joins && (!parts.joins.is_empty() || !parts.groups.is_empty()) {
        format!("SELECT COUNT(*) FROM (SELECT 1{}) {}", from, ROW_ALIAS)
    } else {
        format!("SELECT COUNT(*){}", from)
    };
    q
}

/// Single row selected by a key predicate.
pub fn select_by_key(desc: &EntityDescriptor, key: &Predicate) -> QueryBuf {
    let parts = SelectParts {
        predicate: Some(key),
        limit: Some(1),
        ..Default::default()
    };
    select(desc, &parts)
}

/// Related rows for a preload: `column IN (values)`, optionally narrowed by a sub-predicate.
pub fn select_related(
    desc: &EntityDescriptor,
    column: &str,
    values: &[PgBindValue],
    sub: Option<&Predicate>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cols = select_column_list(desc, &[]);
    let placeholders: Vec<String> = values.iter().map(|v| q.push_value(v.clone())).collect();
    let mut inner = format!(
        "SELECT {} FROM {} WHERE {} IN ({})",
        cols,
        desc.qualified_table(),
        column_ref(desc, column),
        placeholders.join(", ")
    );
    if let Some(sub) = sub.filter(|p| !p.is_empty()) {
        let rendered = q.push_predicate(sub);
        inner.push_str(&format!(" AND ({})", rendered));
    }
    q.sql = wrap_rows(&inner);
    q
}

fn returning(desc: &EntityDescriptor) -> String {
    format!(" RETURNING to_jsonb({}.*) AS doc", quoted(&desc.table))
}

fn populate_source(q: &mut QueryBuf, desc: &EntityDescriptor, values: &Map<String, Value>) -> String {
    let n = q.push_param(PgBindValue::Json(Value::Object(values.clone())));
    format!("jsonb_populate_record(NULL::{}, ${}::jsonb)", desc.qualified_table(), n)
}

/// INSERT of the given column values. Columns absent from `values` take their database default.
pub fn insert(desc: &EntityDescriptor, values: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = desc.qualified_table();
    if values.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES{}", table, returning(desc));
        return q;
    }
    let cols: Vec<String> = values.keys().map(|c| quoted(c)).collect();
    let source = populate_source(&mut q, desc, values);
    q.sql = format!(
        "INSERT INTO {} ({cols}) SELECT {cols} FROM {}{}",
        table,
        source,
        returning(desc),
        cols = cols.join(", ")
    );
    q
}

/// INSERT .. ON CONFLICT (keys) DO UPDATE: full overwrite of every non-key column in `values`.
pub fn upsert(desc: &EntityDescriptor, values: &Map<String, Value>) -> QueryBuf {
    let mut q = insert(desc, values);
    let keys: Vec<String> = desc.keys.iter().map(|k| quoted(&k.column)).collect();
    let mut sets: Vec<String> = values
        .keys()
        .filter(|c| !desc.is_key_column(c))
        .map(|c| format!("{c} = EXCLUDED.{c}", c = quoted(c)))
        .collect();
    if sets.is_empty() {
        // DO NOTHING would return no row for an existing record.
        sets = keys.iter().map(|k| format!("{k} = EXCLUDED.{k}")).collect();
    }
    let ret = returning(desc);
    let head = q.sql.strip_suffix(&ret).unwrap_or(&q.sql).to_string();
    q.sql = format!(
        "{} ON CONFLICT ({}) DO UPDATE SET {}{}",
        head,
        keys.join(", "),
        sets.join(", "),
        ret
    );
    q
}

/// UPDATE of the given columns for the row(s) matching `key`. Caller guarantees `values` is non-empty.
pub fn update(desc: &EntityDescriptor, values: &Map<String, Value>, key: &Predicate) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cols: Vec<String> = values.keys().map(|c| quoted(c)).collect();
    let source = populate_source(&mut q, desc, values);
    let target = if cols.len() == 1 {
        cols[0].clone()
    } else {
        format!("({})", cols.join(", "))
    };
    let pred = q.push_predicate(key);
    q.sql = format!(
        "UPDATE {} SET {} = (SELECT {} FROM {}) WHERE {}{}",
        desc.qualified_table(),
        target,
        cols.join(", "),
        source,
        pred,
        returning(desc)
    );
    q
}

/// DELETE of the row(s) matching `key`.
pub fn delete(desc: &EntityDescriptor, key: &Predicate) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pred = q.push_predicate(key);
    q.sql = format!("DELETE FROM {} WHERE {}", desc.qualified_table(), pred);
    q
}
