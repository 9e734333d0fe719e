//! Filter model: projection, order, predicate, count flag, joins, groups, preloads, pagination.
//!
//! Wire form (every key optional, `null` same as absent, unknown keys ignored):
//! `{"fields": [..], "order": "..", "where": [template, ..params], "withCount": bool,
//!   "joins": [..], "groups": [..], "preloads": [name, template?, ..params], "offset": n, "limit": n}`
//!
//! JSON input, whether through [`Filter::parse`], [`Filter::from_json`] or serde, goes
//! through the single `TryFrom<Value>` adapter below.

use crate::error::RepoError;
use crate::sql::{count_placeholders, PgBindValue, Predicate};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Eager-load directive: relation name plus an optional condition on the related rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Preload {
    pub relation: String,
    pub condition: Option<Predicate>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct Filter {
    /// Columns or expressions to select. Empty selects every persisted column.
    pub fields: Vec<String>,
    /// ORDER BY expression, applied verbatim.
    pub order: String,
    /// The `where` clause.
    pub predicate: Option<Predicate>,
    pub with_count: bool,
    pub joins: Vec<String>,
    pub groups: Vec<String>,
    pub preloads: Vec<Preload>,
    pub offset: Option<u64>,
    /// Zero is treated as unset.
    pub limit: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON-encoded filter. Blank input is the empty filter.
    pub fn parse(s: &str) -> Result<Self, RepoError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let value: Value =
            serde_json::from_str(s).map_err(|e| RepoError::malformed("filter", e.to_string()))?;
        Self::from_json(&value)
    }

    pub fn from_json(value: &Value) -> Result<Self, RepoError> {
        Self::try_from(value.clone())
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = order.into();
        self
    }

    pub fn where_clause<I>(mut self, template: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let params = params.into_iter().map(|v| PgBindValue::from_json(&v)).collect();
        self.predicate = Some(Predicate::new(template, params));
        self
    }

    pub fn with_count(mut self) -> Self {
        self.with_count = true;
        self
    }

    pub fn join(mut self, join: impl Into<String>) -> Self {
        self.joins.push(join.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn preload(mut self, relation: impl Into<String>) -> Self {
        self.preloads.push(Preload {
            relation: relation.into(),
            condition: None,
        });
        self
    }

    pub fn preload_where<I>(mut self, relation: impl Into<String>, template: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let params = params.into_iter().map(|v| PgBindValue::from_json(&v)).collect();
        self.preloads.push(Preload {
            relation: relation.into(),
            condition: Some(Predicate::new(template, params)),
        });
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Limit when set and non-zero.
    pub fn effective_limit(&self) -> Option<u64> {
        self.limit.filter(|n| *n > 0)
    }

    /// Shape checks that do not depend on the entity. Runs before any statement is issued.
    pub fn validate(&self) -> Result<(), RepoError> {
        if let Some(p) = &self.predicate {
            check_placeholders("where", p)?;
        }
        for preload in &self.preloads {
            if preload.relation.trim().is_empty() {
                return Err(RepoError::malformed("preloads", "relation name must not be empty"));
            }
            if let Some(c) = &preload.condition {
                check_placeholders("preloads", c)?;
            }
        }
        if self.joins.iter().any(|j| j.trim().is_empty()) {
            return Err(RepoError::malformed("joins", "join clause must not be empty"));
        }
        if self.groups.iter().any(|g| g.trim().is_empty()) {
            return Err(RepoError::malformed("groups", "group expression must not be empty"));
        }
        Ok(())
    }
}

fn check_placeholders(field: &'static str, p: &Predicate) -> Result<(), RepoError> {
    let expected = count_placeholders(&p.template);
    if expected != p.params.len() {
        return Err(RepoError::malformed(
            field,
            format!(
                "template has {} placeholder(s) but {} parameter(s) were given",
                expected,
                p.params.len()
            ),
        ));
    }
    Ok(())
}

impl TryFrom<Value> for Filter {
    type Error = RepoError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let obj = match value {
            Value::Null => return Ok(Filter::default()),
            Value::Object(m) => m,
            _ => return Err(RepoError::malformed("filter", "expected a JSON object")),
        };
        let filter = Filter {
            fields: string_list(&obj, "fields")?,
            order: optional_string(&obj, "order")?.unwrap_or_default(),
            predicate: where_clause(&obj)?,
            with_count: match present(&obj, "withCount") {
                None => false,
                Some(Value::Bool(b)) => *b,
                Some(_) => return Err(RepoError::malformed("withCount", "expected a boolean")),
            },
            joins: string_list(&obj, "joins")?,
            groups: string_list(&obj, "groups")?,
            preloads: preloads(&obj)?,
            offset: count_value(&obj, "offset")?,
            limit: count_value(&obj, "limit")?,
        };
        filter.validate()?;
        Ok(filter)
    }
}

fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn optional_string(obj: &Map<String, Value>, key: &'static str) -> Result<Option<String>, RepoError> {
    match present(obj, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(RepoError::malformed(key, "expected a string")),
    }
}

fn string_list(obj: &Map<String, Value>, key: &'static str) -> Result<Vec<String>, RepoError> {
    let Some(v) = present(obj, key) else {
        return Ok(Vec::new());
    };
    let Value::Array(items) = v else {
        return Err(RepoError::malformed(key, "expected an array of strings"));
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            _ => Err(RepoError::malformed(key, "expected an array of strings")),
        })
        .collect()
}

/// Non-negative integer, or a string holding one (older clients send strings).
fn count_value(obj: &Map<String, Value>, key: &'static str) -> Result<Option<u64>, RepoError> {
    match present(obj, key) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| RepoError::malformed(key, "expected a non-negative integer")),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| RepoError::malformed(key, "expected a non-negative integer")),
        Some(_) => Err(RepoError::malformed(key, "expected a non-negative integer")),
    }
}

/// `[template, ..params]` -> predicate. Element 0 must be a string.
fn template_and_params(field: &'static str, items: &[Value]) -> Result<Option<Predicate>, RepoError> {
    let Some((head, tail)) = items.split_first() else {
        return Ok(None);
    };
    let Value::String(template) = head else {
        return Err(RepoError::malformed(field, "first element must be a string template"));
    };
    let params = tail.iter().map(PgBindValue::from_json).collect();
    Ok(Some(Predicate::new(template.clone(), params)))
}

fn where_clause(obj: &Map<String, Value>) -> Result<Option<Predicate>, RepoError> {
    match present(obj, "where") {
        None => Ok(None),
        Some(Value::Array(items)) => template_and_params("where", items),
        Some(_) => Err(RepoError::malformed("where", "expected an array [template, ..params]")),
    }
}

/// `[name, template?, ..params]`, or a list of those for several relations.
fn preloads(obj: &Map<String, Value>) -> Result<Vec<Preload>, RepoError> {
    let items = match present(obj, "preloads") {
        None => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(RepoError::malformed("preloads", "expected an array")),
    };
    if items.first().map(Value::is_array).unwrap_or(false) {
        return items
            .iter()
            .map(|group| match group {
                Value::Array(g) => preload_group(g),
                _ => Err(RepoError::malformed("preloads", "mixed list and non-list entries")),
            })
            .filter_map(Result::transpose)
            .collect();
    }
    Ok(preload_group(items)?.into_iter().collect())
}

fn preload_group(items: &[Value]) -> Result<Option<Preload>, RepoError> {
    let Some((head, tail)) = items.split_first() else {
        return Ok(None);
    };
    let Value::String(relation) = head else {
        return Err(RepoError::malformed("preloads", "relation name must be a string"));
    };
    Ok(Some(Preload {
        relation: relation.clone(),
        condition: template_and_params("preloads", tail)?,
    }))
}
