//! Entity capability set and the descriptor derived from it.
//!
//! A record type opts in by implementing [`Entity`]; everything the repository needs
//! (table identity, key fields, field/column mapping, relations) is read back through
//! [`EntityDescriptor::of`], which is recomputed on every call and never cached.

use crate::case::{rename_object_keys, to_snake_case};
use crate::error::RepoError;
use crate::sql::qualified_table;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// A record type mapped to one table.
///
/// `PRIMARY_KEY` and `FIELDS` use serde field names (the keys the record serializes to).
/// Column names default to the snake_case form of the field name.
///
/// ```ignore
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct User { id: i64, name: String, company_id: i64 }
///
/// impl Entity for User {
///     const TABLE_NAME: &'static str = "t_user";
///     const PRIMARY_KEY: &'static [&'static str] = &["id"];
///     const FIELDS: &'static [&'static str] = &["id", "name", "companyId"];
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    const TABLE_NAME: &'static str;
    const SCHEMA: Option<&'static str> = None;
    /// Key fields in declared order. Empty means the entity has no key.
    const PRIMARY_KEY: &'static [&'static str];
    /// Persisted fields. Anything else the record serializes (relations, computed values) is not written.
    const FIELDS: &'static [&'static str];

    fn column_name(field: &str) -> String {
        to_snake_case(field)
    }

    /// Overrides key kind inference for a key field (needed when the key is an `Option`).
    fn key_kind(_field: &str) -> Option<KeyKind> {
        None
    }

    fn relations() -> Vec<Relation> {
        Vec::new()
    }
}

/// How identifier pieces for a key column are bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    Integer,
    Uuid,
    Text,
}

impl KeyKind {
    /// Inferred from the zero value a key field serializes to.
    fn infer(zero: Option<&Value>) -> Self {
        match zero {
            Some(Value::Number(_)) => KeyKind::Integer,
            Some(Value::String(s)) if uuid::Uuid::parse_str(s).is_ok() => KeyKind::Uuid,
            _ => KeyKind::Text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyField {
    pub field: String,
    pub column: String,
    pub kind: KeyKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldColumn {
    pub field: String,
    pub column: String,
}

/// has_many: related rows point at us. belongs_to: we point at one related row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    HasMany,
    BelongsTo,
}

/// Eager-loadable relation. Related rows are selected with
/// `related.foreign_column IN (values of our local_column)`.
#[derive(Clone, Debug)]
pub struct Relation {
    /// Serde field name on the parent record that receives the loaded data.
    pub name: &'static str,
    pub kind: RelationKind,
    /// Our column (our key for has_many, our foreign key for belongs_to).
    pub local_column: &'static str,
    /// Their column (their foreign key for has_many, their key for belongs_to).
    pub foreign_column: &'static str,
    target: fn() -> EntityDescriptor,
}

impl Relation {
    pub fn has_many<R: Entity>(
        name: &'static str,
        local_column: &'static str,
        foreign_column: &'static str,
    ) -> Self {
        Relation {
            name,
            kind: RelationKind::HasMany,
            local_column,
            foreign_column,
            target: EntityDescriptor::of::<R>,
        }
    }

    pub fn belongs_to<R: Entity>(
        name: &'static str,
        local_column: &'static str,
        foreign_column: &'static str,
    ) -> Self {
        Relation {
            name,
            kind: RelationKind::BelongsTo,
            local_column,
            foreign_column,
            target: EntityDescriptor::of::<R>,
        }
    }

    pub fn target(&self) -> EntityDescriptor {
        (self.target)()
    }
}

/// Read-only metadata for one entity type.
#[derive(Clone, Debug)]
pub struct EntityDescriptor {
    pub schema: Option<String>,
    pub table: String,
    pub keys: Vec<KeyField>,
    pub fields: Vec<FieldColumn>,
    pub relations: Vec<Relation>,
}

impl EntityDescriptor {
    pub fn of<E: Entity>() -> Self {
        let zero = serde_json::to_value(E::default()).unwrap_or(Value::Null);
        let keys = E::PRIMARY_KEY
            .iter()
            .map(|f| KeyField {
                field: (*f).to_string(),
                column: E::column_name(f),
                kind: E::key_kind(f).unwrap_or_else(|| KeyKind::infer(zero.get(*f))),
            })
            .collect();
        let fields = E::FIELDS
            .iter()
            .map(|f| FieldColumn {
                field: (*f).to_string(),
                column: E::column_name(f),
            })
            .collect();
        EntityDescriptor {
            schema: E::SCHEMA.map(str::to_string),
            table: E::TABLE_NAME.to_string(),
            keys,
            fields,
            relations: E::relations(),
        }
    }

    /// Descriptor for a record value. Same as [`EntityDescriptor::of`]; the value only selects the type.
    pub fn of_value<E: Entity>(_record: &E) -> Self {
        Self::of::<E>()
    }

    pub fn qualified_table(&self) -> String {
        qualified_table(self.schema.as_deref(), &self.table)
    }

    /// Key fields, or `NoPrimaryKey` when none are declared.
    pub fn require_keys(&self) -> Result<&[KeyField], RepoError> {
        if self.keys.is_empty() {
            return Err(RepoError::NoPrimaryKey(self.table.clone()));
        }
        Ok(&self.keys)
    }

    pub fn is_key_column(&self, column: &str) -> bool {
        self.keys.iter().any(|k| k.column == column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.column.as_str())
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Serialized record keyed by column, restricted to persisted fields.
    pub fn record_columns<E: Entity>(&self, record: &E) -> Result<Map<String, Value>, RepoError> {
        let mut obj = match serde_json::to_value(record)? {
            Value::Object(m) => m,
            other => {
                return Err(RepoError::BadRequest(format!(
                    "{} must serialize to an object, got {}",
                    self.table, other
                )))
            }
        };
        let mut out = Map::new();
        for fc in &self.fields {
            if let Some(v) = obj.remove(&fc.field) {
                out.insert(fc.column.clone(), v);
            }
        }
        Ok(out)
    }

    /// Renames a row's column keys to field keys in place. Unknown columns keep their name.
    pub fn columns_to_fields(&self, row: &mut Map<String, Value>) {
        rename_object_keys(row, |col| {
            self.fields
                .iter()
                .find(|fc| fc.column == col)
                .map(|fc| fc.field.clone())
        });
    }

    /// Decodes a field-keyed row into `E`. Fields missing from the row keep their zero value.
    pub fn hydrate<E: Entity>(&self, row: Map<String, Value>) -> Result<E, RepoError> {
        let mut base = match serde_json::to_value(E::default())? {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        for (k, v) in row {
            base.insert(k, v);
        }
        Ok(serde_json::from_value(Value::Object(base))?)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn descriptor_maps_fields_to_columns() {
        let d = EntityDescriptor::of::<User>();
        assert_eq!(d.table, "t_user");
        assert_eq!(d.qualified_table(), "\"t_user\"");
        assert_eq!(
            d.keys,
            vec![KeyField {
                field: "id".into(),
                column: "id".into(),
                kind: KeyKind::Integer
            }]
        );
        assert_eq!(d.columns().collect::<Vec<_>>(), vec!["id", "name", "age", "company_id"]);
        assert!(d.relation("company").is_some());
    }

    #[test]
    fn descriptor_is_idempotent() {
        let a = EntityDescriptor::of::<Membership>();
        let b = EntityDescriptor::of_value(&Membership::default());
        assert_eq!(a.keys, b.keys);
        assert_eq!(a.fields, b.fields);
        assert_eq!(a.qualified_table(), "\"app\".\"memberships\"");
        assert_eq!(a.keys[0].kind, KeyKind::Text);
        assert_eq!(a.keys[1].kind, KeyKind::Integer);
    }

    #[test]
    fn missing_key_is_reported() {
        let d = EntityDescriptor::of::<AuditLine>();
        assert!(matches!(d.require_keys(), Err(RepoError::NoPrimaryKey(t)) if t == "audit_lines"));
    }

    #[test]
    fn record_columns_drop_relations() {
        let d = EntityDescriptor::of::<User>();
        let user = User {
            id: 3,
            name: "ann".into(),
            age: 30,
            company_id: 9,
            company: Some(Company::default()),
        };
        let cols = d.record_columns(&user).unwrap();
        assert_eq!(
            Value::Object(cols),
            serde_json::json!({"id": 3, "name": "ann", "age": 30, "company_id": 9})
        );
    }

    #[test]
    fn hydrate_fills_projected_away_fields() {
        let d = EntityDescriptor::of::<User>();
        let mut row = serde_json::json!({"name": "bob", "company_id": 4})
            .as_object()
            .cloned()
            .unwrap();
        d.columns_to_fields(&mut row);
        let user: User = d.hydrate(row).unwrap();
        assert_eq!(
            user,
            User {
                name: "bob".into(),
                company_id: 4,
                ..User::default()
            }
        );
    }
}
