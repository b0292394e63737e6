//! Static entity descriptions.
//!
//! Every entity declares an [`EntitySchema`]: its table, primary key, typed
//! fields and named relations. Filters, search, ordering, eager loading and
//! the graph serializer resolve names against these descriptions instead of
//! inspecting types at runtime, so a bad path is reported with the segment and
//! entity it failed on.
//!
//! ```rust,ignore
//! pub static SCHEMA: EntitySchema = EntitySchema {
//!     name: "Income",
//!     table: "income",
//!     primary_key: "id",
//!     fields: &[
//!         FieldDef::required("id", FieldKind::Uuid),
//!         FieldDef::new("amount", FieldKind::F64),
//!     ],
//!     relations: &[RelationSpec::belongs_to("contact", "contact_id", contact::schema)],
//!     fetch: fetch_rows::<Entity>,
//! };
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::future::BoxFuture;
use sea_orm::sea_query::{Condition, Value};
use sea_orm::{DatabaseTransaction, DbErr, EntityTrait, QueryFilter};
use serde::Serialize;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::errors::OrmError;
use crate::record::{Attributes, to_attributes};

/// Logical field types used for value coercion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String,
    I64,
    F64,
    Bool,
    Uuid,
    DateTimeUtc,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::String => "String",
            FieldKind::I64 => "I64",
            FieldKind::F64 => "F64",
            FieldKind::Bool => "Bool",
            FieldKind::Uuid => "Uuid",
            FieldKind::DateTimeUtc => "DateTimeUtc",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name; also the column name.
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    /// Longest accepted string, in characters.
    pub max_length: Option<usize>,
}

impl FieldDef {
    #[must_use]
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
            max_length: None,
        }
    }

    #[must_use]
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            max_length: None,
        }
    }

    #[must_use]
    pub const fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Typed SQL NULL for this field.
    #[must_use]
    pub fn null_value(&self) -> Value {
        match self.kind {
            FieldKind::String => Value::String(None),
            FieldKind::I64 => Value::BigInt(None),
            FieldKind::F64 => Value::Double(None),
            FieldKind::Bool => Value::Bool(None),
            FieldKind::Uuid => Value::Uuid(None),
            FieldKind::DateTimeUtc => Value::ChronoDateTimeUtc(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// What happens to rows on the other side of a relation when the owner is
/// deleted through [`DeleteMode::Cascade`](crate::core::DeleteMode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    /// Nothing; the relation points at a parent.
    Ignore,
    /// Delete the related rows (recursively).
    Cascade,
    /// Set the related rows' foreign key to NULL.
    Nullify,
}

/// A named association. Joins `parent.local_key = target.remote_key`.
pub struct RelationSpec {
    pub name: &'static str,
    pub cardinality: Cardinality,
    pub local_key: &'static str,
    pub remote_key: &'static str,
    pub target: fn() -> &'static EntitySchema,
    pub on_delete: OnDelete,
}

impl RelationSpec {
    /// The owning side of a foreign key held by this entity.
    #[must_use]
    pub const fn belongs_to(
        name: &'static str,
        foreign_key: &'static str,
        target: fn() -> &'static EntitySchema,
    ) -> Self {
        Self {
            name,
            cardinality: Cardinality::One,
            local_key: foreign_key,
            remote_key: "id",
            target,
            on_delete: OnDelete::Ignore,
        }
    }

    /// A single row on the target holds a foreign key to this entity.
    #[must_use]
    pub const fn has_one(
        name: &'static str,
        foreign_key: &'static str,
        target: fn() -> &'static EntitySchema,
        on_delete: OnDelete,
    ) -> Self {
        Self {
            name,
            cardinality: Cardinality::One,
            local_key: "id",
            remote_key: foreign_key,
            target,
            on_delete,
        }
    }

    /// Many rows on the target hold a foreign key to this entity.
    #[must_use]
    pub const fn has_many(
        name: &'static str,
        foreign_key: &'static str,
        target: fn() -> &'static EntitySchema,
        on_delete: OnDelete,
    ) -> Self {
        Self {
            name,
            cardinality: Cardinality::Many,
            local_key: "id",
            remote_key: foreign_key,
            target,
            on_delete,
        }
    }

    #[must_use]
    pub fn target(&self) -> &'static EntitySchema {
        (self.target)()
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

impl fmt::Debug for RelationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationSpec")
            .field("name", &self.name)
            .field("cardinality", &self.cardinality)
            .field("local_key", &self.local_key)
            .field("remote_key", &self.remote_key)
            .field("target", &self.target().name)
            .field("on_delete", &self.on_delete)
            .finish()
    }
}

/// Loads rows of one entity as attribute maps. Lets the relation loader fetch
/// any target without knowing its Rust type.
pub type RowFetcher =
    for<'a> fn(&'a DatabaseTransaction, Condition) -> BoxFuture<'a, Result<Vec<Attributes>, DbErr>>;

pub struct EntitySchema {
    /// Display name used in errors (e.g. "Income").
    pub name: &'static str,
    pub table: &'static str,
    pub primary_key: &'static str,
    pub fields: &'static [FieldDef],
    pub relations: &'static [RelationSpec],
    pub fetch: RowFetcher,
}

impl fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("name", &self.name)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl PartialEq for EntitySchema {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl EntitySchema {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&'static RelationSpec> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// # Errors
    /// Validation error naming the field and this entity.
    pub fn require_field(&'static self, name: &str) -> Result<&'static FieldDef, OrmError> {
        self.field(name).ok_or_else(|| {
            OrmError::validation(format!("Unknown field '{name}' on {}", self.name))
        })
    }

    /// # Errors
    /// Validation error naming the relation and this entity.
    pub fn require_relation(&'static self, name: &str) -> Result<&'static RelationSpec, OrmError> {
        self.relation(name).ok_or_else(|| {
            OrmError::validation(format!("Unknown relation '{name}' on {}", self.name))
        })
    }

    #[must_use]
    pub fn primary_field(&'static self) -> Option<&'static FieldDef> {
        self.field(self.primary_key)
    }

    /// Checks that keys and relation targets line up.
    ///
    /// # Errors
    /// Lists every inconsistency found.
    pub fn validate(&'static self) -> Result<(), OrmError> {
        let mut problems = Vec::new();

        match self.primary_field() {
            Some(pk) if pk.kind == FieldKind::Uuid && !pk.nullable => {}
            Some(_) => problems.push(format!(
                "primary key '{}' on {} must be a required Uuid",
                self.primary_key, self.name
            )),
            None => problems.push(format!(
                "primary key '{}' is not a field of {}",
                self.primary_key, self.name
            )),
        }

        let mut seen = HashSet::new();
        for field in self.fields {
            if !seen.insert(field.name) {
                problems.push(format!("duplicate field '{}' on {}", field.name, self.name));
            }
        }

        for relation in self.relations {
            if self.field(relation.name).is_some() {
                problems.push(format!(
                    "relation '{}' on {} shadows a field",
                    relation.name, self.name
                ));
            }
            let target = relation.target();
            let local = self.field(relation.local_key);
            let remote = target.field(relation.remote_key);
            match (local, remote) {
                (Some(local), Some(remote)) if local.kind != remote.kind => {
                    problems.push(format!(
                        "relation '{}' on {} joins {} to {}",
                        relation.name, self.name, local.kind, remote.kind
                    ));
                }
                (None, _) => problems.push(format!(
                    "relation '{}' on {} uses unknown local key '{}'",
                    relation.name, self.name, relation.local_key
                )),
                (_, None) => problems.push(format!(
                    "relation '{}' on {} uses unknown key '{}' on {}",
                    relation.name, self.name, relation.remote_key, target.name
                )),
                _ => {}
            }
            if relation.on_delete == OnDelete::Nullify
                && remote.is_some_and(|r| !r.nullable)
            {
                problems.push(format!(
                    "relation '{}' on {} nullifies non-nullable '{}'",
                    relation.name, self.name, relation.remote_key
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(OrmError::validation(problems.join("; ")))
        }
    }

    /// Converts a JSON input value into the database value of `field`.
    ///
    /// # Errors
    /// Validation error on a kind mismatch or a NULL for a required field.
    pub fn coerce(&self, field: &FieldDef, value: &Json) -> Result<Value, OrmError> {
        let mismatch = || {
            OrmError::validation(format!(
                "Invalid value {value} for field '{}' on {}: expected {}",
                field.name, self.name, field.kind
            ))
        };

        let coerced = match (field.kind, value) {
            (_, Json::Null) => {
                if field.nullable {
                    return Ok(field.null_value());
                }
                return Err(OrmError::validation(format!(
                    "Field '{}' on {} cannot be null",
                    field.name, self.name
                )));
            }
            (FieldKind::String, Json::String(s)) => {
                if let Some(max) = field.max_length {
                    if s.chars().count() > max {
                        return Err(OrmError::validation(format!(
                            "Field '{}' on {} exceeds {max} characters",
                            field.name, self.name
                        )));
                    }
                }
                Value::from(s.clone())
            }
            (FieldKind::String, Json::Number(n)) => Value::from(n.to_string()),
            (FieldKind::I64, Json::Number(n)) => Value::from(n.as_i64().ok_or_else(mismatch)?),
            (FieldKind::I64, Json::String(s)) => {
                Value::from(s.trim().parse::<i64>().map_err(|_| mismatch())?)
            }
            (FieldKind::F64, Json::Number(n)) => Value::from(n.as_f64().ok_or_else(mismatch)?),
            (FieldKind::F64, Json::String(s)) => {
                Value::from(s.trim().parse::<f64>().map_err(|_| mismatch())?)
            }
            (FieldKind::Bool, Json::Bool(b)) => Value::from(*b),
            (FieldKind::Bool, Json::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" => Value::from(true),
                "false" | "0" => Value::from(false),
                _ => return Err(mismatch()),
            },
            (FieldKind::Uuid, Json::String(s)) => {
                Value::from(Uuid::parse_str(s.trim()).map_err(|_| mismatch())?)
            }
            (FieldKind::DateTimeUtc, Json::String(s)) => {
                Value::from(parse_datetime(s).ok_or_else(mismatch)?)
            }
            _ => return Err(mismatch()),
        };
        Ok(coerced)
    }
}

/// RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.f]` (taken as UTC) or a bare date
/// (midnight UTC).
#[must_use]
pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// [`RowFetcher`] for a Sea-ORM entity whose model serializes to its columns.
pub fn fetch_rows<E>(
    conn: &DatabaseTransaction,
    condition: Condition,
) -> BoxFuture<'_, Result<Vec<Attributes>, DbErr>>
where
    E: EntityTrait,
    E::Model: Serialize + Send + Sync,
{
    Box::pin(async move {
        let models = E::find().filter(condition).all(conn).await?;
        models.iter().map(to_attributes).collect()
    })
}

/// All entity schemas of an application, validated once at startup.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<&'static str, &'static EntitySchema>,
}

impl SchemaRegistry {
    /// # Errors
    /// Fails on duplicate names, invalid schemas, or relations pointing at
    /// entities that were not registered.
    pub fn new(schemas: &[&'static EntitySchema]) -> Result<Self, OrmError> {
        let mut entities = BTreeMap::new();
        for schema in schemas {
            schema.validate()?;
            if entities.insert(schema.name, *schema).is_some() {
                return Err(OrmError::validation(format!(
                    "entity {} registered twice",
                    schema.name
                )));
            }
        }
        for schema in entities.values() {
            for relation in schema.relations {
                let target = relation.target();
                if !entities.contains_key(target.name) {
                    return Err(OrmError::validation(format!(
                        "relation '{}' on {} targets unregistered entity {}",
                        relation.name, schema.name, target.name
                    )));
                }
            }
        }
        tracing::debug!(count = entities.len(), "entity schemas registered");
        Ok(Self { entities })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'static EntitySchema> {
        self.entities.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static EntitySchema> + '_ {
        self.entities.values().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Two small entities referencing each other, used across unit tests.
    use super::*;

    fn no_rows(
        _conn: &DatabaseTransaction,
        _condition: Condition,
    ) -> BoxFuture<'_, Result<Vec<Attributes>, DbErr>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    pub static AUTHOR: EntitySchema = EntitySchema {
        name: "Author",
        table: "author",
        primary_key: "id",
        fields: &[
            FieldDef::required("id", FieldKind::Uuid),
            FieldDef::new("name", FieldKind::String),
            FieldDef::new("rating", FieldKind::F64),
            FieldDef::required("created_at", FieldKind::DateTimeUtc),
        ],
        relations: &[
            RelationSpec::has_many("books", "author_id", book, OnDelete::Cascade),
            RelationSpec::has_one("profile", "author_id", book, OnDelete::Nullify),
        ],
        fetch: no_rows,
    };

    pub static BOOK: EntitySchema = EntitySchema {
        name: "Book",
        table: "book",
        primary_key: "id",
        fields: &[
            FieldDef::required("id", FieldKind::Uuid),
            FieldDef::new("author_id", FieldKind::Uuid),
            FieldDef::new("title", FieldKind::String).max_length(40),
            FieldDef::new("pages", FieldKind::I64),
            FieldDef::new("published", FieldKind::Bool),
        ],
        relations: &[RelationSpec::belongs_to("author", "author_id", author)],
        fetch: no_rows,
    };

    pub fn author() -> &'static EntitySchema {
        &AUTHOR
    }

    pub fn book() -> &'static EntitySchema {
        &BOOK
    }
}
