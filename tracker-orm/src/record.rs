//! Loaded rows and the identity map that holds them.
//!
//! A query loads its root rows plus any eager-loaded relations into one
//! [`Graph`]. Each row is stored once per `(entity, id)` and relations are
//! stored as keys, so mutually referencing rows never own each other.

use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::sync::Arc;

use sea_orm::DbErr;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::errors::OrmError;
use crate::schema::EntitySchema;

/// Column name to JSON value.
pub type Attributes = serde_json::Map<String, Json>;

/// Dumps a model into its attribute map.
///
/// # Errors
/// `DbErr::Json` if the model does not serialize to an object.
pub fn to_attributes<M: Serialize>(model: &M) -> Result<Attributes, DbErr> {
    match serde_json::to_value(model) {
        Ok(Json::Object(map)) => Ok(map),
        Ok(other) => Err(DbErr::Json(format!("expected an object, got {other}"))),
        Err(err) => Err(DbErr::Json(err.to_string())),
    }
}

/// Stable identity of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub entity: &'static str,
    pub id: Uuid,
}

impl RecordKey {
    #[must_use]
    pub fn new(schema: &EntitySchema, id: Uuid) -> Self {
        Self {
            entity: schema.name,
            id,
        }
    }
}

/// A loaded relation value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Related {
    One(Option<RecordKey>),
    Many(Vec<RecordKey>),
}

#[derive(Debug, Clone)]
pub struct Record {
    pub key: RecordKey,
    pub schema: &'static EntitySchema,
    pub attributes: Attributes,
    /// Only relations that were eager-loaded appear here.
    pub relations: BTreeMap<&'static str, Related>,
}

impl Record {
    /// # Errors
    /// Fails if the primary key attribute is missing or not a UUID.
    pub fn from_attributes(
        schema: &'static EntitySchema,
        attributes: Attributes,
    ) -> Result<Self, OrmError> {
        let id = attributes
            .get(schema.primary_key)
            .and_then(Json::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                OrmError::validation(format!(
                    "{} row without a valid '{}'",
                    schema.name, schema.primary_key
                ))
            })?;
        Ok(Self {
            key: RecordKey::new(schema, id),
            schema,
            attributes,
            relations: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.key.id
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Json> {
        self.attributes.get(field)
    }

    /// Reads a field as `T`; `None` for missing or null values.
    ///
    /// # Errors
    /// Validation error if the stored value does not deserialize into `T`.
    pub fn attr<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, OrmError> {
        match self.attributes.get(field) {
            None | Some(Json::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|err| {
                OrmError::validation(format!(
                    "Field '{field}' on {} has an unexpected shape: {err}",
                    self.schema.name
                ))
            }),
        }
    }

    #[must_use]
    pub fn related(&self, relation: &str) -> Option<&Related> {
        self.relations.get(relation)
    }
}

/// Identity map of every row loaded by one operation.
#[derive(Debug, Default, Clone)]
pub struct Graph {
    records: HashMap<RecordKey, Record>,
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a row. A row already present keeps its loaded relations and
    /// takes the fresher attributes.
    pub fn insert(&mut self, record: Record) -> RecordKey {
        let key = record.key;
        match self.records.get_mut(&key) {
            Some(existing) => existing.attributes = record.attributes,
            None => {
                self.records.insert(key, record);
            }
        }
        key
    }

    #[must_use]
    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        self.records.get(key)
    }

    /// Records a loaded relation on `owner`. Unknown owners are ignored.
    pub fn attach(&mut self, owner: RecordKey, relation: &'static str, related: Related) {
        if let Some(record) = self.records.get_mut(&owner) {
            record.relations.insert(relation, related);
        }
    }

    /// The related row of a to-one relation, if loaded and present.
    #[must_use]
    pub fn one(&self, owner: &RecordKey, relation: &str) -> Option<&Record> {
        match self.get(owner)?.related(relation)? {
            Related::One(Some(key)) => self.get(key),
            _ => None,
        }
    }

    /// The related rows of a to-many relation; empty if not loaded.
    #[must_use]
    pub fn many(&self, owner: &RecordKey, relation: &str) -> Vec<&Record> {
        match self.get(owner).and_then(|r| r.related(relation)) {
            Some(Related::Many(keys)) => keys.iter().filter_map(|k| self.get(k)).collect(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A typed model plus the graph it was loaded into.
///
/// Derefs to the model. Instances from one call share the same graph.
#[derive(Debug, Clone)]
pub struct Instance<M> {
    model: M,
    key: RecordKey,
    graph: Arc<Graph>,
}

impl<M> Instance<M> {
    #[must_use]
    pub fn new(model: M, key: RecordKey, graph: Arc<Graph>) -> Self {
        Self { model, key, graph }
    }

    #[must_use]
    pub fn model(&self) -> &M {
        &self.model
    }

    #[must_use]
    pub fn into_model(self) -> M {
        self.model
    }

    #[must_use]
    pub fn key(&self) -> RecordKey {
        self.key
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.key.id
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        self.graph.get(&self.key)
    }

    /// The related row of a loaded to-one relation.
    #[must_use]
    pub fn one(&self, relation: &str) -> Option<&Record> {
        self.graph.one(&self.key, relation)
    }

    /// The related rows of a loaded to-many relation.
    #[must_use]
    pub fn many(&self, relation: &str) -> Vec<&Record> {
        self.graph.many(&self.key, relation)
    }

    /// Whether `relation` was eager-loaded for this row.
    #[must_use]
    pub fn is_loaded(&self, relation: &str) -> bool {
        self.record().is_some_and(|r| r.relations.contains_key(relation))
    }
}

impl<M> Deref for Instance<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.model
    }
}
