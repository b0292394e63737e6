//! Output for loaded graphs.
//!
//! [`Serializer`] renders records as JSON with every declared field and
//! relation (unloaded relations are `null`). [`ViewBuilder`] builds typed
//! [`View`] trees shared through `Arc`.
//!
//! Both walk the graph with an identity map. A record moves from unvisited
//! to in-progress to complete. Meeting a complete record again reuses its
//! output; meeting an in-progress one (a cycle) yields `null` / `None` and
//! list entries in that state are skipped. Nothing here touches the database.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::errors::OrmError;
use crate::filtering::Listing;
use crate::record::{Attributes, Graph, Instance, Record, RecordKey, Related};
use crate::schema::EntitySchema;

enum Slot<T> {
    InProgress,
    Done(T),
}

/// JSON rendering of records from one graph.
pub struct Serializer<'g> {
    graph: &'g Graph,
    slots: HashMap<RecordKey, Slot<Json>>,
}

impl<'g> Serializer<'g> {
    #[must_use]
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            slots: HashMap::new(),
        }
    }

    /// `null` when the key is not in the graph.
    pub fn to_value(&mut self, key: RecordKey) -> Json {
        self.build(key).unwrap_or(Json::Null)
    }

    /// Shares one identity map across the list.
    pub fn to_values(&mut self, keys: impl IntoIterator<Item = RecordKey>) -> Vec<Json> {
        keys.into_iter().map(|key| self.to_value(key)).collect()
    }

    /// Declared fields of plain attribute data; every relation is `null`.
    #[must_use]
    pub fn plain(schema: &EntitySchema, attributes: &Attributes) -> Json {
        let mut out = declared_fields(schema, attributes);
        for relation in schema.relations {
            out.insert(relation.name.to_string(), Json::Null);
        }
        Json::Object(out)
    }

    fn build(&mut self, key: RecordKey) -> Option<Json> {
        match self.slots.get(&key) {
            Some(Slot::Done(value)) => return Some(value.clone()),
            Some(Slot::InProgress) => return None,
            None => {}
        }
        let graph = self.graph;
        let record = graph.get(&key)?;
        self.slots.insert(key, Slot::InProgress);

        let mut out = declared_fields(record.schema, &record.attributes);
        for relation in record.schema.relations {
            let value = match record.related(relation.name) {
                None | Some(Related::One(None)) => Json::Null,
                Some(Related::One(Some(target))) => self.build(*target).unwrap_or(Json::Null),
                Some(Related::Many(targets)) => {
                    Json::Array(targets.iter().filter_map(|t| self.build(*t)).collect())
                }
            };
            out.insert(relation.name.to_string(), value);
        }

        let value = Json::Object(out);
        self.slots.insert(key, Slot::Done(value.clone()));
        Some(value)
    }
}

fn declared_fields(schema: &EntitySchema, attributes: &Attributes) -> Attributes {
    schema
        .fields
        .iter()
        .map(|field| {
            let value = attributes.get(field.name).cloned().unwrap_or(Json::Null);
            (field.name.to_string(), value)
        })
        .collect()
}

/// A typed output shape for one entity.
///
/// ```rust,ignore
/// impl View for IncomeView {
///     fn entity() -> &'static EntitySchema { &income::SCHEMA }
///
///     fn build(node: &Node<'_>, views: &mut ViewBuilder<'_>) -> Result<Self, OrmError> {
///         Ok(Self {
///             id: node.require("id")?,
///             amount: node.attr("amount")?,
///             contact: views.one::<ContactView>(node, "contact")?,
///         })
///     }
/// }
/// ```
pub trait View: Sized + Send + Sync + 'static {
    fn entity() -> &'static EntitySchema;

    /// # Errors
    /// Validation errors for fields of an unexpected shape or undeclared
    /// relations.
    fn build(node: &Node<'_>, views: &mut ViewBuilder<'_>) -> Result<Self, OrmError>;
}

/// The data a [`View`] reads from: a graph record, or plain attributes.
pub struct Node<'g> {
    schema: &'static EntitySchema,
    attributes: &'g Attributes,
    record: Option<&'g Record>,
}

impl<'g> Node<'g> {
    #[must_use]
    pub fn from_record(record: &'g Record) -> Self {
        Self {
            schema: record.schema,
            attributes: &record.attributes,
            record: Some(record),
        }
    }

    #[must_use]
    pub fn from_attributes(schema: &'static EntitySchema, attributes: &'g Attributes) -> Self {
        Self {
            schema,
            attributes,
            record: None,
        }
    }

    #[must_use]
    pub fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    /// A declared field; `None` for null or missing values.
    ///
    /// # Errors
    /// Unknown field, or a value that does not deserialize into `T`.
    pub fn attr<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, OrmError> {
        let field = self.schema.require_field(field)?;
        match self.attributes.get(field.name) {
            None | Some(Json::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|err| {
                OrmError::validation(format!(
                    "Field '{}' on {} has an unexpected shape: {err}",
                    field.name, self.schema.name
                ))
            }),
        }
    }

    /// # Errors
    /// As [`Node::attr`], plus a validation error when the value is absent.
    pub fn require<T: DeserializeOwned>(&self, field: &str) -> Result<T, OrmError> {
        self.attr(field)?.ok_or_else(|| {
            OrmError::validation(format!("Field '{field}' on {} is missing", self.schema.name))
        })
    }
}

/// Builds [`View`]s over one graph, caching each `(record, view type)`.
pub struct ViewBuilder<'g> {
    graph: &'g Graph,
    slots: HashMap<(RecordKey, TypeId), Slot<Arc<dyn Any + Send + Sync>>>,
}

impl<'g> ViewBuilder<'g> {
    #[must_use]
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            slots: HashMap::new(),
        }
    }

    /// `Ok(None)` when the key is absent or already being built.
    ///
    /// # Errors
    /// Propagates errors of the view's `build`, or a validation error when
    /// the record belongs to another entity.
    pub fn build<V: View>(&mut self, key: RecordKey) -> Result<Option<Arc<V>>, OrmError> {
        let slot = (key, TypeId::of::<V>());
        match self.slots.get(&slot) {
            Some(Slot::Done(cached)) => {
                return Ok(Arc::clone(cached).downcast::<V>().ok());
            }
            Some(Slot::InProgress) => return Ok(None),
            None => {}
        }

        let graph = self.graph;
        let Some(record) = graph.get(&key) else {
            return Ok(None);
        };
        if record.schema != V::entity() {
            return Err(OrmError::validation(format!(
                "{} record cannot be viewed as {}",
                record.schema.name,
                V::entity().name
            )));
        }

        self.slots.insert(slot, Slot::InProgress);
        let built = match V::build(&Node::from_record(record), self) {
            Ok(view) => Arc::new(view),
            Err(err) => {
                self.slots.remove(&slot);
                return Err(err);
            }
        };
        let shared: Arc<dyn Any + Send + Sync> = built.clone();
        self.slots.insert(slot, Slot::Done(shared));
        Ok(Some(built))
    }

    /// Builds in order with one identity map; in-progress entries are skipped.
    ///
    /// # Errors
    /// The first build error.
    pub fn build_many<V: View>(
        &mut self,
        keys: impl IntoIterator<Item = RecordKey>,
    ) -> Result<Vec<Arc<V>>, OrmError> {
        let mut views = Vec::new();
        for key in keys {
            if let Some(view) = self.build::<V>(key)? {
                views.push(view);
            }
        }
        Ok(views)
    }

    /// The view of a to-one relation; `None` when unloaded, empty, or a cycle.
    ///
    /// # Errors
    /// Validation error for an undeclared relation.
    pub fn one<W: View>(&mut self, node: &Node<'_>, relation: &str) -> Result<Option<Arc<W>>, OrmError> {
        node.schema.require_relation(relation)?;
        match node.record.and_then(|r| r.related(relation)) {
            Some(Related::One(Some(key))) => self.build::<W>(*key),
            Some(Related::Many(keys)) => match keys.first() {
                Some(key) => self.build::<W>(*key),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// The views of a to-many relation; `None` when unloaded.
    ///
    /// # Errors
    /// Validation error for an undeclared relation.
    pub fn many<W: View>(
        &mut self,
        node: &Node<'_>,
        relation: &str,
    ) -> Result<Option<Vec<Arc<W>>>, OrmError> {
        node.schema.require_relation(relation)?;
        match node.record.and_then(|r| r.related(relation)) {
            Some(Related::Many(keys)) => self.build_many::<W>(keys.iter().copied()).map(Some),
            Some(Related::One(key)) => self.build_many::<W>(key.iter().copied()).map(Some),
            None => Ok(None),
        }
    }
}

/// Builds a view from plain attribute data; relations read as unloaded.
///
/// # Errors
/// Propagates the view's `build` errors.
pub fn view_from_attributes<V: View>(attributes: &Attributes) -> Result<V, OrmError> {
    let empty = Graph::new();
    let mut views = ViewBuilder::new(&empty);
    V::build(&Node::from_attributes(V::entity(), attributes), &mut views)
}

/// JSON for one loaded instance.
#[must_use]
pub fn instance_json<M>(instance: &Instance<M>) -> Json {
    Serializer::new(instance.graph()).to_value(instance.key())
}

/// JSON for every item of a listing through one identity map. Pages keep
/// their envelope.
#[must_use]
pub fn listing_json<M>(listing: Listing<Instance<M>>) -> Listing<Json> {
    let graph = listing
        .items()
        .first()
        .map(|item| Arc::clone(item.graph()))
        .unwrap_or_default();
    let mut serializer = Serializer::new(&graph);
    listing.map(|item| serializer.to_value(item.key()))
}

/// # Errors
/// Propagates the view's `build` errors.
pub fn instance_view<V: View, M>(instance: &Instance<M>) -> Result<Arc<V>, OrmError> {
    ViewBuilder::new(instance.graph())
        .build::<V>(instance.key())?
        .ok_or_else(|| OrmError::not_found(V::entity().name))
}

/// Views of every item, in order, through one identity map.
///
/// # Errors
/// The first build error.
pub fn listing_views<V: View, M>(listing: &Listing<Instance<M>>) -> Result<Vec<Arc<V>>, OrmError> {
    let Some(first) = listing.items().first() else {
        return Ok(Vec::new());
    };
    let graph = Arc::clone(first.graph());
    ViewBuilder::new(&graph).build_many::<V>(listing.items().iter().map(Instance::key))
}
