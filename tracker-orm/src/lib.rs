//! # tracker-orm
//!
//! Active-record style data access on top of Sea-ORM: dynamic
//! `field__operator` filters with relation joins, batched eager loading,
//! keyword search with pagination, and cycle-safe graph serialization.
//!
//! Entities opt in by declaring a static [`EntitySchema`] and implementing
//! [`ActiveRecord`]:
//!
//! ```rust,ignore
//! impl ActiveRecord for income::Entity {
//!     fn schema() -> &'static EntitySchema {
//!         &income::SCHEMA
//!     }
//! }
//!
//! let incomes = transact(&db, |s| Box::pin(async move {
//!     income::Entity::filter(
//!         s,
//!         FilterParams::new()
//!             .filter("amount__gte", 100)
//!             .filter("contact__first_name__ilike", "%an%")
//!             .relations(Relations::paths(["contact"]))
//!             .paginate(Pagination::new(1, 20)?),
//!     )
//!     .await
//! }))
//! .await?;
//! ```

pub mod core;
pub mod errors;
pub mod filtering;
pub mod models;
pub mod query;
pub mod record;
pub mod relations;
pub mod schema;
pub mod serializer;
pub mod session;

pub use core::{ActiveRecord, DeleteMode};
pub use errors::{ApiError, OrmError};
pub use filtering::{Listing, Page, Pagination, Q, QGroup};
pub use models::{ListQuery, filter_params_from_query};
pub use query::{FilterParams, Lookup, SearchParams};
pub use record::{Attributes, Graph, Instance, Record, RecordKey, Related};
pub use relations::Relations;
pub use schema::{
    Cardinality, EntitySchema, FieldDef, FieldKind, OnDelete, RelationSpec, SchemaRegistry,
    fetch_rows,
};
pub use serializer::{
    Node, Serializer, View, ViewBuilder, instance_json, instance_view, listing_json, listing_views,
    view_from_attributes,
};
pub use session::{CommitMode, Session, transact};
