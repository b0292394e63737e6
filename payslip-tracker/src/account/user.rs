use std::sync::Arc;

use async_graphql::SimpleObject;
use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use tracker_orm::{
    ActiveRecord, EntitySchema, FieldDef, FieldKind, Node, OrmError, RelationSpec, View,
    ViewBuilder, fetch_rows,
};

use super::contact;

/// An application login. Credentials stay with the identity provider;
/// `identity_uid` is the provider's subject id.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub contact_id: Option<Uuid>,
    pub username: Option<String>,
    pub identity_uid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        Self {
            id: Set(Uuid::new_v4()),
            created_at: Set(Utc::now()),
            ..ActiveModelTrait::default()
        }
    }

    async fn before_save<C>(mut self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        self.updated_at = Set(Some(Utc::now()));
        Ok(self)
    }
}

pub static SCHEMA: EntitySchema = EntitySchema {
    name: "User",
    table: "user",
    primary_key: "id",
    fields: &[
        FieldDef::required("id", FieldKind::Uuid),
        FieldDef::new("contact_id", FieldKind::Uuid),
        FieldDef::new("username", FieldKind::String),
        FieldDef::new("identity_uid", FieldKind::String),
        FieldDef::required("created_at", FieldKind::DateTimeUtc),
        FieldDef::new("updated_at", FieldKind::DateTimeUtc),
    ],
    relations: &[RelationSpec::belongs_to("contact", "contact_id", contact::schema)],
    fetch: fetch_rows::<Entity>,
};

pub fn schema() -> &'static EntitySchema {
    &SCHEMA
}

impl ActiveRecord for Entity {
    fn schema() -> &'static EntitySchema {
        &SCHEMA
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "User")]
pub struct UserView {
    pub id: Uuid,
    pub contact_id: Option<Uuid>,
    pub username: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub contact: Option<Arc<contact::ContactView>>,
}

impl View for UserView {
    fn entity() -> &'static EntitySchema {
        &SCHEMA
    }

    fn build(node: &Node<'_>, views: &mut ViewBuilder<'_>) -> Result<Self, OrmError> {
        Ok(Self {
            id: node.require("id")?,
            contact_id: node.attr("contact_id")?,
            username: node.attr("username")?,
            created_at: node.attr("created_at")?,
            updated_at: node.attr("updated_at")?,
            contact: views.one(node, "contact")?,
        })
    }
}
