use std::sync::Arc;

use async_graphql::SimpleObject;
use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use tracker_orm::{
    ActiveRecord, EntitySchema, FieldDef, FieldKind, Node, OnDelete, OrmError, RelationSpec, View,
    ViewBuilder, fetch_rows,
};

use super::{contact_config, user};
use crate::tracker::{goal, income};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contact")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

// Associations live in SCHEMA.
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
    name: "Contact",
    table: "contact",
    primary_key: "id",
    fields: &[
        FieldDef::required("id", FieldKind::Uuid),
        FieldDef::new("first_name", FieldKind::String),
        FieldDef::new("last_name", FieldKind::String),
        FieldDef::required("created_at", FieldKind::DateTimeUtc),
        FieldDef::new("updated_at", FieldKind::DateTimeUtc),
    ],
    relations: &[
        RelationSpec::has_one("user", "contact_id", user::schema, OnDelete::Nullify),
        RelationSpec::has_one("config", "contact_id", contact_config::schema, OnDelete::Cascade),
        RelationSpec::has_many("incomes", "contact_id", income::schema, OnDelete::Cascade),
        RelationSpec::has_many("goals", "contact_id", goal::schema, OnDelete::Cascade),
    ],
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

/// Searched when a request names no fields.
pub const SEARCH_FIELDS: &[&str] = &["first_name", "last_name"];

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Contact")]
pub struct ContactView {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub user: Option<Arc<user::UserView>>,
    pub config: Option<Arc<contact_config::ContactConfigView>>,
    pub incomes: Option<Vec<Arc<income::IncomeView>>>,
    pub goals: Option<Vec<Arc<goal::GoalView>>>,
}

impl View for ContactView {
    fn entity() -> &'static EntitySchema {
        &SCHEMA
    }

    fn build(node: &Node<'_>, views: &mut ViewBuilder<'_>) -> Result<Self, OrmError> {
        Ok(Self {
            id: node.require("id")?,
            first_name: node.attr("first_name")?,
            last_name: node.attr("last_name")?,
            created_at: node.attr("created_at")?,
            updated_at: node.attr("updated_at")?,
            user: views.one(node, "user")?,
            config: views.one(node, "config")?,
            incomes: views.many(node, "incomes")?,
            goals: views.many(node, "goals")?,
        })
    }
}
