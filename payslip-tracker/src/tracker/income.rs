use std::sync::Arc;

use async_graphql::{InputObject, SimpleObject};
use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use tracker_orm::{
    ActiveRecord, Attributes, EntitySchema, FieldDef, FieldKind, Node, OrmError, RelationSpec,
    View, ViewBuilder, fetch_rows,
};

use crate::account::contact;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "income")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub contact_id: Option<Uuid>,
    pub amount: Option<f64>,
    #[sea_orm(column_type = "String(StringLen::N(500))", nullable)]
    pub description: Option<String>,
    pub income_date: Option<DateTime<Utc>>,
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
    name: "Income",
    table: "income",
    primary_key: "id",
    fields: &[
        FieldDef::required("id", FieldKind::Uuid),
        FieldDef::new("contact_id", FieldKind::Uuid),
        FieldDef::new("amount", FieldKind::F64),
        FieldDef::new("description", FieldKind::String).max_length(super::MAX_DESCRIPTION_LENGTH),
        FieldDef::new("income_date", FieldKind::DateTimeUtc),
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

pub const SEARCH_FIELDS: &[&str] = &["description"];

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Income")]
pub struct IncomeView {
    pub id: Uuid,
    pub contact_id: Option<Uuid>,
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub income_date: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub contact: Option<Arc<contact::ContactView>>,
}

impl View for IncomeView {
    fn entity() -> &'static EntitySchema {
        &SCHEMA
    }

    fn build(node: &Node<'_>, views: &mut ViewBuilder<'_>) -> Result<Self, OrmError> {
        Ok(Self {
            id: node.require("id")?,
            contact_id: node.attr("contact_id")?,
            amount: node.attr("amount")?,
            description: node.attr("description")?,
            income_date: node.attr("income_date")?,
            created_at: node.attr("created_at")?,
            updated_at: node.attr("updated_at")?,
            contact: views.one(node, "contact")?,
        })
    }
}

#[derive(Clone, Debug, Default, InputObject, Serialize)]
pub struct IncomeInput {
    pub id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub income_date: Option<DateTime<Utc>>,
}

impl IncomeInput {
    /// Attribute map without the id; absent values are written as null.
    ///
    /// # Errors
    /// Fails only if the input does not serialize.
    pub fn attributes(&self) -> Result<Attributes, OrmError> {
        let mut attributes = tracker_orm::record::to_attributes(self)?;
        attributes.remove("id");
        Ok(attributes)
    }
}
