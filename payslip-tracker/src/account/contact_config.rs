use std::sync::Arc;

use async_graphql::SimpleObject;
use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use tracker_orm::{
    ActiveRecord, EntitySchema, FieldDef, FieldKind, Node, OrmError, RelationSpec, View,
    ViewBuilder, fetch_rows,
};

use super::contact;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contact_config")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub contact_id: Option<Uuid>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        Self {
            id: Set(Uuid::new_v4()),
            ..ActiveModelTrait::default()
        }
    }
}

pub static SCHEMA: EntitySchema = EntitySchema {
    name: "ContactConfig",
    table: "contact_config",
    primary_key: "id",
    fields: &[
        FieldDef::required("id", FieldKind::Uuid),
        FieldDef::new("contact_id", FieldKind::Uuid),
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
#[graphql(name = "ContactConfig")]
pub struct ContactConfigView {
    pub id: Uuid,
    pub contact_id: Option<Uuid>,
    pub contact: Option<Arc<contact::ContactView>>,
}

impl View for ContactConfigView {
    fn entity() -> &'static EntitySchema {
        &SCHEMA
    }

    fn build(node: &Node<'_>, views: &mut ViewBuilder<'_>) -> Result<Self, OrmError> {
        Ok(Self {
            id: node.require("id")?,
            contact_id: node.attr("contact_id")?,
            contact: views.one(node, "contact")?,
        })
    }
}
