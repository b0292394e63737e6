use async_trait::async_trait;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, DbErr, EntityTrait, IdenStatic, IntoActiveModel,
    Iterable, QueryFilter,
};
use serde::Serialize;
use serde_json::Value as Json;
use uuid::Uuid;

use super::mutations::{self, DeleteMode, pk_condition};
use crate::errors::OrmError;
use crate::filtering::Listing;
use crate::query::{
    Compiled, FilterParams, Lookup, SearchParams, count_listed, materialize, run, select_models,
};
use crate::record::{Attributes, Instance, Record, to_attributes};
use crate::relations::{RelationTree, Relations};
use crate::schema::EntitySchema;
use crate::session::{CommitMode, Session};

/// Active-record operations for a Sea-ORM entity described by an
/// [`EntitySchema`].
///
/// Implementors only name their schema:
///
/// ```rust,ignore
/// impl ActiveRecord for income::Entity {
///     fn schema() -> &'static EntitySchema {
///         &income::SCHEMA
///     }
/// }
/// ```
///
/// Every call runs in the session's transaction. Mutations refresh the row
/// (with the requested relations) before they commit, and roll the session
/// back when a statement fails.
#[async_trait]
pub trait ActiveRecord: EntityTrait + Sync
where
    Self::Model: Serialize + IntoActiveModel<Self::ActiveModel> + Send + Sync,
    Self::ActiveModel: ActiveModelTrait<Entity = Self> + ActiveModelBehavior + Send + Sync,
{
    fn schema() -> &'static EntitySchema;

    /// The Sea-ORM column named `name`.
    ///
    /// # Errors
    /// Validation error for an unknown column.
    fn column(name: &str) -> Result<Self::Column, OrmError> {
        Self::Column::iter()
            .find(|column| column.as_str() == name)
            .ok_or_else(|| {
                OrmError::validation(format!("Unknown field '{name}' on {}", Self::schema().name))
            })
    }

    /// Writes `attributes` onto `active`, coercing each value to its field.
    ///
    /// # Errors
    /// Validation error for unknown fields or values of the wrong kind.
    fn assign(
        active: &mut Self::ActiveModel,
        attributes: &Attributes,
        exclude: &[&str],
        skip_primary_key: bool,
    ) -> Result<(), OrmError> {
        let schema = Self::schema();
        for (name, value) in attributes {
            if exclude.contains(&name.as_str()) {
                continue;
            }
            if skip_primary_key && name == schema.primary_key {
                tracing::debug!(entity = schema.name, "ignoring primary key in update");
                continue;
            }
            let field = schema.require_field(name)?;
            active.set(Self::column(name)?, schema.coerce(field, value)?);
        }
        Ok(())
    }

    /// # Errors
    /// Fails if the model does not carry a UUID primary key.
    fn model_id(model: &Self::Model) -> Result<Uuid, OrmError> {
        Ok(Record::from_attributes(Self::schema(), to_attributes(model)?)?.id())
    }

    /// Re-reads one row by id with `relations` loaded.
    async fn refresh(
        session: &mut Session,
        id: Uuid,
        relations: &RelationTree,
    ) -> Result<Instance<Self::Model>, OrmError> {
        let schema = Self::schema();
        let conn = session.conn().await?;
        let model = Self::find()
            .filter(pk_condition(schema, id))
            .one(conn)
            .await?
            .ok_or_else(|| OrmError::not_found(schema.name))?;
        let mut items = materialize(conn, schema, vec![model], relations).await?;
        items.pop().ok_or_else(|| OrmError::not_found(schema.name))
    }

    /// Refreshes after a write, then commits per `mode`. A failed refresh
    /// rolls the session back.
    async fn finish(
        session: &mut Session,
        id: Uuid,
        relations: &RelationTree,
        mode: CommitMode,
    ) -> Result<Instance<Self::Model>, OrmError> {
        match Self::refresh(session, id, relations).await {
            Ok(instance) => {
                session.settle(mode).await?;
                Ok(instance)
            }
            Err(err) => {
                if let Err(rollback) = session.rollback().await {
                    tracing::error!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// The first row matching `lookup`.
    async fn get(
        session: &mut Session,
        lookup: Lookup,
    ) -> Result<Option<Instance<Self::Model>>, OrmError> {
        let schema = Self::schema();
        let compiled = Compiled::new(schema, &lookup.into(), None)?;
        let conn = session.conn().await?;
        let models = select_models::<Self>(conn, &compiled, Some(1)).await?;
        let first: Vec<Self::Model> = models.into_iter().take(1).collect();
        let mut found = materialize(conn, schema, first, &compiled.relations).await?;
        Ok(found.pop())
    }

    async fn get_or_none(
        session: &mut Session,
        lookup: Lookup,
    ) -> Result<Option<Instance<Self::Model>>, OrmError> {
        Self::get(session, lookup).await
    }

    /// # Errors
    /// `NotFound` naming the entity when nothing matches.
    async fn get_or_404(
        session: &mut Session,
        lookup: Lookup,
    ) -> Result<Instance<Self::Model>, OrmError> {
        Self::get(session, lookup)
            .await?
            .ok_or_else(|| OrmError::not_found(Self::schema().name))
    }

    /// Returns the match, or creates it from the lookup's plain field
    /// entries plus `defaults`. The flag is true when a row was created.
    async fn get_or_create(
        session: &mut Session,
        lookup: Lookup,
        defaults: Attributes,
        mode: CommitMode,
    ) -> Result<(Instance<Self::Model>, bool), OrmError> {
        if let Some(found) = Self::get(session, lookup.clone()).await? {
            return Ok((found, false));
        }
        let schema = Self::schema();
        let mut attributes: Attributes = lookup
            .filters
            .entries()
            .iter()
            .filter(|(key, _)| schema.field(key).is_some())
            .cloned()
            .collect();
        attributes.extend(defaults);
        let created = Self::create(session, attributes, &[], lookup.relations, mode).await?;
        Ok((created, true))
    }

    /// Inserts one row. Keys in `exclude` are dropped from `attributes`.
    async fn create(
        session: &mut Session,
        attributes: Attributes,
        exclude: &[&str],
        relations: Relations,
        mode: CommitMode,
    ) -> Result<Instance<Self::Model>, OrmError> {
        let schema = Self::schema();
        let tree = relations.tree(schema)?;
        let mut active = <Self::ActiveModel as ActiveModelBehavior>::new();
        Self::assign(&mut active, &attributes, exclude, false)?;

        let conn = session.conn().await?;
        let model = match active.insert(conn).await {
            Ok(model) => model,
            Err(err) => {
                return Err(session.fail(format!("Create {} failed", schema.name), err).await);
            }
        };
        let id = Self::model_id(&model)?;
        tracing::debug!(entity = schema.name, %id, "created");
        Self::finish(session, id, &tree, mode).await
    }

    /// Upsert keyed on the primary key in `attributes`.
    async fn create_or_update(
        session: &mut Session,
        mut attributes: Attributes,
        exclude: &[&str],
        mode: CommitMode,
    ) -> Result<Instance<Self::Model>, OrmError> {
        let schema = Self::schema();
        let id = match attributes.get(schema.primary_key) {
            None | Some(Json::Null) => None,
            Some(value) => Some(
                value
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| {
                        OrmError::validation(format!(
                            "Invalid value {value} for field '{}' on {}: expected Uuid",
                            schema.primary_key, schema.name
                        ))
                    })?,
            ),
        };

        if let Some(id) = id {
            let conn = session.conn().await?;
            if let Some(existing) = Self::find().filter(pk_condition(schema, id)).one(conn).await? {
                attributes.retain(|key, _| !exclude.contains(&key.as_str()));
                return <Self as ActiveRecord>::update(session, existing, attributes, Relations::None, mode).await;
            }
        }
        Self::create(session, attributes, exclude, Relations::None, mode).await
    }

    /// Partial update. The primary key is never overwritten.
    async fn update(
        session: &mut Session,
        model: Self::Model,
        changes: Attributes,
        relations: Relations,
        mode: CommitMode,
    ) -> Result<Instance<Self::Model>, OrmError> {
        let schema = Self::schema();
        let tree = relations.tree(schema)?;
        let id = Self::model_id(&model)?;
        let mut active: Self::ActiveModel = model.into_active_model();
        Self::assign(&mut active, &changes, &[], true)?;

        let conn = session.conn().await?;
        if let Err(err) = active.update(conn).await {
            if matches!(err, DbErr::RecordNotUpdated) {
                if let Err(rollback) = session.rollback().await {
                    tracing::error!(error = %rollback, "rollback failed");
                }
                return Err(OrmError::not_found(schema.name));
            }
            return Err(session.fail(format!("Update {} failed", schema.name), err).await);
        }
        Self::finish(session, id, &tree, mode).await
    }

    /// Deletes one row.
    ///
    /// # Errors
    /// `NotFound` when no row has `id`.
    async fn delete(
        session: &mut Session,
        id: Uuid,
        delete_mode: DeleteMode,
        mode: CommitMode,
    ) -> Result<(), OrmError> {
        let schema = Self::schema();
        let conn = session.conn().await?;
        match mutations::delete_rows(conn, schema, vec![id], delete_mode).await {
            Ok(0) => {
                if let Err(rollback) = session.rollback().await {
                    tracing::error!(error = %rollback, "rollback failed");
                }
                Err(OrmError::not_found(schema.name))
            }
            Ok(_) => {
                tracing::debug!(entity = schema.name, %id, ?delete_mode, "deleted");
                session.settle(mode).await
            }
            Err(err) => Err(session.fail(format!("Delete {} failed", schema.name), err).await),
        }
    }

    /// Inserts every row or none. Values are validated before any write.
    async fn bulk_create(
        session: &mut Session,
        rows: Vec<Attributes>,
        mode: CommitMode,
    ) -> Result<Vec<Self::Model>, OrmError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let actives = rows
            .iter()
            .map(|row| {
                let mut active = <Self::ActiveModel as ActiveModelBehavior>::new();
                Self::assign(&mut active, row, &[], false)?;
                Ok(active)
            })
            .collect::<Result<Vec<_>, OrmError>>()?;

        let conn = session.conn().await?;
        let mut created = Vec::with_capacity(actives.len());
        for active in actives {
            match active.insert(conn).await {
                Ok(model) => created.push(model),
                Err(err) => return Err(session.fail("Bulk create failed", err).await),
            }
        }
        session.settle(mode).await?;
        tracing::debug!(entity = Self::schema().name, rows = created.len(), "bulk created");
        Ok(created)
    }

    /// Direct delete of every row in `ids`; returns the rows removed.
    async fn bulk_delete(
        session: &mut Session,
        ids: Vec<Uuid>,
        mode: CommitMode,
    ) -> Result<u64, OrmError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let schema = Self::schema();
        let conn = session.conn().await?;
        match mutations::delete_rows(conn, schema, ids, DeleteMode::Direct).await {
            Ok(removed) => {
                session.settle(mode).await?;
                Ok(removed)
            }
            Err(err) => Err(session.fail("Bulk delete failed", err).await),
        }
    }

    async fn count(session: &mut Session, params: FilterParams) -> Result<u64, OrmError> {
        let compiled = Compiled::new(Self::schema(), &params, None)?;
        let conn = session.conn().await?;
        count_listed(conn, &compiled).await
    }

    async fn all(
        session: &mut Session,
        relations: Relations,
        order_by: Vec<String>,
    ) -> Result<Vec<Instance<Self::Model>>, OrmError> {
        let params = FilterParams::new().relations(relations).order_by(order_by);
        Ok(Self::filter(session, params).await?.into_items())
    }

    async fn filter(
        session: &mut Session,
        params: FilterParams,
    ) -> Result<Listing<Instance<Self::Model>>, OrmError> {
        let compiled = Compiled::new(Self::schema(), &params, None)?;
        let conn = session.conn().await?;
        run::<Self>(conn, &compiled).await
    }

    /// The first row in order; pagination is ignored.
    async fn first(
        session: &mut Session,
        mut params: FilterParams,
    ) -> Result<Option<Instance<Self::Model>>, OrmError> {
        params.pagination = None;
        params.distinct = None;
        let lookup = Lookup {
            filters: params.filters,
            group: params.group,
            relations: params.relations,
            order_by: params.order_by,
        };
        Self::get(session, lookup).await
    }

    async fn search(
        session: &mut Session,
        search: SearchParams,
    ) -> Result<Listing<Instance<Self::Model>>, OrmError> {
        let keyword = search
            .keyword
            .as_deref()
            .map(|keyword| (keyword, search.fields.as_slice()));
        let compiled = Compiled::new(Self::schema(), &search.params, keyword)?;
        let conn = session.conn().await?;
        run::<Self>(conn, &compiled).await
    }

    /// Re-reads a row with `relations` loaded (usually [`Relations::All`]).
    async fn fetch_related(
        session: &mut Session,
        id: Uuid,
        relations: Relations,
    ) -> Result<Instance<Self::Model>, OrmError> {
        let tree = relations.tree(Self::schema())?;
        Self::refresh(session, id, &tree).await
    }

    /// Attaches `members` to a to-many relation of the owner.
    ///
    /// # Errors
    /// `RelationType` for to-one relations, `NotFound` for a missing owner.
    async fn extend(
        session: &mut Session,
        owner_id: Uuid,
        relation: &str,
        members: Vec<Uuid>,
        overwrite: bool,
        mode: CommitMode,
    ) -> Result<Instance<Self::Model>, OrmError> {
        let schema = Self::schema();
        let spec = schema.require_relation(relation)?;
        if !spec.is_collection() {
            return Err(OrmError::relation_type(schema.name, relation));
        }
        let owner = Self::refresh(session, owner_id, &RelationTree::new()).await?;
        let target = spec.target();
        let foreign_key = target.require_field(spec.remote_key)?;
        let local = owner.record().and_then(|r| r.get(spec.local_key)).cloned();
        let owner_value = target.coerce(foreign_key, &local.unwrap_or(Json::Null))?;
        let null = if overwrite {
            target.coerce(foreign_key, &Json::Null)?
        } else {
            foreign_key.null_value()
        };

        let conn = session.conn().await?;
        if let Err(err) = mutations::link(conn, spec, owner_value, null, &members, overwrite).await {
            return Err(session
                .fail(format!("Extend '{relation}' on {} failed", schema.name), err)
                .await);
        }
        Self::finish(session, owner_id, &RelationTree::parse(&[relation]), mode).await
    }

    /// Detaches `members` from a to-many relation of the owner.
    ///
    /// # Errors
    /// `RelationType` for to-one relations, validation error when the
    /// foreign key cannot be null.
    async fn remove(
        session: &mut Session,
        owner_id: Uuid,
        relation: &str,
        members: Vec<Uuid>,
        mode: CommitMode,
    ) -> Result<Instance<Self::Model>, OrmError> {
        let schema = Self::schema();
        let spec = schema.require_relation(relation)?;
        if !spec.is_collection() {
            return Err(OrmError::relation_type(schema.name, relation));
        }
        let owner = Self::refresh(session, owner_id, &RelationTree::new()).await?;
        let target = spec.target();
        let foreign_key = target.require_field(spec.remote_key)?;
        let local = owner.record().and_then(|r| r.get(spec.local_key)).cloned();
        let owner_value = target.coerce(foreign_key, &local.unwrap_or(Json::Null))?;
        let null = target.coerce(foreign_key, &Json::Null)?;

        let conn = session.conn().await?;
        if let Err(err) = mutations::unlink(conn, spec, owner_value, null, &members).await {
            return Err(session
                .fail(format!("Remove '{relation}' on {} failed", schema.name), err)
                .await);
        }
        Self::finish(session, owner_id, &RelationTree::parse(&[relation]), mode).await
    }
}
