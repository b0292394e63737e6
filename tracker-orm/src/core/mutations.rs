//! Schema-driven write statements: deletes that follow relation delete
//! rules, and foreign-key updates behind `extend`/`remove`.

use futures::future::BoxFuture;
use sea_orm::sea_query::{Alias, Expr, Query, Value};
use sea_orm::{Condition, ConnectionTrait, DatabaseTransaction, DbErr};
use uuid::Uuid;

use crate::schema::{EntitySchema, OnDelete, RelationSpec};

/// How `delete` treats related rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// Apply each relation's delete rule, recursively.
    #[default]
    Cascade,
    /// One `DELETE` on the entity's table; relations are not touched.
    Direct,
}

/// `table.pk = id`
#[must_use]
pub fn pk_condition(schema: &EntitySchema, id: Uuid) -> Condition {
    Condition::all().add(
        Expr::col((Alias::new(schema.table), Alias::new(schema.primary_key))).eq(id),
    )
}

fn id_values(ids: &[Uuid]) -> Vec<Value> {
    ids.iter().copied().map(Value::from).collect()
}

/// Primary keys of `target` rows whose `column` is one of `ids`.
async fn child_ids(
    conn: &DatabaseTransaction,
    target: &EntitySchema,
    column: &str,
    ids: &[Uuid],
) -> Result<Vec<Uuid>, DbErr> {
    let stmt = Query::select()
        .column(Alias::new(target.primary_key))
        .from(Alias::new(target.table))
        .and_where(Expr::col(Alias::new(column)).is_in(id_values(ids)))
        .to_owned();
    let backend = conn.get_database_backend();
    let rows = conn.query_all(backend.build(&stmt)).await?;
    rows.iter()
        .map(|row| row.try_get::<Uuid>("", target.primary_key))
        .collect()
}

async fn nullify(
    conn: &DatabaseTransaction,
    relation: &RelationSpec,
    ids: &[Uuid],
) -> Result<u64, DbErr> {
    let target = relation.target();
    let null = target
        .field(relation.remote_key)
        .map_or(Value::Uuid(None), |f| f.null_value());
    let stmt = Query::update()
        .table(Alias::new(target.table))
        .value(Alias::new(relation.remote_key), null)
        .and_where(Expr::col(Alias::new(relation.remote_key)).is_in(id_values(ids)))
        .to_owned();
    let backend = conn.get_database_backend();
    Ok(conn.execute(backend.build(&stmt)).await?.rows_affected())
}

/// Deletes `ids` from `schema`'s table. In cascade mode, relations owned by
/// this entity are handled first: cascade children are deleted recursively,
/// nullify children lose their foreign key. Returns the root rows deleted.
pub fn delete_rows<'a>(
    conn: &'a DatabaseTransaction,
    schema: &'static EntitySchema,
    ids: Vec<Uuid>,
    mode: DeleteMode,
) -> BoxFuture<'a, Result<u64, DbErr>> {
    Box::pin(async move {
        if ids.is_empty() {
            return Ok(0);
        }

        if mode == DeleteMode::Cascade {
            for relation in schema.relations {
                if relation.local_key != schema.primary_key {
                    continue;
                }
                match relation.on_delete {
                    OnDelete::Ignore => {}
                    OnDelete::Nullify => {
                        let cleared = nullify(conn, relation, &ids).await?;
                        tracing::debug!(relation = relation.name, rows = cleared, "nullified");
                    }
                    OnDelete::Cascade => {
                        let target = relation.target();
                        let children = child_ids(conn, target, relation.remote_key, &ids).await?;
                        let removed = delete_rows(conn, target, children, mode).await?;
                        tracing::debug!(relation = relation.name, rows = removed, "cascaded");
                    }
                }
            }
        }

        let stmt = Query::delete()
            .from_table(Alias::new(schema.table))
            .and_where(Expr::col(Alias::new(schema.primary_key)).is_in(id_values(&ids)))
            .to_owned();
        let backend = conn.get_database_backend();
        Ok(conn.execute(backend.build(&stmt)).await?.rows_affected())
    })
}

/// Points `members` of a to-many relation at the owner. With `overwrite`,
/// current members are detached first.
pub async fn link(
    conn: &DatabaseTransaction,
    relation: &RelationSpec,
    owner: Value,
    null: Value,
    members: &[Uuid],
    overwrite: bool,
) -> Result<(), DbErr> {
    let target = relation.target();
    let backend = conn.get_database_backend();

    if overwrite {
        let detach = Query::update()
            .table(Alias::new(target.table))
            .value(Alias::new(relation.remote_key), null)
            .and_where(Expr::col(Alias::new(relation.remote_key)).eq(owner.clone()))
            .to_owned();
        conn.execute(backend.build(&detach)).await?;
    }

    if !members.is_empty() {
        let attach = Query::update()
            .table(Alias::new(target.table))
            .value(Alias::new(relation.remote_key), owner)
            .and_where(Expr::col(Alias::new(target.primary_key)).is_in(id_values(members)))
            .to_owned();
        conn.execute(backend.build(&attach)).await?;
    }
    Ok(())
}

/// Detaches `members` that currently point at the owner.
pub async fn unlink(
    conn: &DatabaseTransaction,
    relation: &RelationSpec,
    owner: Value,
    null: Value,
    members: &[Uuid],
) -> Result<u64, DbErr> {
    if members.is_empty() {
        return Ok(0);
    }
    let target = relation.target();
    let stmt = Query::update()
        .table(Alias::new(target.table))
        .value(Alias::new(relation.remote_key), null)
        .and_where(Expr::col(Alias::new(target.primary_key)).is_in(id_values(members)))
        .and_where(Expr::col(Alias::new(relation.remote_key)).eq(owner))
        .to_owned();
    let backend = conn.get_database_backend();
    Ok(conn.execute(backend.build(&stmt)).await?.rows_affected())
}
