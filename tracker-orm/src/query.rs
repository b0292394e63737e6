//! Query inputs and the select/count engine behind [`ActiveRecord`].
//!
//! [`Lookup`] finds one row, [`FilterParams`] lists rows, [`SearchParams`]
//! adds a keyword. All three compile to the same [`Compiled`] plan: filter
//! predicates (restricting the root by primary key when joins are involved),
//! LEFT-joined ordering, eager-load tree, `distinct` field and pagination.
//!
//! When an ordering term crosses a to-many relation, or `distinct` is set,
//! rows are picked in two steps: a grouped statement ranks one key per root
//! and takes the page, then the roots are loaded by key. `LIMIT` therefore
//! always counts roots, never joined rows.
//!
//! [`ActiveRecord`]: crate::core::ActiveRecord

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sea_orm::sea_query::{
    Alias, Asterisk, Expr, Func, Order, Query, SelectStatement, Value, WindowStatement,
};
use sea_orm::{ConnectionTrait, DatabaseTransaction, EntityTrait, QueryTrait};
use serde::Serialize;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::errors::OrmError;
use crate::filtering::{COUNT_ALIAS, FilterPlan, Listing, OrderPlan, Page, Pagination, Q, QGroup};
use crate::record::{Graph, Instance, Record, RecordKey, to_attributes};
use crate::relations::{self, RelationTree, Relations};
use crate::schema::EntitySchema;

/// Criteria for a single-row lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lookup {
    pub filters: Q,
    pub group: Option<QGroup>,
    pub relations: Relations,
    pub order_by: Vec<String>,
}

impl Lookup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn by_id(id: uuid::Uuid) -> Self {
        Self::new().filter("id", id.to_string())
    }

    #[must_use]
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.filters.push(key, value);
        self
    }

    #[must_use]
    pub fn group(mut self, group: QGroup) -> Self {
        self.group = Some(group);
        self
    }

    #[must_use]
    pub fn relations(mut self, relations: Relations) -> Self {
        self.relations = relations;
        self
    }

    #[must_use]
    pub fn order_by<S: Into<String>>(mut self, specs: impl IntoIterator<Item = S>) -> Self {
        self.order_by = specs.into_iter().map(Into::into).collect();
        self
    }
}

/// Criteria for listing rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterParams {
    pub filters: Q,
    pub group: Option<QGroup>,
    pub relations: Relations,
    pub order_by: Vec<String>,
    /// Keep only the first row per value of this field.
    pub distinct: Option<String>,
    pub pagination: Option<Pagination>,
}

impl FilterParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.filters.push(key, value);
        self
    }

    #[must_use]
    pub fn filters(mut self, filters: Q) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn group(mut self, group: QGroup) -> Self {
        self.group = Some(group);
        self
    }

    #[must_use]
    pub fn relations(mut self, relations: Relations) -> Self {
        self.relations = relations;
        self
    }

    #[must_use]
    pub fn order_by<S: Into<String>>(mut self, specs: impl IntoIterator<Item = S>) -> Self {
        self.order_by = specs.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn distinct(mut self, field: impl Into<String>) -> Self {
        self.distinct = Some(field.into());
        self
    }

    #[must_use]
    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

impl From<Lookup> for FilterParams {
    fn from(lookup: Lookup) -> Self {
        Self {
            filters: lookup.filters,
            group: lookup.group,
            relations: lookup.relations,
            order_by: lookup.order_by,
            distinct: None,
            pagination: None,
        }
    }
}

/// Keyword search plus the usual filter criteria.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchParams {
    pub keyword: Option<String>,
    /// Text fields to match; may be relation-qualified.
    pub fields: Vec<String>,
    pub params: FilterParams,
}

impl SearchParams {
    #[must_use]
    pub fn new<S: Into<String>>(
        keyword: Option<String>,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            keyword,
            fields: fields.into_iter().map(Into::into).collect(),
            params: FilterParams::default(),
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: FilterParams) -> Self {
        self.params = params;
        self
    }
}

/// A validated plan, ready to run.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub filter: FilterPlan,
    pub order: OrderPlan,
    pub relations: RelationTree,
    pub distinct: Option<&'static str>,
    pub pagination: Option<Pagination>,
}

impl Compiled {
    /// Validates and compiles every part before any query runs.
    ///
    /// # Errors
    /// Validation errors for unknown names, unsupported operators or bad
    /// values.
    pub fn new(
        schema: &'static EntitySchema,
        params: &FilterParams,
        keyword: Option<(&str, &[String])>,
    ) -> Result<Self, OrmError> {
        let mut filter = FilterPlan::new(schema);
        filter.filter(&params.filters)?;
        if let Some(group) = &params.group {
            filter.group(group)?;
        }
        if let Some((keyword, fields)) = keyword {
            filter.keyword(keyword, fields)?;
        }
        let order = OrderPlan::new(schema, &params.order_by)?;
        let relations = params.relations.tree(schema)?;
        let distinct = match &params.distinct {
            Some(name) => Some(schema.require_field(name)?.name),
            None => None,
        };
        Ok(Self {
            filter,
            order,
            relations,
            distinct,
            pagination: params.pagination,
        })
    }

    #[must_use]
    pub fn schema(&self) -> &'static EntitySchema {
        self.filter.root()
    }
}

/// Column aliases of the ranked-keys statement.
const KEY: &str = "key_id";
const DISTINCT_VALUE: &str = "key_value";
const RANK: &str = "key_rank";

fn sort_alias(index: usize) -> Alias {
    Alias::new(format!("key_sort_{index}"))
}

impl Compiled {
    /// Whether rows are picked through [`Compiled::ranked_keys`] rather than
    /// selected directly: a to-many ordering join would repeat root rows
    /// and `distinct` has to hold before any `LIMIT`.
    #[must_use]
    pub fn ranks_keys(&self) -> bool {
        self.order.may_duplicate() || self.distinct.is_some()
    }

    /// One row per matching root with its primary key and folded sort
    /// values. With `distinct`, each row also carries its rank among the
    /// roots sharing its value, so rank 1 is the first row per value.
    #[must_use]
    pub fn ranked_keys(&self) -> SelectStatement {
        let root = self.schema();
        let pk = (Alias::new(root.table), Alias::new(root.primary_key));
        let folded = self.order.folded_terms();

        let mut grouped = Query::select();
        grouped
            .expr_as(Expr::col(pk.clone()), Alias::new(KEY))
            .from(Alias::new(root.table));
        for (index, (expr, _)) in folded.iter().enumerate() {
            grouped.expr_as(expr.clone(), sort_alias(index));
        }
        self.order.apply_joins(&mut grouped);
        self.filter.restrict(&mut grouped);
        grouped.group_by_col(pk);

        let Some(field) = self.distinct else {
            return grouped;
        };
        let value = (Alias::new(root.table), Alias::new(field));
        grouped
            .expr_as(Expr::col(value.clone()), Alias::new(DISTINCT_VALUE))
            .group_by_col(value);

        let mut window = WindowStatement::partition_by(Alias::new(DISTINCT_VALUE));
        for (index, (_, order)) in folded.iter().enumerate() {
            window.order_by(sort_alias(index), order.clone());
        }
        window.order_by(Alias::new(KEY), Order::Asc);

        let mut ranked = Query::select();
        ranked
            .column(Asterisk)
            .expr_window_as(Func::cust(Alias::new("ROW_NUMBER")), window, Alias::new(RANK))
            .from_subquery(grouped, Alias::new("grouped"));
        ranked
    }

    /// Primary keys in result order, `LIMIT`ed when `limit` is set.
    #[must_use]
    pub fn key_page(&self, limit: Option<u64>, offset: u64) -> SelectStatement {
        let mut stmt = Query::select();
        stmt.column(Alias::new(KEY))
            .from_subquery(self.ranked_keys(), Alias::new("ranked"));
        if self.distinct.is_some() {
            stmt.and_where(Expr::col(Alias::new(RANK)).eq(1));
        }
        for (index, (_, order)) in self.order.folded_terms().into_iter().enumerate() {
            stmt.order_by(sort_alias(index), order);
        }
        stmt.order_by(Alias::new(KEY), Order::Asc);
        if let Some(limit) = limit {
            stmt.limit(limit).offset(offset);
        }
        stmt
    }

    /// `COUNT(*)` over the rows [`Compiled::key_page`] pages through.
    #[must_use]
    pub fn key_count(&self) -> SelectStatement {
        let mut stmt = Query::select();
        stmt.expr_as(Func::count(Expr::col(Asterisk)), Alias::new(COUNT_ALIAS))
            .from_subquery(self.ranked_keys(), Alias::new("ranked"));
        if self.distinct.is_some() {
            stmt.and_where(Expr::col(Alias::new(RANK)).eq(1));
        }
        stmt
    }
}

/// Runs the select part of `compiled`, with an optional extra row cap.
pub(crate) async fn select_models<E>(
    conn: &DatabaseTransaction,
    compiled: &Compiled,
    cap: Option<u64>,
) -> Result<Vec<E::Model>, OrmError>
where
    E: EntityTrait,
    E::Model: Serialize + Send + Sync,
{
    if compiled.ranks_keys() {
        return select_by_keys::<E>(conn, compiled, cap).await;
    }

    let schema = compiled.schema();
    let mut select = E::find();
    let stmt = QueryTrait::query(&mut select);
    compiled.filter.restrict(stmt);
    if !compiled.order.is_empty() {
        compiled.order.apply(stmt);
    } else if compiled.pagination.is_some() {
        OrderPlan::apply_default(schema, stmt);
    }
    if let Some(pagination) = compiled.pagination {
        stmt.limit(pagination.page_size).offset(pagination.offset());
    } else if let Some(cap) = cap {
        stmt.limit(cap);
    }
    Ok(select.all(conn).await?)
}

/// Pages over ranked primary keys first, then loads those rows and puts
/// them back in key order.
async fn select_by_keys<E>(
    conn: &DatabaseTransaction,
    compiled: &Compiled,
    cap: Option<u64>,
) -> Result<Vec<E::Model>, OrmError>
where
    E: EntityTrait,
    E::Model: Serialize + Send + Sync,
{
    let (limit, offset) = match compiled.pagination {
        Some(pagination) => (Some(pagination.page_size), pagination.offset()),
        None => (cap, 0),
    };
    let backend = conn.get_database_backend();
    let rows = conn
        .query_all(backend.build(&compiled.key_page(limit, offset)))
        .await?;
    let keys = rows
        .iter()
        .map(|row| row.try_get::<Uuid>("", KEY))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(entity = compiled.schema().name, keys = keys.len(), "ranked keys selected");
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let schema = compiled.schema();
    let mut select = E::find();
    QueryTrait::query(&mut select).and_where(
        Expr::col((Alias::new(schema.table), Alias::new(schema.primary_key)))
            .is_in(keys.iter().copied().map(Value::from)),
    );
    let models = select.all(conn).await?;

    let position: HashMap<Uuid, usize> =
        keys.iter().enumerate().map(|(index, key)| (*key, index)).collect();
    let mut placed = models
        .into_iter()
        .map(|model| {
            let id = Record::from_attributes(schema, to_attributes(&model)?)?.id();
            Ok((position.get(&id).copied().unwrap_or(usize::MAX), model))
        })
        .collect::<Result<Vec<_>, OrmError>>()?;
    placed.sort_by_key(|(index, _)| *index);
    Ok(placed.into_iter().map(|(_, model)| model).collect())
}

/// `COUNT(DISTINCT pk)` under the plan's predicates.
pub(crate) async fn count_matching(
    conn: &DatabaseTransaction,
    plan: &FilterPlan,
) -> Result<u64, OrmError> {
    count_rows(conn, &plan.count_statement()).await
}

/// Rows `compiled` would list without paging; one per distinct value when
/// `distinct` is set.
pub(crate) async fn count_listed(
    conn: &DatabaseTransaction,
    compiled: &Compiled,
) -> Result<u64, OrmError> {
    if compiled.distinct.is_some() {
        count_rows(conn, &compiled.key_count()).await
    } else {
        count_matching(conn, &compiled.filter).await
    }
}

async fn count_rows(conn: &DatabaseTransaction, stmt: &SelectStatement) -> Result<u64, OrmError> {
    let backend = conn.get_database_backend();
    let row = conn.query_one(backend.build(stmt)).await?;
    let total = match row {
        Some(row) => row.try_get::<i64>("", COUNT_ALIAS)?,
        None => 0,
    };
    Ok(u64::try_from(total).unwrap_or_default())
}

/// Puts `models` into a fresh graph, drops repeated primary keys, then
/// eager-loads `tree`.
pub(crate) async fn materialize<M>(
    conn: &DatabaseTransaction,
    schema: &'static EntitySchema,
    models: Vec<M>,
    tree: &RelationTree,
) -> Result<Vec<Instance<M>>, OrmError>
where
    M: Serialize + Send,
{
    let mut graph = Graph::new();
    let mut kept: Vec<(M, RecordKey)> = Vec::with_capacity(models.len());
    let mut seen = HashSet::new();

    for model in models {
        let record = Record::from_attributes(schema, to_attributes(&model)?)?;
        if !seen.insert(record.key) {
            continue;
        }
        let key = graph.insert(record);
        kept.push((model, key));
    }

    if !tree.is_empty() {
        let keys = kept.iter().map(|(_, key)| *key).collect();
        relations::load(conn, &mut graph, schema, keys, tree).await?;
    }

    let graph = Arc::new(graph);
    Ok(kept
        .into_iter()
        .map(|(model, key)| Instance::new(model, key, Arc::clone(&graph)))
        .collect())
}

/// Select, load and (when paginated) count.
pub(crate) async fn run<E>(
    conn: &DatabaseTransaction,
    compiled: &Compiled,
) -> Result<Listing<Instance<E::Model>>, OrmError>
where
    E: EntityTrait,
    E::Model: Serialize + Send + Sync,
{
    let models = select_models::<E>(conn, compiled, None).await?;
    let schema = compiled.schema();
    tracing::debug!(entity = schema.name, rows = models.len(), "query executed");
    let items = materialize(conn, schema, models, &compiled.relations).await?;

    match compiled.pagination {
        None => Ok(Listing::Items(items)),
        Some(pagination) => {
            let total = count_listed(conn, compiled).await?;
            Ok(Listing::Page(Page::new(items, pagination, total)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::{AUTHOR, BOOK};

    #[test]
    fn test_compile_validates_every_part() {
        let params = FilterParams::new().order_by(["-isbn"]);
        assert!(Compiled::new(&BOOK, &params, None).is_err());

        let params = FilterParams::new().relations(Relations::paths(["publisher"]));
        assert!(Compiled::new(&BOOK, &params, None).is_err());

        let params = FilterParams::new().distinct("nope");
        assert_eq!(
            Compiled::new(&BOOK, &params, None).unwrap_err().to_string(),
            "Unknown field 'nope' on Book"
        );
    }

    #[test]
    fn test_keyword_joins_share_filter_aliases() {
        let params = FilterParams::new().filter("author__name", "Ann");
        let fields = vec!["author__name".to_string(), "title".to_string()];
        let compiled = Compiled::new(&BOOK, &params, Some(("ann", fields.as_slice()))).unwrap();
        let sql = compiled
            .filter
            .count_statement()
            .to_string(sea_orm::sea_query::SqliteQueryBuilder);
        assert_eq!(sql.matches("JOIN").count(), 1, "{sql}");
    }

    #[test]
    fn test_plain_listing_selects_rows_directly() {
        let params = FilterParams::new().order_by(["-author__name"]);
        let compiled = Compiled::new(&BOOK, &params, None).unwrap();
        assert!(!compiled.ranks_keys());
    }

    #[test]
    fn test_to_many_order_pages_over_grouped_keys() {
        let params = FilterParams::new()
            .order_by(["books__pages"])
            .paginate(Pagination::new(2, 5).unwrap());
        let compiled = Compiled::new(&AUTHOR, &params, None).unwrap();
        assert!(compiled.ranks_keys());

        let sql = compiled
            .key_page(Some(5), 5)
            .to_string(sea_orm::sea_query::SqliteQueryBuilder);
        assert!(sql.contains(r#"MIN("o_books_1"."pages") AS "key_sort_0""#), "{sql}");
        assert!(sql.contains(r#"GROUP BY "author"."id""#), "{sql}");
        assert!(
            sql.ends_with(r#"ORDER BY "key_sort_0" ASC, "key_id" ASC LIMIT 5 OFFSET 5"#),
            "{sql}"
        );
        assert!(!sql.contains("ROW_NUMBER"), "{sql}");
    }

    #[test]
    fn test_distinct_ranks_rows_within_each_value() {
        let params = FilterParams::new().distinct("author_id").order_by(["-pages"]);
        let compiled = Compiled::new(&BOOK, &params, None).unwrap();
        assert!(compiled.ranks_keys());

        let sql = compiled
            .key_page(None, 0)
            .to_string(sea_orm::sea_query::SqliteQueryBuilder);
        assert!(
            sql.contains(
                r#"ROW_NUMBER() OVER ( PARTITION BY "key_value" ORDER BY "key_sort_0" DESC, "key_id" ASC )"#
            ),
            "{sql}"
        );
        assert!(sql.contains(r#"WHERE "key_rank" = 1"#), "{sql}");
        assert!(!sql.contains("LIMIT"), "{sql}");

        let count = compiled
            .key_count()
            .to_string(sea_orm::sea_query::SqliteQueryBuilder);
        assert!(count.starts_with(r#"SELECT COUNT(*) AS "total" FROM (SELECT"#), "{count}");
        assert!(count.ends_with(r#"WHERE "key_rank" = 1"#), "{count}");
    }

    #[test]
    fn test_lookup_by_id_converts_to_filter_params() {
        let id = uuid::Uuid::new_v4();
        let params = FilterParams::from(Lookup::by_id(id).relations(Relations::All));
        assert_eq!(params.filters.len(), 1);
        assert_eq!(params.relations, Relations::All);
        let compiled = Compiled::new(&AUTHOR, &params, None).unwrap();
        assert_eq!(compiled.relations.children().count(), 2);
    }
}
