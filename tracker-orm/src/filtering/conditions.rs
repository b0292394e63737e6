//! Filter mappings and `Q` trees compiled into SQL conditions.
//!
//! A [`FilterPlan`] owns the joins its predicates need. When no join was
//! registered the condition is applied to the root query as is. Otherwise
//! the root rows are restricted by primary key against a
//! `SELECT DISTINCT pk ... JOIN ... WHERE ...` subquery, so a to-many join
//! never duplicates root rows and the outer query stays free for ordering
//! joins and pagination.

use sea_orm::Condition;
use sea_orm::sea_query::{
    Alias, Expr, ExprTrait, Func, JoinType, Query, SelectStatement, SimpleExpr, Value,
};
use serde_json::Value as Json;

use super::joins::JoinSet;
use super::lookup::{FilterKey, FilterOperator};
use super::q::{Connector, Node, Q, QGroup};
use super::search::keyword_condition;
use crate::errors::OrmError;
use crate::schema::{EntitySchema, FieldDef};

/// Column alias of the count statement's single result.
pub const COUNT_ALIAS: &str = "total";

/// Predicates plus the joins they need, for one root entity.
#[derive(Debug, Clone)]
pub struct FilterPlan {
    joins: JoinSet,
    condition: Condition,
    predicates: usize,
}

impl FilterPlan {
    #[must_use]
    pub fn new(root: &'static EntitySchema) -> Self {
        Self {
            joins: JoinSet::new(root, "f", JoinType::InnerJoin),
            condition: Condition::all(),
            predicates: 0,
        }
    }

    #[must_use]
    pub fn root(&self) -> &'static EntitySchema {
        self.joins.root()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates == 0
    }

    #[must_use]
    pub fn needs_joins(&self) -> bool {
        !self.joins.is_empty()
    }

    fn push(&mut self, condition: Condition) {
        self.condition = std::mem::replace(&mut self.condition, Condition::all()).add(condition);
        self.predicates += 1;
    }

    /// ANDs every entry of `q`.
    ///
    /// # Errors
    /// Validation errors from key parsing, path resolution or value coercion.
    pub fn filter(&mut self, q: &Q) -> Result<(), OrmError> {
        if q.is_empty() {
            return Ok(());
        }
        let condition = build_q(&mut self.joins, q)?;
        self.push(condition);
        Ok(())
    }

    /// ANDs a boolean group.
    ///
    /// # Errors
    /// Same as [`FilterPlan::filter`].
    pub fn group(&mut self, group: &QGroup) -> Result<(), OrmError> {
        let condition = build_group(&mut self.joins, group)?;
        self.push(condition);
        Ok(())
    }

    /// ANDs a keyword search over `fields`. Blank keywords are ignored.
    ///
    /// # Errors
    /// Validation errors for unknown or non-text search fields.
    pub fn keyword<S: AsRef<str>>(&mut self, keyword: &str, fields: &[S]) -> Result<(), OrmError> {
        if let Some(condition) = keyword_condition(&mut self.joins, keyword, fields)? {
            self.push(condition);
        }
        Ok(())
    }

    fn primary_key(&self) -> (Alias, Alias) {
        let root = self.root();
        (Alias::new(root.table), Alias::new(root.primary_key))
    }

    /// `SELECT DISTINCT root.pk FROM root JOIN ... WHERE ...`
    #[must_use]
    pub fn matching_ids(&self) -> SelectStatement {
        let root = self.root();
        let mut stmt = Query::select();
        stmt.distinct()
            .column(self.primary_key())
            .from(Alias::new(root.table));
        self.joins.apply(&mut stmt);
        stmt.cond_where(self.condition.clone());
        stmt
    }

    /// Restricts a root-entity select to the matching rows.
    pub fn restrict(&self, stmt: &mut SelectStatement) {
        if self.is_empty() {
            return;
        }
        if self.needs_joins() {
            stmt.and_where(Expr::col(self.primary_key()).in_subquery(self.matching_ids()));
        } else {
            stmt.cond_where(self.condition.clone());
        }
    }

    /// `SELECT COUNT(DISTINCT root.pk) AS total ...` with the same joins and
    /// predicates.
    #[must_use]
    pub fn count_statement(&self) -> SelectStatement {
        let root = self.root();
        let mut stmt = Query::select();
        stmt.expr_as(
            Func::count_distinct(Expr::col(self.primary_key())),
            Alias::new(COUNT_ALIAS),
        )
        .from(Alias::new(root.table));
        self.joins.apply(&mut stmt);
        if !self.is_empty() {
            stmt.cond_where(self.condition.clone());
        }
        stmt
    }
}

/// ANDs the entries of one mapping.
///
/// # Errors
/// Validation errors from any entry.
pub fn build_q(joins: &mut JoinSet, q: &Q) -> Result<Condition, OrmError> {
    let mut all = Condition::all();
    for (key, value) in q.entries() {
        let key = FilterKey::parse(key)?;
        all = all.add(build_leaf(joins, &key, value)?);
    }
    Ok(all)
}

/// Compiles a group recursively; negated groups are wrapped in `NOT`.
///
/// # Errors
/// Validation errors from any leaf.
pub fn build_group(joins: &mut JoinSet, group: &QGroup) -> Result<Condition, OrmError> {
    let mut condition = match group.connector {
        Connector::And => Condition::all(),
        Connector::Or => Condition::any(),
    };
    for child in &group.children {
        let compiled = match child {
            Node::Leaf(q) => build_q(joins, q)?,
            Node::Group(inner) => build_group(joins, inner)?,
        };
        condition = condition.add(compiled);
    }
    Ok(if group.negated { condition.not() } else { condition })
}

/// One `key -> value` predicate.
///
/// # Errors
/// Validation error for unknown paths, bad values, or `exists` on a to-one
/// relation.
pub fn build_leaf(joins: &mut JoinSet, key: &FilterKey, value: &Json) -> Result<Condition, OrmError> {
    if key.operator == FilterOperator::Exists {
        return build_exists(joins, key, value);
    }

    let (alias, schema) = joins.resolve(&key.relations)?;
    let field = schema.require_field(&key.field)?;
    let column = || Expr::col((Alias::new(&alias), Alias::new(field.name)));
    let single = |value: &Json| -> Result<Value, OrmError> {
        if value.is_null() {
            return Err(OrmError::validation(format!(
                "Operator '{}' does not accept null for '{}'",
                key.operator, field.name
            )));
        }
        schema.coerce(field, value)
    };

    let expr: SimpleExpr = match key.operator {
        FilterOperator::Eq if value.is_null() => column().is_null(),
        FilterOperator::Eq => column().eq(schema.coerce(field, value)?),
        FilterOperator::Ne if value.is_null() => column().is_not_null(),
        FilterOperator::Ne => column().ne(schema.coerce(field, value)?),
        FilterOperator::Lt => column().lt(single(value)?),
        FilterOperator::Lte => column().lte(single(value)?),
        FilterOperator::Gt => column().gt(single(value)?),
        FilterOperator::Gte => column().gte(single(value)?),
        FilterOperator::Like => column().like(pattern(key, field, value)?),
        FilterOperator::ILike => {
            Func::upper(column()).like(pattern(key, field, value)?.to_uppercase())
        }
        FilterOperator::In => return membership(schema, field, column, value, false),
        FilterOperator::NotIn => return membership(schema, field, column, value, true),
        FilterOperator::LowerIn => return lower_membership(field, column, value),
        FilterOperator::Exists => return build_exists(joins, key, value),
    };
    Ok(Condition::all().add(expr))
}

fn pattern(key: &FilterKey, field: &FieldDef, value: &Json) -> Result<String, OrmError> {
    value.as_str().map(ToString::to_string).ok_or_else(|| {
        OrmError::validation(format!(
            "Operator '{}' on '{}' expects a string pattern",
            key.operator, field.name
        ))
    })
}

/// A list value, or a single scalar taken as a one-element list.
fn as_list(value: &Json) -> Vec<&Json> {
    match value {
        Json::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn never() -> Condition {
    Condition::all().add(Expr::val(1).eq(2))
}

fn membership(
    schema: &EntitySchema,
    field: &FieldDef,
    column: impl Fn() -> Expr,
    value: &Json,
    negated: bool,
) -> Result<Condition, OrmError> {
    let items = as_list(value);
    let has_null = items.iter().any(|v| v.is_null());
    let values = items
        .into_iter()
        .filter(|v| !v.is_null())
        .map(|v| schema.coerce(field, v))
        .collect::<Result<Vec<_>, _>>()?;

    let condition = match (negated, has_null, values.is_empty()) {
        // IN ()
        (false, false, true) => never(),
        (false, true, true) => Condition::all().add(column().is_null()),
        (false, true, false) => Condition::any()
            .add(column().is_in(values))
            .add(column().is_null()),
        (false, false, false) => Condition::all().add(column().is_in(values)),
        // NOT IN ()
        (true, false, true) => Condition::all(),
        (true, true, true) => Condition::all().add(column().is_not_null()),
        (true, true, false) => Condition::all()
            .add(column().is_not_in(values))
            .add(column().is_not_null()),
        (true, false, false) => Condition::any()
            .add(column().is_null())
            .add(column().is_not_in(values)),
    };
    Ok(condition)
}

fn lower_membership(
    field: &FieldDef,
    column: impl Fn() -> Expr,
    value: &Json,
) -> Result<Condition, OrmError> {
    let mut lowered = Vec::new();
    let mut has_null = false;
    for item in as_list(value) {
        match item {
            Json::Null => has_null = true,
            Json::String(s) => lowered.push(s.to_lowercase()),
            other => {
                return Err(OrmError::validation(format!(
                    "Operator 'lowerin' on '{}' expects strings, got {other}",
                    field.name
                )));
            }
        }
    }
    let condition = match (has_null, lowered.is_empty()) {
        (false, true) => never(),
        (true, true) => Condition::all().add(column().is_null()),
        (true, false) => Condition::any()
            .add(Func::lower(column()).is_in(lowered))
            .add(column().is_null()),
        (false, false) => Condition::all().add(Func::lower(column()).is_in(lowered)),
    };
    Ok(condition)
}

fn truthy(key: &FilterKey, value: &Json) -> Result<bool, OrmError> {
    match value {
        Json::Bool(b) => Ok(*b),
        Json::String(s) if s.eq_ignore_ascii_case("true") || s == "1" => Ok(true),
        Json::String(s) if s.eq_ignore_ascii_case("false") || s == "0" => Ok(false),
        other => Err(OrmError::validation(format!(
            "Operator 'exists' on '{}' expects a boolean, got {other}",
            key.field
        ))),
    }
}

/// `EXISTS (SELECT 1 FROM target WHERE target.fk = parent.pk)`, negated for
/// false.
fn build_exists(joins: &mut JoinSet, key: &FilterKey, value: &Json) -> Result<Condition, OrmError> {
    let wanted = truthy(key, value)?;
    let (parent_alias, owner) = joins.resolve(&key.relations)?;
    let relation = owner.require_relation(&key.field)?;
    if !relation.is_collection() {
        return Err(OrmError::validation(format!(
            "Operator 'exists' needs a to-many relation; '{}' on {} is to-one",
            relation.name, owner.name
        )));
    }

    let target = relation.target();
    let alias = joins.fresh_alias(relation.name);
    let mut subquery = Query::select();
    subquery
        .expr(Expr::val(1))
        .from_as(Alias::new(target.table), Alias::new(&alias))
        .and_where(
            Expr::col((Alias::new(&alias), Alias::new(relation.remote_key)))
                .equals((Alias::new(&parent_alias), Alias::new(relation.local_key))),
        );

    let condition = Condition::all().add(Expr::exists(subquery));
    Ok(if wanted { condition } else { condition.not() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::{AUTHOR, BOOK};
    use sea_orm::sea_query::SqliteQueryBuilder;
    use serde_json::json;

    fn sql_for(schema: &'static EntitySchema, q: &Q) -> String {
        let mut plan = FilterPlan::new(schema);
        plan.filter(q).unwrap();
        let mut stmt = Query::select();
        stmt.column(Alias::new("id")).from(Alias::new(schema.table));
        plan.restrict(&mut stmt);
        stmt.to_string(SqliteQueryBuilder)
    }

    fn leaf_err(schema: &'static EntitySchema, key: &str, value: Json) -> String {
        let mut plan = FilterPlan::new(schema);
        plan.filter(&Q::new().with(key, value)).unwrap_err().to_string()
    }

    #[test]
    fn test_comparison_on_root_has_no_subquery() {
        let sql = sql_for(&BOOK, &Q::new().with("pages__gte", 100));
        assert!(sql.contains(r#""book"."pages" >= 100"#), "{sql}");
        assert!(!sql.contains("DISTINCT"), "{sql}");
    }

    #[test]
    fn test_eq_null_is_is_null() {
        let sql = sql_for(&BOOK, &Q::new().with("title", Json::Null));
        assert!(sql.contains(r#""book"."title" IS NULL"#), "{sql}");
    }

    #[test]
    fn test_in_with_null_adds_is_null() {
        let sql = sql_for(&BOOK, &Q::new().with("pages__in", json!([1, null])));
        assert!(sql.contains(r#""book"."pages" IN (1)"#), "{sql}");
        assert!(sql.contains(r#"OR "book"."pages" IS NULL"#), "{sql}");
    }

    #[test]
    fn test_notin_without_null_keeps_null_rows() {
        let sql = sql_for(&BOOK, &Q::new().with("pages__notin", json!([1, 2])));
        assert!(sql.contains(r#""book"."pages" IS NULL OR "book"."pages" NOT IN (1, 2)"#), "{sql}");
    }

    #[test]
    fn test_notin_with_null_excludes_null_rows() {
        let sql = sql_for(&BOOK, &Q::new().with("pages__notin", json!([1, null])));
        assert!(sql.contains(r#""book"."pages" NOT IN (1) AND "book"."pages" IS NOT NULL"#), "{sql}");
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let sql = sql_for(&BOOK, &Q::new().with("pages__in", json!([])));
        assert!(sql.contains("1 = 2"), "{sql}");
    }

    #[test]
    fn test_ilike_uppercases_both_sides() {
        let sql = sql_for(&BOOK, &Q::new().with("title__ilike", "%rust%"));
        assert!(sql.contains(r#"UPPER("book"."title") LIKE '%RUST%'"#), "{sql}");
    }

    #[test]
    fn test_lowerin_lowercases_both_sides() {
        let sql = sql_for(&BOOK, &Q::new().with("title__lowerin", json!(["Rust", "GO"])));
        assert!(sql.contains(r#"LOWER("book"."title") IN ('rust', 'go')"#), "{sql}");
    }

    #[test]
    fn test_relation_filter_uses_distinct_subquery() {
        let sql = sql_for(&BOOK, &Q::new().with("author__name", "Ann"));
        assert!(sql.contains(r#""id" IN (SELECT DISTINCT "book"."id" FROM "book""#), "{sql}");
        assert!(sql.contains(r#"INNER JOIN "author" AS "f_author_1""#), "{sql}");
        assert!(sql.contains(r#""f_author_1"."name" = 'Ann'"#), "{sql}");
    }

    #[test]
    fn test_exists_on_collection() {
        let sql = sql_for(&AUTHOR, &Q::new().with("books__exists", true));
        assert!(sql.contains("EXISTS"), "{sql}");
        assert!(sql.contains(r#"FROM "book" AS "f_books_1""#), "{sql}");
        assert!(sql.contains(r#""f_books_1"."author_id" = "author"."id""#), "{sql}");

        let sql = sql_for(&AUTHOR, &Q::new().with("books__exists", "false"));
        assert!(sql.contains("NOT"), "{sql}");
    }

    #[test]
    fn test_exists_on_to_one_is_rejected() {
        let err = leaf_err(&BOOK, "author__exists", json!(true));
        assert!(err.contains("to-one"), "{err}");
    }

    #[test]
    fn test_unknown_field_and_null_comparison() {
        assert_eq!(
            leaf_err(&BOOK, "author__nmae", json!("x")),
            "Unknown field 'nmae' on Author"
        );
        assert!(leaf_err(&BOOK, "pages__gt", Json::Null).contains("does not accept null"));
        assert!(leaf_err(&BOOK, "pages", json!("many")).contains("expected I64"));
    }

    #[test]
    fn test_group_negation_and_or() {
        let group = Q::new().with("pages__lt", 10) | !Q::new().with("published", true);
        let mut plan = FilterPlan::new(&BOOK);
        plan.group(&group).unwrap();
        let mut stmt = Query::select();
        stmt.column(Alias::new("id")).from(Alias::new("book"));
        plan.restrict(&mut stmt);
        let sql = stmt.to_string(SqliteQueryBuilder);
        assert!(sql.contains(" OR "), "{sql}");
        assert!(sql.contains("NOT"), "{sql}");
    }

    #[test]
    fn test_count_statement_counts_distinct_keys() {
        let mut plan = FilterPlan::new(&AUTHOR);
        plan.filter(&Q::new().with("books__title", "Rust")).unwrap();
        let sql = plan.count_statement().to_string(SqliteQueryBuilder);
        assert!(sql.starts_with(r#"SELECT COUNT(DISTINCT "author"."id") AS "total""#), "{sql}");
        assert!(sql.contains("INNER JOIN"), "{sql}");
    }

    #[test]
    fn test_empty_plan_leaves_query_untouched() {
        let plan = FilterPlan::new(&BOOK);
        let mut stmt = Query::select();
        stmt.column(Alias::new("id")).from(Alias::new("book"));
        plan.restrict(&mut stmt);
        assert!(!stmt.to_string(SqliteQueryBuilder).contains("WHERE"));
    }
}
