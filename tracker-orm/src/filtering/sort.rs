use std::str::FromStr;

use sea_orm::sea_query::{Alias, Expr, Func, JoinType, Order, SelectStatement, SimpleExpr};

use super::joins::JoinSet;
use super::lookup::split_path;
use crate::errors::OrmError;
use crate::schema::EntitySchema;

/// One ordering term: `amount`, `-amount`, `contact__last_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    pub relations: Vec<String>,
    pub field: String,
    pub descending: bool,
}

impl FromStr for OrderSpec {
    type Err = OrmError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let trimmed = spec.trim();
        let (descending, path) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let mut segments = split_path(path);
        let field = segments
            .pop()
            .ok_or_else(|| OrmError::validation(format!("Malformed order_by entry '{spec}'")))?;
        Ok(Self {
            relations: segments,
            field,
            descending,
        })
    }
}

impl OrderSpec {
    #[must_use]
    pub fn order(&self) -> Order {
        if self.descending { Order::Desc } else { Order::Asc }
    }
}

/// Splits comma-separated `order_by` values, dropping blanks.
#[must_use]
pub fn split_order_list<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .flat_map(|entry| entry.as_ref().split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Ordering terms plus the LEFT joins they need on the outer query.
///
/// LEFT joins keep root rows whose relation is empty; they sort as NULL.
#[derive(Debug, Clone)]
pub struct OrderPlan {
    joins: JoinSet,
    terms: Vec<(String, &'static str, Order)>,
}

impl OrderPlan {
    /// # Errors
    /// Validation error for malformed terms or unknown relations/fields.
    pub fn new<S: AsRef<str>>(root: &'static EntitySchema, specs: &[S]) -> Result<Self, OrmError> {
        let mut joins = JoinSet::new(root, "o", JoinType::LeftJoin);
        let mut terms = Vec::new();
        for raw in split_order_list(specs) {
            let spec: OrderSpec = raw.parse()?;
            let (alias, schema) = joins.resolve(&spec.relations)?;
            let field = schema.require_field(&spec.field)?;
            terms.push((alias, field.name, spec.order()));
        }
        Ok(Self { joins, terms })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Ordering through a to-many relation repeats root rows.
    #[must_use]
    pub fn may_duplicate(&self) -> bool {
        self.joins.fans_out()
    }

    pub fn apply(&self, stmt: &mut SelectStatement) {
        self.joins.apply(stmt);
        for (alias, field, order) in &self.terms {
            stmt.order_by((Alias::new(alias), Alias::new(*field)), order.clone());
        }
    }

    /// Adds the ordering joins without any `ORDER BY`.
    pub fn apply_joins(&self, stmt: &mut SelectStatement) {
        self.joins.apply(stmt);
    }

    /// Each term folded to one value per root row, for use under
    /// `GROUP BY pk`: `MIN` for ascending terms, `MAX` for descending ones.
    /// A contact ordered by `incomes__amount` sorts by its smallest income.
    #[must_use]
    pub fn folded_terms(&self) -> Vec<(SimpleExpr, Order)> {
        self.terms
            .iter()
            .map(|(alias, field, order)| {
                let column = Expr::col((Alias::new(alias), Alias::new(*field)));
                let folded = match order {
                    Order::Desc => Func::max(column),
                    _ => Func::min(column),
                };
                (folded.into(), order.clone())
            })
            .collect()
    }

    /// Orders by the primary key; used when pagination needs a stable order.
    pub fn apply_default(root: &'static EntitySchema, stmt: &mut SelectStatement) {
        stmt.order_by(
            (Alias::new(root.table), Alias::new(root.primary_key)),
            Order::Asc,
        );
    }
}
