//! Relation path resolution with one alias per path.
//!
//! Each distinct relation path gets one join and one alias. Filter keys that
//! share a path (`contact__first_name` and `contact__last_name`) share the
//! alias. Aliases carry a per-set prefix so a filter subquery and the outer
//! ordering joins never collide.

use std::collections::HashMap;

use sea_orm::sea_query::{Alias, Expr, JoinType, SelectStatement};

use crate::errors::OrmError;
use crate::schema::{EntitySchema, RelationSpec};

#[derive(Debug, Clone)]
struct JoinStep {
    parent_alias: String,
    alias: String,
    relation: &'static RelationSpec,
}

/// Joins registered while resolving paths from one root entity.
#[derive(Debug, Clone)]
pub struct JoinSet {
    root: &'static EntitySchema,
    prefix: &'static str,
    kind: JoinType,
    steps: Vec<JoinStep>,
    by_path: HashMap<Vec<String>, usize>,
    counter: usize,
}

impl JoinSet {
    #[must_use]
    pub fn new(root: &'static EntitySchema, prefix: &'static str, kind: JoinType) -> Self {
        Self {
            root,
            prefix,
            kind,
            steps: Vec::new(),
            by_path: HashMap::new(),
            counter: 0,
        }
    }

    #[must_use]
    pub fn root(&self) -> &'static EntitySchema {
        self.root
    }

    /// The root table is referenced by its own name.
    #[must_use]
    pub fn root_alias(&self) -> &'static str {
        self.root.table
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether any registered hop is to-many, so joining can repeat roots.
    #[must_use]
    pub fn fans_out(&self) -> bool {
        self.steps.iter().any(|step| step.relation.is_collection())
    }

    /// A fresh alias not used by any join in this set.
    pub fn fresh_alias(&mut self, name: &str) -> String {
        self.counter += 1;
        format!("{}_{name}_{}", self.prefix, self.counter)
    }

    /// Walks `path` from the root, registering a join for every hop not seen
    /// before. Returns the alias and schema of the last entity reached.
    ///
    /// # Errors
    /// Validation error naming the first segment that is not a relation.
    pub fn resolve(&mut self, path: &[String]) -> Result<(String, &'static EntitySchema), OrmError> {
        let mut alias = self.root_alias().to_string();
        let mut schema = self.root;

        for depth in 0..path.len() {
            let prefix = &path[..=depth];
            if let Some(&index) = self.by_path.get(prefix) {
                let step = &self.steps[index];
                alias.clone_from(&step.alias);
                schema = step.relation.target();
                continue;
            }

            let relation = schema.require_relation(&path[depth])?;
            let next_alias = self.fresh_alias(relation.name);
            tracing::trace!(path = ?prefix, alias = %next_alias, "registering join");
            self.steps.push(JoinStep {
                parent_alias: alias,
                alias: next_alias.clone(),
                relation,
            });
            self.by_path.insert(prefix.to_vec(), self.steps.len() - 1);
            alias = next_alias;
            schema = relation.target();
        }

        Ok((alias, schema))
    }

    /// Adds every registered join to `stmt`, in registration order.
    pub fn apply(&self, stmt: &mut SelectStatement) {
        for step in &self.steps {
            let target = step.relation.target();
            stmt.join_as(
                self.kind,
                Alias::new(target.table),
                Alias::new(&step.alias),
                Expr::col((Alias::new(&step.parent_alias), Alias::new(step.relation.local_key)))
                    .equals((Alias::new(&step.alias), Alias::new(step.relation.remote_key))),
            );
        }
    }
}
