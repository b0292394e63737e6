//! Eager loading of named relation paths.
//!
//! Paths such as `["contact", "contact__user", "goals"]` become a
//! [`RelationTree`]. Loading walks the tree level by level and issues one
//! `remote_key IN (...)` query per relation per level, no matter how many
//! parent rows there are. Loaded rows land in the operation's [`Graph`].

use std::collections::{BTreeMap, HashMap};

use futures::future::BoxFuture;
use sea_orm::sea_query::{Alias, Expr};
use sea_orm::{Condition, DatabaseTransaction};
use serde_json::Value as Json;

use crate::errors::OrmError;
use crate::filtering::split_path;
use crate::record::{Graph, Record, RecordKey, Related};
use crate::schema::{Cardinality, EntitySchema};

/// Nested relation names to load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationTree {
    children: BTreeMap<String, RelationTree>,
}

impl RelationTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges every path; shared prefixes share a node.
    #[must_use]
    pub fn parse<S: AsRef<str>>(paths: &[S]) -> Self {
        let mut tree = Self::new();
        for path in paths {
            let mut node = &mut tree;
            for segment in split_path(path.as_ref()) {
                node = node.children.entry(segment).or_default();
            }
        }
        tree
    }

    /// Every declared relation of `schema`, one level deep.
    #[must_use]
    pub fn all(schema: &EntitySchema) -> Self {
        Self {
            children: schema
                .relations
                .iter()
                .map(|r| (r.name.to_string(), Self::new()))
                .collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &RelationTree)> {
        self.children.iter().map(|(name, tree)| (name.as_str(), tree))
    }

    /// Checks every segment against the schemas it walks through.
    ///
    /// # Errors
    /// Validation error naming the first unknown relation and its entity.
    pub fn validate(&self, schema: &'static EntitySchema) -> Result<(), OrmError> {
        for (name, subtree) in self.children() {
            let relation = schema.require_relation(name)?;
            subtree.validate(relation.target())?;
        }
        Ok(())
    }
}

/// Which relations an operation should eager-load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Relations {
    #[default]
    None,
    /// Every declared relation of the root, one level deep.
    All,
    Paths(Vec<String>),
}

impl Relations {
    pub fn paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Paths(paths.into_iter().map(Into::into).collect())
    }

    /// Comma-separated paths; blank input means none.
    #[must_use]
    pub fn from_csv(raw: &str) -> Self {
        let paths: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();
        if paths.is_empty() {
            Self::None
        } else {
            Self::Paths(paths)
        }
    }

    /// # Errors
    /// Validation error for unknown relation names.
    pub fn tree(&self, schema: &'static EntitySchema) -> Result<RelationTree, OrmError> {
        let tree = match self {
            Self::None => RelationTree::new(),
            Self::All => RelationTree::all(schema),
            Self::Paths(paths) => RelationTree::parse(paths),
        };
        tree.validate(schema)?;
        Ok(tree)
    }
}

impl From<Vec<String>> for Relations {
    fn from(paths: Vec<String>) -> Self {
        if paths.is_empty() { Self::None } else { Self::Paths(paths) }
    }
}

impl From<Option<Vec<String>>> for Relations {
    fn from(paths: Option<Vec<String>>) -> Self {
        paths.map_or(Self::None, Self::from)
    }
}

/// Join values are compared by their JSON text.
fn join_key(value: &Json) -> Option<String> {
    match value {
        Json::Null => None,
        Json::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Loads `tree` for `parents` (all rows of `schema`, already in `graph`).
///
/// # Errors
/// Validation errors for unknown relations; database errors from the fetches.
pub fn load<'a>(
    conn: &'a DatabaseTransaction,
    graph: &'a mut Graph,
    schema: &'static EntitySchema,
    parents: Vec<RecordKey>,
    tree: &'a RelationTree,
) -> BoxFuture<'a, Result<(), OrmError>> {
    Box::pin(async move {
        if parents.is_empty() {
            return Ok(());
        }

        for (name, subtree) in tree.children() {
            let relation = schema.require_relation(name)?;
            let target = relation.target();
            let remote_field = target.require_field(relation.remote_key)?;

            let mut wanted = Vec::new();
            let mut seen = std::collections::HashSet::new();
            for parent in &parents {
                let Some(value) = graph.get(parent).and_then(|r| r.get(relation.local_key)) else {
                    continue;
                };
                match join_key(value) {
                    Some(text) if seen.insert(text.clone()) => {
                        wanted.push(target.coerce(remote_field, value)?);
                    }
                    _ => {}
                }
            }

            let rows = if wanted.is_empty() {
                Vec::new()
            } else {
                let condition = Condition::all().add(
                    Expr::col((Alias::new(target.table), Alias::new(relation.remote_key)))
                        .is_in(wanted),
                );
                (target.fetch)(conn, condition).await?
            };
            tracing::debug!(
                relation = relation.name,
                entity = schema.name,
                parents = parents.len(),
                rows = rows.len(),
                "loaded relation"
            );

            let mut by_remote: HashMap<String, Vec<RecordKey>> = HashMap::new();
            for row in rows {
                let record = Record::from_attributes(target, row)?;
                let remote = record.get(relation.remote_key).and_then(join_key);
                let key = graph.insert(record);
                if let Some(remote) = remote {
                    by_remote.entry(remote).or_default().push(key);
                }
            }

            for parent in &parents {
                let matches = graph
                    .get(parent)
                    .and_then(|r| r.get(relation.local_key))
                    .and_then(join_key)
                    .and_then(|local| by_remote.get(&local))
                    .cloned()
                    .unwrap_or_default();
                let related = match relation.cardinality {
                    Cardinality::One => Related::One(matches.first().copied()),
                    Cardinality::Many => Related::Many(matches),
                };
                graph.attach(*parent, relation.name, related);
            }

            if !subtree.is_empty() {
                let mut children: Vec<RecordKey> = by_remote.into_values().flatten().collect();
                children.sort();
                children.dedup();
                load(conn, graph, target, children, subtree).await?;
            }
        }
        Ok(())
    })
}
