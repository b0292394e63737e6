//! Boolean filter composition.
//!
//! A [`Q`] is a set of `key -> value` filters that all must hold. Combining
//! with `&`, `|` and `!` builds a [`QGroup`] tree; groups with the same
//! connector flatten instead of nesting.
//!
//! ```rust,ignore
//! let group = Q::new().with("amount__gte", 100) | !Q::new().with("description__ilike", "%bonus%");
//! ```

use std::ops::{BitAnd, BitOr, Not};

use serde_json::Value as Json;

use crate::record::Attributes;

/// Filters joined by AND, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Q {
    entries: Vec<(String, Json)>,
}

impl Q {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Json>) {
        self.entries.push((key.into(), value.into()));
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, Json)] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl From<Attributes> for Q {
    fn from(map: Attributes) -> Self {
        map.into_iter().collect()
    }
}

impl<K: Into<String>> FromIterator<(K, Json)> for Q {
    fn from_iter<I: IntoIterator<Item = (K, Json)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Q),
    Group(QGroup),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QGroup {
    pub connector: Connector,
    pub negated: bool,
    pub children: Vec<Node>,
}

impl QGroup {
    #[must_use]
    pub fn and(children: Vec<Node>) -> Self {
        Self {
            connector: Connector::And,
            negated: false,
            children,
        }
    }

    #[must_use]
    pub fn or(children: Vec<Node>) -> Self {
        Self {
            connector: Connector::Or,
            negated: false,
            children,
        }
    }

    fn combine(left: Self, right: Self, connector: Connector) -> Self {
        let mut children = Vec::new();
        for side in [left, right] {
            if side.connector == connector && !side.negated {
                children.extend(side.children);
            } else {
                children.push(Node::Group(side));
            }
        }
        Self {
            connector,
            negated: false,
            children,
        }
    }
}

impl From<Q> for QGroup {
    fn from(q: Q) -> Self {
        Self::and(vec![Node::Leaf(q)])
    }
}

impl<T: Into<QGroup>> BitAnd<T> for Q {
    type Output = QGroup;

    fn bitand(self, rhs: T) -> QGroup {
        QGroup::combine(self.into(), rhs.into(), Connector::And)
    }
}

impl<T: Into<QGroup>> BitOr<T> for Q {
    type Output = QGroup;

    fn bitor(self, rhs: T) -> QGroup {
        QGroup::combine(self.into(), rhs.into(), Connector::Or)
    }
}

impl<T: Into<QGroup>> BitAnd<T> for QGroup {
    type Output = QGroup;

    fn bitand(self, rhs: T) -> QGroup {
        QGroup::combine(self, rhs.into(), Connector::And)
    }
}

impl<T: Into<QGroup>> BitOr<T> for QGroup {
    type Output = QGroup;

    fn bitor(self, rhs: T) -> QGroup {
        QGroup::combine(self, rhs.into(), Connector::Or)
    }
}

impl Not for Q {
    type Output = QGroup;

    fn not(self) -> QGroup {
        !QGroup::from(self)
    }
}

impl Not for QGroup {
    type Output = QGroup;

    fn not(mut self) -> QGroup {
        self.negated = !self.negated;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_or_of_two_leaves() {
        let group = Q::new().with("amount__gte", 100) | Q::new().with("description", "x");
        assert_eq!(group.connector, Connector::Or);
        assert!(!group.negated);
        assert_eq!(group.children.len(), 2);
    }

    #[test]
    fn test_same_connector_flattens() {
        let group = Q::new().with("a", 1) | Q::new().with("b", 2) | Q::new().with("c", 3);
        assert_eq!(group.connector, Connector::Or);
        assert_eq!(group.children.len(), 3);
    }

    #[test]
    fn test_mixed_connectors_nest() {
        let group = (Q::new().with("a", 1) | Q::new().with("b", 2)) & Q::new().with("c", 3);
        assert_eq!(group.connector, Connector::And);
        assert_eq!(group.children.len(), 2);
        assert!(matches!(&group.children[0], Node::Group(g) if g.connector == Connector::Or));
    }

    #[test]
    fn test_negated_group_is_not_flattened() {
        let group = !Q::new().with("a", 1) & Q::new().with("b", 2);
        assert_eq!(group.children.len(), 2);
        assert!(matches!(&group.children[0], Node::Group(g) if g.negated));
    }

    #[test]
    fn test_double_negation() {
        let group = !!Q::new().with("a", 1);
        assert!(!group.negated);
    }

    #[test]
    fn test_from_attributes_keeps_entries() {
        let mut map = Attributes::new();
        map.insert("amount__lt".into(), json!(5));
        let q = Q::from(map);
        assert_eq!(q.entries(), &[("amount__lt".to_string(), json!(5))]);
    }
}
