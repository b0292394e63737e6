//! Filter key parsing.
//!
//! A key is a path of segments separated by `__` or `.`. The last segment
//! is an operator when it names one, otherwise it is the field and the
//! operator is `eq`. Everything before the field is a relation hop.
//!
//! - `"amount__gte"` -> field `amount`, `gte`
//! - `"contact__first_name"` -> relation `contact`, field `first_name`, `eq`
//! - `"contact.user.username__ilike"` -> relations `contact`, `user`

use std::fmt;
use std::str::FromStr;

use heck::ToSnakeCase;

use crate::errors::OrmError;

/// Comparison operators for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    /// Equality (=), `IS NULL` for null
    Eq,
    /// Not equal (<>), `IS NOT NULL` for null
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Membership, null-aware
    In,
    /// Non-membership, null-aware
    NotIn,
    /// LIKE pattern matching
    Like,
    /// Case-insensitive LIKE
    ILike,
    /// Lower-cased membership
    LowerIn,
    /// At least one related row on a to-many relation
    Exists,
}

impl FilterOperator {
    pub const ALL: [Self; 12] = [
        Self::Eq,
        Self::Ne,
        Self::Lt,
        Self::Lte,
        Self::Gt,
        Self::Gte,
        Self::In,
        Self::NotIn,
        Self::Like,
        Self::ILike,
        Self::LowerIn,
        Self::Exists,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::In => "in",
            Self::NotIn => "notin",
            Self::Like => "like",
            Self::ILike => "ilike",
            Self::LowerIn => "lowerin",
            Self::Exists => "exists",
        }
    }

    /// Recognizes a trailing key segment.
    #[must_use]
    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == segment)
    }

    /// Operators that take a list of values.
    #[must_use]
    pub fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn | Self::LowerIn)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperator {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_segment(&s.to_ascii_lowercase())
            .ok_or_else(|| OrmError::validation(format!("Unsupported filter operator '{s}'")))
    }
}

/// Splits a path on `__` and `.` and snake-cases each segment.
#[must_use]
pub fn split_path(path: &str) -> Vec<String> {
    path.split("__")
        .flat_map(|part| part.split('.'))
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_snake_case())
        .collect()
}

/// A parsed filter key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterKey {
    pub relations: Vec<String>,
    pub field: String,
    pub operator: FilterOperator,
}

impl FilterKey {
    /// # Errors
    /// Validation error for an empty key or a key that is only an operator.
    pub fn parse(key: &str) -> Result<Self, OrmError> {
        let mut segments = split_path(key);
        let operator = match segments.last().and_then(|s| FilterOperator::from_segment(s)) {
            Some(op) if segments.len() > 1 => {
                segments.pop();
                op
            }
            _ => FilterOperator::Eq,
        };
        Self::from_segments(key, segments, operator)
    }

    /// Builds a key from a path and an explicitly named operator.
    ///
    /// # Errors
    /// Validation error for an unsupported operator or an empty path.
    pub fn with_operator(path: &str, operator: &str) -> Result<Self, OrmError> {
        let operator = operator.parse()?;
        Self::from_segments(path, split_path(path), operator)
    }

    fn from_segments(
        raw: &str,
        mut segments: Vec<String>,
        operator: FilterOperator,
    ) -> Result<Self, OrmError> {
        let field = segments
            .pop()
            .ok_or_else(|| OrmError::validation(format!("Malformed filter key '{raw}'")))?;
        Ok(Self {
            relations: segments,
            field,
            operator,
        })
    }
}
