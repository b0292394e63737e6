//! # Filtering, Search & Pagination
//!
//! Turns keyed filter mappings, boolean `Q` groups, keywords and ordering
//! terms into sea-query statements against a root entity.
//!
//! ## Filter keys
//!
//! ```rust,ignore
//! Q::new()
//!     .with("amount__gte", 100)                   // amount >= 100
//!     .with("contact__first_name", "Ann")         // joins contact once
//!     .with("contact.last_name__ilike", "%sm%")   // same join, UPPER(..) LIKE
//!     .with("description__in", json!(["a", null])) // IN ('a') OR IS NULL
//!     .with("goals__exists", true);                // EXISTS subquery
//! ```
//!
//! Supported operators: `eq`, `ne`, `lt`, `lte`, `gt`, `gte`, `in`, `notin`,
//! `like`, `ilike`, `lowerin`, `exists`.
//!
//! ## Ordering and pages
//!
//! `order_by` terms are field paths with an optional `-` for descending.
//! Pages are 1-based and report `total` and `pages`.

pub mod conditions;
pub mod joins;
pub mod lookup;
pub mod pagination;
pub mod q;
pub mod search;
pub mod sort;

pub use conditions::{COUNT_ALIAS, FilterPlan};
pub use joins::JoinSet;
pub use lookup::{FilterKey, FilterOperator, split_path};
pub use pagination::{DEFAULT_PAGE_SIZE, Listing, Page, Pagination};
pub use q::{Connector, Node, Q, QGroup};
pub use search::{MAX_KEYWORD_LENGTH, escape_like_wildcards};
pub use sort::{OrderPlan, OrderSpec};
