use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::OrmError;

pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
}

impl Pagination {
    /// # Errors
    /// Validation error when either value is zero.
    pub fn new(page: u64, page_size: u64) -> Result<Self, OrmError> {
        if page == 0 {
            return Err(OrmError::validation("page must be at least 1"));
        }
        if page_size == 0 {
            return Err(OrmError::validation("page_size must be at least 1"));
        }
        Ok(Self { page, page_size })
    }

    /// Paging is on when either value is present; the other defaults to
    /// page 1 or [`DEFAULT_PAGE_SIZE`].
    ///
    /// # Errors
    /// Validation error when either value is zero.
    pub fn from_parts(page: Option<u64>, page_size: Option<u64>) -> Result<Option<Self>, OrmError> {
        if page.is_none() && page_size.is_none() {
            return Ok(None);
        }
        Self::new(page.unwrap_or(1), page_size.unwrap_or(DEFAULT_PAGE_SIZE)).map(Some)
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    /// `ceil(total / page_size)`
    #[must_use]
    pub fn pages_for(&self, total: u64) -> u64 {
        total.div_ceil(self.page_size)
    }
}

/// One page of results with totals.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub page_size: u64,
    pub total: u64,
    pub pages: u64,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(items: Vec<T>, pagination: Pagination, total: u64) -> Self {
        Self {
            items,
            page: pagination.page,
            page_size: pagination.page_size,
            total,
            pages: pagination.pages_for(total),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total: self.total,
            pages: self.pages,
        }
    }
}

/// A plain list, or a page when pagination was requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Listing<T> {
    Items(Vec<T>),
    Page(Page<T>),
}

impl<T> Listing<T> {
    #[must_use]
    pub fn items(&self) -> &[T] {
        match self {
            Self::Items(items) => items,
            Self::Page(page) => &page.items,
        }
    }

    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        match self {
            Self::Items(items) => items,
            Self::Page(page) => page.items,
        }
    }

    #[must_use]
    pub fn page(&self) -> Option<&Page<T>> {
        match self {
            Self::Items(_) => None,
            Self::Page(page) => Some(page),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Listing<U> {
        match self {
            Self::Items(items) => Listing::Items(items.into_iter().map(f).collect()),
            Self::Page(page) => Listing::Page(page.map(f)),
        }
    }
}
