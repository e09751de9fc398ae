//! Paged user listings.
//!
//! Query parameters are parsed leniently: anything out of range or not on
//! the sort whitelist falls back to a default instead of failing the request.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

use super::model::Principal;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// Columns a listing may be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    CreatedAt,
    UpdatedAt,
    Email,
}

impl SortField {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "id" => Some(SortField::Id),
            "created_at" => Some(SortField::CreatedAt),
            "updated_at" => Some(SortField::UpdatedAt),
            "email" => Some(SortField::Email),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub order: SortOrder,
}

impl Default for Sort {
    fn default() -> Self {
        Self {
            field: SortField::CreatedAt,
            order: SortOrder::Desc,
        }
    }
}

impl Sort {
    /// Parse `"<column> [asc|desc]"`. Unknown columns or extra words give the
    /// default; any direction other than `asc` means descending.
    pub fn parse_lenient(raw: &str) -> Self {
        let parts: Vec<&str> = raw.split_whitespace().collect();
        let (column, direction) = match parts.as_slice() {
            [column] => (*column, None),
            [column, direction] => (*column, Some(*direction)),
            _ => return Self::default(),
        };
        let Some(field) = SortField::parse(column) else {
            return Self::default();
        };
        let order = match direction {
            Some(d) if d.eq_ignore_ascii_case("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        };
        Self { field, order }
    }

    /// Ordering of two records under this sort. Ties break on id in the
    /// same direction so pages never overlap.
    pub fn compare(&self, a: &Principal, b: &Principal) -> Ordering {
        let primary = match self.field {
            SortField::Id => a.id.cmp(&b.id),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::Email => a.email.cmp(&b.email),
        };
        let ordering = primary.then(a.id.cmp(&b.id));
        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = match self.order {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        };
        write!(f, "{} {}", self.field.as_str(), order)
    }
}

/// Which slice of the user list to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// 1-based.
    pub page: usize,
    pub limit: usize,
    pub sort: Sort,
    /// Case-insensitive substring of the email.
    pub keyword: String,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            sort: Sort::default(),
            keyword: String::new(),
        }
    }
}

impl ListQuery {
    pub fn from_params(
        page: Option<&str>,
        limit: Option<&str>,
        sort: Option<&str>,
        keyword: Option<&str>,
    ) -> Self {
        let limit = match limit.and_then(|l| l.trim().parse::<usize>().ok()) {
            Some(0) | None => DEFAULT_PAGE_SIZE,
            Some(l) => l.min(MAX_PAGE_SIZE),
        };
        let page = page
            .and_then(|p| p.trim().parse::<usize>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1);

        Self {
            page,
            limit,
            sort: sort.map(Sort::parse_lenient).unwrap_or_default(),
            keyword: keyword.unwrap_or_default().trim().to_string(),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// One page of results and the number of matches across all pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub total: usize,
    pub total_pages: usize,
    pub page: usize,
    pub limit: usize,
    pub sort: String,
    pub keyword: String,
}

/// A page as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Listing<T> {
    pub fn new(page: Page<T>, query: &ListQuery) -> Self {
        Self {
            meta: PageMeta {
                total: page.total,
                total_pages: page.total.div_ceil(query.limit),
                page: query.page,
                limit: query.limit,
                sort: query.sort.to_string(),
                keyword: query.keyword.clone(),
            },
            items: page.items,
        }
    }
}
