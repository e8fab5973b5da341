// src/models/pagination.rs

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

/// Raw `?page=&limit=` query. Values are kept as strings so junk falls back to defaults
/// instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl PageQuery {
    pub fn resolve(&self, default_limit: i64) -> Page {
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<i64>().ok());
        // Bounded so the offset always fits in an i64.
        let page = parse(&self.page)
            .filter(|p| *p >= 1)
            .unwrap_or(1)
            .min(i64::MAX / MAX_PAGE_LIMIT);
        let limit = parse(&self.limit)
            .filter(|l| *l >= 1)
            .unwrap_or(default_limit)
            .min(MAX_PAGE_LIMIT);
        Page { page, limit }
    }

    pub fn page(&self) -> Page {
        self.resolve(DEFAULT_PAGE_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

impl PaginationMeta {
    pub fn new(total: i64, page: Page) -> Self {
        let total_pages = ((total + page.limit - 1) / page.limit).max(1);
        Self {
            total,
            page: page.page,
            limit: page.limit,
            total_pages,
        }
    }
}

/// Standard paginated envelope.
#[derive(Debug, Serialize)]
pub struct Paginated<T: Serialize> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T: Serialize> Paginated<T> {
    pub fn new(data: Vec<T>, total: i64, page: Page) -> Self {
        Self {
            data,
            pagination: PaginationMeta::new(total, page),
        }
    }
}
