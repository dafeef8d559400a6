//! Pagination for collection listings
//!
//! `page` defaults to 1, `limit` to 10 and is capped at 50.

use serde::Serialize;

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 50;

/// Sanitized page request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRequest {
    /// Current page number (1-indexed)
    pub page: i64,
    pub limit: i64,
    /// Offset for SQL LIMIT/OFFSET query
    pub offset: i64,
}

impl PageRequest {
    /// Apply defaults and bounds to the requested page and limit
    ///
    /// ```
    /// use ftr_rc::pagination::PageRequest;
    ///
    /// let p = PageRequest::new(Some(3), Some(20));
    /// assert_eq!(p.offset, 40);
    ///
    /// // Oversized limits are capped
    /// let p = PageRequest::new(None, Some(500));
    /// assert_eq!((p.page, p.limit), (1, 50));
    /// ```
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        Self {
            page,
            limit,
            offset: (page - 1) * limit,
        }
    }
}

/// Pagination block of a listing response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl PaginationMeta {
    pub fn new(request: PageRequest, total: i64) -> Self {
        let total_pages = (total + request.limit - 1) / request.limit;
        Self {
            page: request.page,
            limit: request.limit,
            total,
            total_pages,
            has_next_page: request.page < total_pages,
            has_prev_page: request.page > 1,
        }
    }
}
