//! Pagination of list responses

use serde::Serialize;

/// Page size used when the request does not set `page_size`
pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// Largest accepted `page_size`
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Pagination metadata calculated from total results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    /// Index of the first row of the page
    pub offset: i64,
}

/// Calculate pagination metadata from total results and requested page
///
/// Ensures page is within valid bounds [1, total_pages].
///
/// # Examples
/// ```
/// use pdt_api::pagination::calculate_pagination;
///
/// // 250 total results = 3 pages (100 + 100 + 50)
/// let p = calculate_pagination(250, 2, 100);
/// assert_eq!(p.page, 2);
/// assert_eq!(p.total_pages, 3);
/// assert_eq!(p.offset, 100);
///
/// // Requesting out-of-bounds page gets clamped
/// let p = calculate_pagination(250, 99, 100);
/// assert_eq!(p.page, 3);
/// assert_eq!(p.offset, 200);
/// ```
pub fn calculate_pagination(total_results: i64, requested_page: i64, page_size: i64) -> Pagination {
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let total_pages = (total_results + page_size - 1) / page_size;
    let page = requested_page.max(1).min(total_pages.max(1));
    let offset = (page - 1) * page_size;

    Pagination {
        page,
        page_size,
        total_pages,
        offset,
    }
}

/// One page of a list response
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub count: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    /// Cut the requested page out of the full, already ordered result
    pub fn from_rows(rows: Vec<T>, requested_page: i64, page_size: i64) -> Self {
        let count = rows.len() as i64;
        let p = calculate_pagination(count, requested_page, page_size);
        let results = rows
            .into_iter()
            .skip(p.offset as usize)
            .take(p.page_size as usize)
            .collect();

        Self {
            count,
            page: p.page,
            page_size: p.page_size,
            total_pages: p.total_pages,
            results,
        }
    }
}
