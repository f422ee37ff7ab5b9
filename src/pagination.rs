use serde::Serialize;

use crate::error::ApiError;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;

/// A 1-based page and a positive page size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    /// Parses raw query values. Missing values fall back to the defaults,
    /// limits above `max_limit` are clamped.
    pub fn parse(
        page: Option<&str>,
        limit: Option<&str>,
        default_limit: u64,
        max_limit: u64,
    ) -> Result<Self, ApiError> {
        let page = parse_positive(page, "page")?.unwrap_or(DEFAULT_PAGE);
        let limit = parse_positive(limit, "limit")?
            .unwrap_or(default_limit)
            .min(max_limit.max(1));

        Ok(Self { page, limit })
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

fn parse_positive(raw: Option<&str>, name: &str) -> Result<Option<u64>, ApiError> {
    let raw = match raw.map(str::trim).filter(|r| !r.is_empty()) {
        Some(raw) => raw,
        None => return Ok(None),
    };

    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ApiError::InvalidInput(format!(
            "`{}` must be a positive integer",
            name
        ))),
    }
}

/// One page of results plus the metadata clients use to navigate.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub docs: Vec<T>,
    pub total_docs: u64,
    pub limit: u64,
    pub page: u64,
    pub total_pages: u64,
    pub has_prev_page: bool,
    pub has_next_page: bool,
    pub prev_page: Option<u64>,
    pub next_page: Option<u64>,
}

impl<T> Page<T> {
    pub fn assemble(docs: Vec<T>, total_docs: u64, request: PageRequest) -> Self {
        let total_pages = total_docs.div_ceil(request.limit).max(1);
        let has_prev_page = request.page > 1;
        let has_next_page = request.page < total_pages;

        Self {
            docs,
            total_docs,
            limit: request.limit,
            page: request.page,
            total_pages,
            has_prev_page,
            has_next_page,
            prev_page: has_prev_page.then(|| request.page - 1),
            next_page: has_next_page.then(|| request.page + 1),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            docs: self.docs.into_iter().map(f).collect(),
            total_docs: self.total_docs,
            limit: self.limit,
            page: self.page,
            total_pages: self.total_pages,
            has_prev_page: self.has_prev_page,
            has_next_page: self.has_next_page,
            prev_page: self.prev_page,
            next_page: self.next_page,
        }
    }
}
