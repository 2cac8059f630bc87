// src/pagination.rs
//
// Shared page/limit/sort handling for the list endpoints.

use serde::Serialize;

use crate::error::ApiError;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: Option<&str>) -> Result<Self, ApiError> {
        match s.map(str::trim) {
            None | Some("") | Some("desc") => Ok(SortOrder::Desc),
            Some("asc") => Ok(SortOrder::Asc),
            Some(other) => Err(ApiError::validation(format!(
                "sort_order must be asc or desc (got {other:?})"
            ))),
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Validated paging window plus an ORDER BY column taken from a whitelist.
#[derive(Debug, Clone)]
pub struct PageParams {
    pub page: i64,
    pub limit: i64,
    pub sort_column: &'static str,
    pub sort_order: SortOrder,
}

impl PageParams {
    /// `allowed` maps public sort keys to SQL column expressions; the first
    /// entry is the default.
    pub fn new(
        page: Option<i64>,
        limit: Option<i64>,
        sort_by: Option<&str>,
        sort_order: Option<&str>,
        allowed: &[(&str, &'static str)],
    ) -> Result<Self, ApiError> {
        let page = page.unwrap_or(1);
        if page < 1 {
            return Err(ApiError::validation("page must be >= 1"));
        }
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(ApiError::validation(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        // OFFSET must fit in a BIGINT.
        if (page - 1).checked_mul(limit).is_none() {
            return Err(ApiError::validation("page is too large"));
        }

        let sort_column = match sort_by.map(str::trim).filter(|s| !s.is_empty()) {
            None => allowed[0].1,
            Some(key) => allowed
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, col)| *col)
                .ok_or_else(|| ApiError::validation(format!("cannot sort by {key:?}")))?,
        };

        Ok(Self {
            page,
            limit,
            sort_column,
            sort_order: SortOrder::parse(sort_order)?,
        })
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    /// Trailing `ORDER BY … LIMIT … OFFSET …` for a QueryBuilder.
    pub fn push_tail(&self, qb: &mut sqlx::QueryBuilder<'_, sqlx::Postgres>) {
        qb.push(" ORDER BY ")
            .push(self.sort_column)
            .push(" ")
            .push(self.sort_order.sql())
            .push(" LIMIT ")
            .push_bind(self.limit)
            .push(" OFFSET ")
            .push_bind(self.offset());
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PageInfo {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageInfo {
    pub fn new(params: &PageParams, total: i64) -> Self {
        let total_pages = (total + params.limit - 1) / params.limit;
        Self {
            page: params.page,
            limit: params.limit,
            total,
            total_pages,
            has_next: params.page < total_pages,
            has_prev: params.page > 1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, params: &PageParams, total: i64) -> Self {
        Self {
            data,
            pagination: PageInfo::new(params, total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SORTS: &[(&str, &'static str)] = &[("created_at", "p.created_at"), ("last_name", "p.last_name")];

    #[test]
    fn defaults() {
        let p = PageParams::new(None, None, None, None, SORTS).unwrap();
        assert_eq!(p.page, 1);
        assert_eq!(p.limit, 10);
        assert_eq!(p.offset(), 0);
        assert_eq!(p.sort_column, "p.created_at");
        assert_eq!(p.sort_order, SortOrder::Desc);
    }

    #[test]
    fn sort_key_must_be_whitelisted() {
        let p = PageParams::new(Some(3), Some(20), Some("last_name"), Some("asc"), SORTS).unwrap();
        assert_eq!(p.sort_column, "p.last_name");
        assert_eq!(p.sort_order, SortOrder::Asc);
        assert_eq!(p.offset(), 40);

        assert!(PageParams::new(None, None, Some("1; DROP TABLE patients"), None, SORTS).is_err());
        assert!(PageParams::new(None, None, None, Some("sideways"), SORTS).is_err());
    }

    #[test]
    fn window_bounds() {
        assert!(PageParams::new(Some(0), None, None, None, SORTS).is_err());
        assert!(PageParams::new(None, Some(0), None, None, SORTS).is_err());
        assert!(PageParams::new(None, Some(101), None, None, SORTS).is_err());
        assert!(PageParams::new(None, Some(100), None, None, SORTS).is_ok());
    }

    #[test]
    fn huge_page_is_rejected_instead_of_overflowing() {
        let err = PageParams::new(Some(i64::MAX), Some(100), None, None, SORTS).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let p = PageParams::new(Some(i64::MAX), Some(1), None, None, SORTS).unwrap();
        assert_eq!(p.offset(), i64::MAX - 1);
    }

    #[test]
    fn page_info_flags() {
        let p = PageParams::new(Some(2), Some(10), None, None, SORTS).unwrap();
        assert_eq!(
            PageInfo::new(&p, 25),
            PageInfo {
                page: 2,
                limit: 10,
                total: 25,
                total_pages: 3,
                has_next: true,
                has_prev: true,
            }
        );

        let first = PageParams::new(None, None, None, None, SORTS).unwrap();
        let empty = PageInfo::new(&first, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
        assert!(!empty.has_prev);
    }
}
