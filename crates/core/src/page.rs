//! Page-based pagination value types.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// 1-based page request. Only constructible through `new`, so `page >= 1`
/// and `1 <= limit <= MAX_PAGE_LIMIT` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    page: u32,
    limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Pagination {
    /// Clamp caller input: page >= 1, 1 <= limit <= MAX_PAGE_LIMIT.
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(u64::from(self.limit.max(1)))
    }
}

/// One page of results plus totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        Self {
            items,
            total,
            page: pagination.page(),
            limit: pagination.limit(),
            total_pages: pagination.total_pages(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_clamping() {
        assert_eq!(Pagination::new(None, None), Pagination::default());
        let p = Pagination::new(Some(0), Some(5000));
        assert_eq!(p.page(), 1);
        assert_eq!(p.limit(), MAX_PAGE_LIMIT);
        assert_eq!(Pagination::new(Some(3), Some(0)).limit(), 1);
    }

    #[test]
    fn zero_input_never_underflows_or_divides_by_zero() {
        let p = Pagination::new(Some(0), Some(0));
        assert_eq!(p.offset(), 0);
        assert_eq!(p.total_pages(5), 5);
        assert_eq!(Page::new(Vec::<u8>::new(), 5, p).total_pages, 5);
    }

    #[test]
    fn offset_and_total_pages() {
        let p = Pagination::new(Some(3), Some(10));
        assert_eq!(p.offset(), 20);
        assert_eq!(p.total_pages(0), 0);
        assert_eq!(p.total_pages(21), 3);
        assert_eq!(p.total_pages(30), 3);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: every row index in [0, total) lands on exactly one page.
            #[test]
            fn pages_cover_all_rows(total in 0u64..10_000, limit in 1u32..200) {
                let p = Pagination::new(Some(1), Some(limit));
                let pages = p.total_pages(total);
                prop_assert!(pages * u64::from(limit) >= total);
                if pages > 0 {
                    prop_assert!((pages - 1) * u64::from(limit) < total);
                }
            }

            #[test]
            fn any_input_yields_valid_bounds(page in any::<Option<u32>>(), limit in any::<Option<u32>>()) {
                let p = Pagination::new(page, limit);
                prop_assert!(p.page() >= 1);
                prop_assert!((1..=MAX_PAGE_LIMIT).contains(&p.limit()));
                prop_assert_eq!(p.offset(), u64::from(p.page() - 1) * u64::from(p.limit()));
            }
        }
    }
}
