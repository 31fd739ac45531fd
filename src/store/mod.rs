//! Glacier data store
//!
//! [`GlacierRepository`] is the narrow interface the rest of the crate uses
//! for persistence. [`MemoryStore`] keeps everything in process and can be
//! seeded with demo glaciers; [`RestStore`] talks to a PostgREST endpoint.

pub mod memory;
pub mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

use crate::ai::GlacierAnalysis;
use crate::error::StoreError;
use crate::health::HealthStatus;
use crate::records::{
    Alert, AnalysisStatus, Glacier, GlacierImage, GlacierStats, Measurement, MeasurementRecord,
    NewAlert, NewGlacier, NewGlacierImage,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Page size used when a query asks for zero items
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Boxed future returned by repository operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persistence operations for glaciers, measurements, images and alerts
pub trait GlacierRepository: Send + Sync {
    /// All glaciers ordered by name
    fn list_glaciers(&self) -> StoreFuture<'_, Vec<Glacier>>;

    fn get_glacier<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Glacier>>;

    fn create_glacier<'a>(&'a self, glacier: &'a NewGlacier) -> StoreFuture<'a, Glacier>;

    /// Record the latest health status label of a glacier
    fn set_glacier_status<'a>(&'a self, id: &'a str, status: HealthStatus) -> StoreFuture<'a, ()>;

    /// Measurements of one glacier ordered ascending by date
    fn list_measurements<'a>(&'a self, glacier_id: &'a str)
        -> StoreFuture<'a, Vec<MeasurementRecord>>;

    /// Append a measurement; fails with `NotFound` for an unknown glacier
    fn create_measurement<'a>(
        &'a self,
        glacier_id: &'a str,
        measurement: Measurement,
    ) -> StoreFuture<'a, MeasurementRecord>;

    fn create_image<'a>(&'a self, image: &'a NewGlacierImage) -> StoreFuture<'a, GlacierImage>;

    /// Update the analysis state of the image stored under `image_url`
    fn update_image_status<'a>(
        &'a self,
        image_url: &'a str,
        status: AnalysisStatus,
        results: Option<&'a GlacierAnalysis>,
    ) -> StoreFuture<'a, GlacierImage>;

    /// Images newest first, filtered and paginated
    fn list_images<'a>(&'a self, query: &'a ImageQuery) -> StoreFuture<'a, ImagePage>;

    /// Alerts newest first
    fn list_alerts(&self) -> StoreFuture<'_, Vec<Alert>>;

    fn create_alert<'a>(&'a self, alert: &'a NewAlert) -> StoreFuture<'a, Alert>;

    fn stats(&self) -> StoreFuture<'_, GlacierStats>;

    /// Cheap round trip to check the store is reachable
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Filter and page selection for image listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageQuery {
    pub status: Option<AnalysisStatus>,
    pub glacier_id: Option<String>,
    /// 1-based page number
    pub page: usize,
    pub limit: usize,
}

impl Default for ImageQuery {
    fn default() -> Self {
        Self {
            status: None,
            glacier_id: None,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ImageQuery {
    /// Page and limit with zero values replaced by their defaults
    pub fn normalized(&self) -> (usize, usize) {
        let page = self.page.max(1);
        let limit = if self.limit == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.limit
        };
        (page, limit)
    }

    pub fn offset(&self) -> usize {
        let (page, limit) = self.normalized();
        (page - 1).saturating_mul(limit)
    }

    pub fn matches(&self, image: &GlacierImage) -> bool {
        self.status.map_or(true, |s| image.analysis_status == s)
            && self
                .glacier_id
                .as_ref()
                .map_or(true, |id| image.glacier_id.as_ref() == Some(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: usize, limit: usize, total_items: usize) -> Self {
        let page = page.max(1);
        let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };
        let total_pages = total_items.div_ceil(limit);
        Self {
            current_page: page,
            total_pages,
            total_items,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePage {
    pub images: Vec<GlacierImage>,
    pub pagination: Pagination,
}

/// Slice one page out of `items`
///
/// Page 0 is treated as page 1 and limit 0 as [`DEFAULT_PAGE_SIZE`]. A page
/// past the end yields no items.
pub fn paginate<T>(items: Vec<T>, page: usize, limit: usize) -> (Vec<T>, Pagination) {
    let pagination = Pagination::new(page, limit, items.len());
    let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };
    let offset = (pagination.current_page - 1).saturating_mul(limit);
    let page_items = items.into_iter().skip(offset).take(limit).collect();
    (page_items, pagination)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate_middle_page() {
        let (items, pagination) = paginate((1..=25).collect::<Vec<_>>(), 2, 10);
        assert_eq!(items, (11..=20).collect::<Vec<_>>());
        assert_eq!(pagination.total_pages, 3);
        assert_eq!(pagination.total_items, 25);
        assert!(pagination.has_next);
        assert!(pagination.has_prev);
    }

    #[test]
    fn test_paginate_last_partial_page() {
        let (items, pagination) = paginate((1..=25).collect::<Vec<_>>(), 3, 10);
        assert_eq!(items, vec![21, 22, 23, 24, 25]);
        assert!(!pagination.has_next);
    }

    #[test]
    fn test_paginate_zero_page_and_limit_use_defaults() {
        let (items, pagination) = paginate((1..=12).collect::<Vec<_>>(), 0, 0);
        assert_eq!(items.len(), DEFAULT_PAGE_SIZE);
        assert_eq!(pagination.current_page, 1);
        assert!(!pagination.has_prev);
        assert!(pagination.has_next);
    }

    #[test]
    fn test_paginate_past_end_is_empty() {
        let (items, pagination) = paginate(vec![1, 2, 3], 5, 10);
        assert!(items.is_empty());
        assert_eq!(pagination.total_pages, 1);
        assert!(!pagination.has_next);
    }

    #[test]
    fn test_paginate_empty() {
        let (items, pagination) = paginate(Vec::<u8>::new(), 1, 10);
        assert!(items.is_empty());
        assert_eq!(pagination.total_pages, 0);
        assert!(!pagination.has_next);
        assert!(!pagination.has_prev);
    }

    #[test]
    fn test_image_query_offset() {
        let query = ImageQuery {
            page: 3,
            limit: 5,
            ..ImageQuery::default()
        };
        assert_eq!(query.offset(), 10);
        assert_eq!(ImageQuery { page: 0, limit: 0, ..query }.normalized(), (1, 10));
    }

    #[test]
    fn test_huge_page_offset_saturates() {
        let query = ImageQuery {
            page: usize::MAX,
            limit: 10,
            ..ImageQuery::default()
        };
        assert_eq!(query.offset(), usize::MAX);
    }
}
