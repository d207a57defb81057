use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::error::{CombeeError, Result};
use crate::sequence::{LazySequence, Producer};
use crate::store::JobStore;
use crate::types::{Category, JobRecord, Page, Window};

pub const DEFAULT_BATCH_SIZE: u64 = 50;

/// One category of one queue, seen as counted, offset-addressed pages.
#[derive(Debug)]
pub struct PagedSource<S> {
    store: Arc<S>,
    category: Category,
}

impl<S> Clone for PagedSource<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            category: self.category,
        }
    }
}

impl<S: JobStore + 'static> PagedSource<S> {
    pub fn new(store: Arc<S>, category: Category) -> Self {
        Self { store, category }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    #[instrument(skip_all, err, fields(category = %self.category))]
    pub async fn count(&self) -> Result<u64> {
        let health = self.store.health().await.map_err(CombeeError::Fetch)?;
        Ok(health.count(self.category))
    }

    /// Fetches `window`, truncating anything the store returns beyond `window.size`.
    ///
    /// An empty window is rejected before the store is asked, since a zero limit
    /// reads as "no limit" to MongoDB.
    #[instrument(
        skip_all,
        err,
        fields(category = %self.category, start = window.start, size = window.size)
    )]
    pub async fn fetch_page(&self, window: Window) -> Result<Page> {
        if window.size == 0 {
            return Err(CombeeError::InvalidArgument(
                "page size must be at least 1".to_string(),
            ));
        }
        let mut jobs = self
            .store
            .get_page(self.category, window)
            .await
            .map_err(CombeeError::Fetch)?;
        jobs.truncate(usize::try_from(window.size).unwrap_or(usize::MAX));
        tracing::debug!(returned = jobs.len(), "fetched page");
        Ok(Page { window, jobs })
    }

    /// A fresh scan over the whole category, starting at offset 0.
    pub fn scan(&self, batch_size: u64) -> LazySequence<JobRecord> {
        LazySequence::new(Scan {
            source: self.clone(),
            batch_size: batch_size.max(1),
            state: ScanState::Init,
            buffer: VecDeque::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Init,
    Fetching { offset: u64, total: u64 },
    Done,
    Failed,
}

/// Page-at-a-time producer; the next page is requested only once the buffer of
/// the current one has been drained.
struct Scan<S> {
    source: PagedSource<S>,
    batch_size: u64,
    state: ScanState,
    buffer: VecDeque<JobRecord>,
}

impl<S: JobStore + 'static> Scan<S> {
    async fn advance(&mut self) -> Result<()> {
        match self.state {
            ScanState::Init => {
                let total = self.source.count().await?;
                self.state = ScanState::Fetching { offset: 0, total };
            }
            ScanState::Fetching { offset, total } if offset >= total => {
                self.state = ScanState::Done;
            }
            ScanState::Fetching { offset, total } => {
                let size = self.batch_size.min(total - offset);
                let page = self.source.fetch_page(Window::new(offset, size)).await?;
                self.state = if (page.jobs.len() as u64) < size {
                    ScanState::Done
                } else {
                    ScanState::Fetching {
                        offset: offset + size,
                        total,
                    }
                };
                self.buffer.extend(page.jobs);
            }
            ScanState::Done | ScanState::Failed => {}
        }
        Ok(())
    }
}

#[async_trait]
impl<S: JobStore + 'static> Producer for Scan<S> {
    type Item = JobRecord;

    async fn next(&mut self) -> Result<Option<JobRecord>> {
        loop {
            if let Some(job) = self.buffer.pop_front() {
                return Ok(Some(job));
            }
            if matches!(self.state, ScanState::Done | ScanState::Failed) {
                return Ok(None);
            }
            if let Err(e) = self.advance().await {
                self.state = ScanState::Failed;
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bson::{doc, Bson};

    use super::*;
    use crate::store::MemoryJobStore;

    fn store_with(count: usize) -> Arc<MemoryJobStore> {
        let store = MemoryJobStore::new();
        for i in 0..count {
            store.push(JobRecord {
                id: i.to_string(),
                data: Bson::Document(doc! { "n": i as i64 }),
                options: doc! {},
                status: Category::Waiting,
            });
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn scan_walks_non_overlapping_windows() {
        let store = store_with(120);
        let source = PagedSource::new(Arc::clone(&store), Category::Waiting);

        let ids: Vec<String> = source
            .scan(50)
            .to_vec()
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();

        assert_eq!(ids.len(), 120);
        assert_eq!(ids.first().map(String::as_str), Some("0"));
        assert_eq!(ids.last().map(String::as_str), Some("119"));
        assert_eq!(store.page_fetches(), 3);
    }

    #[tokio::test]
    async fn scan_is_lazy_until_pulled() {
        let store = store_with(10);
        let mut scan = PagedSource::new(Arc::clone(&store), Category::Waiting).scan(4);
        assert_eq!(store.page_fetches(), 0);

        scan.next().await.unwrap();
        assert_eq!(store.page_fetches(), 1);
    }

    #[tokio::test]
    async fn empty_category_fetches_nothing() {
        let store = store_with(0);
        let jobs = PagedSource::new(Arc::clone(&store), Category::Active)
            .scan(50)
            .to_vec()
            .await
            .unwrap();
        assert!(jobs.is_empty());
        assert_eq!(store.page_fetches(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_ends_the_scan() {
        let store = store_with(100);
        store.fail_fetches_from(50);
        let mut scan = PagedSource::new(Arc::clone(&store), Category::Waiting).scan(50);

        for _ in 0..50 {
            assert!(scan.next().await.unwrap().is_some());
        }
        assert!(matches!(scan.next().await, Err(CombeeError::Fetch(_))));
        assert!(scan.next().await.unwrap().is_none());
        assert_eq!(store.page_fetches(), 2);
    }

    #[tokio::test]
    async fn scan_never_exceeds_the_count_taken_at_start() {
        let store = store_with(60);
        let mut scan = PagedSource::new(Arc::clone(&store), Category::Waiting).scan(50);
        assert!(scan.next().await.unwrap().is_some());

        for i in 60..200 {
            store.push(JobRecord {
                id: i.to_string(),
                data: Bson::Null,
                options: doc! {},
                status: Category::Waiting,
            });
        }

        let mut seen = 1;
        while scan.next().await.unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 60);
    }

    #[tokio::test]
    async fn scan_tolerates_jobs_vanishing_mid_scan() {
        let store = store_with(100);
        let mut scan = PagedSource::new(Arc::clone(&store), Category::Waiting).scan(50);
        assert!(scan.next().await.unwrap().is_some());

        for i in 0..30 {
            let job = JobRecord {
                id: i.to_string(),
                data: Bson::Null,
                options: doc! {},
                status: Category::Waiting,
            };
            store.remove_item(&job).await.unwrap();
        }

        let mut seen = 1;
        while scan.next().await.unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 50 + 20);
        assert_eq!(store.page_fetches(), 2);
    }
}
