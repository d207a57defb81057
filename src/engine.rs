use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::instrument;

use crate::error::{CombeeError, Result};
use crate::matcher::number;
use crate::paged::{PagedSource, DEFAULT_BATCH_SIZE};
use crate::predicate::{FilterArg, PredicateResolver};
use crate::sequence::LazySequence;
use crate::store::JobStore;
use crate::types::{Category, FieldValue, Health, JobRecord, NewJob, Window};

/// Query operations over one queue.
///
/// The engine holds no scan state of its own: every call resolves its filter once,
/// starts a fresh scan from offset 0 and owns its offset and accumulator.
#[derive(Debug)]
pub struct QueryEngine<S> {
    name: String,
    store: Arc<S>,
    batch_size: u64,
    resolver: PredicateResolver,
}

impl<S: JobStore + 'static> QueryEngine<S> {
    pub fn new(name: impl Into<String>, store: Arc<S>) -> Self {
        Self {
            name: name.into(),
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            resolver: PredicateResolver::default(),
        }
    }

    /// Page size of every scan. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_resolver(mut self, resolver: PredicateResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn source(&self, category: Category) -> PagedSource<S> {
        PagedSource::new(Arc::clone(&self.store), category)
    }

    /// Every job of `category`, one page in flight at a time.
    pub fn iterate(&self, category: Category) -> LazySequence<JobRecord> {
        self.source(category).scan(self.batch_size)
    }

    pub(crate) fn matching(
        &self,
        category: Category,
        filter: FilterArg,
    ) -> Result<LazySequence<JobRecord>> {
        let predicate = self.resolver.resolve(filter)?;
        Ok(self.iterate(category).filter(predicate))
    }

    #[instrument(skip_all, err, fields(queue = %self.name, category = %category))]
    pub async fn find(
        &self,
        category: Category,
        filter: impl Into<FilterArg>,
    ) -> Result<Vec<JobRecord>> {
        self.matching(category, filter.into())?.to_vec().await
    }

    /// The first `limit` matches; no page past the one holding the last of them is fetched.
    #[instrument(skip_all, err, fields(queue = %self.name, category = %category, limit = limit))]
    pub async fn find_first(
        &self,
        category: Category,
        filter: impl Into<FilterArg>,
        limit: usize,
    ) -> Result<Vec<JobRecord>> {
        let predicate = self.resolver.resolve(filter.into())?;
        let sequence = self.iterate(category).filter(predicate).limit(limit)?;
        sequence.to_vec().await
    }

    #[instrument(skip_all, err, ret, fields(queue = %self.name, category = %category))]
    pub async fn count(&self, category: Category, filter: impl Into<FilterArg>) -> Result<u64> {
        self.matching(category, filter.into())?.count().await
    }

    /// Occurrences of each value found at the dotted `field` path among matches.
    #[instrument(skip_all, err, fields(queue = %self.name, category = %category, field = field))]
    pub async fn distinct(
        &self,
        category: Category,
        field: &str,
        filter: impl Into<FilterArg>,
    ) -> Result<DistinctValues> {
        self.matching(category, filter.into())?
            .fold(DistinctValues::default(), |mut values, job| {
                values.record(job.field(field));
                values
            })
            .await
    }

    /// Removes every match, best effort.
    ///
    /// Pages are scanned in order; the matches of one page are removed concurrently
    /// and a failed removal is recorded in the report instead of aborting. Since a
    /// removal shifts later jobs down, the next window starts earlier by the number
    /// of jobs removed so far. A failed page fetch still aborts the whole call.
    #[instrument(skip_all, err, fields(queue = %self.name, category = %category))]
    pub async fn remove_matching(
        &self,
        category: Category,
        filter: impl Into<FilterArg>,
    ) -> Result<RemovalReport> {
        let predicate = self.resolver.resolve(filter.into())?;
        let source = self.source(category);
        let total = source.count().await?;

        let mut report = RemovalReport::default();
        let mut scanned = 0;
        while scanned < total {
            let size = self.batch_size.min(total - scanned);
            let page = source
                .fetch_page(Window::new(scanned - report.removed, size))
                .await?;
            let fetched = page.jobs.len() as u64;

            let mut matched = Vec::new();
            for job in page.jobs {
                if predicate.test(&job).await {
                    matched.push(job);
                }
            }

            let outcomes = join_all(matched.iter().map(|job| self.store.remove_item(job))).await;
            for (job, outcome) in matched.into_iter().zip(outcomes) {
                match outcome {
                    Ok(()) => report.removed += 1,
                    Err(source) => {
                        tracing::warn!(job = %job.id, error = %source, "failed to remove job");
                        report.failures.push(CombeeError::Removal { id: job.id, source });
                    }
                }
            }

            scanned += fetched;
            if fetched < size {
                break;
            }
        }

        tracing::info!(
            removed = report.removed,
            failed = report.failures.len(),
            "removal finished"
        );
        Ok(report)
    }

    /// One bounded fetch, no filtering.
    #[instrument(
        skip_all,
        err,
        fields(queue = %self.name, category = %category, start = window.start, size = window.size)
    )]
    pub async fn list_page(&self, category: Category, window: Window) -> Result<Vec<JobRecord>> {
        Ok(self.source(category).fetch_page(window).await?.jobs)
    }

    #[instrument(skip_all, err, fields(queue = %self.name, job_type = %job.job_type))]
    pub async fn create_job(&self, job: NewJob) -> Result<JobRecord> {
        Ok(self.store.create_item(job).await?)
    }

    #[instrument(skip_all, err, fields(queue = %self.name))]
    pub async fn stats(&self) -> Result<Health> {
        self.store.health().await.map_err(CombeeError::Fetch)
    }
}

/// Outcome of [`QueryEngine::remove_matching`].
#[derive(Debug, Default)]
pub struct RemovalReport {
    pub removed: u64,
    pub failures: Vec<CombeeError>,
}

impl RemovalReport {
    pub fn attempted(&self) -> u64 {
        self.removed + self.failures.len() as u64
    }
}

/// Distinct values with their occurrence counts, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistinctValues {
    buckets: Vec<(FieldValue, u64)>,
    index: HashMap<Option<String>, usize>,
}

impl DistinctValues {
    /// Numbers share a bucket across widths, the same way queries compare them.
    fn key(value: &FieldValue) -> Option<String> {
        value.as_bson().map(|v| match number(v) {
            Some(n) if n == 0.0 => "number:0".to_string(),
            Some(n) => format!("number:{n:?}"),
            None => v.clone().into_canonical_extjson().to_string(),
        })
    }

    fn record(&mut self, value: FieldValue) {
        let key = Self::key(&value);
        match self.index.get(&key) {
            Some(&at) => self.buckets[at].1 += 1,
            None => {
                self.index.insert(key, self.buckets.len());
                self.buckets.push((value, 1));
            }
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &FieldValue> {
        self.buckets.iter().map(|(value, _)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldValue, u64)> {
        self.buckets.iter().map(|(value, count)| (value, *count))
    }

    pub fn count_of(&self, value: &FieldValue) -> u64 {
        self.index
            .get(&Self::key(value))
            .map_or(0, |&at| self.buckets[at].1)
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|(_, count)| count).sum()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
