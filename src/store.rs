use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use aide_de_camp::core::new_xid;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bson::{doc, Bson, DateTime};

use crate::types::{Category, Health, JobRecord, NewJob, Window};

/// The remote job store a queue is introspected through.
///
/// Pages must come back in a stable, offset-addressable order for the duration of
/// a scan. Implementations report failures as `anyhow` errors with context; the
/// engine decides whether a failure is fatal.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Counts of every category at call time.
    async fn health(&self) -> anyhow::Result<Health>;

    /// At most `window.size` jobs of `category`, starting at `window.start`.
    async fn get_page(&self, category: Category, window: Window)
        -> anyhow::Result<Vec<JobRecord>>;

    async fn create_item(&self, job: NewJob) -> anyhow::Result<JobRecord>;

    async fn remove_item(&self, job: &JobRecord) -> anyhow::Result<()>;
}

/// In-process store, mostly for tests and demos.
///
/// Besides holding jobs it counts page fetches and remove calls, and can be told
/// to fail specific removals or every fetch from some offset on.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<BTreeMap<Category, Vec<JobRecord>>>,
    failing_removals: Mutex<HashSet<String>>,
    failing_fetch_from: Mutex<Option<u64>>,
    page_fetches: AtomicUsize,
    remove_calls: AtomicUsize,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a job to the end of its category.
    pub fn push(&self, job: JobRecord) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.entry(job.status).or_default().push(job);
    }

    pub fn fail_removal_of(&self, id: impl Into<String>) {
        self.failing_removals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.into());
    }

    pub fn fail_fetches_from(&self, offset: u64) {
        *self
            .failing_fetch_from
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(offset);
    }

    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self, category: Category) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&category)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        Category::ALL.iter().all(|category| self.len(*category) == 0)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn health(&self) -> anyhow::Result<Health> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Category::ALL.iter().fold(Health::default(), |health, category| {
            health.with(*category, jobs.get(category).map_or(0, |c| c.len() as u64))
        }))
    }

    async fn get_page(
        &self,
        category: Category,
        window: Window,
    ) -> anyhow::Result<Vec<JobRecord>> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);

        let failing_from = *self
            .failing_fetch_from
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if matches!(failing_from, Some(offset) if window.start >= offset) {
            bail!("store unavailable at offset {}", window.start);
        }

        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(jobs
            .get(&category)
            .map(|jobs| {
                jobs.iter()
                    .skip(window.start as usize)
                    .take(window.size as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_item(&self, job: NewJob) -> anyhow::Result<JobRecord> {
        let now = chrono::Utc::now();
        let scheduled_at = job.scheduled_at.unwrap_or(now);
        let status = if scheduled_at > now {
            Category::Delayed
        } else {
            Category::Waiting
        };
        let record = JobRecord {
            id: new_xid().to_string(),
            data: Bson::Document(job.data),
            options: doc! {
                "queue": "memory",
                "job_type": job.job_type,
                "priority": job.priority as i64,
                "retries": 0_i64,
                "scheduled_at": DateTime::from_millis(scheduled_at.timestamp_millis()),
                "enqueued_at": DateTime::from_millis(now.timestamp_millis()),
                "started_at": Bson::Null,
            },
            status,
        };
        self.push(record.clone());
        Ok(record)
    }

    async fn remove_item(&self, job: &JobRecord) -> anyhow::Result<()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);

        if self
            .failing_removals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&job.id)
        {
            bail!("refused to remove job {}", job.id);
        }

        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let category = jobs
            .get_mut(&job.status)
            .ok_or_else(|| anyhow!("no {} jobs", job.status))?;
        let position = category
            .iter()
            .position(|candidate| candidate.id == job.id)
            .ok_or_else(|| anyhow!("job {} not found", job.id))?;
        category.remove(position);
        Ok(())
    }
}
