use std::collections::BTreeSet;

use aide_de_camp::core::new_xid;
use anyhow::{bail, Context};
use async_trait::async_trait;
use bson::{doc, Binary, Document};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{
    options::{ClientOptions, ConnectionString, FindOptions, Tls, TlsOptions},
    Client, Collection, Database,
};
use tracing::instrument;

use crate::store::JobStore;
use crate::types::{Category, Health, JobRecord, JobRow, NewJob, Window};

const QUEUE_COLLECTION: &str = "adc_queue";
const DEAD_QUEUE_COLLECTION: &str = "adc_dead_queue";

/// One named queue inside an aide-de-camp MongoDB database.
#[derive(Clone, Debug)]
pub struct MongoDbJobStore {
    database: Database,
    queue: String,
}

impl MongoDbJobStore {
    pub fn new(database: Database, queue: impl Into<String>) -> Self {
        Self {
            database,
            queue: queue.into(),
        }
    }

    /// Connects and picks the URI's default database, falling back to `adc`.
    pub async fn connect(uri: &str, cert_file: Option<String>) -> anyhow::Result<Database> {
        let client = Self::new_client(uri, cert_file)
            .await
            .context("Failed to connect to MongoDB")?;
        Ok(client.default_database().unwrap_or(client.database("adc")))
    }

    async fn new_client(
        uri: &str,
        cert_path: Option<String>,
    ) -> Result<Client, mongodb::error::Error> {
        match cert_path {
            Some(cert_path) => {
                let conn_str = ConnectionString::parse(uri)?;
                let mut options = ClientOptions::parse_connection_string(conn_str).await?;
                let mut tls_options = TlsOptions::default();
                tls_options.ca_file_path = Some(cert_path.into());
                tls_options.allow_invalid_hostnames = Some(true);
                options.tls = Some(Tls::Enabled(tls_options));
                Client::with_options(options)
            }
            None => Client::with_uri_str(uri).await,
        }
    }

    /// Queue names present in either collection.
    #[instrument(skip_all, err)]
    pub async fn discover_queues(database: &Database) -> anyhow::Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for collection in [QUEUE_COLLECTION, DEAD_QUEUE_COLLECTION] {
            let values = database
                .collection::<Document>(collection)
                .distinct("queue", None, None)
                .await
                .with_context(|| format!("Failed to list queues in {collection}"))?;
            names.extend(values.into_iter().filter_map(|v| v.as_str().map(str::to_owned)));
        }
        Ok(names.into_iter().collect())
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    fn collection(&self, category: Category) -> Collection<JobRow> {
        match category {
            Category::Dead => self.database.collection(DEAD_QUEUE_COLLECTION),
            _ => self.database.collection(QUEUE_COLLECTION),
        }
    }

    #[cfg(test)]
    pub async fn delete_database(&self) -> Result<(), mongodb::error::Error> {
        self.database.drop(None).await
    }
}

/// Selector of the jobs of `queue` that are in `category` at `now`.
/// Sorted skip/limit options for one window; the limit must be positive.
pub(crate) fn page_options(window: Window) -> anyhow::Result<FindOptions> {
    let limit = i64::try_from(window.size)
        .ok()
        .filter(|limit| *limit > 0)
        .with_context(|| format!("Page size {} is out of range", window.size))?;
    Ok(FindOptions::builder()
        .sort(doc! { "enqueued_at": 1, "jid": 1 })
        .skip(window.start)
        .limit(limit)
        .build())
}

pub(crate) fn category_filter(queue: &str, category: Category, now: bson::DateTime) -> Document {
    match category {
        Category::Waiting => doc! {
            "queue": queue,
            "started_at": None::<bson::DateTime>,
            "scheduled_at": { "$lte": now },
        },
        Category::Delayed => doc! {
            "queue": queue,
            "started_at": None::<bson::DateTime>,
            "scheduled_at": { "$gt": now },
        },
        Category::Active => doc! {
            "queue": queue,
            "started_at": { "$ne": None::<bson::DateTime> },
        },
        Category::Dead => doc! { "queue": queue },
    }
}

#[async_trait]
impl JobStore for MongoDbJobStore {
    #[instrument(skip_all, err, fields(queue = %self.queue))]
    async fn health(&self) -> anyhow::Result<Health> {
        let now = bson::DateTime::now();
        let mut health = Health::default();
        for category in Category::ALL {
            let count = self
                .collection(category)
                .count_documents(category_filter(&self.queue, category, now), None)
                .await
                .with_context(|| format!("Failed to count {category} jobs"))?;
            health = health.with(category, count);
        }
        Ok(health)
    }

    #[instrument(
        skip_all,
        err,
        fields(queue = %self.queue, category = %category, start = window.start, size = window.size)
    )]
    async fn get_page(
        &self,
        category: Category,
        window: Window,
    ) -> anyhow::Result<Vec<JobRecord>> {
        let options = page_options(window)?;
        let rows: Vec<JobRow> = self
            .collection(category)
            .find(
                category_filter(&self.queue, category, bson::DateTime::now()),
                options,
            )
            .await
            .with_context(|| format!("Failed to fetch {category} jobs"))?
            .try_collect()
            .await
            .with_context(|| format!("Failed to read {category} jobs"))?;

        Ok(rows
            .into_iter()
            .map(|row| row.into_record(category))
            .collect())
    }

    #[instrument(
        skip_all,
        err,
        fields(queue = %self.queue, job_type = %job.job_type, payload_size)
    )]
    async fn create_item(&self, job: NewJob) -> anyhow::Result<JobRecord> {
        let mut payload = Vec::new();
        job.data
            .to_writer(&mut payload)
            .context("Failed to encode job payload")?;
        tracing::Span::current().record("payload_size", payload.len());

        let now = Utc::now();
        let scheduled_at = job.scheduled_at.unwrap_or(now);
        let row = JobRow {
            jid: new_xid().to_string(),
            queue: self.queue.clone(),
            job_type: job.job_type,
            payload: Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: payload,
            },
            retries: 0,
            priority: job.priority as i64,
            scheduled_at: bson::DateTime::from_millis(scheduled_at.timestamp_millis()),
            enqueued_at: bson::DateTime::from_millis(now.timestamp_millis()),
            started_at: None,
        };

        self.collection(Category::Waiting)
            .insert_one(&row, None)
            .await
            .context("Failed to add job to the queue")?;

        let category = if scheduled_at > now {
            Category::Delayed
        } else {
            Category::Waiting
        };
        Ok(row.into_record(category))
    }

    #[instrument(skip_all, err, fields(queue = %self.queue, job = %job.id))]
    async fn remove_item(&self, job: &JobRecord) -> anyhow::Result<()> {
        let result = self
            .collection(job.status)
            .delete_one(doc! { "jid": job.id.as_str(), "queue": self.queue.as_str() }, None)
            .await
            .context("Failed to remove job from the queue")?;

        if result.deleted_count == 0 {
            bail!("job {} is no longer {}", job.id, job.status);
        }
        Ok(())
    }
}
