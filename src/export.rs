//! Dumping matching jobs to a JSON file.

use std::path::{Path, PathBuf};

use bson::Bson;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::instrument;

use crate::engine::QueryEngine;
use crate::error::{CombeeError, Result};
use crate::predicate::FilterArg;
use crate::sequence::LazySequence;
use crate::store::JobStore;
use crate::types::{Category, JobRecord};

/// `2020-02-01T00:33:39.895Z` becomes `20200201T003339895Z`.
pub fn sanitized_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

pub fn export_file_name(queue: &str, category: Category, at: DateTime<Utc>) -> String {
    format!("{queue}-{category}-{}.json", sanitized_timestamp(at))
}

/// Pretty JSON of one job, dates and numbers in relaxed extended JSON.
pub fn job_to_json(job: &JobRecord) -> serde_json::Value {
    Bson::Document(job.to_document()).into_relaxed_extjson()
}

/// Streams `jobs` into `path` as a JSON array; returns how many were written.
///
/// The array is written next to `path` and only renamed into place once it is
/// complete, so a failed fetch never leaves a truncated file behind.
pub async fn write_json_array(path: &Path, jobs: LazySequence<JobRecord>) -> Result<u64> {
    let partial = path.with_extension("json.partial");
    match write_array(&partial, jobs).await {
        Ok(written) => {
            tokio::fs::rename(&partial, path)
                .await
                .map_err(|source| CombeeError::Export {
                    path: path.to_path_buf(),
                    source,
                })?;
            Ok(written)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                tracing::warn!(
                    path = %partial.display(),
                    error = %cleanup,
                    "failed to remove partial export"
                );
            }
            Err(e)
        }
    }
}

async fn write_array(path: &Path, mut jobs: LazySequence<JobRecord>) -> Result<u64> {
    let io_error = |source| CombeeError::Export {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).await.map_err(io_error)?;
    let mut out = BufWriter::new(file);

    out.write_all(b"[").await.map_err(io_error)?;
    let mut written = 0;
    while let Some(job) = jobs.next().await? {
        let separator: &[u8] = if written == 0 { b"\n" } else { b",\n" };
        let json = serde_json::to_vec_pretty(&job_to_json(&job))
            .map_err(|e| io_error(e.into()))?;
        out.write_all(separator).await.map_err(io_error)?;
        out.write_all(&json).await.map_err(io_error)?;
        written += 1;
    }
    let end: &[u8] = if written == 0 { b"]\n" } else { b"\n]\n" };
    out.write_all(end).await.map_err(io_error)?;
    out.flush().await.map_err(io_error)?;
    Ok(written)
}

impl<S: JobStore + 'static> QueryEngine<S> {
    /// Writes every match into a timestamped file under `dir`.
    #[instrument(skip_all, err, fields(queue = %self.name(), category = %category))]
    pub async fn export(
        &self,
        category: Category,
        filter: impl Into<FilterArg>,
        dir: &Path,
    ) -> Result<(PathBuf, u64)> {
        let path = dir.join(export_file_name(self.name(), category, Utc::now()));
        let jobs = self.matching(category, filter.into())?;
        let written = write_json_array(&path, jobs).await?;
        tracing::info!(path = %path.display(), written, "exported jobs");
        Ok((path, written))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bson::doc;
    use chrono::TimeZone;

    use super::*;
    use crate::store::MemoryJobStore;

    #[test]
    fn timestamps_are_file_name_safe() {
        let at = Utc.with_ymd_and_hms(2020, 2, 1, 0, 33, 39).unwrap()
            + chrono::Duration::milliseconds(895);
        assert_eq!(sanitized_timestamp(at), "20200201T003339895Z");
        assert_eq!(
            export_file_name("mail", Category::Dead, at),
            "mail-dead-20200201T003339895Z.json"
        );
    }

    #[tokio::test]
    async fn exports_matches_as_a_json_array() {
        let store = Arc::new(MemoryJobStore::new());
        for i in 0..5 {
            store.push(JobRecord {
                id: format!("job-{i}"),
                data: Bson::Document(doc! { "n": i }),
                options: doc! {},
                status: Category::Waiting,
            });
        }
        let engine = QueryEngine::new("mail", store);
        let dir = std::env::temp_dir().join(format!("combee-export-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let (path, written) = engine
            .export(Category::Waiting, doc! { "data.n": { "$gte": 3 } }, &dir)
            .await
            .unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();

        assert_eq!(written, 2);
        assert_eq!(parsed[0]["id"], "job-3");
        assert_eq!(parsed[1]["data"]["n"], 4);
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn empty_exports_are_still_valid_json() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("combee-empty-{}.json", std::process::id()));
        let written = write_json_array(&path, LazySequence::from_items(Vec::new()))
            .await
            .unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();

        assert_eq!(written, 0);
        assert_eq!(
            serde_json::from_str::<Vec<serde_json::Value>>(&contents).unwrap(),
            Vec::<serde_json::Value>::new()
        );
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn failed_exports_leave_no_file_behind() {
        let store = Arc::new(MemoryJobStore::new());
        for i in 0..80 {
            store.push(JobRecord {
                id: format!("job-{i}"),
                data: Bson::Null,
                options: doc! {},
                status: Category::Dead,
            });
        }
        store.fail_fetches_from(50);
        let engine = QueryEngine::new("mail", store);
        let dir = std::env::temp_dir().join(format!("combee-failed-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let result = engine.export(Category::Dead, FilterArg::all(), &dir).await;

        assert!(matches!(result, Err(CombeeError::Fetch(_))));
        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
