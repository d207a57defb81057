use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bson::{doc, Binary, Bson, DateTime, Document};
use serde::{Deserialize, Serialize};

use crate::error::CombeeError;

/// A job as stored in the `adc_queue` / `adc_dead_queue` collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JobRow {
    pub jid: String,
    pub queue: String,
    pub job_type: String,
    pub payload: Binary,
    pub retries: i64,
    pub priority: i64,
    pub scheduled_at: DateTime,
    pub enqueued_at: DateTime,
    pub started_at: Option<DateTime>,
}

impl JobRow {
    pub(crate) fn into_record(self, status: Category) -> JobRecord {
        let data = match Document::from_reader(self.payload.bytes.as_slice()) {
            Ok(document) => Bson::Document(document),
            Err(_) => Bson::Binary(self.payload),
        };
        let started_at = match self.started_at {
            Some(started_at) => Bson::DateTime(started_at),
            None => Bson::Null,
        };

        JobRecord {
            id: self.jid,
            data,
            options: doc! {
                "queue": self.queue,
                "job_type": self.job_type,
                "priority": self.priority,
                "retries": self.retries,
                "scheduled_at": self.scheduled_at,
                "enqueued_at": self.enqueued_at,
                "started_at": started_at,
            },
            status,
        }
    }
}

/// The partition of a queue a job currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Waiting,
    Delayed,
    Active,
    Dead,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Waiting,
        Category::Delayed,
        Category::Active,
        Category::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Waiting => "waiting",
            Category::Delayed => "delayed",
            Category::Active => "active",
            Category::Dead => "dead",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CombeeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CombeeError::InvalidArgument(format!("unknown category {s:?}")))
    }
}

/// The stripped-down, loggable view of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub data: Bson,
    pub options: Document,
    pub status: Category,
}

impl JobRecord {
    /// Mapping view used for printing and export.
    pub fn to_document(&self) -> Document {
        doc! {
            "id": self.id.as_str(),
            "data": self.data.clone(),
            "options": self.options.clone(),
            "status": self.status.as_str(),
        }
    }

    /// Looks up a dotted path such as `data.user.id` or `options.retries`.
    ///
    /// A non-numeric segment applied to an array is mapped over its elements;
    /// the hits come back as an array, or `Missing` when no element has it.
    pub fn field(&self, path: &str) -> FieldValue {
        let segments: Vec<&str> = path.split('.').collect();
        let found = match segments.split_first() {
            Some((&"id", rest)) if rest.is_empty() => Some(Bson::String(self.id.clone())),
            Some((&"status", rest)) if rest.is_empty() => {
                Some(Bson::String(self.status.as_str().to_string()))
            }
            Some((&"data", rest)) => lookup(&self.data, rest),
            Some((&"options", [])) => Some(Bson::Document(self.options.clone())),
            Some((&"options", [first, rest @ ..])) => {
                self.options.get(*first).and_then(|value| lookup(value, rest))
            }
            _ => None,
        };
        found.map_or(FieldValue::Missing, FieldValue::Present)
    }
}

/// Walks `segments` by reference and clones only what is found.
fn lookup(current: &Bson, segments: &[&str]) -> Option<Bson> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(current.clone());
    };
    match current {
        Bson::Document(document) => document.get(*segment).and_then(|value| lookup(value, rest)),
        Bson::Array(items) => match segment.parse::<usize>() {
            Ok(index) => items.get(index).and_then(|item| lookup(item, rest)),
            Err(_) => {
                let hits: Vec<Bson> = items
                    .iter()
                    .filter_map(|item| lookup(item, segments))
                    .collect();
                (!hits.is_empty()).then_some(Bson::Array(hits))
            }
        },
        _ => None,
    }
}

/// Result of a field lookup; `Missing` is never confused with an explicit null.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Missing,
    Present(Bson),
}

impl FieldValue {
    pub fn as_bson(&self) -> Option<&Bson> {
        match self {
            FieldValue::Missing => None,
            FieldValue::Present(value) => Some(value),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Missing => f.write_str("undefined"),
            FieldValue::Present(value) => write!(f, "{}", value.clone().into_relaxed_extjson()),
        }
    }
}

/// An offset-addressed slice request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub size: u64,
}

impl Window {
    pub fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }
}

/// One fetched window of a category.
#[derive(Debug, Clone)]
pub struct Page {
    pub window: Window,
    pub jobs: Vec<JobRecord>,
}

/// Per-category job counts of one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Health {
    counts: BTreeMap<Category, u64>,
}

impl Health {
    pub fn with(mut self, category: Category, count: u64) -> Self {
        self.counts.insert(category, count);
        self
    }

    pub fn count(&self, category: Category) -> u64 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, u64)> + '_ {
        self.counts.iter().map(|(category, count)| (*category, *count))
    }
}

/// A job to be created through the store.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub data: Document,
    pub priority: i8,
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, data: Document) -> Self {
        Self {
            job_type: job_type.into(),
            data,
            priority: 0,
            scheduled_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord {
            id: "j1".to_string(),
            data: Bson::Document(doc! { "user": { "id": 7, "tags": ["a", "b"] }, "note": null }),
            options: doc! { "retries": 2_i64 },
            status: Category::Waiting,
        }
    }

    #[test]
    fn field_walks_nested_paths() {
        let job = record();
        assert_eq!(job.field("data.user.id"), FieldValue::Present(Bson::Int32(7)));
        assert_eq!(
            job.field("data.user.tags.1"),
            FieldValue::Present(Bson::String("b".into()))
        );
        assert_eq!(job.field("options.retries"), FieldValue::Present(Bson::Int64(2)));
        assert_eq!(job.field("status"), FieldValue::Present(Bson::String("waiting".into())));
    }

    #[test]
    fn missing_is_not_null() {
        let job = record();
        assert_eq!(job.field("data.note"), FieldValue::Present(Bson::Null));
        assert_eq!(job.field("data.nope"), FieldValue::Missing);
        assert_eq!(job.field("data.user.tags.9"), FieldValue::Missing);
        assert_eq!(job.field("data.user.id.deeper"), FieldValue::Missing);
        assert_eq!(job.field("bogus"), FieldValue::Missing);
        assert_eq!(job.field("id.deeper"), FieldValue::Missing);
    }

    #[test]
    fn paths_through_arrays_of_documents_collect_hits() {
        let job = JobRecord {
            data: Bson::Document(doc! {
                "items": [{ "sku": "a" }, { "qty": 3 }, { "sku": "b" }, 5],
            }),
            ..record()
        };
        assert_eq!(
            job.field("data.items.sku"),
            FieldValue::Present(Bson::Array(vec![
                Bson::String("a".into()),
                Bson::String("b".into()),
            ]))
        );
        assert_eq!(job.field("data.items.1.qty"), FieldValue::Present(Bson::Int32(3)));
        assert_eq!(job.field("data.items.color"), FieldValue::Missing);
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Waiting".parse::<Category>().unwrap(), Category::Waiting);
        assert_eq!("dead".parse::<Category>().unwrap(), Category::Dead);
        assert!(matches!(
            "stuck".parse::<Category>(),
            Err(CombeeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn undecodable_payload_stays_binary() {
        let row = JobRow {
            jid: "x".into(),
            queue: "default".into(),
            job_type: "t".into(),
            payload: Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: vec![1, 2, 3],
            },
            retries: 0,
            priority: 0,
            scheduled_at: DateTime::now(),
            enqueued_at: DateTime::now(),
            started_at: None,
        };
        let job = row.into_record(Category::Waiting);
        assert!(matches!(job.data, Bson::Binary(_)));
        assert_eq!(job.options.get("started_at"), Some(&Bson::Null));
    }
}
