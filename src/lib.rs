//! Introspection of aide-de-camp MongoDB job queues.
//!
//! A queue can only be read a page at a time, so every query is a lazy scan:
//! [`QueryEngine::iterate`] turns the pages of one category into a
//! [`LazySequence`] of [`JobRecord`]s, and `find`, `count`, `distinct` and
//! `remove_matching` filter and fold that sequence while holding at most one page
//! of jobs in memory.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bson::doc;
//! use combee::{Category, MemoryJobStore, QueryEngine};
//!
//! # async fn run() -> combee::Result<()> {
//! let engine = QueryEngine::new("mail", Arc::new(MemoryJobStore::new()));
//! let stuck = engine
//!     .count(Category::Waiting, doc! { "data.status": "stuck" })
//!     .await?;
//! println!("{stuck} stuck jobs");
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod error;
mod export;
mod matcher;
mod mongo;
mod paged;
mod predicate;
mod registry;
mod sequence;
pub mod shell;
mod store;
mod types;

pub use config::{Config, RESERVED_QUEUE_NAMES};
pub use engine::{DistinctValues, QueryEngine, RemovalReport};
pub use error::{CombeeError, Result};
pub use export::{export_file_name, sanitized_timestamp, write_json_array};
pub use matcher::MatchCompiler;
pub use mongo::MongoDbJobStore;
pub use paged::{PagedSource, DEFAULT_BATCH_SIZE};
pub use predicate::{FilterArg, Predicate, PredicateResolver, QueryCompiler};
pub use registry::Combee;
pub use sequence::{LazySequence, Producer};
pub use store::{JobStore, MemoryJobStore};
pub use types::{Category, FieldValue, Health, JobRecord, NewJob, Page, Window};
