use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document};
use futures::future::{self, BoxFuture, FutureExt};

use crate::error::{CombeeError, Result};
use crate::matcher::MatchCompiler;
use crate::types::JobRecord;

type TestFn<T> = dyn for<'a> Fn(&'a T) -> BoxFuture<'a, bool> + Send + Sync;

/// A boolean test over one item, possibly asynchronous.
///
/// Cloning is cheap; a predicate compiled once is shared by every page of a scan.
pub struct Predicate<T> {
    test: Arc<TestFn<T>>,
}

impl<T> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        Self {
            test: Arc::clone(&self.test),
        }
    }
}

impl<T> fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate")
    }
}

impl<T: Send + Sync + 'static> Predicate<T> {
    pub fn new<F>(test: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::from_async(move |item| future::ready(test(item)).boxed())
    }

    /// Wraps a predicate that needs to suspend, e.g. to resolve something remotely.
    pub fn from_async<F>(test: F) -> Self
    where
        F: for<'a> Fn(&'a T) -> BoxFuture<'a, bool> + Send + Sync + 'static,
    {
        Self {
            test: Arc::new(test),
        }
    }

    pub fn test<'a>(&'a self, item: &'a T) -> BoxFuture<'a, bool> {
        (self.test)(item)
    }
}

/// Turns a declarative query document into a predicate over jobs.
pub trait QueryCompiler: Send + Sync {
    fn compile(&self, query: &Document) -> Result<Predicate<JobRecord>>;
}

/// What a caller may pass as a filter.
#[derive(Debug, Clone)]
pub enum FilterArg {
    Callable(Predicate<JobRecord>),
    Query(Bson),
}

impl FilterArg {
    /// Matches every job.
    pub fn all() -> Self {
        FilterArg::Query(Bson::Document(Document::new()))
    }

    /// Accepts parsed JSON, e.g. from the shell. The shape is checked on resolution.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Bson::try_from(value)
            .map(FilterArg::Query)
            .map_err(|e| CombeeError::InvalidFilter(e.to_string()))
    }
}

impl Default for FilterArg {
    fn default() -> Self {
        FilterArg::all()
    }
}

impl From<Document> for FilterArg {
    fn from(query: Document) -> Self {
        FilterArg::Query(Bson::Document(query))
    }
}

impl From<Predicate<JobRecord>> for FilterArg {
    fn from(predicate: Predicate<JobRecord>) -> Self {
        FilterArg::Callable(predicate)
    }
}

/// Normalizes filter arguments into a single predicate shape.
#[derive(Clone)]
pub struct PredicateResolver {
    compiler: Arc<dyn QueryCompiler>,
}

impl Default for PredicateResolver {
    fn default() -> Self {
        Self::new(MatchCompiler)
    }
}

impl fmt::Debug for PredicateResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateResolver").finish_non_exhaustive()
    }
}

impl PredicateResolver {
    pub fn new(compiler: impl QueryCompiler + 'static) -> Self {
        Self {
            compiler: Arc::new(compiler),
        }
    }

    pub fn resolve(&self, filter: FilterArg) -> Result<Predicate<JobRecord>> {
        match filter {
            FilterArg::Callable(predicate) => Ok(predicate),
            FilterArg::Query(Bson::Document(query)) => self.compiler.compile(&query),
            FilterArg::Query(other) => Err(CombeeError::InvalidFilter(format!(
                "expected a query document, got {:?}",
                other.element_type()
            ))),
        }
    }
}
