//! Pull-based asynchronous sequences.
//!
//! A [`LazySequence`] produces one item per [`LazySequence::next`] call and does no
//! work between calls. Operators such as [`LazySequence::filter`] and
//! [`LazySequence::limit`] wrap the sequence they consume, so demand always flows
//! from the outermost consumer down to the producer: a page is fetched only when a
//! consumer asks for an item the previous page could not supply.

use std::collections::VecDeque;
use std::future::Future;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::{CombeeError, Result};
use crate::predicate::Predicate;

/// Anything that can hand out items one at a time.
#[async_trait]
pub trait Producer: Send {
    type Item: Send;

    /// `Ok(None)` once exhausted; every later call must keep returning `Ok(None)`.
    async fn next(&mut self) -> Result<Option<Self::Item>>;
}

/// A single-pass sequence over any [`Producer`].
pub struct LazySequence<T> {
    producer: Box<dyn Producer<Item = T>>,
}

impl<T> std::fmt::Debug for LazySequence<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazySequence").finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> LazySequence<T> {
    pub fn new(producer: impl Producer<Item = T> + 'static) -> Self {
        Self {
            producer: Box::new(producer),
        }
    }

    /// Adapts an already-asynchronous producer.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T>> + Send + 'static,
    {
        Self::new(StreamProducer {
            stream: stream.boxed(),
            done: false,
        })
    }

    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        Self::new(IterProducer {
            items: items.into_iter().collect(),
        })
    }

    pub async fn next(&mut self) -> Result<Option<T>> {
        self.producer.next().await
    }

    /// Keeps only the items `predicate` accepts.
    pub fn filter(self, predicate: Predicate<T>) -> Self {
        Self::new(Filter {
            inner: self,
            predicate,
        })
    }

    /// Ends the sequence after `n` items without pulling anything further upstream.
    pub fn limit(self, n: usize) -> Result<Self> {
        if n == 0 {
            return Err(CombeeError::InvalidArgument(
                "limit must be a positive integer".to_string(),
            ));
        }
        Ok(Self::new(Limit {
            inner: self,
            remaining: n,
        }))
    }

    /// Awaits `f` for each item before pulling the next one.
    pub async fn for_each<F, Fut>(mut self, mut f: F) -> Result<()>
    where
        F: FnMut(T) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        while let Some(item) = self.next().await? {
            f(item).await?;
        }
        Ok(())
    }

    pub async fn fold<A, F>(mut self, init: A, mut f: F) -> Result<A>
    where
        A: Send,
        F: FnMut(A, T) -> A + Send,
    {
        let mut acc = init;
        while let Some(item) = self.next().await? {
            acc = f(acc, item);
        }
        Ok(acc)
    }

    /// Counts the remaining items; each is dropped as soon as it is counted.
    pub async fn count(self) -> Result<u64> {
        self.fold(0, |n, _| n + 1).await
    }

    /// Materializes the remaining items in order.
    pub async fn to_vec(self) -> Result<Vec<T>> {
        self.fold(Vec::new(), |mut items, item| {
            items.push(item);
            items
        })
        .await
    }
}

struct Filter<T> {
    inner: LazySequence<T>,
    predicate: Predicate<T>,
}

#[async_trait]
impl<T: Send + Sync + 'static> Producer for Filter<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Option<T>> {
        while let Some(item) = self.inner.next().await? {
            if self.predicate.test(&item).await {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

struct Limit<T> {
    inner: LazySequence<T>,
    remaining: usize,
}

#[async_trait]
impl<T: Send + Sync + 'static> Producer for Limit<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Option<T>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let item = self.inner.next().await?;
        if item.is_some() {
            self.remaining -= 1;
        } else {
            self.remaining = 0;
        }
        Ok(item)
    }
}

struct StreamProducer<T> {
    stream: BoxStream<'static, Result<T>>,
    done: bool,
}

#[async_trait]
impl<T: Send + 'static> Producer for StreamProducer<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }
        match self.stream.next().await {
            Some(item) => item.map(Some),
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

struct IterProducer<T> {
    items: VecDeque<T>,
}

#[async_trait]
impl<T: Send> Producer for IterProducer<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Option<T>> {
        Ok(self.items.pop_front())
    }
}
