use std::sync::Arc;

use tracing::instrument;

use crate::config::{is_reserved, Config};
use crate::engine::QueryEngine;
use crate::error::{CombeeError, Result};
use crate::mongo::MongoDbJobStore;
use crate::store::JobStore;

/// The queues being introspected, in the order they were configured.
#[derive(Debug)]
pub struct Combee<S> {
    queues: Vec<QueryEngine<S>>,
}

impl<S: JobStore + 'static> Combee<S> {
    /// Later engines with an already-registered name are dropped.
    pub fn new(engines: impl IntoIterator<Item = QueryEngine<S>>) -> Result<Self> {
        let mut queues: Vec<QueryEngine<S>> = Vec::new();
        for engine in engines {
            if queues.iter().all(|known| known.name() != engine.name()) {
                queues.push(engine);
            }
        }
        if queues.is_empty() {
            return Err(CombeeError::Configuration(
                "no queues to introspect".to_string(),
            ));
        }
        Ok(Self { queues })
    }

    pub fn list_queues(&self) -> Vec<&str> {
        self.queues.iter().map(QueryEngine::name).collect()
    }

    pub fn queue(&self, name: &str) -> Result<&QueryEngine<S>> {
        self.queues
            .iter()
            .find(|engine| engine.name() == name)
            .ok_or_else(|| CombeeError::UnknownQueue(name.to_string()))
    }
}

impl Combee<MongoDbJobStore> {
    /// Validates `config`, connects and builds one engine per queue.
    #[instrument(skip_all, err)]
    pub async fn connect(config: &Config) -> Result<Self> {
        let uri = config.validate()?;
        let database = MongoDbJobStore::connect(uri, config.cert_file.clone()).await?;

        let names = if config.queues.is_empty() {
            let discovered = MongoDbJobStore::discover_queues(&database).await?;
            let (found, reserved): (Vec<_>, Vec<_>) = discovered
                .into_iter()
                .partition(|name| !is_reserved(name));
            if !reserved.is_empty() {
                tracing::warn!(queues = ?reserved, "skipping queues named like shell keywords");
            }
            tracing::info!(queues = ?found, "discovered queues");
            found
        } else {
            config.queues.clone()
        };

        Self::new(names.into_iter().map(|name| {
            let store = Arc::new(MongoDbJobStore::new(database.clone(), name.clone()));
            QueryEngine::new(name, store).with_batch_size(config.batch_size)
        }))
    }
}
