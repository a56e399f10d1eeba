use std::{path::Path, sync::Arc};

use tracing::info;

use super::{
    config::{Config, StoreUrl},
    database::RedisBackend,
    ledger::LikeLedger,
    sqlite::SqliteBackend,
    storage::{Backend, StoreError},
};

pub struct State {
    pub config: Config,
    pub backend: Arc<dyn Backend>,
    pub ledger: LikeLedger,
}

impl State {
    pub async fn new(config: Config) -> Result<Arc<Self>, StoreError> {
        let backend: Arc<dyn Backend> = match &config.store_url {
            StoreUrl::Redis(url) => Arc::new(RedisBackend::connect(url).await?),
            StoreUrl::Sqlite(path) if path == ":memory:" => {
                info!("Using in-memory SQLite store, nothing will persist");
                Arc::new(SqliteBackend::open_in_memory()?)
            }
            StoreUrl::Sqlite(path) => Arc::new(SqliteBackend::open(Path::new(path))?),
        };

        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn Backend>) -> Arc<Self> {
        Arc::new(Self {
            config,
            ledger: LikeLedger::new(backend.clone()),
            backend,
        })
    }
}
