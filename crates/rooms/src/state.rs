use std::fs::read_to_string;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::{AppConfig, StoreConfig};
use crate::database::connection::DbConnection;
use crate::database::documents::PgDocumentStore;
use crate::directory::ChatRoomDirectory;
use crate::store::memory::MemoryStore;
use crate::store::DocumentStore;

/// Everything built from the config at startup.
pub struct AppState {
    pub config: AppConfig,
    pub directory: ChatRoomDirectory,
    /// Present for the postgres backend, used for schema management.
    pub db_connection: Option<DbConnection>,
}

impl AppState {
    pub async fn try_init(config: &AppConfig) -> anyhow::Result<Self> {
        let (store, db_connection) = match &config.store {
            StoreConfig::Memory { seed } => {
                let store = MemoryStore::new();
                if let Some(seed) = seed {
                    let content =
                        read_to_string(seed).with_context(|| format!("seed path: {seed:?}"))?;
                    let count = store
                        .seed(serde_json::from_str(&content).context("seed is not valid json")?)
                        .await?;
                    info!("seeded memory store with {count} document(s) from {seed:?}");
                }
                (Arc::new(store) as Arc<dyn DocumentStore>, None)
            }
            StoreConfig::Postgres(db_config) => {
                let connection = DbConnection::connect(db_config).await?;
                let store = PgDocumentStore::new(connection.clone());
                (Arc::new(store) as Arc<dyn DocumentStore>, Some(connection))
            }
        };
        let directory = ChatRoomDirectory::new(store, config.directory.clone())?;
        Ok(Self {
            config: config.clone(),
            directory,
            db_connection,
        })
    }
}
