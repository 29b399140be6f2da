use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, instrument};

use crate::store::{
    CollectionPath, Document, DocumentPath, DocumentStore, Fields, Query, QueryWatch, StoreError,
    WriteBatch, WriteOp,
};

const CHANGES_CHANNEL_SIZE: usize = 256;

/// In-process document store. Clones share the same documents.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    documents: RwLock<BTreeMap<DocumentPath, Fields>>,
    changes: broadcast::Sender<CollectionPath>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGES_CHANNEL_SIZE);
        Self {
            inner: Arc::new(Inner {
                documents: RwLock::new(BTreeMap::new()),
                changes,
            }),
        }
    }

    /// Loads documents from a JSON object mapping document paths to bodies,
    /// e.g. `{ "users/alice": { "name": "Alice" } }`. Returns the number loaded.
    pub async fn seed(&self, seed: Value) -> Result<usize, StoreError> {
        let Value::Object(entries) = seed else {
            return Err(StoreError::InvalidPath {
                path: "<seed>".to_string(),
                reason: "seed must be an object keyed by document path".to_string(),
            });
        };
        let mut batch = WriteBatch::new();
        for (path, body) in entries {
            let path = DocumentPath::parse(&path)?;
            let Value::Object(fields) = body else {
                return Err(StoreError::NotAnObject(path));
            };
            batch.set(path, fields);
        }
        let count = batch.len();
        self.commit(batch).await?;
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.inner.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.documents.read().await.is_empty()
    }

    /// Number of live watches, nested ones included.
    pub fn watcher_count(&self) -> usize {
        self.inner.changes.receiver_count()
    }

    fn notify(&self, collection: CollectionPath) {
        // no receivers just means nobody is watching
        let _ = self.inner.changes.send(collection);
    }
}

struct WatchState {
    store: MemoryStore,
    query: Query,
    changes: broadcast::Receiver<CollectionPath>,
    initial: Option<Vec<Document>>,
    last: Option<Vec<Document>>,
}

impl WatchState {
    async fn next(mut self) -> Option<(Result<Vec<Document>, StoreError>, Self)> {
        if let Some(initial) = self.initial.take() {
            self.last = Some(initial.clone());
            return Some((Ok(initial), self));
        }
        loop {
            match self.changes.recv().await {
                Ok(collection) if collection != self.query.collection => continue,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!("watch lagged behind {skipped} changes, re-reading");
                }
                Err(RecvError::Closed) => return None,
            }
            match self.store.query(&self.query).await {
                Ok(documents) if self.last.as_ref() == Some(&documents) => continue,
                Ok(documents) => {
                    self.last = Some(documents.clone());
                    return Some((Ok(documents), self));
                }
                Err(e) => return Some((Err(e), self)),
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        let documents = self.inner.documents.read().await;
        Ok(documents
            .get(path)
            .map(|fields| Document::new(path.clone(), fields.clone())))
    }

    #[instrument(skip(self, fields))]
    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        self.inner
            .documents
            .write()
            .await
            .insert(path.clone(), fields);
        self.notify(path.parent().clone());
        Ok(())
    }

    #[instrument(skip(self, fields))]
    async fn create(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        {
            let mut documents = self.inner.documents.write().await;
            if documents.contains_key(path) {
                return Err(StoreError::AlreadyExists(path.clone()));
            }
            documents.insert(path.clone(), fields);
        }
        self.notify(path.parent().clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &DocumentPath) -> Result<(), StoreError> {
        let removed = self.inner.documents.write().await.remove(path).is_some();
        if removed {
            self.notify(path.parent().clone());
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let documents = self.inner.documents.read().await;
        let candidates = documents
            .iter()
            .filter(|(path, _)| path.parent() == &query.collection)
            .map(|(path, fields)| Document::new(path.clone(), fields.clone()));
        Ok(query.apply(candidates))
    }

    #[instrument(skip_all, fields(writes = batch.len()))]
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut touched = BTreeSet::new();
        {
            let mut documents = self.inner.documents.write().await;
            for op in batch.into_ops() {
                touched.insert(op.path().parent().clone());
                match op {
                    WriteOp::Set { path, fields } => {
                        documents.insert(path, fields);
                    }
                    WriteOp::Delete { path } => {
                        documents.remove(&path);
                    }
                }
            }
        }
        for collection in touched {
            self.notify(collection);
        }
        Ok(())
    }

    async fn watch(&self, query: Query) -> Result<QueryWatch, StoreError> {
        // subscribe before the first read so no change slips in between
        let changes = self.inner.changes.subscribe();
        let initial = self.query(&query).await?;
        debug!("watching {}", query.collection);
        let state = WatchState {
            store: self.clone(),
            query,
            changes,
            initial: Some(initial),
            last: None,
        };
        Ok(futures::stream::unfold(state, WatchState::next).boxed())
    }
}
