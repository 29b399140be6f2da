use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, instrument, warn};

use crate::database::commands::{
    delete_document, insert_document, notify_change, upsert_document, CHANGES_CHANNEL,
};
use crate::database::connection::DbConnection;
use crate::database::queries::{fetch_document, run_query};
use crate::store::{
    Document, DocumentPath, DocumentStore, Fields, Query, QueryWatch, StoreError, WriteBatch,
    WriteOp,
};

const CHANGES_BUFFER: usize = 256;

/// [`DocumentStore`] backed by the `documents` table.
///
/// Every write runs in a transaction that also issues
/// `pg_notify('documents_changed', <collection>)`. A single `LISTEN`
/// connection per store, opened by the first watch, fans those out to all
/// watches, so a watch holds no pooled connection of its own.
#[derive(Clone)]
pub struct PgDocumentStore {
    connection: DbConnection,
    listener: Arc<Mutex<Option<ChangeListener>>>,
}

#[derive(Clone, Debug)]
enum Change {
    Collection(String),
    /// Notifications may have been missed, every watch re-reads.
    Resync,
    Failed,
}

struct ChangeListener {
    changes: broadcast::Sender<Change>,
    task: JoinHandle<()>,
    _guard: DropGuard,
}

impl PgDocumentStore {
    pub fn new(connection: DbConnection) -> Self {
        Self {
            connection,
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn connection(&self) -> &DbConnection {
        &self.connection
    }

    /// Number of live watches on this store.
    pub async fn watcher_count(&self) -> usize {
        match self.listener.lock().await.as_ref() {
            Some(listener) => listener.changes.receiver_count(),
            None => 0,
        }
    }

    async fn subscribe_changes(&self) -> Result<broadcast::Receiver<Change>, StoreError> {
        let mut slot = self.listener.lock().await;
        if let Some(listener) = slot.as_ref().filter(|l| !l.task.is_finished()) {
            return Ok(listener.changes.subscribe());
        }
        let mut listener = PgListener::connect_with(self.connection.pool()).await?;
        listener.listen(CHANGES_CHANNEL).await?;
        info!("listening for document changes on {CHANGES_CHANNEL}");

        let (changes, receiver) = broadcast::channel(CHANGES_BUFFER);
        let token = CancellationToken::new();
        let task = tokio::spawn(forward_changes(listener, changes.clone(), token.clone()));
        *slot = Some(ChangeListener {
            changes,
            task,
            _guard: token.drop_guard(),
        });
        Ok(receiver)
    }
}

/// Relays notifications until the owning store is dropped or the listener fails.
async fn forward_changes(
    mut listener: PgListener,
    changes: broadcast::Sender<Change>,
    token: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            _ = token.cancelled() => break,
            received = listener.try_recv() => match received {
                Ok(Some(notification)) => Change::Collection(notification.payload().to_string()),
                Ok(None) => {
                    warn!("lost the change listener connection, reconnecting");
                    Change::Resync
                }
                Err(e) => {
                    warn!("change listener failed: {e}");
                    let _ = changes.send(Change::Failed);
                    break;
                }
            },
        };
        // no receivers just means nobody is watching
        let _ = changes.send(change);
    }
    debug!("stopped listening for document changes");
}

struct WatchState {
    store: PgDocumentStore,
    changes: broadcast::Receiver<Change>,
    query: Query,
    initial: Option<Vec<Document>>,
    last: Option<Vec<Document>>,
    closed: bool,
}

impl WatchState {
    async fn next(mut self) -> Option<(Result<Vec<Document>, StoreError>, Self)> {
        if self.closed {
            return None;
        }
        if let Some(initial) = self.initial.take() {
            self.last = Some(initial.clone());
            return Some((Ok(initial), self));
        }
        loop {
            match self.changes.recv().await {
                Ok(Change::Collection(collection))
                    if collection != self.query.collection.as_str() =>
                {
                    continue
                }
                Ok(Change::Collection(_)) | Ok(Change::Resync) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!("watch lagged behind {skipped} changes, re-reading");
                }
                Ok(Change::Failed) | Err(RecvError::Closed) => {
                    self.closed = true;
                    return Some((Err(StoreError::WatchClosed), self));
                }
            }
            match run_query(self.store.connection.pool(), &self.query).await {
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
impl DocumentStore for PgDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        fetch_document(self.connection.pool(), path).await
    }

    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        let mut transaction = self.connection.pool().begin().await?;
        upsert_document(transaction.as_mut(), path, &fields).await?;
        notify_change(transaction.as_mut(), path.parent().as_str()).await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn create(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        let mut transaction = self.connection.pool().begin().await?;
        if !insert_document(transaction.as_mut(), path, &fields).await? {
            transaction.rollback().await?;
            return Err(StoreError::AlreadyExists(path.clone()));
        }
        notify_change(transaction.as_mut(), path.parent().as_str()).await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<(), StoreError> {
        let mut transaction = self.connection.pool().begin().await?;
        if delete_document(transaction.as_mut(), path).await? {
            notify_change(transaction.as_mut(), path.parent().as_str()).await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        run_query(self.connection.pool(), query).await
    }

    #[instrument(skip_all, fields(writes = batch.len()))]
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut touched = BTreeSet::new();
        let mut transaction = self.connection.pool().begin().await?;
        for op in batch.ops() {
            touched.insert(op.path().parent().as_str().to_string());
            match op {
                WriteOp::Set { path, fields } => {
                    upsert_document(transaction.as_mut(), path, fields).await?
                }
                WriteOp::Delete { path } => {
                    delete_document(transaction.as_mut(), path).await?;
                }
            }
        }
        for collection in &touched {
            notify_change(transaction.as_mut(), collection).await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn watch(&self, query: Query) -> Result<QueryWatch, StoreError> {
        // subscribe before the first read so no change slips in between
        let changes = self.subscribe_changes().await?;
        let initial = run_query(self.connection.pool(), &query).await?;
        debug!("watching {}", query.collection);
        let state = WatchState {
            store: self.clone(),
            changes,
            query,
            initial: Some(initial),
            last: None,
            closed: false,
        };
        Ok(futures::stream::unfold(state, WatchState::next).boxed())
    }
}
