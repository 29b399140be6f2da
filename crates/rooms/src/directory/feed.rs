use std::sync::Arc;

use chrono::Utc;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::directory::first_message;
use crate::error::{require_non_empty, DirectoryError};
use crate::models::listing::validate_limit;
use crate::models::message::{Message, CREATED_AT_FIELD, ID_FIELD, SENDER_FIELD, TEXT_FIELD};
use crate::models::room::RoomId;
use crate::store::{CollectionPath, Direction, DocumentStore, Fields, Query};

/// Handle on the messages of one room.
#[derive(Clone)]
pub struct MessageFeed {
    store: Arc<dyn DocumentStore>,
    room_id: RoomId,
    collection: CollectionPath,
}

impl MessageFeed {
    pub(crate) fn new(store: Arc<dyn DocumentStore>, room_id: &str, collection: CollectionPath) -> Self {
        Self {
            store,
            room_id: room_id.to_string(),
            collection,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    /// Messages newest first.
    pub fn newest_first(&self) -> Query {
        Query::new(self.collection.clone()).order_by(CREATED_AT_FIELD, Direction::Desc)
    }

    /// Stores a text message from `sender_id`, stamped with the current time.
    pub async fn append(&self, sender_id: &str, text: &str) -> Result<Message, DirectoryError> {
        require_non_empty(sender_id, "sender id")?;
        let mut payload = Fields::new();
        payload.insert(SENDER_FIELD.to_string(), Value::from(sender_id));
        payload.insert(TEXT_FIELD.to_string(), Value::from(text));
        self.append_fields(payload).await
    }

    /// Stores an arbitrary payload as a new message with a fresh time-ordered id.
    /// Any `id` or `createdAt` in `payload` is replaced.
    pub async fn append_fields(&self, mut payload: Fields) -> Result<Message, DirectoryError> {
        payload.remove(ID_FIELD);
        payload.remove(CREATED_AT_FIELD);
        let message = Message {
            id: Uuid::now_v7().to_string(),
            created_at: Utc::now(),
            payload,
        };
        self.insert(&message).await?;
        Ok(message)
    }

    /// Writes `message` under its own id and timestamp, replacing any message
    /// with the same id.
    #[instrument(skip(self, message), fields(room_id = %self.room_id, message_id = %message.id))]
    pub async fn insert(&self, message: &Message) -> Result<(), DirectoryError> {
        let path = self.collection.doc(&message.id)?;
        self.store
            .set(&path, message.to_fields())
            .await
            .inspect_err(|e| error!("error storing message in room {}: {e}", self.room_id))?;
        Ok(())
    }

    pub async fn latest(&self) -> Result<Option<Message>, DirectoryError> {
        let documents = self.store.query(&self.newest_first().limit(1)).await?;
        first_message(&documents)
    }

    /// Up to `limit` messages, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Message>, DirectoryError> {
        validate_limit(limit)?;
        let documents = self.store.query(&self.newest_first().limit(limit)).await?;
        documents
            .iter()
            .map(|doc| {
                Message::from_document(doc).map_err(|e| DirectoryError::decode(&doc.path, e))
            })
            .collect()
    }

    /// Live newest message: the current one first, then every change.
    pub async fn watch_latest(
        &self,
    ) -> Result<impl Stream<Item = Result<Option<Message>, DirectoryError>> + Send + 'static, DirectoryError>
    {
        let watch = self.store.watch(self.newest_first().limit(1)).await?;
        Ok(watch.map(|snapshot| first_message(&snapshot?)))
    }
}
