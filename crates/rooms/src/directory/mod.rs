//! Chat-room directory: the room list of a user, room creation, message
//! feeds and room deletion, all on top of a [`DocumentStore`].
//!
//! Layout in the store:
//! - `rooms/<room_id>`: [`Room`] with exactly two participants
//! - `rooms/<room_id>/messages/<message_id>`: [`Message`]
//! - `users/<user_id>`: profile, read only here

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, error, info, instrument};

use crate::config::DirectoryConfig;
use crate::error::{require_non_empty, DirectoryError, ValidationError};
use crate::models::message::Message;
use crate::models::room::{Room, RoomId, RoomView, PARTICIPANTS_FIELD};
use crate::models::user::{Counterpart, UserId};
use crate::models::{MESSAGES_COLLECTION, ROOMS_COLLECTION, USERS_COLLECTION};
use crate::store::{
    to_fields, CollectionPath, Document, DocumentPath, DocumentStore, Query, StoreError,
    WriteBatch,
};

pub mod feed;
pub mod subscription;

pub use feed::MessageFeed;
pub use subscription::RoomSubscription;

#[derive(Clone)]
pub struct ChatRoomDirectory {
    store: Arc<dyn DocumentStore>,
    config: DirectoryConfig,
    rooms: CollectionPath,
    users: CollectionPath,
}

impl ChatRoomDirectory {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: DirectoryConfig,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            rooms: CollectionPath::root(ROOMS_COLLECTION),
            users: CollectionPath::root(USERS_COLLECTION),
        })
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Every room `user_id` participates in, with its newest message and the
    /// other participant's profile. Rooms are ordered by id.
    #[instrument(skip(self))]
    pub async fn list_rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomView>, DirectoryError> {
        require_non_empty(user_id, "user id")?;
        let result: Result<Vec<RoomView>, DirectoryError> = async {
            let documents = self.store.query(&self.rooms_query(user_id)).await?;
            try_join_all(documents.iter().map(|doc| self.room_view(user_id, doc))).await
        }
        .await;
        result.inspect_err(|e| error!("error fetching chat rooms with details: {e}"))
    }

    /// Creates `rooms/<room_id>` unless it exists. An existing room is left
    /// untouched, whatever its participants. Returns whether this call created it.
    #[instrument(skip(self))]
    pub async fn ensure_room_exists(
        &self,
        room_id: &str,
        participants: Vec<UserId>,
    ) -> Result<bool, DirectoryError> {
        require_non_empty(room_id, "room id")?;
        if participants.is_empty() {
            return Err(ValidationError::InvalidInput {
                value: room_id.to_string(),
                reason: "a room needs participants".to_string(),
            }
            .into());
        }
        for participant in &participants {
            require_non_empty(participant, "participant id")?;
        }

        let path = self.room_path(room_id)?;
        let result: Result<bool, StoreError> = async {
            if self.store.get(&path).await?.is_some() {
                debug!("room {room_id} already exists");
                return Ok(false);
            }
            let room = Room::new(room_id, participants);
            match self.store.create(&path, to_fields(&path, &room)?).await {
                Ok(()) => {
                    info!("room created with id: {room_id}");
                    Ok(true)
                }
                // lost a race with a concurrent creator, same outcome as finding it
                Err(StoreError::AlreadyExists(_)) => {
                    debug!("room {room_id} was created concurrently");
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        }
        .await;
        result.map_err(|e| {
            error!("error creating room {room_id}: {e}");
            e.into()
        })
    }

    /// Handle on `rooms/<room_id>/messages`. Does not touch the store.
    pub fn open_message_feed(&self, room_id: &str) -> Result<MessageFeed, DirectoryError> {
        require_non_empty(room_id, "room id")?;
        let collection = self.room_path(room_id)?.collection(MESSAGES_COLLECTION)?;
        Ok(MessageFeed::new(self.store.clone(), room_id, collection))
    }

    /// Live variant of [`Self::list_rooms_for_user`], see [`RoomSubscription`].
    #[instrument(skip(self))]
    pub async fn subscribe_to_rooms_for_user(
        &self,
        user_id: &str,
    ) -> Result<RoomSubscription, DirectoryError> {
        require_non_empty(user_id, "user id")?;
        let rooms = self
            .store
            .watch(self.rooms_query(user_id))
            .await
            .inspect_err(|e| error!("error listening to chat rooms for {user_id}: {e}"))?;
        Ok(RoomSubscription::spawn(self.clone(), user_id, rooms))
    }

    /// Deletes every message of the room and then the room itself.
    ///
    /// When messages and room fit in one batch (`batch_limit` writes) the whole
    /// deletion is atomic. Larger rooms lose their messages in earlier batches
    /// and the room goes with the last one; a failure after the first batch is
    /// reported as [`DirectoryError::PartialDelete`]. Returns the number of
    /// messages deleted.
    #[instrument(skip(self))]
    pub async fn delete_room_and_messages(&self, room_id: &str) -> Result<usize, DirectoryError> {
        if let Err(e) = require_non_empty(room_id, "room id") {
            error!("room id not found for the chat room");
            return Err(e.into());
        }
        let room_path = self.room_path(room_id)?;
        let messages = self
            .store
            .query(&Query::new(room_path.collection(MESSAGES_COLLECTION)?))
            .await
            .inspect_err(|e| error!("error listing messages of room {room_id}: {e}"))?;
        let paths: Vec<DocumentPath> = messages.into_iter().map(|doc| doc.path).collect();
        let total = paths.len();

        // the final batch carries the room plus as many messages as fit next to it
        let capacity = self.config.batch_limit;
        let leading = total.saturating_sub(capacity - 1);
        let mut deleted = 0;
        for chunk in paths[..leading].chunks(capacity) {
            let mut batch = WriteBatch::new();
            for path in chunk {
                batch.delete(path.clone());
            }
            self.commit_deletion(room_id, batch, deleted).await?;
            deleted += chunk.len();
        }

        let mut batch = WriteBatch::new();
        for path in &paths[leading..] {
            batch.delete(path.clone());
        }
        batch.delete(room_path);
        self.commit_deletion(room_id, batch, deleted).await?;

        info!("chat room and its {total} message(s) deleted successfully for room id: {room_id}");
        Ok(total)
    }

    async fn commit_deletion(
        &self,
        room_id: &str,
        batch: WriteBatch,
        deleted_messages: usize,
    ) -> Result<(), DirectoryError> {
        self.store.commit(batch).await.map_err(|source| {
            error!("error deleting chat room {room_id} and messages: {source}");
            if deleted_messages == 0 {
                DirectoryError::Store(source)
            } else {
                DirectoryError::PartialDelete {
                    room_id: room_id.to_string(),
                    deleted_messages,
                    source,
                }
            }
        })
    }

    pub(crate) fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub(crate) fn rooms_query(&self, user_id: &str) -> Query {
        Query::new(self.rooms.clone()).array_contains(PARTICIPANTS_FIELD, user_id)
    }

    fn room_path(&self, room_id: &str) -> Result<DocumentPath, StoreError> {
        self.rooms.doc(room_id)
    }

    async fn room_view(&self, user_id: &str, document: &Document) -> Result<RoomView, DirectoryError> {
        let room = decode_room(document)?;
        let feed = self.open_message_feed(&room.room_id)?;
        let (latest_message, other_user) =
            tokio::try_join!(feed.latest(), self.counterpart(user_id, &room))?;
        Ok(RoomView {
            room,
            latest_message,
            other_user,
        })
    }

    /// Profile of the participant other than `user_id`. The id is kept even
    /// when no profile document exists.
    pub(crate) async fn counterpart(
        &self,
        user_id: &str,
        room: &Room,
    ) -> Result<Option<Counterpart>, DirectoryError> {
        let Some(other) = room.counterpart_of(user_id) else {
            debug!("room {} has no participant besides {user_id}", room.room_id);
            return Ok(None);
        };
        let profile = self.store.get(&self.users.doc(other)?).await?;
        Ok(Some(Counterpart::new(other, profile.map(|doc| doc.fields))))
    }
}

pub(crate) fn decode_room(document: &Document) -> Result<Room, DirectoryError> {
    Room::from_document(document).map_err(|e| DirectoryError::decode(&document.path, e))
}

/// Newest message out of a newest-first result set.
pub(crate) fn first_message(documents: &[Document]) -> Result<Option<Message>, DirectoryError> {
    documents
        .first()
        .map(|doc| Message::from_document(doc).map_err(|e| DirectoryError::decode(&doc.path, e)))
        .transpose()
}

pub(crate) type LatestMessage = (RoomId, Result<Option<Message>, DirectoryError>);
