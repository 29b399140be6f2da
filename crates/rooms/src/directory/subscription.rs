use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::try_join_all;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, warn};

use crate::directory::{decode_room, ChatRoomDirectory, LatestMessage};
use crate::error::DirectoryError;
use crate::models::message::Message;
use crate::models::room::{RoomId, RoomView};
use crate::models::user::UserId;
use crate::store::{Document, QueryWatch, StoreError};

type RoomListUpdate = Result<Vec<RoomView>, DirectoryError>;
type LatestFeed = BoxStream<'static, Result<Option<Message>, DirectoryError>>;

/// Live room list of one user.
///
/// Yields the full recomputed list whenever the set of rooms changes or the
/// newest message of one of them does. Ends after an error from the room
/// query, or once cancelled. Dropping the subscription cancels it.
pub struct RoomSubscription {
    updates: mpsc::Receiver<RoomListUpdate>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl RoomSubscription {
    pub(crate) fn spawn(directory: ChatRoomDirectory, user_id: &str, rooms: QueryWatch) -> Self {
        let (updates_tx, updates) = mpsc::channel(directory.config().subscription_buffer);
        let token = CancellationToken::new();
        let worker = RoomListWorker {
            directory,
            user_id: user_id.to_string(),
            updates: updates_tx,
            token: token.clone(),
            feeds: HashMap::new(),
            views: Vec::new(),
            generation: 0,
        };
        tokio::spawn(worker.run(rooms));
        Self {
            updates,
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    /// Stops the subscription and every nested message feed.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token cancelling this subscription, e.g. to tie it to a shutdown signal.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl fmt::Debug for RoomSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomSubscription")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Stream for RoomSubscription {
    type Item = RoomListUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.updates.poll_recv(cx)
    }
}

struct LatestUpdate {
    generation: u64,
    latest: LatestMessage,
}

struct RoomListWorker {
    directory: ChatRoomDirectory,
    user_id: UserId,
    updates: mpsc::Sender<RoomListUpdate>,
    token: CancellationToken,
    /// One message feed per listed room, replaced on every room-set refresh.
    feeds: HashMap<RoomId, CancellationToken>,
    views: Vec<RoomView>,
    /// Bumped per refresh so updates from replaced feeds are dropped.
    generation: u64,
}

impl RoomListWorker {
    async fn run(mut self, mut rooms: QueryWatch) {
        let (latest_tx, mut latest_rx) = mpsc::unbounded_channel::<LatestUpdate>();
        let token = self.token.clone();
        debug!("room subscription for {} started", self.user_id);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                snapshot = rooms.next() => match snapshot {
                    Some(Ok(documents)) => {
                        let update = match self.refresh(&documents, &latest_tx).await {
                            Ok(()) => Ok(self.views.clone()),
                            Err(e) => {
                                error!("error refreshing chat rooms for {}: {e}", self.user_id);
                                Err(e)
                            }
                        };
                        if !self.emit(update).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("chat room listener for {} failed: {e}", self.user_id);
                        self.emit(Err(e.into())).await;
                        break;
                    }
                    None => {
                        self.emit(Err(StoreError::WatchClosed.into())).await;
                        break;
                    }
                },
                Some(update) = latest_rx.recv() => {
                    if update.generation != self.generation {
                        continue;
                    }
                    if let Some(update) = self.apply_latest(update.latest) {
                        if !self.emit(update).await {
                            break;
                        }
                    }
                }
            }
        }
        self.cancel_feeds();
        debug!("room subscription for {} stopped", self.user_id);
    }

    /// Sends an update unless the subscriber is gone or cancelled.
    async fn emit(&self, update: RoomListUpdate) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            sent = self.updates.send(update) => sent.is_ok(),
        }
    }

    fn cancel_feeds(&mut self) {
        for (_, feed) in self.feeds.drain() {
            feed.cancel();
        }
    }

    /// Rebuilds every room view and replaces every nested message feed.
    async fn refresh(
        &mut self,
        documents: &[Document],
        latest_tx: &mpsc::UnboundedSender<LatestUpdate>,
    ) -> Result<(), DirectoryError> {
        self.cancel_feeds();
        self.generation += 1;
        let generation = self.generation;

        let opened = try_join_all(
            documents
                .iter()
                .map(|document| open_room(&self.directory, &self.user_id, document)),
        )
        .await?;

        let mut views = Vec::with_capacity(opened.len());
        for (view, feed) in opened {
            let room_id = view.room_id().to_string();
            let feed_token = self.token.child_token();
            tokio::spawn(forward_latest(
                feed,
                feed_token.clone(),
                generation,
                room_id.clone(),
                latest_tx.clone(),
            ));
            if let Some(replaced) = self.feeds.insert(room_id, feed_token) {
                // duplicate room ids cannot come out of one query, but never leak a feed
                replaced.cancel();
            }
            views.push(view);
        }
        self.views = views;
        Ok(())
    }

    /// Returns the update to emit, if the change is visible in the list.
    fn apply_latest(&mut self, (room_id, latest): LatestMessage) -> Option<RoomListUpdate> {
        let message = match latest {
            Ok(message) => message,
            Err(e) => {
                warn!("latest message feed of room {room_id} failed: {e}");
                return Some(Err(e));
            }
        };
        let view = self.views.iter_mut().find(|view| view.room_id() == room_id)?;
        if view.latest_message == message {
            return None;
        }
        view.latest_message = message;
        Some(Ok(self.views.clone()))
    }
}

/// Builds the view of one room, keeping the live newest-message feed whose
/// first item went into the view.
async fn open_room(
    directory: &ChatRoomDirectory,
    user_id: &str,
    document: &Document,
) -> Result<(RoomView, LatestFeed), DirectoryError> {
    let room = decode_room(document)?;
    let feed = directory.open_message_feed(&room.room_id)?;
    let latest = async {
        let mut feed = feed.watch_latest().await?.boxed();
        let first = feed.next().await.ok_or(StoreError::WatchClosed)??;
        Ok::<_, DirectoryError>((first, feed))
    };
    let ((latest_message, feed), other_user) =
        tokio::try_join!(latest, directory.counterpart(user_id, &room))?;
    let view = RoomView {
        room,
        latest_message,
        other_user,
    };
    Ok((view, feed))
}

async fn forward_latest(
    mut feed: LatestFeed,
    token: CancellationToken,
    generation: u64,
    room_id: RoomId,
    latest_tx: mpsc::UnboundedSender<LatestUpdate>,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = feed.next() => next,
        };
        let Some(latest) = next else {
            break;
        };
        let update = LatestUpdate {
            generation,
            latest: (room_id.clone(), latest),
        };
        if latest_tx.send(update).is_err() {
            break;
        }
    }
    debug!("latest message feed of room {room_id} stopped");
}
