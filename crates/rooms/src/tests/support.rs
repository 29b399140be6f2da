use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use serde_json::{json, Value};

use crate::config::DirectoryConfig;
use crate::directory::{ChatRoomDirectory, RoomSubscription};
use crate::models::message::Message;
use crate::models::room::RoomView;
use crate::store::memory::MemoryStore;
use crate::store::{
    CollectionPath, Document, DocumentPath, DocumentStore, Fields, Query, QueryWatch, StoreError,
    WriteBatch,
};

/// Memory store that counts store calls and fails on demand.
#[derive(Clone, Default)]
pub struct TestStore {
    pub memory: MemoryStore,
    calls: Arc<Calls>,
    failures: Arc<Failures>,
}

#[derive(Default)]
struct Calls {
    reads: AtomicUsize,
    writes: AtomicUsize,
    creates: AtomicUsize,
    create_attempts: AtomicUsize,
    commits: AtomicUsize,
}

#[derive(Default)]
struct Failures {
    /// Commits allowed before every further commit fails.
    commits_before_failure: Mutex<Option<usize>>,
    /// Queries on this collection fail.
    failing_query: Mutex<Option<String>>,
    /// `get` misses, as if another writer had not committed yet.
    stale_gets: AtomicBool,
}

fn injected() -> StoreError {
    StoreError::Sqlx(sqlx::Error::PoolTimedOut)
}

impl TestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.calls.reads.load(Ordering::SeqCst)
    }

    /// Single-document writes plus every operation of committed batches.
    pub fn writes(&self) -> usize {
        self.calls.writes.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.calls.creates.load(Ordering::SeqCst)
    }

    pub fn create_attempts(&self) -> usize {
        self.calls.create_attempts.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.calls.commits.load(Ordering::SeqCst)
    }

    pub fn fail_commits_after(&self, allowed: usize) {
        *self.failures.commits_before_failure.lock().unwrap() = Some(allowed);
    }

    pub fn fail_queries_on(&self, collection: &str) {
        *self.failures.failing_query.lock().unwrap() = Some(collection.to_string());
    }

    pub fn serve_stale_gets(&self) {
        self.failures.stale_gets.store(true, Ordering::SeqCst);
    }

    fn check_query(&self, query: &Query) -> Result<(), StoreError> {
        let failing = self.failures.failing_query.lock().unwrap();
        if failing.as_deref() == Some(query.collection.as_str()) {
            return Err(injected());
        }
        Ok(())
    }

    fn count_read(&self) {
        self.calls.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn count_writes(&self, n: usize) {
        self.calls.writes.fetch_add(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for TestStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        self.count_read();
        if self.failures.stale_gets.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.memory.get(path).await
    }

    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        self.count_writes(1);
        self.memory.set(path, fields).await
    }

    async fn create(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        self.calls.create_attempts.fetch_add(1, Ordering::SeqCst);
        let result = self.memory.create(path, fields).await;
        if result.is_ok() {
            self.count_writes(1);
            self.calls.creates.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn delete(&self, path: &DocumentPath) -> Result<(), StoreError> {
        self.count_writes(1);
        self.memory.delete(path).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.count_read();
        self.check_query(query)?;
        self.memory.query(query).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        {
            let mut allowed = self.failures.commits_before_failure.lock().unwrap();
            match allowed.as_mut() {
                Some(0) => return Err(injected()),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.calls.commits.fetch_add(1, Ordering::SeqCst);
        self.count_writes(batch.len());
        self.memory.commit(batch).await
    }

    async fn watch(&self, query: Query) -> Result<QueryWatch, StoreError> {
        self.count_read();
        self.check_query(&query)?;
        self.memory.watch(query).await
    }
}

pub fn directory(store: &TestStore) -> ChatRoomDirectory {
    directory_with_batch_limit(store, DirectoryConfig::default().batch_limit)
}

pub fn directory_with_batch_limit(store: &TestStore, batch_limit: usize) -> ChatRoomDirectory {
    let config = DirectoryConfig {
        batch_limit,
        ..DirectoryConfig::default()
    };
    ChatRoomDirectory::new(Arc::new(store.clone()), config).unwrap()
}

pub fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

pub fn text_message(id: &str, millis: i64, sender: &str, text: &str) -> Message {
    let Value::Object(payload) = json!({ "senderId": sender, "text": text }) else {
        unreachable!()
    };
    Message {
        id: id.to_string(),
        created_at: at(millis),
        payload,
    }
}

pub async fn seed_profile(store: &TestStore, user_id: &str, name: &str) {
    let Value::Object(fields) = json!({ "name": name }) else {
        unreachable!()
    };
    let path = CollectionPath::root("users").doc(user_id).unwrap();
    store.memory.set(&path, fields).await.unwrap();
}

pub fn room_ids(views: &[RoomView]) -> Vec<&str> {
    views.iter().map(|view| view.room_id()).collect()
}

const WAIT: Duration = Duration::from_secs(5);

pub async fn next_update(subscription: &mut RoomSubscription) -> Vec<RoomView> {
    tokio::time::timeout(WAIT, subscription.next())
        .await
        .expect("timed out waiting for a room list update")
        .expect("subscription ended")
        .expect("room list update failed")
}

/// Waits until `check` holds, yielding to spawned tasks in between.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
