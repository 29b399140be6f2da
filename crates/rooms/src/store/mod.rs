//! Document-store abstraction the room directory is written against.
//!
//! A store holds JSON documents addressed by [`DocumentPath`], grouped in
//! collections that may nest under documents (`rooms/<id>/messages`).
//! Backends: [`memory::MemoryStore`] and
//! [`crate::database::documents::PgDocumentStore`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub mod batch;
pub mod memory;
pub mod path;
pub mod query;

pub use batch::{WriteBatch, WriteOp};
pub use path::{CollectionPath, DocumentPath};
pub use query::{Direction, Filter, OrderBy, Query};

pub type Fields = serde_json::Map<String, Value>;

/// Live query results: the first item is the current result set, later items
/// arrive whenever the result set changes.
pub type QueryWatch = BoxStream<'static, Result<Vec<Document>, StoreError>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document already exists: {0}")]
    AlreadyExists(DocumentPath),
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("document body is not a json object: {0}")]
    NotAnObject(DocumentPath),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("watch closed by the store")]
    WatchClosed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub fields: Fields,
}

impl Document {
    pub fn new(path: DocumentPath, fields: Fields) -> Self {
        Self { path, fields }
    }

    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }
}

/// Serializes a value that must turn into a JSON object, e.g. a model struct.
pub fn to_fields<T: Serialize>(path: &DocumentPath, value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        _ => Err(StoreError::NotAnObject(path.clone())),
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError>;

    /// Creates or replaces the document.
    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError>;

    /// Creates the document, failing with [`StoreError::AlreadyExists`] if it is present.
    async fn create(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError>;

    /// Deleting a missing document is not an error. Nested collections are untouched.
    async fn delete(&self, path: &DocumentPath) -> Result<(), StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    async fn watch(&self, query: Query) -> Result<QueryWatch, StoreError>;
}
