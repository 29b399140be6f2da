//! Chat-room directory over a document store: room lists enriched with the
//! newest message and the other participant, idempotent room creation,
//! message feeds, live room lists and room deletion.

pub mod config;
pub mod database;
pub mod directory;
pub mod error;
pub mod models;
pub mod state;
pub mod store;

pub use directory::{ChatRoomDirectory, MessageFeed, RoomSubscription};
pub use error::{DirectoryError, ValidationError};

#[cfg(test)]
mod tests;
