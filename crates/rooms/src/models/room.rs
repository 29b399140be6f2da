use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::user::{Counterpart, UserId};
use crate::store::Document;

pub type RoomId = String;

pub const PARTICIPANTS_FIELD: &str = "participants";

/// A conversation between two users, stored under `rooms/<room_id>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(default)]
    pub room_id: RoomId,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub participants: Vec<UserId>,
}

impl Room {
    pub fn new(room_id: &str, participants: Vec<UserId>) -> Self {
        Self {
            room_id: room_id.to_string(),
            created_at: Utc::now(),
            participants,
        }
    }

    /// The document key is authoritative for the room id.
    pub fn from_document(document: &Document) -> Result<Self, serde_json::Error> {
        let mut room: Room = document.decode()?;
        room.room_id = document.id().to_string();
        Ok(room)
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// First participant that is not `user_id`. `None` for a room the user
    /// shares with nobody else.
    pub fn counterpart_of(&self, user_id: &str) -> Option<&UserId> {
        self.participants.iter().find(|p| p.as_str() != user_id)
    }
}

/// A room as shown in a user's room list.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    #[serde(flatten)]
    pub room: Room,
    pub latest_message: Option<Message>,
    pub other_user: Option<Counterpart>,
}

impl RoomView {
    pub fn room_id(&self) -> &str {
        &self.room.room_id
    }
}
