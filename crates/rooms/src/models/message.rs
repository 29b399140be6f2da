use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{Document, Fields};

pub type MessageId = String;

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const SENDER_FIELD: &str = "senderId";
pub const TEXT_FIELD: &str = "text";

/// A chat entry stored under `rooms/<room_id>/messages/<id>`. Everything but
/// the creation time is opaque payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: MessageId,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Fields,
}

impl Message {
    pub fn from_document(document: &Document) -> Result<Self, serde_json::Error> {
        let mut message: Message = document.decode()?;
        message.id = document.id().to_string();
        Ok(message)
    }

    /// Stored body: the payload plus `createdAt` in epoch milliseconds.
    pub fn to_fields(&self) -> Fields {
        let mut fields = self.payload.clone();
        fields.remove(ID_FIELD);
        fields.insert(
            CREATED_AT_FIELD.to_string(),
            Value::from(self.created_at.timestamp_millis()),
        );
        fields
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.payload.get(SENDER_FIELD).and_then(Value::as_str)
    }

    pub fn text(&self) -> Option<&str> {
        self.payload.get(TEXT_FIELD).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::DocumentPath;

    #[test]
    fn payload_survives_storage_shape() {
        let Value::Object(fields) = json!({
            "createdAt": 1_000,
            "senderId": "alice",
            "text": "hello",
            "attachments": [],
        }) else {
            unreachable!()
        };
        let path = DocumentPath::parse("rooms/r1/messages/m1").unwrap();
        let message = Message::from_document(&Document::new(path, fields.clone())).unwrap();

        assert_eq!(message.id, "m1");
        assert_eq!(message.sender_id(), Some("alice"));
        assert_eq!(message.text(), Some("hello"));
        assert_eq!(message.to_fields(), fields);
    }

    #[test]
    fn missing_timestamp_is_a_decode_error() {
        let path = DocumentPath::parse("rooms/r1/messages/m1").unwrap();
        assert!(Message::from_document(&Document::new(path, Fields::new())).is_err());
    }
}
