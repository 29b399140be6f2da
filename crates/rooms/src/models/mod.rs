pub mod listing;
pub mod message;
pub mod room;
pub mod user;

/// Collection holding one document per room, keyed by room id.
pub const ROOMS_COLLECTION: &str = "rooms";
/// Sub-collection of every room document.
pub const MESSAGES_COLLECTION: &str = "messages";
/// Read-only profile collection, keyed by user id.
pub const USERS_COLLECTION: &str = "users";
