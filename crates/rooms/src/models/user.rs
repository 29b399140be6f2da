use serde::Serialize;

use crate::store::Fields;

pub type UserId = String;

/// The other participant of a room. `profile` is `None` when no
/// `users/<user_id>` document exists.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counterpart {
    pub user_id: UserId,
    #[serde(flatten)]
    pub profile: Option<Fields>,
}

impl Counterpart {
    pub fn new(user_id: &str, profile: Option<Fields>) -> Self {
        let profile = profile.map(|mut fields| {
            fields.remove("userId");
            fields
        });
        Self {
            user_id: user_id.to_string(),
            profile,
        }
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.profile.as_ref().and_then(|p| p.get(name))
    }
}
