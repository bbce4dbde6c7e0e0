use serde::{Deserialize, Serialize};

/// Telegram chat identifier of a registered user.
pub type UserId = i64;

/// Where a user wants their reminders computed for.
///
/// At most one record exists per `user_id`; a new registration replaces the
/// previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreference {
    pub user_id: UserId,
    pub city: String,
    pub country: String,
}

impl UserPreference {
    pub fn new(user_id: UserId, city: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            user_id,
            city: city.into(),
            country: country.into(),
        }
    }
}
