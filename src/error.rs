use std::time::Duration;

use thiserror::Error;

use crate::database::models::UserId;

/// Failures the reminder loop knows how to classify.
///
/// Only `StoreUnavailable` affects a whole tick; every other variant is
/// scoped to a single user.
#[derive(Debug, Error)]
pub enum ReminderError {
    /// The registration store could not be read or written.
    #[error("registration store unavailable: {0}")]
    StoreUnavailable(String),

    /// The city could not be resolved to coordinates.
    #[error("could not find a location for city '{0}'")]
    GeocodeNotFound(String),

    /// The city was found but no usable timezone came with it.
    #[error("could not determine the timezone for city '{city}'")]
    TimezoneUnresolved {
        /// City as supplied by the user.
        city: String,
    },

    /// A network or service failure while talking to a lookup service.
    #[error("lookup unavailable: {0}")]
    LookupUnavailable(String),

    /// The outbound message could not be delivered.
    #[error("failed to send notification to {user_id}: {reason}")]
    NotificationSendFailed {
        /// Recipient of the failed message.
        user_id: UserId,
        /// Underlying transport error.
        reason: String,
    },

    /// The occurrence ledger database rejected a query.
    #[error("occurrence ledger error: {0}")]
    Ledger(#[from] sqlx::Error),
}

impl ReminderError {
    /// Builds the error reported when an external call exceeds its budget.
    pub fn timed_out(what: &str, after: Duration) -> Self {
        Self::LookupUnavailable(format!("{what} timed out after {}s", after.as_secs_f32()))
    }

    /// Whether retrying the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LookupUnavailable(_))
    }
}

impl From<reqwest::Error> for ReminderError {
    fn from(error: reqwest::Error) -> Self {
        Self::LookupUnavailable(error.to_string())
    }
}
