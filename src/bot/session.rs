use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::database::models::{UserId, UserPreference};

/// Where a user is in the registration dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    AwaitingCity,
    AwaitingCountry { city: String },
    Completed,
}

/// Result of feeding one reply into the dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStep {
    CityAccepted { city: String },
    /// Both answers are in; the caller persists the preference.
    Completed(UserPreference),
    /// The dialogue already finished; the reply is not part of it.
    AlreadyCompleted,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no registration in progress")]
    NoActiveSession,
}

#[derive(Debug)]
struct Session {
    state: RegistrationState,
    touched_at: Instant,
}

/// In-memory registration dialogues, keyed by user.
///
/// Sessions idle for longer than the TTL are treated as absent and are
/// removed by [`SessionManager::purge_expired`].
#[derive(Debug, Clone)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<UserId, Session>>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Starts (or restarts) registration for `user_id`.
    pub async fn begin(&self, user_id: UserId) {
        self.put(user_id, RegistrationState::AwaitingCity).await;
    }

    pub async fn state(&self, user_id: UserId) -> Option<RegistrationState> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&user_id)
            .filter(|session| session.touched_at.elapsed() < self.ttl)
            .map(|session| session.state.clone())
    }

    /// Feeds a user's reply into their dialogue.
    pub async fn advance(&self, user_id: UserId, reply: &str) -> Result<RegistrationStep, SessionError> {
        let mut sessions = self.sessions.lock().await;

        let expired = match sessions.get(&user_id) {
            Some(session) => session.touched_at.elapsed() >= self.ttl,
            None => return Err(SessionError::NoActiveSession),
        };
        if expired {
            sessions.remove(&user_id);
            return Err(SessionError::NoActiveSession);
        }
        let Some(session) = sessions.get_mut(&user_id) else {
            return Err(SessionError::NoActiveSession);
        };

        let reply = reply.trim().to_string();
        session.touched_at = Instant::now();

        match std::mem::replace(&mut session.state, RegistrationState::Completed) {
            RegistrationState::AwaitingCity => {
                session.state = RegistrationState::AwaitingCountry { city: reply.clone() };
                Ok(RegistrationStep::CityAccepted { city: reply })
            }
            RegistrationState::AwaitingCountry { city } => {
                Ok(RegistrationStep::Completed(UserPreference::new(user_id, city, reply)))
            }
            RegistrationState::Completed => Ok(RegistrationStep::AlreadyCompleted),
        }
    }

    /// Puts a user back into a given state, e.g. after a failed save.
    pub async fn restore(&self, user_id: UserId, state: RegistrationState) {
        self.put(user_id, state).await;
    }

    /// Drops the user's dialogue; returns whether one was in progress.
    pub async fn cancel(&self, user_id: UserId) -> bool {
        let removed = self.sessions.lock().await.remove(&user_id);
        matches!(
            removed,
            Some(session) if session.state != RegistrationState::Completed
                && session.touched_at.elapsed() < self.ttl
        )
    }

    pub async fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.touched_at.elapsed() < self.ttl);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Purges expired sessions every `every` until the task is aborted.
    pub fn spawn_purge_task(&self, every: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let purged = manager.purge_expired().await;
                if purged > 0 {
                    tracing::debug!("Purged {} expired registration sessions", purged);
                }
            }
        })
    }

    async fn put(&self, user_id: UserId, state: RegistrationState) {
        self.sessions.lock().await.insert(
            user_id,
            Session {
                state,
                touched_at: Instant::now(),
            },
        );
    }
}
