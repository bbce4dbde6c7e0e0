use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::database::models::{UserId, UserPreference};
use crate::error::ReminderError;

/// Durable mapping from user to their city and country.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Returns every known preference, one per user.
    async fn load(&self) -> Result<Vec<UserPreference>, ReminderError>;

    /// Inserts the preference, replacing any record with the same `user_id`.
    async fn upsert(&self, preference: UserPreference) -> Result<(), ReminderError>;

    /// Returns the preference stored for `user_id`, if any.
    async fn get(&self, user_id: UserId) -> Result<Option<UserPreference>, ReminderError> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|preference| preference.user_id == user_id))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistrationDocument {
    #[serde(default)]
    users: Vec<UserPreference>,
}

/// Registration store backed by a single JSON document on disk.
///
/// Readers and writers take the lock for the whole file operation, and a
/// write replaces the file through a rename, so a reader never sees a
/// half-written document, even from another process.
pub struct JsonRegistrationStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl JsonRegistrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<RegistrationDocument, ReminderError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RegistrationDocument::default()),
            Err(e) => {
                return Err(ReminderError::StoreUnavailable(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(RegistrationDocument::default());
        }

        let mut document: RegistrationDocument = serde_json::from_slice(&bytes).map_err(|e| {
            ReminderError::StoreUnavailable(format!(
                "{} is not a valid registration document: {e}",
                self.path.display()
            ))
        })?;
        document.users = latest_per_user(document.users);
        Ok(document)
    }

    async fn write_document(&self, document: &RegistrationDocument) -> Result<(), ReminderError> {
        let unavailable = |action: &str, e: std::io::Error| {
            ReminderError::StoreUnavailable(format!("failed to {action} {}: {e}", self.path.display()))
        };

        let json = serde_json::to_vec_pretty(document)
            .map_err(|e| ReminderError::StoreUnavailable(format!("failed to serialize users: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| unavailable("create directory for", e))?;
            }
        }

        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| unavailable("create temp file for", e))?;
        file.write_all(&json).await.map_err(|e| unavailable("write", e))?;
        file.sync_all().await.map_err(|e| unavailable("flush", e))?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| unavailable("replace", e))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "users.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl RegistrationStore for JsonRegistrationStore {
    async fn load(&self) -> Result<Vec<UserPreference>, ReminderError> {
        let _guard = self.lock.read().await;
        Ok(self.read_document().await?.users)
    }

    async fn upsert(&self, preference: UserPreference) -> Result<(), ReminderError> {
        let _guard = self.lock.write().await;
        let mut document = self.read_document().await?;

        match document
            .users
            .iter_mut()
            .find(|existing| existing.user_id == preference.user_id)
        {
            Some(existing) => *existing = preference,
            None => document.users.push(preference),
        }

        self.write_document(&document).await?;
        tracing::debug!("Registration store now holds {} users", document.users.len());
        Ok(())
    }
}

/// Collapses repeated records for a user into the last one written,
/// keeping the position of the first.
fn latest_per_user(users: Vec<UserPreference>) -> Vec<UserPreference> {
    let mut positions: HashMap<UserId, usize> = HashMap::new();
    let mut collapsed: Vec<UserPreference> = Vec::with_capacity(users.len());

    for user in users {
        match positions.get(&user.user_id) {
            Some(&index) => collapsed[index] = user,
            None => {
                positions.insert(user.user_id, collapsed.len());
                collapsed.push(user);
            }
        }
    }

    collapsed
}
