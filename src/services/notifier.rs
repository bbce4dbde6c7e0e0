use async_trait::async_trait;
use teloxide::prelude::*;

use crate::database::models::UserId;
use crate::error::ReminderError;

/// Outbound message delivery to a registered user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: UserId, text: &str) -> Result<(), ReminderError>;
}

/// Delivers reminders as Telegram messages to the user's private chat.
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, user_id: UserId, text: &str) -> Result<(), ReminderError> {
        self.bot
            .send_message(ChatId(user_id), text)
            .await
            .map_err(|e| ReminderError::NotificationSendFailed {
                user_id,
                reason: e.to_string(),
            })?;

        Ok(())
    }
}
