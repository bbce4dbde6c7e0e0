pub mod commands;
pub mod handlers;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use crate::database::models::Prayer;
use crate::database::registration::RegistrationStore;
use crate::services::prayer_times::PrayerTimeResolver;
use crate::services::timezone::TimeResolver;
use crate::bot::session::SessionManager;

/// Error type shared by every dispatcher endpoint.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type HandlerResult = Result<(), HandlerError>;

/// Everything a command handler needs besides the bot and the message.
#[derive(Clone)]
pub struct BotContext {
    pub sessions: SessionManager,
    pub store: Arc<dyn RegistrationStore>,
    pub time_resolver: Arc<dyn TimeResolver>,
    pub prayer_times: Arc<dyn PrayerTimeResolver>,
    pub prayers: Vec<Prayer>,
    pub lookup_timeout: Duration,
}
