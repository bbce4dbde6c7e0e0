use tracing::{debug, error, info, warn};

use crate::database::models::{Prayer, UserId};
use crate::error::ReminderError;
use crate::services::reminder::TickReport;

/// Logs command start with consistent format
pub fn log_command_start(command: &str, user_id: UserId) {
    info!("CMD_START: {} by user {}", command, user_id);
}

/// Logs command errors with consistent format
pub fn log_command_error(command: &str, user_id: UserId, error: &str) {
    error!("CMD_ERROR: {} by user {} - {}", command, user_id, error);
}

/// Logs a user left out of the current tick
pub fn log_user_skipped(user_id: UserId, city: &str, error: &ReminderError) {
    match error {
        ReminderError::GeocodeNotFound(_) | ReminderError::TimezoneUnresolved { .. } => warn!(
            "USER_SKIPPED: user {} ({}) - {}",
            user_id, city, error
        ),
        _ => error!("USER_SKIPPED: user {} ({}) - {}", user_id, city, error),
    }
}

/// Logs a delivered reminder
pub fn log_reminder_sent(user_id: UserId, city: &str, prayer: Prayer) {
    info!("REMINDER_SENT: {} for user {} ({})", prayer, user_id, city);
}

/// Logs a reminder whose delivery failed; the occurrence stays recorded
pub fn log_reminder_failed(user_id: UserId, prayer: Prayer, error: &ReminderError) {
    error!("REMINDER_FAILED: {} for user {} - {}", prayer, user_id, error);
}

/// Logs the outcome of a reconciliation tick
pub fn log_tick_report(report: &TickReport) {
    if report.store_unavailable {
        warn!("TICK: skipped, registration store unavailable");
    } else if report.notifications_sent > 0 || report.user_failures > 0 || report.send_failures > 0 {
        info!(
            "TICK: {} users, {} sent, {} already sent, {} user failures, {} send failures",
            report.users_evaluated,
            report.notifications_sent,
            report.already_notified,
            report.user_failures,
            report.send_failures
        );
    } else {
        debug!("TICK: {} users, nothing due", report.users_evaluated);
    }
}
