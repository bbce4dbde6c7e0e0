use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Prayer, UserId};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A reminder that has been claimed for delivery on one local calendar day.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReminderOccurrence {
    pub id: String,
    pub user_id: i64,
    pub occurrence_date: String,
    pub prayer: String,
    pub sent_at: String,
}

impl ReminderOccurrence {
    /// Claims the occurrence for `(user_id, date, prayer)`.
    ///
    /// Returns `true` only for the call that inserted the row; every later
    /// call for the same key returns `false`.
    pub async fn record(
        pool: &sqlx::SqlitePool,
        user_id: UserId,
        date: NaiveDate,
        prayer: Prayer,
    ) -> Result<bool, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let sent_at = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT OR IGNORE INTO reminder_occurrences (id, user_id, occurrence_date, prayer, sent_at) VALUES (?, ?, ?, ?, ?)"
        )
        .bind(&id)
        .bind(user_id)
        .bind(date.format(DATE_FORMAT).to_string())
        .bind(prayer.as_str())
        .bind(&sent_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn exists(
        pool: &sqlx::SqlitePool,
        user_id: UserId,
        date: NaiveDate,
        prayer: Prayer,
    ) -> Result<bool, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM reminder_occurrences WHERE user_id = ? AND occurrence_date = ? AND prayer = ?"
        )
        .bind(user_id)
        .bind(date.format(DATE_FORMAT).to_string())
        .bind(prayer.as_str())
        .fetch_one(pool)
        .await?;

        Ok(count > 0)
    }

    pub async fn find_by_user(
        pool: &sqlx::SqlitePool,
        user_id: UserId,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ReminderOccurrence>(
            "SELECT id, user_id, occurrence_date, prayer, sent_at FROM reminder_occurrences WHERE user_id = ? ORDER BY occurrence_date DESC, prayer ASC"
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Deletes every occurrence dated strictly before `date`.
    pub async fn prune_before(
        pool: &sqlx::SqlitePool,
        date: NaiveDate,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM reminder_occurrences WHERE occurrence_date < ?")
            .bind(date.format(DATE_FORMAT).to_string())
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn count(pool: &sqlx::SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reminder_occurrences")
            .fetch_one(pool)
            .await
    }

    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.occurrence_date, DATE_FORMAT).ok()
    }
}
