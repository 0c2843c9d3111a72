use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use log::{error, info};
use serde_derive::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::utils::{DayWindow, ist, now};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// A claim older than this is assumed to belong to a pass that died.
const CLAIM_TIMEOUT_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Failed,
    Sending,
}

impl From<ReminderStatus> for i64 {
    fn from(status: ReminderStatus) -> Self {
        match status {
            ReminderStatus::Pending => 0,
            ReminderStatus::Sent => 1,
            ReminderStatus::Failed => 2,
            ReminderStatus::Sending => 3,
        }
    }
}

impl TryFrom<i64> for ReminderStatus {
    type Error = anyhow::Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(ReminderStatus::Pending),
            1 => Ok(ReminderStatus::Sent),
            2 => Ok(ReminderStatus::Failed),
            3 => Ok(ReminderStatus::Sending),
            other => anyhow::bail!("unknown reminder status {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reminder {
    pub id: i64,
    pub contact_name: String,
    pub contact_email: String,
    pub description: String,
    pub amount_minor: i64,
    pub currency: String,
    /// Raw due date as entered on the dashboard; parsed when classified.
    pub due_date: Option<String>,
    pub remind_at: DateTime<Utc>,
    pub status: ReminderStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Reminder {
    pub fn formatted_amount(&self) -> String {
        let sign = if self.amount_minor < 0 { "-" } else { "" };
        let abs = self.amount_minor.unsigned_abs();
        format!("{} {sign}{}.{:02}", self.currency, abs / 100, abs % 100)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewReminder {
    pub contact_name: String,
    pub contact_email: String,
    pub description: String,
    pub amount_minor: i64,
    /// Empty means the dashboard's configured currency.
    #[serde(default)]
    pub currency: String,
    pub due_date: Option<String>,
    pub remind_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ReminderRow {
    id: i64,
    contact_name: String,
    contact_email: String,
    description: String,
    amount_minor: i64,
    currency: String,
    due_date: Option<String>,
    remind_at: i64,
    status: i64,
    sent_at: Option<i64>,
    last_error: Option<String>,
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).with_context(|| format!("timestamp {millis} out of range"))
}

impl TryFrom<ReminderRow> for Reminder {
    type Error = anyhow::Error;

    fn try_from(row: ReminderRow) -> Result<Self> {
        Ok(Reminder {
            id: row.id,
            contact_name: row.contact_name,
            contact_email: row.contact_email,
            description: row.description,
            amount_minor: row.amount_minor,
            currency: row.currency,
            due_date: row.due_date,
            remind_at: from_millis(row.remind_at)?,
            status: row.status.try_into()?,
            sent_at: row.sent_at.map(from_millis).transpose()?,
            last_error: row.last_error,
        })
    }
}

const SELECT_REMINDER: &str = "SELECT id, contact_name, contact_email, description, amount_minor, currency, due_date, remind_at, status, sent_at, last_error FROM reminder";

#[derive(Clone)]
pub struct Reminders {
    pool: SqlitePool,
    history_days: i64,
}

impl Reminders {
    pub fn new(pool: SqlitePool, history_days: i64) -> Reminders {
        Reminders { pool, history_days }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Deletes old sent reminders every few hours until cancelled.
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancellation_token.cancelled() => { break }
            };
            match self.cleanup(now().with_timezone(&ist())).await {
                Ok(deleted) if deleted > 0 => info!("Cleaned up {deleted} sent reminders"),
                Ok(_) => {}
                Err(err) => error!("Reminder cleanup failed: {err:?}"),
            }
        }

        Ok(())
    }

    pub async fn add_reminder(&self, reminder: &NewReminder) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO reminder (contact_name, contact_email, description, amount_minor, currency, due_date, remind_at, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&reminder.contact_name)
        .bind(&reminder.contact_email)
        .bind(&reminder.description)
        .bind(reminder.amount_minor)
        .bind(&reminder.currency)
        .bind(&reminder.due_date)
        .bind(reminder.remind_at.timestamp_millis())
        .bind(i64::from(ReminderStatus::Pending))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    pub async fn get_reminder(&self, id: i64) -> Result<Option<Reminder>> {
        sqlx::query_as::<_, ReminderRow>(&format!("{SELECT_REMINDER} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Reminder::try_from)
            .transpose()
    }

    pub async fn delete_reminder(&self, id: i64) -> Result<bool> {
        Ok(sqlx::query("DELETE FROM reminder WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0)
    }

    /// Reminders whose `remind_at` lies in the window, bounds included.
    pub async fn get_in_window(&self, window: &DayWindow) -> Result<Vec<Reminder>> {
        self.fetch_window(window, false).await
    }

    pub async fn get_unsent_in_window(&self, window: &DayWindow) -> Result<Vec<Reminder>> {
        self.fetch_window(window, true).await
    }

    async fn fetch_window(&self, window: &DayWindow, unsent_only: bool) -> Result<Vec<Reminder>> {
        let status_filter = if unsent_only { "AND status != ?3" } else { "" };
        let sql = format!(
            "{SELECT_REMINDER} WHERE remind_at BETWEEN ?1 AND ?2 {status_filter} ORDER BY remind_at, id"
        );

        let mut query = sqlx::query_as::<_, ReminderRow>(&sql)
            .bind(window.start.timestamp_millis())
            .bind(window.end.timestamp_millis());
        if unsent_only {
            query = query.bind(i64::from(ReminderStatus::Sent));
        }

        query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Reminder::try_from)
            .collect()
    }

    /// Atomically takes a reminder for sending. Returns `false` when it was
    /// already sent or another pass holds a live claim on it.
    pub async fn claim(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        Ok(sqlx::query(
            "UPDATE reminder SET status = ?1, claimed_at = ?2 WHERE id = ?3 AND (status IN (?4, ?5) OR (status = ?1 AND claimed_at < ?6))",
        )
        .bind(i64::from(ReminderStatus::Sending))
        .bind(now.timestamp_millis())
        .bind(id)
        .bind(i64::from(ReminderStatus::Pending))
        .bind(i64::from(ReminderStatus::Failed))
        .bind((now - TimeDelta::minutes(CLAIM_TIMEOUT_MINUTES)).timestamp_millis())
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1)
    }

    pub async fn mark_sent(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE reminder SET status = ?1, sent_at = ?2, last_error = NULL WHERE id = ?3")
            .bind(i64::from(ReminderStatus::Sent))
            .bind(at.timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query("UPDATE reminder SET status = ?1, last_error = ?2 WHERE id = ?3")
            .bind(i64::from(ReminderStatus::Failed))
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn cleanup(&self, now: DateTime<FixedOffset>) -> Result<u64> {
        let cutoff = now - TimeDelta::days(self.history_days);

        Ok(
            sqlx::query("DELETE FROM reminder WHERE status = ?1 AND remind_at < ?2")
                .bind(i64::from(ReminderStatus::Sent))
                .bind(cutoff.timestamp_millis())
                .execute(&self.pool)
                .await?
                .rows_affected(),
        )
    }
}
