#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use payment_reminders::backend::{connect_db, migrate};
use payment_reminders::config::DbConfig;
use payment_reminders::mailer::{EmailMessage, Mailer};
use payment_reminders::{NewReminder, Reminders};
use sqlx::SqlitePool;

pub async fn memory_pool() -> SqlitePool {
    let pool = connect_db(&DbConfig {
        sqlite_path: ":memory:".to_string(),
    })
    .await
    .unwrap();
    migrate(&pool).await.unwrap();
    pool
}

pub async fn make_reminders() -> Reminders {
    Reminders::new(memory_pool().await, 30)
}

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn new_reminder(email: &str, remind_at: &str, due_date: Option<&str>) -> NewReminder {
    NewReminder {
        contact_name: "Asha Rao".to_string(),
        contact_email: email.to_string(),
        description: "Invoice #42".to_string(),
        amount_minor: 1_250_050,
        currency: "INR".to_string(),
        due_date: due_date.map(str::to_string),
        remind_at: at(remind_at),
    }
}

#[derive(Clone, Default)]
pub struct RecordingMailer {
    pub sent: Arc<Mutex<Vec<EmailMessage>>>,
    pub rejected_recipients: Vec<String>,
    pub delay: Duration,
}

impl RecordingMailer {
    pub fn rejecting(recipient: &str) -> Self {
        RecordingMailer {
            rejected_recipients: vec![recipient.to_string()],
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        RecordingMailer {
            delay,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.rejected_recipients.contains(&message.to) {
            anyhow::bail!("mailbox unavailable");
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
