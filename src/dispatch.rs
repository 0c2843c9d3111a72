use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::StreamExt as _;
use log::{debug, error, info, warn};
use serde_derive::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    mailer::{EmailMessage, Mailer, render_reminder_email},
    reminders::Reminders,
    settings::{SettingsStorage, SettingsStore},
    severity::classify_due_str,
    utils::{DayWindow, day_window, now},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub window: DayWindow,
    pub sent: Vec<i64>,
    pub failed: Vec<i64>,
    /// Reminders whose outcome could not be written back to the store.
    pub unrecorded: Vec<i64>,
}

pub struct ReminderDispatcher<M: Mailer, S: SettingsStorage> {
    reminders: Reminders,
    mailer: M,
    settings: Arc<SettingsStore<S>>,
    display_timezone: Tz,
    concurrency: usize,
    interval: Duration,
    pass_lock: Mutex<()>,
}

impl<M: Mailer, S: SettingsStorage> ReminderDispatcher<M, S> {
    pub fn new(
        reminders: Reminders,
        mailer: M,
        settings: Arc<SettingsStore<S>>,
        display_timezone: Tz,
        concurrency: usize,
        interval: Duration,
    ) -> Self {
        ReminderDispatcher {
            reminders,
            mailer,
            settings,
            display_timezone,
            concurrency: concurrency.max(1),
            interval,
            pass_lock: Mutex::new(()),
        }
    }

    /// Sends every unsent reminder scheduled for the IST day containing `now`.
    ///
    /// Passes on one dispatcher never overlap, and each reminder is claimed
    /// in the store before its email goes out so concurrent processes cannot
    /// both send it.
    pub async fn dispatch_at(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let _pass = self.pass_lock.lock().await;

        let window = day_window(now);
        let mut report = DispatchReport {
            window,
            sent: Vec::new(),
            failed: Vec::new(),
            unrecorded: Vec::new(),
        };

        let settings = self.settings.get();
        if !settings.reminders_enabled {
            debug!("Reminders are disabled, skipping {}", window.civil_date_string());
            return Ok(report);
        }

        let due = self.reminders.get_unsent_in_window(&window).await?;
        if due.is_empty() {
            debug!("No reminders due on {}", window.civil_date_string());
            return Ok(report);
        }

        let today = now.with_timezone(&self.display_timezone).date_naive();

        let mut messages: Vec<(i64, EmailMessage)> = Vec::with_capacity(due.len());
        for reminder in &due {
            match self.reminders.claim(reminder.id, now).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Reminder {} is taken by another pass", reminder.id);
                    continue;
                }
                Err(err) => {
                    error!("Claiming reminder {} failed: {err:?}", reminder.id);
                    continue;
                }
            }
            let severity =
                classify_due_str(reminder.due_date.as_deref(), today, self.display_timezone);
            messages.push((
                reminder.id,
                render_reminder_email(reminder, &severity, &settings),
            ));
        }

        let mailer = &self.mailer;
        let outcomes: Vec<(i64, Result<()>)> = futures::stream::iter(messages)
            .map(|(id, message)| async move { (id, mailer.send(&message).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (id, outcome) in outcomes {
            let recorded = match outcome {
                Ok(()) => {
                    report.sent.push(id);
                    self.reminders.mark_sent(id, now).await
                }
                Err(err) => {
                    warn!("Sending reminder {id} failed: {err:?}");
                    report.failed.push(id);
                    self.reminders.mark_failed(id, &format!("{err:#}")).await
                }
            };
            if let Err(err) = recorded {
                error!("Recording the outcome of reminder {id} failed: {err:?}");
                report.unrecorded.push(id);
            }
        }

        report.sent.sort_unstable();
        report.failed.sort_unstable();
        report.unrecorded.sort_unstable();

        info!(
            "Reminders for {}: {} sent, {} failed, {} unrecorded",
            window.civil_date_string(),
            report.sent.len(),
            report.failed.len(),
            report.unrecorded.len()
        );

        Ok(report)
    }

    pub async fn run(self: Arc<Self>, cancellation_token: CancellationToken) -> Result<()> {
        info!("Dispatching reminders every {:?}", self.interval);

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancellation_token.cancelled() => { break }
            };
            if let Err(err) = self.dispatch_at(now()).await {
                error!("Reminder dispatch failed: {err:?}");
            }
        }

        Ok(())
    }
}
