use std::{collections::HashMap, path::PathBuf, str::FromStr as _, sync::Arc, time::Duration};

use anyhow::Result;
use chrono_tz::Tz;
use itertools::Itertools as _;
use log::info;
use serde_derive::Serialize;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tokio_util::sync::CancellationToken;

use crate::config::DbConfig;
use crate::dispatch::{DispatchReport, ReminderDispatcher};
use crate::mailer::MailerImpl;
use crate::reminders::{NewReminder, Reminder};
use crate::rest_api::RestApi;
use crate::settings::{DashboardSettings, SettingsStore, SqliteSettingsStorage};
use crate::severity::{Severity, SeverityTier, classify_due_str};
use crate::utils::{DayWindow, day_window, now, today_in};
use crate::{Config, Reminders};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledReminder {
    #[serde(flatten)]
    pub reminder: Reminder,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TodayReminders {
    pub window: DayWindow,
    pub counts: HashMap<SeverityTier, usize>,
    pub reminders: Vec<ScheduledReminder>,
}

pub trait Backend: Sized + Send + Sync + 'static {
    fn day_window(&self) -> DayWindow;
    fn severity(&self, due_date: Option<&str>) -> Severity;
    fn reminders_today(&self) -> impl Future<Output = Result<TodayReminders>> + Send;
    fn add_reminder(&self, reminder: NewReminder) -> impl Future<Output = Result<i64>> + Send;
    fn delete_reminder(&self, id: i64) -> impl Future<Output = Result<bool>> + Send;
    fn dispatch_now(&self) -> impl Future<Output = Result<DispatchReport>> + Send;
    fn settings(&self) -> DashboardSettings;
    fn update_settings(
        &self,
        settings: DashboardSettings,
    ) -> impl Future<Output = Result<DashboardSettings>> + Send;
}

pub struct BackendImpl {
    pub pool: SqlitePool,
    pub reminders: Reminders,
    pub settings: Arc<SettingsStore<SqliteSettingsStorage>>,
    pub dispatcher: Arc<ReminderDispatcher<MailerImpl, SqliteSettingsStorage>>,
    pub rest_api: RestApi<Self>,
    display_timezone: Tz,
    cancellation_token: CancellationToken,
}

impl Backend for BackendImpl {
    fn day_window(&self) -> DayWindow {
        day_window(now())
    }

    fn severity(&self, due_date: Option<&str>) -> Severity {
        classify_due_str(
            due_date,
            today_in(self.display_timezone),
            self.display_timezone,
        )
    }

    async fn reminders_today(&self) -> Result<TodayReminders> {
        let window = self.day_window();
        let today = today_in(self.display_timezone);

        let reminders = self
            .reminders
            .get_in_window(&window)
            .await?
            .into_iter()
            .map(|reminder| ScheduledReminder {
                severity: classify_due_str(
                    reminder.due_date.as_deref(),
                    today,
                    self.display_timezone,
                ),
                reminder,
            })
            .collect_vec();

        Ok(TodayReminders {
            window,
            counts: reminders.iter().counts_by(|r| r.severity.tier),
            reminders,
        })
    }

    async fn add_reminder(&self, mut reminder: NewReminder) -> Result<i64> {
        if reminder.currency.is_empty() {
            reminder.currency = self.settings.get().currency;
        }
        self.reminders.add_reminder(&reminder).await
    }

    async fn delete_reminder(&self, id: i64) -> Result<bool> {
        self.reminders.delete_reminder(id).await
    }

    async fn dispatch_now(&self) -> Result<DispatchReport> {
        self.dispatcher.dispatch_at(now()).await
    }

    fn settings(&self) -> DashboardSettings {
        self.settings.get()
    }

    async fn update_settings(&self, settings: DashboardSettings) -> Result<DashboardSettings> {
        self.settings.update(settings).await
    }
}

/// In-memory databases are pinned to one connection that never expires.
pub async fn connect_db(db_config: &DbConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&db_config.sqlite_path)?.create_if_missing(true);

    let pool_options = if db_config.sqlite_path.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new()
    };

    Ok(pool_options.connect_with(options).await?)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

impl BackendImpl {
    pub async fn new(config_files: Vec<PathBuf>) -> Result<Arc<Self>> {
        let config = Config::new("PAYMENT_REMINDERS", config_files)?;

        let pool = connect_db(&config.db).await?;
        migrate(&pool).await?;

        let reminders = Reminders::new(pool.clone(), config.reminders.history_days);
        let settings =
            Arc::new(SettingsStore::load(SqliteSettingsStorage::new(pool.clone())).await?);

        let dispatcher = Arc::new(ReminderDispatcher::new(
            reminders.clone(),
            MailerImpl::new(&config.mailer)?,
            settings.clone(),
            config.reminders.display_timezone,
            config.mailer.concurrency,
            Duration::from_secs(config.reminders.dispatch_interval_secs),
        ));

        let cancellation_token = CancellationToken::new();

        let backend = Arc::new_cyclic(|backend| BackendImpl {
            pool,
            reminders,
            settings,
            dispatcher,
            rest_api: RestApi::new(
                config.rest_api,
                backend.clone(),
                cancellation_token.clone(),
            ),
            display_timezone: config.reminders.display_timezone,
            cancellation_token,
        });

        Ok(backend)
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("Starting payment reminder service");

        let results = tokio::try_join!(
            tokio::spawn(self.reminders.clone().run(self.cancellation_token.clone())),
            tokio::spawn(self.dispatcher.clone().run(self.cancellation_token.clone())),
            tokio::spawn(self.rest_api.clone().run())
        )?;
        results.0?;
        results.1?;
        results.2?;

        Ok(())
    }
}
