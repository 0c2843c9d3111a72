pub mod backend;
pub mod config;
pub mod dispatch;
pub mod mailer;
pub mod reminders;
pub mod rest_api;
pub mod settings;
pub mod severity;
pub mod utils;

pub use backend::{Backend, BackendImpl};
pub use config::Config;
pub use reminders::{NewReminder, Reminder, ReminderStatus, Reminders};
pub use severity::{Severity, SeverityTier, classify_severity};
pub use utils::{DayWindow, day_window};
