use std::path::PathBuf;

use chrono_tz::Tz;
use serde::{Deserialize as _, Deserializer};
use serde_derive::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub sqlite_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RestApiConfig {
    pub bind_address: String,
}

impl Default for RestApiConfig {
    fn default() -> Self {
        RestApiConfig {
            bind_address: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MailerConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub dry_run: bool,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for MailerConfig {
    fn default() -> Self {
        MailerConfig {
            api_url: String::new(),
            api_key: String::new(),
            from: String::new(),
            dry_run: false,
            concurrency: 4,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReminderConfig {
    pub dispatch_interval_secs: u64,
    pub history_days: i64,
    /// Zone used for the classifier's "today" and for naive due dates.
    #[serde(deserialize_with = "deserialize_tz")]
    pub display_timezone: Tz,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        ReminderConfig {
            dispatch_interval_secs: 15 * 60,
            history_days: 90,
            display_timezone: chrono_tz::Asia::Kolkata,
        }
    }
}

fn deserialize_tz<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Tz, D::Error> {
    String::deserialize(deserializer)?
        .parse::<Tz>()
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub rest_api: RestApiConfig,
    #[serde(default)]
    pub mailer: MailerConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
}

impl Config {
    /// Files are layered in order, then `{PREFIX}_SECTION__KEY` environment
    /// variables on top.
    pub fn new(env_prefix: &str, config_files: Vec<PathBuf>) -> Result<Self, config::ConfigError> {
        config_files
            .iter()
            .fold(config::Config::builder(), |builder, path| {
                builder.add_source(config::File::with_name(&path.to_string_lossy()).required(false))
            })
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
