use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Result, anyhow};
use log::warn;
use serde_derive::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub business_name: String,
    pub currency: String,
    pub reminders_enabled: bool,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        DashboardSettings {
            business_name: "My Business".to_string(),
            currency: "INR".to_string(),
            reminders_enabled: true,
        }
    }
}

/// Where the settings document lives.
pub trait SettingsStorage: Send + Sync + 'static {
    fn load(&self) -> impl Future<Output = Result<Option<String>>> + Send;
    fn save(&self, document: &str) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Clone)]
pub struct SqliteSettingsStorage {
    pool: SqlitePool,
}

impl SqliteSettingsStorage {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteSettingsStorage { pool }
    }
}

impl SettingsStorage for SqliteSettingsStorage {
    async fn load(&self) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT document FROM settings WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn save(&self, document: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (id, document) VALUES (1, ?1) ON CONFLICT (id) DO UPDATE SET document = excluded.document",
        )
        .bind(document)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemorySettingsStorage {
    document: Arc<Mutex<Option<String>>>,
    fail_writes: bool,
}

impl MemorySettingsStorage {
    pub fn with_document(document: &str) -> Self {
        MemorySettingsStorage {
            document: Arc::new(Mutex::new(Some(document.to_string()))),
            fail_writes: false,
        }
    }

    pub fn failing_writes() -> Self {
        MemorySettingsStorage {
            fail_writes: true,
            ..Default::default()
        }
    }

    pub fn document(&self) -> Option<String> {
        self.document.lock().ok().and_then(|doc| doc.clone())
    }
}

impl SettingsStorage for MemorySettingsStorage {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.document())
    }

    async fn save(&self, document: &str) -> Result<()> {
        if self.fail_writes {
            anyhow::bail!("settings storage is read-only");
        }
        *self
            .document
            .lock()
            .map_err(|_| anyhow!("settings storage lock poisoned"))? = Some(document.to_string());
        Ok(())
    }
}

/// Settings cached in memory, loaded once and written through on change.
pub struct SettingsStore<S: SettingsStorage> {
    storage: S,
    current: RwLock<DashboardSettings>,
}

impl<S: SettingsStorage> SettingsStore<S> {
    pub async fn load(storage: S) -> Result<Self> {
        let current = match storage.load().await? {
            None => DashboardSettings::default(),
            Some(document) => serde_json::from_str(&document).unwrap_or_else(|err| {
                warn!("Stored settings are unreadable, using defaults: {err}");
                DashboardSettings::default()
            }),
        };

        Ok(SettingsStore {
            storage,
            current: RwLock::new(current),
        })
    }

    pub fn get(&self) -> DashboardSettings {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The cached value only changes once the storage accepted the write.
    pub async fn update(&self, settings: DashboardSettings) -> Result<DashboardSettings> {
        self.storage.save(&serde_json::to_string(&settings)?).await?;

        let mut guard = self
            .current
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        *guard = settings.clone();

        Ok(settings)
    }
}
