//! Settings for talking to the local processing service.
//!
//! Settings are persisted as TOML by a [`SettingsStore`] and read through a
//! [`SettingsCache`] that hands out immutable snapshots. Every write goes
//! through validation first; a rejected write leaves the stored values alone.

use crate::error::ConfigError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8080;
pub const MIN_PORT: u16 = 1000;

/// Connection and behaviour settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub server_host: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    /// Show desktop notifications for results and errors
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,

    /// Follow accepted tasks until they finish
    #[serde(default = "default_true")]
    pub polling_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_host: DEFAULT_HOST.to_string(),
            server_port: DEFAULT_PORT,
            notifications_enabled: true,
            polling_enabled: true,
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Base URL of the local service, e.g. `http://localhost:8080`
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_host(&self.server_host)?;
        if self.server_port < MIN_PORT {
            return Err(ConfigError::InvalidPort(self.server_port.to_string()));
        }
        Ok(())
    }
}

/// Parse a port as typed by the user.
pub fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidPort(raw.to_string()))?;

    if value < MIN_PORT as i64 || value > u16::MAX as i64 {
        return Err(ConfigError::InvalidPort(raw.to_string()));
    }
    Ok(value as u16)
}

fn validate_host(host: &str) -> Result<(), ConfigError> {
    if host.is_empty()
        || host.contains("://")
        || host.contains('/')
        || host.chars().any(char::is_whitespace)
    {
        return Err(ConfigError::InvalidHost(host.to_string()));
    }
    Ok(())
}

/// A partial change to the settings, as entered in a form or on the command line
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub server_host: Option<String>,
    pub server_port: Option<String>,
    pub notifications_enabled: Option<bool>,
    pub polling_enabled: Option<bool>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.server_host.is_none()
            && self.server_port.is_none()
            && self.notifications_enabled.is_none()
            && self.polling_enabled.is_none()
    }

    /// Apply on top of `current`, validating every field that changes
    pub fn apply_to(&self, current: &Settings) -> Result<Settings, ConfigError> {
        let mut next = current.clone();

        if let Some(host) = &self.server_host {
            let host = host.trim();
            next.server_host = if host.is_empty() {
                DEFAULT_HOST.to_string()
            } else {
                host.to_string()
            };
        }
        if let Some(port) = &self.server_port {
            next.server_port = parse_port(port)?;
        }
        if let Some(enabled) = self.notifications_enabled {
            next.notifications_enabled = enabled;
        }
        if let Some(enabled) = self.polling_enabled {
            next.polling_enabled = enabled;
        }

        next.validate()?;
        Ok(next)
    }
}

/// Persistence for settings, with change notifications
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read the stored settings; keys that were never stored come from `defaults`
    async fn get(&self, defaults: &Settings) -> Result<Settings, ConfigError>;

    /// Validate and persist `values`
    async fn set(&self, values: &Settings) -> Result<(), ConfigError>;

    /// Receiver that changes every time stored values change
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// Settings as they appear on disk, every key optional
#[derive(Debug, Default, Deserialize)]
struct StoredSettings {
    server_host: Option<String>,
    server_port: Option<u16>,
    notifications_enabled: Option<bool>,
    polling_enabled: Option<bool>,
}

impl StoredSettings {
    fn merge_onto(self, defaults: &Settings) -> Settings {
        Settings {
            server_host: self
                .server_host
                .unwrap_or_else(|| defaults.server_host.clone()),
            server_port: self.server_port.unwrap_or(defaults.server_port),
            notifications_enabled: self
                .notifications_enabled
                .unwrap_or(defaults.notifications_enabled),
            polling_enabled: self.polling_enabled.unwrap_or(defaults.polling_enabled),
        }
    }
}

/// TOML file backed settings store
pub struct FileSettingsStore {
    path: PathBuf,
    changes: watch::Sender<u64>,
}

impl FileSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        let (changes, _) = watch::channel(0);
        Self { path, changes }
    }

    /// Store at the default location
    pub fn open_default() -> Self {
        Self::new(Self::default_path())
    }

    /// Get the default settings file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("image-relay")
            .join("settings.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get(&self, defaults: &Settings) -> Result<Settings, ConfigError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {:?}, using defaults", self.path);
                return Ok(defaults.clone());
            }
            Err(e) => return Err(e.into()),
        };

        let stored: StoredSettings = toml::from_str(&contents)?;
        let settings = stored.merge_onto(defaults);
        settings.validate()?;
        Ok(settings)
    }

    async fn set(&self, values: &Settings) -> Result<(), ConfigError> {
        values.validate()?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = toml::to_string_pretty(values)?;
        tokio::fs::write(&self.path, contents).await?;

        info!("Saved settings to {:?}", self.path);
        self.changes.send_modify(|generation| *generation += 1);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

/// In-memory settings store
pub struct MemorySettingsStore {
    values: Mutex<Option<Settings>>,
    changes: watch::Sender<u64>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            values: Mutex::new(None),
            changes,
        }
    }

    pub fn with_values(values: Settings) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            values: Mutex::new(Some(values)),
            changes,
        }
    }
}

impl Default for MemorySettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, defaults: &Settings) -> Result<Settings, ConfigError> {
        Ok(self
            .values
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| defaults.clone()))
    }

    async fn set(&self, values: &Settings) -> Result<(), ConfigError> {
        values.validate()?;
        *self.values.lock().await = Some(values.clone());
        self.changes.send_modify(|generation| *generation += 1);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

/// Single-owner cache of the current settings.
///
/// Readers call [`SettingsCache::snapshot`] once per operation so that a
/// concurrent refresh never changes values halfway through.
pub struct SettingsCache {
    current: watch::Sender<Arc<Settings>>,
}

impl SettingsCache {
    pub fn new(initial: Settings) -> Self {
        let (current, _) = watch::channel(Arc::new(initial));
        Self { current }
    }

    /// Build a cache from the store, falling back to defaults
    pub async fn load(store: &dyn SettingsStore) -> Self {
        let cache = Self::new(Settings::default());
        cache.refresh(store).await;
        cache
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        self.current.borrow().clone()
    }

    /// Replace the cached values
    pub fn apply(&self, settings: Settings) {
        debug!("Settings updated: {:?}", settings);
        self.current.send_replace(Arc::new(settings));
    }

    /// Reload from the store; on failure the cached values stay in effect
    pub async fn refresh(&self, store: &dyn SettingsStore) -> bool {
        match store.get(&Settings::default()).await {
            Ok(settings) => {
                info!("Settings loaded: {}", settings.server_url());
                self.apply(settings);
                true
            }
            Err(e) => {
                warn!("Failed to load settings, keeping current values: {}", e);
                false
            }
        }
    }

    /// Refresh whenever the store reports a change
    pub fn spawn_refresh(self: Arc<Self>, store: Arc<dyn SettingsStore>) -> JoinHandle<()> {
        let mut changes = store.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                self.refresh(store.as_ref()).await;
            }
        })
    }
}
