use crate::model::Tab;
use crate::naming::CREATE_TAB_AFFORDANCE;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_FIXED_TABS: &[&str] = &[
    "Domingo Manhã",
    "Domingo Noite",
    "Segunda",
    "Quarta",
    "Culto Jovem",
    "Santa Ceia",
];

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Serde(serde_json::Error),
    ProjectDir,
    Invalid(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot access settings: {err}"),
            Self::Serde(err) => write!(f, "malformed settings file: {err}"),
            Self::ProjectDir => f.write_str("no platform config directory available"),
            Self::Invalid(message) => write!(f, "invalid settings: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 250,
            retry_max_delay_ms: 4_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSettings {
    pub base_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Cloud folder the picker lists candidates from.
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_collection() -> String {
    "cifras".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub fixed_tabs: Vec<String>,
    pub database_path: Option<PathBuf>,
    pub debounce_ms: u64,
    pub remote: Option<RemoteSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fixed_tabs: DEFAULT_FIXED_TABS.iter().map(|name| name.to_string()).collect(),
            database_path: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            remote: None,
        }
    }
}

impl Settings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Builds the fixed tabs, rejecting empty, reserved or colliding names.
    pub fn fixed_tabs(&self) -> Result<Vec<Tab>, ConfigError> {
        if self.fixed_tabs.is_empty() {
            return Err(ConfigError::Invalid("at least one fixed tab is required".into()));
        }
        let mut ids = HashSet::new();
        let mut tabs = Vec::with_capacity(self.fixed_tabs.len());
        for raw in &self.fixed_tabs {
            let name = raw.trim();
            if name.is_empty() || name == CREATE_TAB_AFFORDANCE {
                return Err(ConfigError::Invalid(format!("unusable fixed tab name {raw:?}")));
            }
            let tab = Tab::fixed(name);
            if !ids.insert(tab.id().to_string()) {
                return Err(ConfigError::Invalid(format!(
                    "fixed tab {name:?} collides with another fixed tab"
                )));
            }
            tabs.push(tab);
        }
        Ok(tabs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fixed_tabs()?;
        if let Some(remote) = &self.remote {
            if remote.base_url.trim().is_empty() {
                return Err(ConfigError::Invalid("remote.baseUrl must not be empty".into()));
            }
            if remote.collection.trim().is_empty() {
                return Err(ConfigError::Invalid("remote.collection must not be empty".into()));
            }
        }
        Ok(())
    }

    pub fn resolve_database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        Ok(project_dirs()?.data_dir().join("cifras.db"))
    }
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("app", "cifras", "Cifras").ok_or(ConfigError::ProjectDir)
}

pub struct SettingsStore {
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn default_store() -> Result<Self, ConfigError> {
        Ok(Self::new(project_dirs()?.config_dir().join("settings.json")))
    }

    pub fn load(&self) -> Result<Settings, ConfigError> {
        if !self.config_path.exists() {
            return Ok(Settings::default());
        }
        let raw = fs::read_to_string(&self.config_path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(settings)?;
        fs::write(&self.config_path, data)?;
        Ok(())
    }
}
