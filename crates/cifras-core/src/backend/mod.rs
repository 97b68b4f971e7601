pub mod local;
pub mod remote;

use crate::config::{ConfigError, Settings};
use crate::model::{CollectionSnapshot, StorageMode};
use std::fmt;
use std::sync::Arc;

pub use local::LocalStore;
pub use remote::{RemoteCandidate, RemoteStore};

#[derive(Debug)]
pub enum BackendError {
    Io(std::io::Error),
    Db(rusqlite::Error),
    Serde(serde_json::Error),
    Http { operation: String, message: String },
    Config(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(err)
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err)
    }
}

impl From<ConfigError> for BackendError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "storage I/O failed: {err}"),
            Self::Db(err) => write!(f, "local database error: {err}"),
            Self::Serde(err) => write!(f, "malformed stored document: {err}"),
            Self::Http { operation, message } => write!(f, "remote {operation} failed: {message}"),
            Self::Config(message) => write!(f, "invalid backend configuration: {message}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Persistence strategy. Both implementations honor the same semantics so the
/// service never branches on the active mode.
pub trait PersistenceBackend: Send + Sync {
    fn mode(&self) -> StorageMode;

    /// `Ok(None)` when nothing was ever saved.
    fn load_all(&self) -> Result<Option<CollectionSnapshot>, BackendError>;

    /// Persists the whole snapshot; concurrent calls serialize, last one wins.
    fn save_all(&self, snapshot: &CollectionSnapshot) -> Result<(), BackendError>;

    /// Key for a new item named `display_name`.
    fn issue_key(&self, display_name: &str) -> String;

    fn put_blob(&self, tab_id: &str, key: &str, bytes: &[u8]) -> Result<(), BackendError>;

    fn get_blob(&self, tab_id: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Deleting an absent blob succeeds.
    fn delete_blob(&self, tab_id: &str, key: &str) -> Result<(), BackendError>;
}

#[derive(Clone)]
pub struct Backends {
    pub local: Arc<dyn PersistenceBackend>,
    pub remote: Option<Arc<dyn PersistenceBackend>>,
}

impl Backends {
    pub fn local_only(local: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, BackendError> {
        let local = LocalStore::open(settings.resolve_database_path()?)?;
        let remote = settings
            .remote
            .as_ref()
            .map(RemoteStore::from_settings)
            .transpose()?;
        Ok(Self {
            local: Arc::new(local),
            remote: remote.map(|store| Arc::new(store) as Arc<dyn PersistenceBackend>),
        })
    }

    pub fn for_mode(&self, mode: StorageMode) -> Option<Arc<dyn PersistenceBackend>> {
        match mode {
            StorageMode::Local => Some(self.local.clone()),
            StorageMode::Remote => self.remote.clone(),
        }
    }
}
