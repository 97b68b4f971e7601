pub mod backend;
pub mod config;
pub mod handles;
pub mod model;
pub mod naming;
pub mod reorder;
pub mod selection;
pub mod service;
pub mod writer;

pub use backend::{BackendError, Backends, LocalStore, PersistenceBackend, RemoteStore};
pub use config::{Settings, SettingsStore};
pub use model::{CollectionModel, CollectionSnapshot, Item, ItemOrigin, StorageMode, Tab};
pub use service::{CollectionError, CollectionService, IncomingFile};
