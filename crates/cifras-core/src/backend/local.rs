use super::{BackendError, PersistenceBackend};
use crate::model::{CollectionSnapshot, Item, ItemOrigin, StorageMode, Tab};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const STATE_KEY: &str = "app_state";

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "init",
    up: "CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER DEFAULT (strftime('%s','now'))
        );

        CREATE TABLE IF NOT EXISTS blobs (
            tab_id TEXT NOT NULL,
            key TEXT NOT NULL,
            hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            data BLOB NOT NULL,
            created_at INTEGER DEFAULT (strftime('%s','now')),
            PRIMARY KEY (tab_id, key)
        );",
}];

/// Persisted layout of the local snapshot. Each tab is its ordered list of
/// item keys; `entries` only holds items whose key differs from the display
/// name or that are linked, so the common document keeps the plain layout.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalStateDocument {
    #[serde(default)]
    images: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    entries: BTreeMap<String, BTreeMap<String, LocalEntry>>,
    #[serde(default)]
    selected: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    current_tab: String,
    #[serde(default)]
    user_tabs: Vec<Tab>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalEntry {
    display_name: String,
    #[serde(default)]
    origin: ItemOrigin,
}

impl LocalStateDocument {
    fn from_snapshot(snapshot: &CollectionSnapshot) -> Self {
        let entries = snapshot
            .items_by_tab
            .iter()
            .filter_map(|(tab_id, items)| {
                let special: BTreeMap<String, LocalEntry> = items
                    .iter()
                    .filter(|item| {
                        item.key != item.display_name || item.origin != ItemOrigin::Uploaded
                    })
                    .map(|item| {
                        (
                            item.key.clone(),
                            LocalEntry {
                                display_name: item.display_name.clone(),
                                origin: item.origin,
                            },
                        )
                    })
                    .collect();
                (!special.is_empty()).then(|| (tab_id.clone(), special))
            })
            .collect();
        Self {
            entries,
            images: snapshot
                .items_by_tab
                .iter()
                .map(|(tab_id, items)| {
                    let mut items: Vec<&Item> = items.iter().collect();
                    items.sort_by_key(|item| item.order);
                    let names = items.into_iter().map(|item| item.key.clone()).collect();
                    (tab_id.clone(), names)
                })
                .collect(),
            selected: snapshot
                .selected_by_tab
                .iter()
                .map(|(tab_id, keys)| (tab_id.clone(), keys.iter().cloned().collect()))
                .collect(),
            current_tab: snapshot.active_tab_id.clone(),
            user_tabs: snapshot.user_tabs.clone(),
        }
    }

    fn into_snapshot(mut self) -> CollectionSnapshot {
        CollectionSnapshot {
            items_by_tab: self
                .images
                .into_iter()
                .map(|(tab_id, keys)| {
                    let mut entries = self.entries.remove(&tab_id).unwrap_or_default();
                    let items = keys
                        .into_iter()
                        .enumerate()
                        .map(|(order, key)| {
                            let (display_name, origin) = match entries.remove(&key) {
                                Some(entry) => (entry.display_name, entry.origin),
                                None => (key.clone(), ItemOrigin::Uploaded),
                            };
                            Item {
                                key,
                                tab_id: tab_id.clone(),
                                display_name,
                                order,
                                origin,
                            }
                        })
                        .collect();
                    (tab_id, items)
                })
                .collect(),
            selected_by_tab: self
                .selected
                .into_iter()
                .map(|(tab_id, keys)| (tab_id, keys.into_iter().collect::<BTreeSet<_>>()))
                .collect(),
            active_tab_id: self.current_tab,
            user_tabs: self.user_tabs,
        }
    }
}

/// Embedded object store: one SQLite file per origin, never touches the network.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, BackendError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;",
        )?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Every write is a single statement or a transaction, so poisoning is ignored.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn run_migrations(&self) -> Result<(), BackendError> {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );",
        )?;

        let current_version: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )?;

        for migration in MIGRATIONS {
            if migration.version > current_version {
                let tx = conn.unchecked_transaction()?;
                tx.execute_batch(migration.up)?;
                tx.execute(
                    "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                    params![migration.version, migration.name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    pub fn blob_count(&self) -> Result<usize, BackendError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM blobs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn get_kv(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?)
    }

    fn set_kv(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.conn().execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            updated_at = strftime('%s','now')",
            params![key, value],
        )?;
        Ok(())
    }
}

impl PersistenceBackend for LocalStore {
    fn mode(&self) -> StorageMode {
        StorageMode::Local
    }

    fn load_all(&self) -> Result<Option<CollectionSnapshot>, BackendError> {
        let Some(raw) = self.get_kv(STATE_KEY)? else {
            return Ok(None);
        };
        let document: LocalStateDocument = serde_json::from_str(&raw)?;
        Ok(Some(document.into_snapshot()))
    }

    fn save_all(&self, snapshot: &CollectionSnapshot) -> Result<(), BackendError> {
        let raw = serde_json::to_string(&LocalStateDocument::from_snapshot(snapshot))?;
        self.set_kv(STATE_KEY, &raw)
    }

    fn issue_key(&self, display_name: &str) -> String {
        display_name.to_string()
    }

    fn put_blob(&self, tab_id: &str, key: &str, bytes: &[u8]) -> Result<(), BackendError> {
        let hash = hash_bytes(bytes);
        self.conn().execute(
            "INSERT INTO blobs (tab_id, key, hash, size, data) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(tab_id, key) DO UPDATE SET hash = excluded.hash,
                                                    size = excluded.size,
                                                    data = excluded.data
             WHERE blobs.hash != excluded.hash",
            params![tab_id, key, hash, bytes.len() as i64, bytes],
        )?;
        Ok(())
    }

    fn get_blob(&self, tab_id: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self
            .conn()
            .query_row(
                "SELECT data FROM blobs WHERE tab_id = ?1 AND key = ?2",
                params![tab_id, key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn delete_blob(&self, tab_id: &str, key: &str) -> Result<(), BackendError> {
        self.conn().execute(
            "DELETE FROM blobs WHERE tab_id = ?1 AND key = ?2",
            params![tab_id, key],
        )?;
        Ok(())
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}
