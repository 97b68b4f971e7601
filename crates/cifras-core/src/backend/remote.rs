use super::{BackendError, PersistenceBackend};
use crate::config::{RemoteSettings, RetrySettings};
use crate::model::{CollectionSnapshot, Item, ItemOrigin, StorageMode, Tab};
use crate::naming::{contains_case_insensitive, is_image_mime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

const STATE_DOCUMENT: &str = "state";

/// Picker entry supplied by the cloud folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCandidate {
    pub id: String,
    pub name: String,
}

/// Case-insensitive substring filter used by the picker dialog.
pub fn filter_candidates<'a>(
    candidates: &'a [RemoteCandidate],
    query: &str,
) -> Vec<&'a RemoteCandidate> {
    candidates
        .iter()
        .filter(|candidate| contains_case_insensitive(&candidate.name, query))
        .collect()
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteStateDocument {
    #[serde(default)]
    current_tab: String,
    #[serde(default)]
    user_tabs: Vec<Tab>,
    #[serde(default)]
    selected: BTreeMap<String, Vec<String>>,
    /// Tabs that own a tab document, in snapshot order.
    #[serde(default)]
    tabs: Vec<String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteEntry {
    order: usize,
    display_name: String,
    #[serde(default)]
    origin: ItemOrigin,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct TabDocument {
    #[serde(default)]
    items: BTreeMap<String, RemoteEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderEntry {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderPage {
    #[serde(default)]
    files: Vec<FolderEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

fn split_snapshot(snapshot: &CollectionSnapshot) -> (RemoteStateDocument, Vec<(String, TabDocument)>) {
    let tabs = snapshot
        .items_by_tab
        .iter()
        .map(|(tab_id, items)| {
            let items = items
                .iter()
                .map(|item| {
                    (
                        item.key.clone(),
                        RemoteEntry {
                            order: item.order,
                            display_name: item.display_name.clone(),
                            origin: item.origin,
                        },
                    )
                })
                .collect();
            (tab_id.clone(), TabDocument { items })
        })
        .collect::<Vec<_>>();

    let state = RemoteStateDocument {
        current_tab: snapshot.active_tab_id.clone(),
        user_tabs: snapshot.user_tabs.clone(),
        selected: snapshot
            .selected_by_tab
            .iter()
            .map(|(tab_id, keys)| (tab_id.clone(), keys.iter().cloned().collect()))
            .collect(),
        tabs: tabs.iter().map(|(tab_id, _)| tab_id.clone()).collect(),
    };
    (state, tabs)
}

fn join_snapshot(
    state: RemoteStateDocument,
    tabs: Vec<(String, TabDocument)>,
) -> CollectionSnapshot {
    let items_by_tab = tabs
        .into_iter()
        .map(|(tab_id, document)| {
            let mut items: Vec<Item> = document
                .items
                .into_iter()
                .map(|(key, entry)| Item {
                    key,
                    tab_id: tab_id.clone(),
                    display_name: entry.display_name,
                    order: entry.order,
                    origin: entry.origin,
                })
                .collect();
            items.sort_by_key(|item| item.order);
            (tab_id, items)
        })
        .collect();

    CollectionSnapshot {
        items_by_tab,
        selected_by_tab: state
            .selected
            .into_iter()
            .map(|(tab_id, keys)| (tab_id, keys.into_iter().collect::<BTreeSet<_>>()))
            .collect(),
        active_tab_id: state.current_tab,
        user_tabs: state.user_tabs,
    }
}

/// Cloud document + blob store reached over HTTP.
///
/// Layout under the base URL:
/// - `{collection}/state`: active tab, user tabs, selections, tab list
/// - `{collection}/tabs/{tab_id}`: item key → `{order, displayName, origin}`
/// - `blobs/{key}`: image bytes, addressed by the issued key
/// - `folders/{folder_id}`: paginated picker listing
pub struct RemoteStore {
    base_url: String,
    collection: String,
    agent: ureq::Agent,
    token: Option<String>,
    retry: RetrySettings,
    save_lock: Mutex<()>,
}

impl RemoteStore {
    pub fn new(
        base_url: &str,
        collection: &str,
        token: Option<&str>,
        retry: RetrySettings,
    ) -> Result<Self, BackendError> {
        let base = base_url.trim().trim_end_matches('/').to_string();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(BackendError::Config(format!(
                "remote base URL must be http(s): {base_url:?}"
            )));
        }
        let collection = collection.trim().trim_matches('/').to_string();
        if collection.is_empty() {
            return Err(BackendError::Config("remote collection is empty".into()));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(120))
            .timeout_write(Duration::from_secs(120))
            .build();

        Ok(Self {
            base_url: base,
            collection,
            agent,
            token: token.map(|t| t.to_string()),
            retry,
            save_lock: Mutex::new(()),
        })
    }

    pub fn from_settings(settings: &RemoteSettings) -> Result<Self, BackendError> {
        Self::new(
            &settings.base_url,
            &settings.collection,
            settings.token.as_deref(),
            settings.retry.clone(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn document_path(&self, name: &str) -> String {
        format!("{}/{}", self.collection, name)
    }

    fn tab_document_path(&self, tab_id: &str) -> String {
        format!("{}/tabs/{}", self.collection, tab_id)
    }

    fn apply_auth(&self, req: ureq::Request) -> ureq::Request {
        if let Some(ref token) = self.token {
            req.set("Authorization", &format!("Bearer {token}"))
        } else {
            req
        }
    }

    /// Retries transient failures with exponential backoff.
    #[allow(clippy::result_large_err)]
    fn retry_call<T>(
        &self,
        op_name: &str,
        f: impl Fn() -> Result<T, ureq::Error>,
    ) -> Result<T, ureq::Error> {
        let mut delay_ms = self.retry.retry_delay_ms;
        let mut attempt = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if Self::is_retryable(&err) && attempt < self.retry.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "remote {op_name}: transient error (attempt {attempt}/{}), retrying: {err}",
                        self.retry.max_retries,
                    );
                    std::thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms = (delay_ms.max(1) * 2).min(self.retry.retry_max_delay_ms);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn is_retryable(err: &ureq::Error) -> bool {
        match err {
            ureq::Error::Transport(_) => true,
            ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
        }
    }

    fn http_error(operation: &str, err: ureq::Error) -> BackendError {
        BackendError::Http {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, BackendError> {
        let url = self.url(path);
        let operation = format!("GET {path}");
        match self.retry_call(&operation, || self.apply_auth(self.agent.get(&url)).call()) {
            Ok(resp) => {
                let body = resp.into_string()?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(err) => Err(Self::http_error(&operation, err)),
        }
    }

    fn put_json<T: Serialize>(&self, path: &str, value: &T) -> Result<(), BackendError> {
        let body = serde_json::to_vec(value)?;
        self.put_bytes(path, "application/json", &body)
    }

    fn put_bytes(&self, path: &str, content_type: &str, data: &[u8]) -> Result<(), BackendError> {
        let url = self.url(path);
        let operation = format!("PUT {path}");
        self.retry_call(&operation, || {
            self.apply_auth(self.agent.put(&url))
                .set("Content-Type", content_type)
                .send_bytes(data)
        })
        .map_err(|err| Self::http_error(&operation, err))?;
        Ok(())
    }

    /// Lists image files of a cloud folder, following page tokens.
    pub fn list_folder(&self, folder_id: &str) -> Result<Vec<RemoteCandidate>, BackendError> {
        let path = format!("folders/{folder_id}");
        let url = self.url(&path);
        let mut candidates = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let operation = format!("LIST {path}");
            let resp = self
                .retry_call(&operation, || {
                    let mut req = self.apply_auth(self.agent.get(&url)).query("pageSize", "1000");
                    if let Some(token) = page_token.as_deref() {
                        req = req.query("pageToken", token);
                    }
                    req.call()
                })
                .map_err(|err| Self::http_error(&operation, err))?;
            let page: FolderPage = serde_json::from_str(&resp.into_string()?)?;
            candidates.extend(
                page.files
                    .into_iter()
                    .filter(|file| is_image_mime(&file.mime_type))
                    .map(|file| RemoteCandidate {
                        id: file.id,
                        name: file.name,
                    }),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        tracing::debug!(folder_id, count = candidates.len(), "listed remote folder");
        Ok(candidates)
    }
}

impl PersistenceBackend for RemoteStore {
    fn mode(&self) -> StorageMode {
        StorageMode::Remote
    }

    fn load_all(&self) -> Result<Option<CollectionSnapshot>, BackendError> {
        let Some(state) = self.get_json::<RemoteStateDocument>(&self.document_path(STATE_DOCUMENT))?
        else {
            return Ok(None);
        };
        let mut tabs = Vec::with_capacity(state.tabs.len());
        for tab_id in &state.tabs {
            let document = self
                .get_json::<TabDocument>(&self.tab_document_path(tab_id))?
                .unwrap_or_default();
            tabs.push((tab_id.clone(), document));
        }
        Ok(Some(join_snapshot(state, tabs)))
    }

    fn save_all(&self, snapshot: &CollectionSnapshot) -> Result<(), BackendError> {
        let _guard = self
            .save_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (state, tabs) = split_snapshot(snapshot);
        // Tab documents go first so the state document only names written tabs.
        for (tab_id, document) in &tabs {
            self.put_json(&self.tab_document_path(tab_id), document)?;
        }
        self.put_json(&self.document_path(STATE_DOCUMENT), &state)
    }

    fn issue_key(&self, _display_name: &str) -> String {
        Uuid::new_v4().to_string()
    }

    fn put_blob(&self, _tab_id: &str, key: &str, bytes: &[u8]) -> Result<(), BackendError> {
        self.put_bytes(&format!("blobs/{key}"), "application/octet-stream", bytes)
    }

    fn get_blob(&self, _tab_id: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let path = format!("blobs/{key}");
        let url = self.url(&path);
        let operation = format!("GET {path}");
        match self.retry_call(&operation, || self.apply_auth(self.agent.get(&url)).call()) {
            Ok(resp) => {
                let mut buf = Vec::new();
                resp.into_reader().read_to_end(&mut buf)?;
                Ok(Some(buf))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(err) => Err(Self::http_error(&operation, err)),
        }
    }

    fn delete_blob(&self, _tab_id: &str, key: &str) -> Result<(), BackendError> {
        let path = format!("blobs/{key}");
        let url = self.url(&path);
        let operation = format!("DELETE {path}");
        match self.retry_call(&operation, || self.apply_auth(self.agent.delete(&url)).call()) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(404, _)) => Ok(()),
            Err(err) => Err(Self::http_error(&operation, err)),
        }
    }
}
