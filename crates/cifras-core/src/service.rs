use crate::backend::{BackendError, Backends, PersistenceBackend, RemoteCandidate};
use crate::config::Settings;
use crate::handles::{ResourceHandle, ResourceHandleCache};
use crate::model::{CollectionModel, Item, ItemOrigin, StorageMode, Tab};
use crate::naming::{is_image_mime, CREATE_TAB_AFFORDANCE};
use crate::selection::{SelectionController, SelectionState};
use crate::writer::{SnapshotWriter, WriterStats};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum CollectionError {
    NotFound(String),
    DuplicateName(String),
    NotRemovable(String),
    BackendUnavailable(StorageMode),
    Backend(BackendError),
}

impl From<BackendError> for CollectionError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "no such tab or item: {id}"),
            Self::DuplicateName(name) => write!(f, "tab name {name:?} is taken or reserved"),
            Self::NotRemovable(id) => write!(f, "tab {id} cannot be removed"),
            Self::BackendUnavailable(mode) => write!(f, "{mode:?} storage is not configured"),
            Self::Backend(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CollectionError {}

/// File handed over by the UI for import.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAnImage,
    Duplicate,
}

#[derive(Debug)]
pub struct ItemFailure {
    pub name: String,
    pub error: BackendError,
}

#[derive(Debug, Default)]
pub struct AddOutcome {
    /// Keys of the appended items, in append order.
    pub added: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Default)]
pub struct DeleteOutcome {
    pub removed: usize,
    pub blob_failures: Vec<ItemFailure>,
    /// Keys whose blobs were kept because the index could not be saved.
    pub orphaned_blobs: Vec<String>,
}

#[derive(Debug)]
pub struct TabRemoval {
    pub tab: Tab,
    pub removed_items: usize,
    pub blob_failures: Vec<ItemFailure>,
    pub orphaned_blobs: Vec<String>,
}

#[derive(Debug, Default)]
struct BlobCleanup {
    failures: Vec<ItemFailure>,
    orphaned: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedItem {
    pub key: String,
    pub display_name: String,
    pub handle: ResourceHandle,
}

struct RenderPass {
    tab_id: String,
    items: Vec<RenderedItem>,
}

/// Owns the collection model and is its only writer. Every operation
/// updates the model first and then hands a snapshot to the debounced writer.
pub struct CollectionService {
    fixed_tabs: Vec<Tab>,
    model: CollectionModel,
    selection: SelectionController,
    backends: Backends,
    backend: Arc<dyn PersistenceBackend>,
    writer: SnapshotWriter,
    handles: ResourceHandleCache,
    rendered: Option<RenderPass>,
    debounce: Duration,
    saves_scheduled: u64,
}

impl CollectionService {
    /// Starts in local mode, loading whatever the local store holds.
    pub fn open(backends: Backends, settings: &Settings) -> Result<Self, CollectionError> {
        let fixed_tabs = settings.fixed_tabs().map_err(BackendError::from)?;
        let backend = backends.local.clone();
        let model = load_model(backend.as_ref(), &fixed_tabs)?;
        let debounce = settings.debounce();
        let writer = SnapshotWriter::spawn(backend.clone(), debounce);
        let mut service = Self {
            fixed_tabs,
            model,
            selection: SelectionController::new(),
            backends,
            backend,
            writer,
            handles: ResourceHandleCache::new(),
            rendered: None,
            debounce,
            saves_scheduled: 0,
        };
        service.resync_selection();
        Ok(service)
    }

    pub fn model(&self) -> &CollectionModel {
        &self.model
    }

    pub fn mode(&self) -> StorageMode {
        self.model.mode()
    }

    pub fn active_tab_id(&self) -> &str {
        self.model.active_tab_id()
    }

    pub fn selection_state(&self) -> SelectionState {
        self.selection.state()
    }

    pub fn handles(&self) -> &ResourceHandleCache {
        &self.handles
    }

    pub fn live_handle_count(&self) -> usize {
        self.handles.live_count()
    }

    pub fn rendered(&self) -> &[RenderedItem] {
        self.rendered
            .as_ref()
            .map(|pass| pass.items.as_slice())
            .unwrap_or(&[])
    }

    /// Number of snapshots handed to the writer so far.
    pub fn saves_scheduled(&self) -> u64 {
        self.saves_scheduled
    }

    pub fn writer_stats(&self) -> WriterStats {
        self.writer.stats()
    }

    pub fn items_view(&self, tab_id: &str, filter: Option<&str>) -> Vec<&Item> {
        self.model.items_view(tab_id, filter)
    }

    pub fn switch_tab(&mut self, tab_id: &str) -> Result<(), CollectionError> {
        self.require_tab(tab_id)?;
        if self.model.active_tab_id() == tab_id {
            return Ok(());
        }
        self.leave_active_tab();
        self.model.set_active_tab(tab_id);
        self.schedule_save();
        Ok(())
    }

    pub fn add_tab(&mut self, name: &str) -> Result<Tab, CollectionError> {
        let name = name.trim();
        let taken = self.model.tabs().iter().any(|tab| tab.name() == name);
        if name.is_empty() || name == CREATE_TAB_AFFORDANCE || taken {
            return Err(CollectionError::DuplicateName(name.to_string()));
        }
        let tab = Tab::user(name);
        self.leave_active_tab();
        self.model.push_tab(tab.clone());
        self.model.set_active_tab(tab.id());
        tracing::info!(tab_id = tab.id(), name, "tab added");
        self.schedule_save();
        Ok(tab)
    }

    /// Removes a user tab and, best-effort, the blobs of its uploaded items.
    /// Blobs are deleted only after the index without them is saved.
    pub fn remove_tab(&mut self, tab_id: &str) -> Result<TabRemoval, CollectionError> {
        let tab = self.require_tab(tab_id)?;
        if !tab.removable() {
            return Err(CollectionError::NotRemovable(tab_id.to_string()));
        }
        if self.rendered_tab() == Some(tab_id) {
            self.release_rendered();
        }
        let Some((tab, items)) = self.model.remove_tab(tab_id) else {
            return Err(CollectionError::NotFound(tab_id.to_string()));
        };
        if self.model.active_tab_id() == tab_id {
            if let Some(fallback) = self.model.first_fixed_tab().map(|tab| tab.id().to_string()) {
                self.model.set_active_tab(&fallback);
            }
        }
        self.selection.exit();
        self.resync_selection();
        tracing::info!(tab_id, items = items.len(), "tab removed");
        let removed_items = items.len();
        let cleanup = self.save_then_delete_blobs(tab_id, items);
        Ok(TabRemoval {
            tab,
            removed_items,
            blob_failures: cleanup.failures,
            orphaned_blobs: cleanup.orphaned,
        })
    }

    /// Stores each image file and appends it. A file that fails does not
    /// undo the files before it.
    pub fn add_items(
        &mut self,
        tab_id: &str,
        files: Vec<IncomingFile>,
    ) -> Result<AddOutcome, CollectionError> {
        self.require_tab(tab_id)?;
        let mut outcome = AddOutcome::default();
        for file in files {
            if !is_image_mime(&file.mime_type) {
                outcome.skipped.push((file.name, SkipReason::NotAnImage));
                continue;
            }
            if self.model.contains_name(tab_id, &file.name) {
                outcome.skipped.push((file.name, SkipReason::Duplicate));
                continue;
            }
            let key = self.backend.issue_key(&file.name);
            if let Err(error) = self.backend.put_blob(tab_id, &key, &file.bytes) {
                tracing::warn!(tab_id, name = %file.name, "blob upload failed: {error}");
                outcome.failures.push(ItemFailure {
                    name: file.name,
                    error,
                });
                continue;
            }
            self.model
                .append_item(tab_id, key.clone(), &file.name, ItemOrigin::Uploaded);
            outcome.added.push(key);
        }
        if !outcome.added.is_empty() {
            self.schedule_save();
        }
        Ok(outcome)
    }

    /// Links files that already live in the cloud folder. No bytes move.
    pub fn add_remote_items(
        &mut self,
        tab_id: &str,
        candidates: &[RemoteCandidate],
    ) -> Result<AddOutcome, CollectionError> {
        if self.model.mode() != StorageMode::Remote {
            return Err(CollectionError::BackendUnavailable(StorageMode::Remote));
        }
        self.require_tab(tab_id)?;
        let mut outcome = AddOutcome::default();
        for candidate in candidates {
            if self.model.contains_name(tab_id, &candidate.name)
                || self.model.item(tab_id, &candidate.id).is_some()
            {
                outcome
                    .skipped
                    .push((candidate.name.clone(), SkipReason::Duplicate));
                continue;
            }
            self.model.append_item(
                tab_id,
                candidate.id.clone(),
                &candidate.name,
                ItemOrigin::Linked,
            );
            outcome.added.push(candidate.id.clone());
        }
        if !outcome.added.is_empty() {
            self.schedule_save();
        }
        Ok(outcome)
    }

    /// Removes items, saves the index, then deletes the uploaded blobs.
    pub fn delete_items(
        &mut self,
        tab_id: &str,
        keys: &[String],
    ) -> Result<DeleteOutcome, CollectionError> {
        self.require_tab(tab_id)?;
        let removed = self.model.remove_items(tab_id, keys);
        if removed.is_empty() {
            return Ok(DeleteOutcome::default());
        }
        self.resync_selection();
        self.release_rendered_keys(tab_id, &removed);
        let count = removed.len();
        let cleanup = self.save_then_delete_blobs(tab_id, removed);
        Ok(DeleteOutcome {
            removed: count,
            blob_failures: cleanup.failures,
            orphaned_blobs: cleanup.orphaned,
        })
    }

    /// Returns false, scheduling nothing, when the move is a no-op.
    pub fn reorder_item(
        &mut self,
        tab_id: &str,
        from: usize,
        to: usize,
    ) -> Result<bool, CollectionError> {
        self.require_tab(tab_id)?;
        if !self.model.move_item(tab_id, from, to) {
            return Ok(false);
        }
        self.model.clear_selection(tab_id);
        self.resync_selection();
        self.schedule_save();
        Ok(true)
    }

    /// Flips `key` in the tab's selection. Keys that are not items of the
    /// tab are ignored. Returns whether the key is selected afterwards.
    pub fn toggle_item(&mut self, tab_id: &str, key: &str) -> Result<bool, CollectionError> {
        self.require_tab(tab_id)?;
        if self.model.item(tab_id, key).is_none() {
            tracing::debug!(tab_id, key, "ignoring toggle of unknown item");
            return Ok(false);
        }
        let Some(selected) = self.model.selection_mut(tab_id) else {
            return Err(CollectionError::NotFound(tab_id.to_string()));
        };
        let now_selected = self.selection.toggle(selected, key);
        self.resync_selection();
        self.schedule_save();
        Ok(now_selected)
    }

    pub fn toggle_select_all(&mut self, tab_id: &str) -> Result<(), CollectionError> {
        self.require_tab(tab_id)?;
        let keys: Vec<String> = self
            .model
            .items(tab_id)
            .iter()
            .map(|item| item.key.clone())
            .collect();
        let Some(selected) = self.model.selection_mut(tab_id) else {
            return Err(CollectionError::NotFound(tab_id.to_string()));
        };
        let before = selected.clone();
        self.selection
            .toggle_all(selected, keys.iter().map(String::as_str));
        let changed = *selected != before;
        self.resync_selection();
        if changed {
            self.schedule_save();
        }
        Ok(())
    }

    pub fn clear_selection(&mut self, tab_id: &str) -> Result<(), CollectionError> {
        self.require_tab(tab_id)?;
        let changed = self.model.clear_selection(tab_id);
        self.resync_selection();
        if changed {
            self.schedule_save();
        }
        Ok(())
    }

    /// Hard cut to another backend: pending writes go to the old backend,
    /// then the model is rebuilt from the new one. A failed final save or a
    /// failed load leaves the current mode untouched.
    pub fn switch_mode(&mut self, mode: StorageMode) -> Result<(), CollectionError> {
        if self.model.mode() == mode {
            return Ok(());
        }
        let backend = self
            .backends
            .for_mode(mode)
            .ok_or(CollectionError::BackendUnavailable(mode))?;
        if let Err(err) = self.writer.flush() {
            tracing::warn!(mode = ?self.model.mode(), "mode switch aborted, final save failed: {err}");
            return Err(err.into());
        }
        let model = match load_model(backend.as_ref(), &self.fixed_tabs) {
            Ok(model) => model,
            Err(err) => {
                tracing::warn!(?mode, "mode switch aborted: {err}");
                return Err(err);
            }
        };
        self.release_rendered();
        self.writer = SnapshotWriter::spawn(backend.clone(), self.debounce);
        self.backend = backend;
        self.model = model;
        self.selection.exit();
        self.resync_selection();
        tracing::info!(?mode, "storage mode switched");
        Ok(())
    }

    /// Loads the blobs of the tab's items in view order and acquires one
    /// handle per displayable item, releasing the previous pass first.
    pub fn render_tab(&mut self, tab_id: &str) -> Result<&[RenderedItem], CollectionError> {
        self.require_tab(tab_id)?;
        self.release_rendered();
        let wanted: Vec<(String, String)> = self
            .model
            .items_view(tab_id, None)
            .into_iter()
            .map(|item| (item.key.clone(), item.display_name.clone()))
            .collect();
        let mut items = Vec::with_capacity(wanted.len());
        for (key, display_name) in wanted {
            match self.backend.get_blob(tab_id, &key) {
                Ok(Some(bytes)) => {
                    let handle = self.handles.acquire(bytes);
                    items.push(RenderedItem {
                        key,
                        display_name,
                        handle,
                    });
                }
                Ok(None) => tracing::warn!(tab_id, %key, "blob missing; item not displayed"),
                Err(err) => tracing::warn!(tab_id, %key, "blob load failed: {err}"),
            }
        }
        let pass = self.rendered.insert(RenderPass {
            tab_id: tab_id.to_string(),
            items,
        });
        Ok(pass.items.as_slice())
    }

    pub fn release_rendered(&mut self) {
        if let Some(pass) = self.rendered.take() {
            self.handles
                .release_all(pass.items.iter().map(|item| &item.handle));
        }
    }

    /// Writes the pending snapshot now.
    pub fn flush(&self) -> Result<(), CollectionError> {
        self.writer.flush()?;
        Ok(())
    }

    fn require_tab(&self, tab_id: &str) -> Result<Tab, CollectionError> {
        self.model
            .tab(tab_id)
            .cloned()
            .ok_or_else(|| CollectionError::NotFound(tab_id.to_string()))
    }

    fn rendered_tab(&self) -> Option<&str> {
        self.rendered.as_ref().map(|pass| pass.tab_id.as_str())
    }

    fn leave_active_tab(&mut self) {
        let previous = self.model.active_tab_id().to_string();
        self.model.clear_selection(&previous);
        self.selection.exit();
        self.release_rendered();
    }

    /// The controller mirrors the active tab's selection.
    fn resync_selection(&mut self) {
        match self.model.selected(self.model.active_tab_id()) {
            Some(selected) => self.selection.sync(selected),
            None => self.selection.exit(),
        }
    }

    fn release_rendered_keys(&mut self, tab_id: &str, removed: &[Item]) {
        let Some(pass) = self.rendered.as_mut() else {
            return;
        };
        if pass.tab_id != tab_id {
            return;
        }
        let gone: HashSet<&str> = removed.iter().map(|item| item.key.as_str()).collect();
        let handles = &mut self.handles;
        pass.items.retain(|item| {
            if gone.contains(item.key.as_str()) {
                handles.release(&item.handle);
                false
            } else {
                true
            }
        });
    }

    /// Persists the current model, then deletes the blobs of the removed
    /// uploaded items. If the save fails the blobs stay, so the stored index
    /// never names a missing blob.
    fn save_then_delete_blobs(&mut self, tab_id: &str, removed: Vec<Item>) -> BlobCleanup {
        self.schedule_save();
        let uploaded: Vec<Item> = removed
            .into_iter()
            .filter(|item| item.origin == ItemOrigin::Uploaded)
            .collect();
        let mut cleanup = BlobCleanup::default();
        if uploaded.is_empty() {
            return cleanup;
        }
        if let Err(err) = self.writer.flush() {
            tracing::warn!(tab_id, blobs = uploaded.len(), "index not saved, keeping blobs: {err}");
            cleanup.orphaned = uploaded.into_iter().map(|item| item.key).collect();
            return cleanup;
        }
        for item in uploaded {
            if let Err(error) = self.backend.delete_blob(tab_id, &item.key) {
                tracing::warn!(tab_id, key = %item.key, "blob delete failed: {error}");
                cleanup.failures.push(ItemFailure {
                    name: item.display_name,
                    error,
                });
            }
        }
        cleanup
    }

    fn schedule_save(&mut self) {
        debug_assert_eq!(self.model.verify_invariants(), Ok(()));
        self.saves_scheduled += 1;
        tracing::debug!(mode = ?self.model.mode(), "save scheduled");
        self.writer.schedule(self.model.to_snapshot());
    }
}

fn load_model(
    backend: &dyn PersistenceBackend,
    fixed_tabs: &[Tab],
) -> Result<CollectionModel, CollectionError> {
    let mode = backend.mode();
    let model = match backend.load_all()? {
        Some(snapshot) => CollectionModel::from_snapshot(fixed_tabs, mode, snapshot),
        None => CollectionModel::new(fixed_tabs, mode),
    };
    tracing::debug!(?mode, tabs = model.tabs().len(), "collection loaded");
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalStore;
    use crate::model::CollectionSnapshot;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FlakyState {
        snapshot: Option<CollectionSnapshot>,
        blobs: BTreeMap<String, Vec<u8>>,
        failing_puts: HashSet<Vec<u8>>,
        fail_load: bool,
        fail_save: bool,
        next_key: u32,
    }

    #[derive(Default)]
    struct FlakyBackend {
        state: Mutex<FlakyState>,
    }

    impl FlakyBackend {
        fn state(&self) -> std::sync::MutexGuard<'_, FlakyState> {
            self.state.lock().expect("state lock")
        }
    }

    impl PersistenceBackend for FlakyBackend {
        fn mode(&self) -> StorageMode {
            StorageMode::Remote
        }

        fn load_all(&self) -> Result<Option<CollectionSnapshot>, BackendError> {
            let state = self.state();
            if state.fail_load {
                return Err(BackendError::Http {
                    operation: "load".into(),
                    message: "offline".into(),
                });
            }
            Ok(state.snapshot.clone())
        }

        fn save_all(&self, snapshot: &CollectionSnapshot) -> Result<(), BackendError> {
            let mut state = self.state();
            if state.fail_save {
                return Err(BackendError::Http {
                    operation: "save".into(),
                    message: "offline".into(),
                });
            }
            state.snapshot = Some(snapshot.clone());
            Ok(())
        }

        fn issue_key(&self, _display_name: &str) -> String {
            let mut state = self.state();
            state.next_key += 1;
            format!("id-{}", state.next_key)
        }

        fn put_blob(&self, _tab_id: &str, key: &str, bytes: &[u8]) -> Result<(), BackendError> {
            let mut state = self.state();
            if state.failing_puts.contains(bytes) {
                return Err(BackendError::Http {
                    operation: "upload".into(),
                    message: "503".into(),
                });
            }
            state.blobs.insert(key.to_string(), bytes.to_vec());
            Ok(())
        }

        fn get_blob(&self, _tab_id: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
            Ok(self.state().blobs.get(key).cloned())
        }

        fn delete_blob(&self, _tab_id: &str, key: &str) -> Result<(), BackendError> {
            self.state().blobs.remove(key);
            Ok(())
        }
    }

    fn settings() -> Settings {
        Settings {
            fixed_tabs: vec!["Domingo Manhã".into(), "Quarta".into()],
            debounce_ms: 60_000,
            ..Settings::default()
        }
    }

    fn png(name: &str) -> IncomingFile {
        IncomingFile::new(name, "image/png", name.as_bytes().to_vec())
    }

    fn local_service() -> CollectionService {
        let local = LocalStore::open_in_memory().expect("local store");
        CollectionService::open(Backends::local_only(Arc::new(local)), &settings())
            .expect("open service")
    }

    fn with_remote(remote: Arc<FlakyBackend>) -> CollectionService {
        let local = LocalStore::open_in_memory().expect("local store");
        let backends = Backends {
            local: Arc::new(local),
            remote: Some(remote),
        };
        CollectionService::open(backends, &settings()).expect("open service")
    }

    fn stored_keys(remote: &FlakyBackend, tab: &str) -> Vec<String> {
        remote
            .state()
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.items_by_tab.get(tab))
            .map(|items| items.iter().map(|item| item.key.clone()).collect())
            .unwrap_or_default()
    }

    fn names(service: &CollectionService, tab: &str) -> Vec<String> {
        service
            .items_view(tab, None)
            .iter()
            .map(|item| item.display_name.clone())
            .collect()
    }

    #[test]
    fn duplicate_names_in_one_batch_are_added_once() {
        let mut service = local_service();
        let tab = service.active_tab_id().to_string();
        let outcome = service
            .add_items(
                &tab,
                vec![
                    png("a.png"),
                    png("a.png"),
                    IncomingFile::new("notes.txt", "text/plain", b"x".to_vec()),
                ],
            )
            .expect("add");

        assert_eq!(outcome.added, vec!["a.png".to_string()]);
        assert_eq!(
            outcome.skipped,
            vec![
                ("a.png".to_string(), SkipReason::Duplicate),
                ("notes.txt".to_string(), SkipReason::NotAnImage),
            ]
        );
        assert_eq!(names(&service, &tab), vec!["a.png"]);
    }

    #[test]
    fn failed_upload_is_isolated_from_the_batch() {
        let remote = Arc::new(FlakyBackend::default());
        remote.state().failing_puts.insert(b"b.png".to_vec());
        let mut service = with_remote(remote.clone());
        service.switch_mode(StorageMode::Remote).expect("switch");
        let tab = service.active_tab_id().to_string();

        let outcome = service
            .add_items(&tab, vec![png("a.png"), png("b.png"), png("c.png")])
            .expect("add");

        assert_eq!(outcome.added, vec!["id-1".to_string(), "id-3".to_string()]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].name, "b.png");
        assert_eq!(names(&service, &tab), vec!["a.png", "c.png"]);
        service.model().verify_invariants().expect("invariants");
    }

    #[test]
    fn fixed_tab_removal_fails_without_changes() {
        let mut service = local_service();
        let before = service.model().clone();
        let err = service.remove_tab("quarta").expect_err("fixed tab");
        assert!(matches!(err, CollectionError::NotRemovable(_)));
        assert_eq!(service.model(), &before);
        assert!(matches!(
            service.remove_tab("nope"),
            Err(CollectionError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_tab_names_are_rejected() {
        let mut service = local_service();
        let tab = service.add_tab("Ensaio").expect("first");
        assert_eq!(service.active_tab_id(), tab.id());
        assert!(tab.removable());

        for name in ["Ensaio", "  Ensaio ", "Quarta", "+", "   "] {
            assert!(matches!(
                service.add_tab(name),
                Err(CollectionError::DuplicateName(_))
            ));
        }
        assert_eq!(service.model().user_tabs().count(), 1);
    }

    #[test]
    fn removing_active_user_tab_falls_back_to_first_fixed() {
        let mut service = local_service();
        let tab = service.add_tab("Ensaio").expect("tab");
        service
            .add_items(tab.id(), vec![png("a.png")])
            .expect("add");
        service.toggle_item(tab.id(), "a.png").expect("toggle");
        assert_eq!(service.selection_state(), SelectionState::SelectionMode);

        let removal = service.remove_tab(tab.id()).expect("remove");
        assert_eq!(removal.removed_items, 1);
        assert!(removal.blob_failures.is_empty());
        assert_eq!(service.active_tab_id(), "domingo-manhã");
        assert_eq!(service.selection_state(), SelectionState::Idle);
        assert!(!service.model().has_tab(tab.id()));
    }

    #[test]
    fn switch_tab_clears_previous_selection() {
        let mut service = local_service();
        let tab = service.active_tab_id().to_string();
        service
            .add_items(&tab, vec![png("a.png"), png("b.png")])
            .expect("add");
        service.toggle_item(&tab, "a.png").expect("toggle");

        service.switch_tab("quarta").expect("switch");
        assert_eq!(service.model().selection_len(&tab), 0);
        assert_eq!(service.selection_state(), SelectionState::Idle);
        assert!(matches!(
            service.switch_tab("missing"),
            Err(CollectionError::NotFound(_))
        ));
    }

    #[test]
    fn selection_stays_subset_of_items() {
        let mut service = local_service();
        let tab = service.active_tab_id().to_string();
        service
            .add_items(&tab, vec![png("a.png"), png("b.png"), png("c.png")])
            .expect("add");

        assert!(!service.toggle_item(&tab, "ghost.png").expect("toggle"));
        service.toggle_select_all(&tab).expect("select all");
        assert_eq!(service.model().selection_len(&tab), 3);

        service
            .delete_items(&tab, &["a.png".into(), "b.png".into()])
            .expect("delete");
        assert_eq!(service.model().selection_len(&tab), 1);
        assert_eq!(service.selection_state(), SelectionState::SelectionMode);

        service.delete_items(&tab, &["c.png".into()]).expect("delete");
        assert_eq!(service.selection_state(), SelectionState::Idle);
        service.model().verify_invariants().expect("invariants");
    }

    #[test]
    fn reorder_no_ops_schedule_nothing() {
        let mut service = local_service();
        let tab = service.active_tab_id().to_string();
        service
            .add_items(&tab, vec![png("a"), png("b"), png("c")])
            .expect("add");
        let scheduled = service.saves_scheduled();

        assert!(!service.reorder_item(&tab, 1, 1).expect("same"));
        assert!(!service.reorder_item(&tab, 0, 3).expect("out of range"));
        assert_eq!(service.saves_scheduled(), scheduled);

        service.toggle_item(&tab, "c").expect("toggle");
        assert!(service.reorder_item(&tab, 0, 2).expect("move"));
        assert_eq!(names(&service, &tab), vec!["b", "c", "a"]);
        assert_eq!(service.model().selection_len(&tab), 0);
        assert_eq!(service.selection_state(), SelectionState::Idle);
    }

    #[test]
    fn rerender_keeps_one_handle_per_item() {
        let mut service = local_service();
        let tab = service.active_tab_id().to_string();
        service
            .add_items(&tab, vec![png("a"), png("b"), png("c")])
            .expect("add");

        assert_eq!(service.render_tab(&tab).expect("render").len(), 3);
        service.render_tab(&tab).expect("render again");
        assert_eq!(service.live_handle_count(), 3);

        service.delete_items(&tab, &["b".into()]).expect("delete");
        assert_eq!(service.live_handle_count(), 2);

        service.switch_tab("quarta").expect("switch");
        assert_eq!(service.live_handle_count(), 0);
    }

    #[test]
    fn failed_mode_switch_leaves_model_untouched() {
        let remote = Arc::new(FlakyBackend::default());
        remote.state().fail_load = true;
        let mut service = with_remote(remote);
        let tab = service.active_tab_id().to_string();
        service.add_items(&tab, vec![png("a")]).expect("add");
        let before = service.model().clone();

        assert!(matches!(
            service.switch_mode(StorageMode::Remote),
            Err(CollectionError::Backend(_))
        ));
        assert_eq!(service.model(), &before);
        assert_eq!(service.mode(), StorageMode::Local);
    }

    #[test]
    fn switch_mode_without_remote_is_unavailable() {
        let mut service = local_service();
        assert!(matches!(
            service.switch_mode(StorageMode::Remote),
            Err(CollectionError::BackendUnavailable(StorageMode::Remote))
        ));
    }

    #[test]
    fn linked_items_require_remote_mode_and_keep_blobs() {
        let remote = Arc::new(FlakyBackend::default());
        remote
            .state()
            .blobs
            .insert("drive-1".into(), b"shared".to_vec());
        let mut service = with_remote(remote.clone());
        let tab = service.active_tab_id().to_string();
        let candidate = RemoteCandidate {
            id: "drive-1".into(),
            name: "Oceans.png".into(),
        };
        assert!(matches!(
            service.add_remote_items(&tab, &[candidate.clone()]),
            Err(CollectionError::BackendUnavailable(_))
        ));

        service.switch_mode(StorageMode::Remote).expect("switch");
        let outcome = service
            .add_remote_items(&tab, &[candidate.clone(), candidate])
            .expect("link");
        assert_eq!(outcome.added, vec!["drive-1".to_string()]);
        assert_eq!(outcome.skipped.len(), 1);

        service
            .delete_items(&tab, &["drive-1".into()])
            .expect("delete");
        assert!(remote.state().blobs.contains_key("drive-1"));
    }

    #[test]
    fn mode_switch_flushes_to_old_backend() {
        let remote = Arc::new(FlakyBackend::default());
        let mut service = with_remote(remote.clone());
        service.switch_mode(StorageMode::Remote).expect("switch");
        let tab = service.active_tab_id().to_string();
        service.add_items(&tab, vec![png("a")]).expect("add");

        service.switch_mode(StorageMode::Local).expect("back");
        let saved = remote.state().snapshot.clone().expect("saved on switch");
        assert_eq!(saved.items_by_tab[&tab].len(), 1);
        assert!(service.items_view(&tab, None).is_empty());
    }

    #[test]
    fn delete_saves_index_before_dropping_blobs() {
        let remote = Arc::new(FlakyBackend::default());
        let mut service = with_remote(remote.clone());
        service.switch_mode(StorageMode::Remote).expect("switch");
        let tab = service.active_tab_id().to_string();
        service.add_items(&tab, vec![png("a.png")]).expect("add");
        service.flush().expect("flush");
        assert_eq!(stored_keys(&remote, &tab), vec!["id-1".to_string()]);

        let outcome = service.delete_items(&tab, &["id-1".into()]).expect("delete");
        assert_eq!(outcome.removed, 1);
        assert!(outcome.orphaned_blobs.is_empty());
        assert!(stored_keys(&remote, &tab).is_empty());
        assert!(!remote.state().blobs.contains_key("id-1"));
    }

    #[test]
    fn blobs_survive_when_index_save_fails() {
        let remote = Arc::new(FlakyBackend::default());
        let mut service = with_remote(remote.clone());
        service.switch_mode(StorageMode::Remote).expect("switch");
        let tab = service.active_tab_id().to_string();
        service.add_items(&tab, vec![png("a.png")]).expect("add");
        service.flush().expect("flush");

        remote.state().fail_save = true;
        let outcome = service.delete_items(&tab, &["id-1".into()]).expect("delete");
        assert_eq!(outcome.orphaned_blobs, vec!["id-1".to_string()]);
        assert!(outcome.blob_failures.is_empty());
        assert_eq!(stored_keys(&remote, &tab), vec!["id-1".to_string()]);
        assert!(remote.state().blobs.contains_key("id-1"));
        assert!(service.items_view(&tab, None).is_empty());
    }

    #[test]
    fn removed_tab_blobs_go_after_index_save() {
        let remote = Arc::new(FlakyBackend::default());
        let mut service = with_remote(remote.clone());
        service.switch_mode(StorageMode::Remote).expect("switch");
        let tab = service.add_tab("Ensaio").expect("tab");
        service.add_items(tab.id(), vec![png("a.png")]).expect("add");

        remote.state().fail_save = true;
        let removal = service.remove_tab(tab.id()).expect("remove");
        assert_eq!(removal.orphaned_blobs, vec!["id-1".to_string()]);
        assert!(remote.state().blobs.contains_key("id-1"));

        remote.state().fail_save = false;
        service.flush().expect("pending index saved later");
        let saved = remote.state().snapshot.clone().expect("saved");
        assert!(!saved.items_by_tab.contains_key(tab.id()));
    }

    #[test]
    fn mode_switch_stops_when_final_save_fails() {
        let remote = Arc::new(FlakyBackend::default());
        let mut service = with_remote(remote.clone());
        service.switch_mode(StorageMode::Remote).expect("switch");
        let tab = service.active_tab_id().to_string();
        remote.state().fail_save = true;
        service.add_items(&tab, vec![png("a.png")]).expect("add");

        assert!(matches!(
            service.switch_mode(StorageMode::Local),
            Err(CollectionError::Backend(_))
        ));
        assert_eq!(service.mode(), StorageMode::Remote);
        assert_eq!(names(&service, &tab), vec!["a.png"]);

        remote.state().fail_save = false;
        service.switch_mode(StorageMode::Local).expect("switch after recovery");
        assert_eq!(stored_keys(&remote, &tab), vec!["id-1".to_string()]);
    }
}
