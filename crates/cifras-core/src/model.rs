use crate::naming::{
    contains_case_insensitive, sanitize_kebab, strip_extension, CREATE_TAB_AFFORDANCE,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    #[default]
    Local,
    Remote,
}

/// A category partitioning items. `removable` is fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    id: String,
    name: String,
    removable: bool,
}

impl Tab {
    pub fn fixed(name: &str) -> Self {
        Self {
            id: sanitize_kebab(name),
            name: name.to_string(),
            removable: false,
        }
    }

    pub fn user(name: &str) -> Self {
        Self {
            id: format!("tab-{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            removable: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn removable(&self) -> bool {
        self.removable
    }

    fn into_user(self) -> Self {
        Self {
            removable: true,
            ..self
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrigin {
    /// Bytes were stored by this engine; deleting the item deletes the blob.
    #[default]
    Uploaded,
    /// References a blob that already lives in the cloud folder.
    Linked,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub key: String,
    pub tab_id: String,
    pub display_name: String,
    pub order: usize,
    pub origin: ItemOrigin,
}

impl Item {
    pub fn label(&self) -> &str {
        strip_extension(&self.display_name)
    }
}

/// Backend-neutral persisted state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectionSnapshot {
    pub items_by_tab: BTreeMap<String, Vec<Item>>,
    pub selected_by_tab: BTreeMap<String, BTreeSet<String>>,
    pub active_tab_id: String,
    pub user_tabs: Vec<Tab>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionModel {
    tabs: Vec<Tab>,
    items_by_tab: BTreeMap<String, Vec<Item>>,
    selected_by_tab: BTreeMap<String, BTreeSet<String>>,
    active_tab_id: String,
    mode: StorageMode,
}

impl CollectionModel {
    /// Empty model holding only the fixed tabs. `fixed_tabs` must not be empty.
    pub(crate) fn new(fixed_tabs: &[Tab], mode: StorageMode) -> Self {
        let mut model = Self {
            tabs: Vec::with_capacity(fixed_tabs.len()),
            items_by_tab: BTreeMap::new(),
            selected_by_tab: BTreeMap::new(),
            active_tab_id: fixed_tabs
                .first()
                .map(|tab| tab.id.clone())
                .unwrap_or_default(),
            mode,
        };
        for tab in fixed_tabs {
            model.push_tab(tab.clone());
        }
        model
    }

    pub(crate) fn from_snapshot(
        fixed_tabs: &[Tab],
        mode: StorageMode,
        snapshot: CollectionSnapshot,
    ) -> Self {
        let mut model = Self::new(fixed_tabs, mode);
        let CollectionSnapshot {
            mut items_by_tab,
            mut selected_by_tab,
            active_tab_id,
            user_tabs,
        } = snapshot;

        for mut tab in user_tabs {
            if model.has_tab(&tab.id) {
                tracing::warn!(tab_id = %tab.id, "dropping stored tab with a colliding id");
                continue;
            }
            let name = model.unique_tab_name(&tab.name);
            if name != tab.name {
                tracing::warn!(tab_id = %tab.id, stored = %tab.name, %name, "renaming stored tab");
                tab.name = name;
            }
            model.push_tab(tab.into_user());
        }

        for tab in &model.tabs {
            let mut items = items_by_tab.remove(&tab.id).unwrap_or_default();
            items.sort_by_key(|item| item.order);
            let mut seen = HashSet::new();
            items.retain(|item| seen.insert(item.key.clone()));
            for item in &mut items {
                item.tab_id = tab.id.clone();
            }
            reindex(&mut items);

            let keys: HashSet<&str> = items.iter().map(|item| item.key.as_str()).collect();
            let selected = selected_by_tab
                .remove(&tab.id)
                .unwrap_or_default()
                .into_iter()
                .filter(|key| keys.contains(key.as_str()))
                .collect();

            model.items_by_tab.insert(tab.id.clone(), items);
            model.selected_by_tab.insert(tab.id.clone(), selected);
        }

        for orphan in items_by_tab.keys() {
            tracing::warn!(tab_id = %orphan, "ignoring stored items for an unknown tab");
        }

        if model.has_tab(&active_tab_id) {
            model.active_tab_id = active_tab_id;
        }
        model
    }

    pub fn to_snapshot(&self) -> CollectionSnapshot {
        CollectionSnapshot {
            items_by_tab: self.items_by_tab.clone(),
            selected_by_tab: self.selected_by_tab.clone(),
            active_tab_id: self.active_tab_id.clone(),
            user_tabs: self.user_tabs().cloned().collect(),
        }
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn tab(&self, tab_id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.id == tab_id)
    }

    pub fn has_tab(&self, tab_id: &str) -> bool {
        self.tab(tab_id).is_some()
    }

    fn has_tab_named(&self, name: &str) -> bool {
        self.tabs.iter().any(|tab| tab.name == name)
    }

    /// `name` trimmed, with blank or reserved names read as "Aba". A name
    /// another tab already uses gets the first free " (2)", " (3)" suffix.
    fn unique_tab_name(&self, name: &str) -> String {
        let base = match name.trim() {
            "" | CREATE_TAB_AFFORDANCE => "Aba",
            trimmed => trimmed,
        };
        if !self.has_tab_named(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base} ({n})"))
            .find(|candidate| !self.has_tab_named(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn first_fixed_tab(&self) -> Option<&Tab> {
        self.tabs.iter().find(|tab| !tab.removable)
    }

    pub fn user_tabs(&self) -> impl Iterator<Item = &Tab> {
        self.tabs.iter().filter(|tab| tab.removable)
    }

    pub fn active_tab_id(&self) -> &str {
        &self.active_tab_id
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    pub fn items(&self, tab_id: &str) -> &[Item] {
        self.items_by_tab
            .get(tab_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn item(&self, tab_id: &str, key: &str) -> Option<&Item> {
        self.items(tab_id).iter().find(|item| item.key == key)
    }

    pub fn contains_name(&self, tab_id: &str, display_name: &str) -> bool {
        self.items(tab_id)
            .iter()
            .any(|item| item.display_name == display_name)
    }

    /// Items in ascending order, optionally narrowed by a case-insensitive
    /// substring match on the display name.
    pub fn items_view(&self, tab_id: &str, filter: Option<&str>) -> Vec<&Item> {
        let mut view: Vec<&Item> = self
            .items(tab_id)
            .iter()
            .filter(|item| {
                filter.map_or(true, |query| contains_case_insensitive(&item.display_name, query))
            })
            .collect();
        view.sort_by_key(|item| item.order);
        view
    }

    pub fn selected(&self, tab_id: &str) -> Option<&BTreeSet<String>> {
        self.selected_by_tab.get(tab_id)
    }

    pub fn selection_len(&self, tab_id: &str) -> usize {
        self.selected(tab_id).map_or(0, BTreeSet::len)
    }

    pub fn is_selected(&self, tab_id: &str, key: &str) -> bool {
        self.selected(tab_id).is_some_and(|set| set.contains(key))
    }

    /// Dense orders and selection ⊆ items, for every tab.
    pub fn verify_invariants(&self) -> Result<(), String> {
        let mut ids = HashSet::new();
        for tab in &self.tabs {
            if !ids.insert(tab.id.as_str()) {
                return Err(format!("duplicate tab id {}", tab.id));
            }
            let items = self.items(&tab.id);
            let mut orders: Vec<usize> = items.iter().map(|item| item.order).collect();
            orders.sort_unstable();
            if orders.iter().enumerate().any(|(ix, order)| ix != *order) {
                return Err(format!("orders of {} are not dense: {orders:?}", tab.id));
            }
            if let Some(selected) = self.selected(&tab.id) {
                if let Some(stray) = selected
                    .iter()
                    .find(|key| !items.iter().any(|item| &item.key == *key))
                {
                    return Err(format!("{} selects missing key {stray}", tab.id));
                }
            }
        }
        if !self.has_tab(&self.active_tab_id) {
            return Err(format!("active tab {} does not exist", self.active_tab_id));
        }
        Ok(())
    }

    pub(crate) fn set_active_tab(&mut self, tab_id: &str) {
        self.active_tab_id = tab_id.to_string();
    }

    pub(crate) fn push_tab(&mut self, tab: Tab) {
        self.items_by_tab.entry(tab.id.clone()).or_default();
        self.selected_by_tab.entry(tab.id.clone()).or_default();
        self.tabs.push(tab);
    }

    pub(crate) fn remove_tab(&mut self, tab_id: &str) -> Option<(Tab, Vec<Item>)> {
        let ix = self.tabs.iter().position(|tab| tab.id == tab_id)?;
        let tab = self.tabs.remove(ix);
        self.selected_by_tab.remove(tab_id);
        let items = self.items_by_tab.remove(tab_id).unwrap_or_default();
        Some((tab, items))
    }

    pub(crate) fn append_item(
        &mut self,
        tab_id: &str,
        key: String,
        display_name: &str,
        origin: ItemOrigin,
    ) -> Option<&Item> {
        if !self.has_tab(tab_id) {
            return None;
        }
        let items = self.items_by_tab.entry(tab_id.to_string()).or_default();
        let order = items.len();
        items.push(Item {
            key,
            tab_id: tab_id.to_string(),
            display_name: display_name.to_string(),
            order,
            origin,
        });
        items.last()
    }

    /// Removes the given keys from the tab's list and selection in one step.
    pub(crate) fn remove_items(&mut self, tab_id: &str, keys: &[String]) -> Vec<Item> {
        let Some(items) = self.items_by_tab.get_mut(tab_id) else {
            return Vec::new();
        };
        let doomed: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let (removed, kept): (Vec<Item>, Vec<Item>) = items
            .drain(..)
            .partition(|item| doomed.contains(item.key.as_str()));
        *items = kept;
        reindex(items);
        if let Some(selected) = self.selected_by_tab.get_mut(tab_id) {
            for item in &removed {
                selected.remove(&item.key);
            }
        }
        removed
    }

    pub(crate) fn move_item(&mut self, tab_id: &str, from: usize, to: usize) -> bool {
        let Some(items) = self.items_by_tab.get_mut(tab_id) else {
            return false;
        };
        if from == to || from >= items.len() || to >= items.len() {
            return false;
        }
        let item = items.remove(from);
        items.insert(to, item);
        reindex(items);
        true
    }

    pub(crate) fn selection_mut(&mut self, tab_id: &str) -> Option<&mut BTreeSet<String>> {
        if !self.items_by_tab.contains_key(tab_id) {
            return None;
        }
        Some(self.selected_by_tab.entry(tab_id.to_string()).or_default())
    }

    pub(crate) fn clear_selection(&mut self, tab_id: &str) -> bool {
        self.selected_by_tab
            .get_mut(tab_id)
            .map(|set| {
                let had_any = !set.is_empty();
                set.clear();
                had_any
            })
            .unwrap_or(false)
    }
}

fn reindex(items: &mut [Item]) {
    for (order, item) in items.iter_mut().enumerate() {
        item.order = order;
    }
}
