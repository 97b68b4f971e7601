use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionState {
    #[default]
    Idle,
    SelectionMode,
}

/// Multi-select mode. Operates on a tab's selection set lent by the service,
/// so the model stays owned by the service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionController {
    state: SelectionState,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SelectionState::SelectionMode
    }

    /// Flips `key` in `selected`. Returns whether it is selected afterwards.
    pub fn toggle(&mut self, selected: &mut BTreeSet<String>, key: &str) -> bool {
        let now_selected = if selected.remove(key) {
            false
        } else {
            selected.insert(key.to_string());
            true
        };
        self.sync(selected);
        now_selected
    }

    /// Clears when everything is selected, otherwise selects exactly `keys`.
    pub fn toggle_all<'a>(
        &mut self,
        selected: &mut BTreeSet<String>,
        keys: impl IntoIterator<Item = &'a str>,
    ) {
        let keys: BTreeSet<String> = keys.into_iter().map(str::to_string).collect();
        if !keys.is_empty() && selected.len() == keys.len() && selected.is_subset(&keys) {
            selected.clear();
        } else {
            *selected = keys;
        }
        self.sync(selected);
    }

    pub fn clear(&mut self, selected: &mut BTreeSet<String>) {
        selected.clear();
        self.state = SelectionState::Idle;
    }

    /// Forced exit on tab switch, mode switch or tab removal.
    pub fn exit(&mut self) {
        self.state = SelectionState::Idle;
    }

    /// Re-derives the state after the service shrank a selection (deletes,
    /// reorders).
    pub fn sync(&mut self, selected: &BTreeSet<String>) {
        self.state = if selected.is_empty() {
            SelectionState::Idle
        } else {
            SelectionState::SelectionMode
        };
    }
}
