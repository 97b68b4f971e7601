/// Vertical extent of a rendered sibling, in any consistent unit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ItemBounds {
    pub top: f32,
    pub height: f32,
}

impl ItemBounds {
    pub fn new(top: f32, height: f32) -> Self {
        Self { top, height }
    }

    fn midpoint(&self) -> f32 {
        self.top + self.height / 2.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropTarget {
    /// Insert before the sibling at this index of the undisturbed list.
    Before(usize),
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReorderRequest {
    pub from: usize,
    pub to: usize,
}

#[derive(Clone, Debug, PartialEq)]
struct DragState {
    from: usize,
    key: String,
    len: usize,
    target: DropTarget,
}

/// Drag-to-reorder gesture, independent of the input device.
///
/// The dragged item is only a transient highlight: starting a drag never
/// touches the selection, and the highlight is gone once the gesture ends.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReorderController {
    drag: Option<DragState>,
}

impl ReorderController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn dragged_key(&self) -> Option<&str> {
        self.drag.as_ref().map(|drag| drag.key.as_str())
    }

    pub fn target(&self) -> Option<DropTarget> {
        self.drag.as_ref().map(|drag| drag.target)
    }

    /// Starts dragging the item at `index` of a list holding `len` items.
    /// Returns false for an index outside the list.
    pub fn start_drag(&mut self, index: usize, key: &str, len: usize) -> bool {
        if index >= len {
            self.drag = None;
            return false;
        }
        self.drag = Some(DragState {
            from: index,
            key: key.to_string(),
            len,
            target: DropTarget::Before(index),
        });
        true
    }

    /// Resolves the drop position for pointer `y`: the nearest sibling whose
    /// vertical midpoint lies below the pointer anchors the insertion; if none
    /// does, the item goes to the end. `siblings[i]` are the bounds of item `i`.
    pub fn update_pointer(&mut self, y: f32, siblings: &[ItemBounds]) -> Option<DropTarget> {
        let drag = self.drag.as_mut()?;
        let from = drag.from;
        let anchor = siblings
            .iter()
            .enumerate()
            .filter(|(ix, _)| *ix != from)
            .filter(|(_, bounds)| bounds.midpoint() > y)
            .min_by(|(_, a), (_, b)| {
                (a.midpoint() - y)
                    .partial_cmp(&(b.midpoint() - y))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(ix, _)| ix);
        drag.target = match anchor {
            Some(ix) => DropTarget::Before(ix),
            None => DropTarget::End,
        };
        Some(drag.target)
    }

    /// Ends the gesture. `None` when nothing was dragged or the item would
    /// land where it started.
    pub fn drop_item(&mut self) -> Option<ReorderRequest> {
        let drag = self.drag.take()?;
        let to = match drag.target {
            DropTarget::End => drag.len - 1,
            DropTarget::Before(anchor) if anchor > drag.from => anchor - 1,
            DropTarget::Before(anchor) => anchor,
        };
        let to = to.min(drag.len - 1);
        (to != drag.from).then_some(ReorderRequest {
            from: drag.from,
            to,
        })
    }

    pub fn cancel(&mut self) {
        self.drag = None;
    }
}
