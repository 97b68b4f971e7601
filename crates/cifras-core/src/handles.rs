use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Revocable display reference to a blob, shaped like an object URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    fn mint() -> Self {
        Self(format!("blob:{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
pub struct ResourceHandleCache {
    live: HashMap<ResourceHandle, Arc<[u8]>>,
}

impl ResourceHandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, bytes: impl Into<Arc<[u8]>>) -> ResourceHandle {
        let handle = ResourceHandle::mint();
        self.live.insert(handle.clone(), bytes.into());
        handle
    }

    /// Returns whether the handle was live. Releasing twice is harmless.
    pub fn release(&mut self, handle: &ResourceHandle) -> bool {
        self.live.remove(handle).is_some()
    }

    pub fn release_all<'a>(&mut self, handles: impl IntoIterator<Item = &'a ResourceHandle>) {
        for handle in handles {
            self.release(handle);
        }
    }

    pub fn resolve(&self, handle: &ResourceHandle) -> Option<Arc<[u8]>> {
        self.live.get(handle).cloned()
    }

    pub fn is_live(&self, handle: &ResourceHandle) -> bool {
        self.live.contains_key(handle)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
