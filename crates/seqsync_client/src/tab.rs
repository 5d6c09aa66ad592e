//! Tab identity persistence.

use crate::entropy::RandomSource;
use parking_lot::Mutex;
use seqsync_protocol::TabId;

/// Storage that lives for the browsing session, not the connection.
pub trait TabStore: Send + Sync {
    /// Loads the stored tab id, if any.
    fn load(&self) -> Option<TabId>;

    /// Stores the tab id.
    fn store(&self, id: &TabId);
}

/// In-memory tab store.
#[derive(Debug, Default)]
pub struct MemoryTabStore {
    slot: Mutex<Option<TabId>>,
}

impl MemoryTabStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds an id.
    pub fn with_id(id: TabId) -> Self {
        Self {
            slot: Mutex::new(Some(id)),
        }
    }
}

impl TabStore for MemoryTabStore {
    fn load(&self) -> Option<TabId> {
        self.slot.lock().clone()
    }

    fn store(&self, id: &TabId) {
        *self.slot.lock() = Some(id.clone());
    }
}

/// Returns the stored tab id, creating and persisting one on first use.
pub fn resolve_tab_id(store: &dyn TabStore, random: &dyn RandomSource) -> TabId {
    let id = store
        .load()
        .unwrap_or_else(|| TabId::new(random.uuid().to_string()));
    store.store(&id);
    id
}
