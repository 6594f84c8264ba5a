//! Coarse-grained change notifications.
//!
//! Tasks emit one event per logical change after a non-canceled run. Bulk
//! operations never emit per-entry events; a single [`TreeEvent::BulkModification`]
//! covers the whole batch.

use crate::dn::Dn;
use tokio::sync::broadcast;
use uuid::Uuid;

/// One logical change to the mirrored tree or to a search.
#[derive(Debug, Clone)]
pub enum TreeEvent {
    /// A search produced (new) results.
    SearchPerformed { search_id: Uuid },
    /// The child set of an entry changed.
    ChildrenChanged { parent: Dn },
    /// A single entry was created.
    EntryCreated { dn: Dn },
    /// An entry was renamed.
    EntryRenamed { old_dn: Dn, new_dn: Dn },
    /// A bulk operation (copy/delete batch) modified the subtree under a
    /// connection; observers should refresh rather than track entries.
    BulkModification { connection_id: String },
}

/// Fan-out event channel for external observers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TreeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.sender.subscribe()
    }

    /// Emit an event; silently dropped when nobody listens.
    pub fn emit(&self, event: TreeEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
