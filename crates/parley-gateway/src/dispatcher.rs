use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use parley_types::events::{EventKind, PushEvent};

pub type Handler = Arc<dyn Fn(&PushEvent) + Send + Sync>;

struct Registration {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

/// Handlers keyed by event kind. Ids only grow, so the vector stays in
/// registration order.
pub struct HandlerRegistry {
    next_id: AtomicU64,
    entries: RwLock<Vec<Registration>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, kind: EventKind, handler: Handler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .expect("handler lock poisoned")
            .push(Registration { id, kind, handler });
        id
    }

    /// Returns whether a handler was removed.
    pub fn unregister(&self, id: u64) -> bool {
        let mut entries = self.entries.write().expect("handler lock poisoned");
        let before = entries.len();
        entries.retain(|r| r.id != id);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.entries.write().expect("handler lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("handler lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every handler registered for the event's kind, in order.
    /// The lock is released before handlers run so they may (un)subscribe.
    pub fn dispatch(&self, event: &PushEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .entries
            .read()
            .expect("handler lock poisoned")
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.handler.clone())
            .collect();

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
