//! Lifecycle events
//!
//! Terminal model operations emit an event once the statement has run and
//! associations have been resolved. Hooks are plain synchronous callbacks; an
//! error returned by a hook fails the operation that emitted it.

use crate::core::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    QueryAfter,
    InsertAfter,
    UpdateAfter,
    DeleteAfter,
}

/// Terminal operation that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Find,
    Select,
    Value,
    Aggregate,
    Create,
    Update,
    Delete,
}

/// What a hook gets to see about the finished operation
#[derive(Debug, Clone)]
pub struct EventPayload<'a> {
    pub action: Action,
    /// Unprefixed table name
    pub table: &'a str,
    /// Rows read or affected
    pub rows: u64,
}

pub type EventCallback = Arc<dyn Fn(&EventPayload<'_>) -> Result<()> + Send + Sync>;

/// Registered hooks, shared by every clone of a context
#[derive(Default)]
pub struct EventBus {
    hooks: RwLock<HashMap<Event, Vec<EventCallback>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, event: Event, callback: EventCallback) {
        self.hooks.write().entry(event).or_default().push(callback);
    }

    /// Run hooks in registration order, stopping at the first error
    pub fn emit(&self, event: Event, payload: &EventPayload<'_>) -> Result<()> {
        // Cloned out so a hook may register further hooks without deadlocking
        let hooks = self.hooks.read().get(&event).cloned().unwrap_or_default();
        for hook in hooks {
            hook(payload)?;
        }
        Ok(())
    }

    pub fn clear(&self, event: Event) {
        self.hooks.write().remove(&event);
    }

    pub fn hook_count(&self, event: Event) -> usize {
        self.hooks.read().get(&event).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.hooks.read();
        f.debug_map()
            .entries(hooks.iter().map(|(event, list)| (event, list.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::DatabaseError;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn payload(rows: u64) -> EventPayload<'static> {
        EventPayload {
            action: Action::Create,
            table: "author",
            rows,
        }
    }

    #[test]
    fn test_hooks_run_in_order_until_error() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicU64::new(0));

        let counter = seen.clone();
        bus.on(
            Event::InsertAfter,
            Arc::new(move |p: &EventPayload<'_>| {
                counter.fetch_add(p.rows, Ordering::SeqCst);
                Ok(())
            }),
        );
        bus.on(
            Event::InsertAfter,
            Arc::new(|_: &EventPayload<'_>| Err(DatabaseError::other("rejected"))),
        );

        assert!(bus.emit(Event::InsertAfter, &payload(3)).is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert!(bus.emit(Event::DeleteAfter, &payload(3)).is_ok());
        assert_eq!(bus.hook_count(Event::InsertAfter), 2);

        bus.clear(Event::InsertAfter);
        assert!(bus.emit(Event::InsertAfter, &payload(1)).is_ok());
    }
}
