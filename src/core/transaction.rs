//! Per-connection transaction bookkeeping
//!
//! Every registered connection owns one [`TransactionStack`]. Keys are small
//! integers handed out lowest-free-first; the stack records the order in which
//! transactions were opened. A transaction opened under an explicit parent is
//! a savepoint inside that parent's root; any other transaction is a root of
//! its own, and drivers give each root a separate session. Which transaction a
//! statement runs in is decided by the caller passing a key, never by peeking
//! at the stack.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Identifier of an open transaction on one connection
pub type TransactionKey = u32;

/// Driver-facing description of an open transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHandle {
    pub key: TransactionKey,
    /// Key of the outermost transaction; equal to `key` for a root
    pub root: TransactionKey,
    /// Savepoint name when this transaction is nested inside another
    pub savepoint: Option<String>,
}

impl TransactionHandle {
    pub fn is_nested(&self) -> bool {
        self.savepoint.is_some()
    }
}

#[derive(Debug, Default)]
struct StackState {
    order: Vec<TransactionKey>,
    handles: HashMap<TransactionKey, Option<TransactionHandle>>,
    counter: TransactionKey,
}

impl StackState {
    fn allocate(&mut self) -> TransactionKey {
        let free = self
            .handles
            .iter()
            .filter(|(_, handle)| handle.is_none())
            .map(|(key, _)| *key)
            .min();
        match free {
            Some(key) => key,
            None => {
                self.counter += 1;
                self.counter
            }
        }
    }
}

/// LIFO of open transactions for one connection
#[derive(Debug, Default)]
pub struct TransactionStack {
    state: Mutex<StackState>,
}

impl TransactionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a key and push it.
    ///
    /// Under a `parent` the handle shares the parent's root and carries a
    /// savepoint name derived from the key, so nesting on one connection never
    /// reuses a name that is still open.
    pub fn begin(&self, parent: Option<&TransactionHandle>) -> TransactionHandle {
        let mut state = self.state.lock();
        let key = state.allocate();
        let handle = TransactionHandle {
            key,
            root: parent.map_or(key, |p| p.root),
            savepoint: parent.map(|_| format!("sp_{}", key)),
        };
        state.order.push(key);
        state.handles.insert(key, Some(handle.clone()));
        handle
    }

    /// Handle for `key`, if it is active
    pub fn handle(&self, key: TransactionKey) -> Option<TransactionHandle> {
        self.state.lock().handles.get(&key).cloned().flatten()
    }

    pub fn is_active(&self, key: TransactionKey) -> bool {
        self.handle(key).is_some()
    }

    /// Pop `key` and free its slot. Returns false if it was not active.
    pub fn finish(&self, key: TransactionKey) -> bool {
        let mut state = self.state.lock();
        let was_active = matches!(state.handles.get(&key), Some(Some(_)));
        if let Some(slot) = state.handles.get_mut(&key) {
            *slot = None;
        }
        if let Some(pos) = state.order.iter().rposition(|k| *k == key) {
            state.order.remove(pos);
        }
        was_active
    }

    /// Most recently opened transaction still active
    pub fn current(&self) -> Option<TransactionHandle> {
        let state = self.state.lock();
        state
            .order
            .last()
            .and_then(|key| state.handles.get(key).cloned().flatten())
    }

    pub fn depth(&self) -> usize {
        self.state.lock().order.len()
    }
}
