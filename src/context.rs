// Caller-owned holder for the current SyncState, passed down to whatever renders it.
// Starts at SyncState::default(); observers are notified on every update and reset.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::types::SyncState;

type Observer = Rc<RefCell<Box<dyn FnMut(&SyncState)>>>;

#[derive(Default)]
struct ContextInner {
    state: SyncState,
    revision: u64,
    next_id: u64,
    observers: Vec<(u64, Observer)>,
}

/// Shared, explicitly constructed metadata context. Clones refer to the same state.
#[derive(Clone, Default)]
pub struct MetadataContext {
    inner: Rc<RefCell<ContextInner>>,
}

impl MetadataContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current state.
    pub fn get(&self) -> SyncState {
        self.inner.borrow().state.clone()
    }

    /// Number of updates applied so far (resets included).
    pub fn revision(&self) -> u64 {
        self.inner.borrow().revision
    }

    pub fn update(&self, state: SyncState) {
        let observers: Vec<Observer> = {
            let mut inner = self.inner.borrow_mut();
            inner.state = state.clone();
            inner.revision += 1;
            inner.observers.iter().map(|(_, o)| Rc::clone(o)).collect()
        };
        for observer in observers {
            (observer.borrow_mut().as_mut())(&state);
        }
    }

    /// Back to the initial value.
    pub fn reset(&self) {
        self.update(SyncState::default());
    }

    /// Register a callback for state changes. Dropping the handle unregisters it.
    pub fn observe(&self, callback: impl FnMut(&SyncState) + 'static) -> ObserverHandle {
        let callback: Box<dyn FnMut(&SyncState)> = Box::new(callback);
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.observers.push((id, Rc::new(RefCell::new(callback))));
        ObserverHandle {
            id,
            context: Rc::downgrade(&self.inner),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }
}

impl std::fmt::Debug for MetadataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MetadataContext")
            .field("state", &inner.state)
            .field("revision", &inner.revision)
            .field("observers", &inner.observers.len())
            .finish()
    }
}

/// Cancellation handle for a context observer.
#[must_use = "dropping an ObserverHandle stops observation"]
pub struct ObserverHandle {
    id: u64,
    context: Weak<RefCell<ContextInner>>,
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.context.upgrade() {
            inner.borrow_mut().observers.retain(|(id, _)| *id != self.id);
        }
    }
}
