//! Cooperative cancellation scopes.
//!
//! A scope is a channel nobody ever sends on. Cancelling drops its sender,
//! so every worker blocked in a `select!` on the receiver wakes at once and
//! every later check sees the disconnection. Scopes form a tree: cancelling
//! a scope cancels all of its children.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

struct ScopeState {
    trigger: Option<Sender<()>>,
    children: Vec<Weak<Mutex<ScopeState>>>,
}

impl ScopeState {
    fn cancel(&mut self) {
        self.trigger.take();
        for child in self.children.drain(..) {
            if let Some(child) = child.upgrade() {
                child.lock().cancel();
            }
        }
    }
}

impl Drop for ScopeState {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A cancellation scope. Clones share the same scope.
///
/// Dropping every clone without calling [`CancelScope::cancel`] also
/// cancels the scope and its children.
#[derive(Clone)]
pub struct CancelScope {
    state: Arc<Mutex<ScopeState>>,
    signal: Receiver<()>,
}

impl CancelScope {
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            state: Arc::new(Mutex::new(ScopeState {
                trigger: Some(trigger),
                children: Vec::new(),
            })),
            signal,
        }
    }

    /// A new scope that is cancelled together with this one.
    pub fn child(&self) -> Self {
        let child = Self::new();
        let mut state = self.state.lock();
        if state.trigger.is_none() {
            child.cancel();
        } else {
            state.children.retain(|c| c.strong_count() > 0);
            state.children.push(Arc::downgrade(&child.state));
        }
        child
    }

    pub fn cancel(&self) {
        self.state.lock().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal().is_cancelled()
    }

    /// Receiving side for workers. Holds no reference to the trigger.
    pub(crate) fn signal(&self) -> CancelSignal {
        CancelSignal(self.signal.clone())
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelScope")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Worker-side view of a scope.
pub(crate) struct CancelSignal(Receiver<()>);

impl CancelSignal {
    /// Disconnects when the scope is cancelled.
    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.0
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(self.0.try_recv(), Err(TryRecvError::Disconnected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_wakes_blocked_receiver() {
        let scope = CancelScope::new();
        let signal = scope.signal();

        let waiter = std::thread::spawn(move || signal.receiver().recv().is_err());
        std::thread::sleep(Duration::from_millis(20));
        scope.cancel();

        assert!(waiter.join().unwrap());
        assert!(scope.is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let scope = CancelScope::new();
        scope.cancel();
        scope.cancel();
        assert!(scope.is_cancelled());
    }

    #[test]
    fn test_parent_cancels_children() {
        let parent = CancelScope::new();
        let child = parent.child();
        let grandchild = child.child();

        parent.cancel();

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let parent = CancelScope::new();
        let child = parent.child();

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_scope_starts_cancelled() {
        let parent = CancelScope::new();
        parent.cancel();
        assert!(parent.child().is_cancelled());
    }

    #[test]
    fn test_dropping_all_handles_cancels() {
        let scope = CancelScope::new();
        let child = scope.child();
        let signal = scope.signal();
        drop(scope);
        assert!(signal.is_cancelled());
        assert!(child.is_cancelled());
    }
}
