//! Tracks the live subscriptions of one store.

use super::cancel::CancelScope;
use super::types::SubscriptionId;
use crate::error::{Result, StoreError};
use crate::types::Cursor;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Internal registry entry.
struct ActiveSubscription {
    scope: CancelScope,
    start: Cursor,
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<SubscriptionId, ActiveSubscription>,
    /// Set by `cancel_all`; no registration succeeds afterwards.
    shut_down: bool,
}

/// Live subscriptions, keyed by id.
pub(crate) struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    /// Signalled whenever a worker exits.
    exited: Condvar,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState::default()),
            exited: Condvar::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Record a new subscription. The returned guard deregisters it on drop,
    /// so it should live exactly as long as the worker.
    ///
    /// Fails with [`StoreError::ShutDown`] once `cancel_all` has run.
    pub(crate) fn register(
        self: &Arc<Self>,
        scope: CancelScope,
        start: Cursor,
    ) -> Result<Registration> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(StoreError::ShutDown);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        state.active.insert(id, ActiveSubscription { scope, start });

        Ok(Registration {
            id,
            registry: Arc::clone(self),
        })
    }

    pub(crate) fn count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Ids and starting cursors of every live subscription.
    pub(crate) fn snapshot(&self) -> Vec<(SubscriptionId, Cursor)> {
        let mut entries: Vec<_> = self
            .state
            .lock()
            .active
            .iter()
            .map(|(id, sub)| (*id, sub.start.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// Refuse new registrations and cancel every live subscription.
    /// Returns how many were cancelled.
    pub(crate) fn cancel_all(&self) -> usize {
        let mut state = self.state.lock();
        state.shut_down = true;
        for sub in state.active.values() {
            sub.scope.cancel();
        }
        state.active.len()
    }

    /// Block until no subscription is live, or until `timeout` passes.
    /// Returns true if the registry is empty.
    pub(crate) fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        while !state.active.is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.exited.wait_until(&mut state, deadline).timed_out() {
                        return state.active.is_empty();
                    }
                }
                None => self.exited.wait(&mut state),
            }
        }
        true
    }

    fn deregister(&self, id: SubscriptionId) {
        self.state.lock().active.remove(&id);
        self.exited.notify_all();
    }
}

/// Keeps a subscription listed in its registry while alive.
pub(crate) struct Registration {
    id: SubscriptionId,
    registry: Arc<SubscriptionRegistry>,
}

impl Registration {
    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
