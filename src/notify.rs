//! Change notification for committed writes.
//!
//! Observers register interest in a key prefix and receive a payload-free
//! signal whenever a commit touches that prefix. Signals are coalescing:
//! each observer has a single-slot channel, so any number of commits that
//! land before the observer wakes collapse into one pending signal. Delivery
//! is at-least-once, and a freshly registered observer starts with one
//! pending signal so its owner reads whatever already exists.

use crate::error::{Result, StoreError};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Unique identifier for an observer registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

struct Observer {
    prefix: String,
    sender: Sender<()>,
}

impl Observer {
    fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Returns false once the receiving side is gone.
    fn signal(&self) -> bool {
        match self.sender.try_send(()) {
            Ok(()) => true,
            // A signal is already pending; this commit is covered by it.
            Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

/// Registry of prefix observers for one key space.
pub struct Notifier {
    observers: RwLock<HashMap<ObserverId, Observer>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Notifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Register an observer for every key starting with `prefix`.
    ///
    /// The observation must be registered before the owner's first read;
    /// any commit after this call is guaranteed to produce a signal.
    pub fn observe(self: &Arc<Self>, prefix: &str) -> Result<Observation> {
        let mut observers = self.observers.write();
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Observation("notifier is closed".into()));
        }

        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(1);
        // Prime the slot so the first wait falls straight through.
        let _ = sender.try_send(());

        observers.insert(
            id,
            Observer {
                prefix: prefix.to_string(),
                sender,
            },
        );

        Ok(Observation {
            id,
            receiver,
            notifier: Arc::downgrade(self),
        })
    }

    /// Signal every observer whose prefix matches one of the written keys.
    pub fn notify<'a, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keys: Vec<&str> = keys.into_iter().collect();
        if keys.is_empty() {
            return;
        }

        let mut to_remove = Vec::new();

        {
            let observers = self.observers.read();
            for (id, observer) in observers.iter() {
                if keys.iter().any(|key| observer.matches(key)) && !observer.signal() {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut observers = self.observers.write();
            for id in to_remove {
                observers.remove(&id);
            }
        }
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Disconnect every observer and refuse new registrations.
    ///
    /// Observers see their signal channel disconnect, which owners treat as
    /// an observation failure.
    pub fn close(&self) {
        let mut observers = self.observers.write();
        self.closed.store(true, Ordering::SeqCst);
        observers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn unregister(&self, id: ObserverId) {
        self.observers.write().remove(&id);
    }
}

/// A live observer registration. Dropping it unregisters the observer.
pub struct Observation {
    id: ObserverId,
    receiver: Receiver<()>,
    notifier: Weak<Notifier>,
}

impl Observation {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Channel that yields one `()` per (coalesced) change signal and
    /// disconnects when the notifier is closed.
    pub fn signal(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        if let Some(notifier) = self.notifier.upgrade() {
            notifier.unregister(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::TryRecvError;
    use std::time::Duration;

    #[test]
    fn test_observe_unobserve() {
        let notifier = Notifier::new();

        let observation = notifier.observe("events/").unwrap();
        assert_eq!(notifier.observer_count(), 1);

        drop(observation);
        assert_eq!(notifier.observer_count(), 0);
    }

    #[test]
    fn test_new_observation_is_primed() {
        let notifier = Notifier::new();
        let observation = notifier.observe("events/").unwrap();

        assert!(observation.signal().try_recv().is_ok());
        assert_eq!(observation.signal().try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_signals_coalesce() {
        let notifier = Notifier::new();
        let observation = notifier.observe("events/").unwrap();
        observation.signal().try_recv().unwrap();

        for i in 0..100 {
            let key = format!("events/{i}");
            notifier.notify([key.as_str()]);
        }

        // One pending signal covers all hundred commits
        assert!(observation.signal().try_recv().is_ok());
        assert_eq!(observation.signal().try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_prefix_filtering() {
        let notifier = Notifier::new();
        let observation = notifier.observe("events/").unwrap();
        observation.signal().try_recv().unwrap();

        notifier.notify(["other/1"]);
        assert_eq!(observation.signal().try_recv(), Err(TryRecvError::Empty));

        notifier.notify(["other/2", "events/2"]);
        assert!(observation
            .signal()
            .recv_timeout(Duration::from_millis(100))
            .is_ok());
    }

    #[test]
    fn test_close_disconnects_observers() {
        let notifier = Notifier::new();
        let observation = notifier.observe("events/").unwrap();
        observation.signal().try_recv().unwrap();

        notifier.close();

        assert_eq!(
            observation.signal().try_recv(),
            Err(TryRecvError::Disconnected)
        );
        assert!(matches!(
            notifier.observe("events/"),
            Err(StoreError::Observation(_))
        ));
    }
}
