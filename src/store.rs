//! The event store: append path and subscription entry point.

use crate::error::{Result, StoreError};
use crate::ids::{IdGenerator, UuidV7Generator};
use crate::subscriptions::{
    CancelScope, StreamEngine, Subscription, SubscriptionConfig, SubscriptionId,
    SubscriptionRegistry,
};
use crate::substrate::{FileSubstrate, FileSubstrateConfig, MemorySubstrate, Substrate};
use crate::types::{Cursor, Event};
use crossbeam_channel::bounded;
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Span};

/// Key prefix under which every event is stored.
pub const EVENTS_PREFIX: &str = "events/";

/// Substrate key for an event id.
pub(crate) fn event_key(id: &str) -> String {
    format!("{EVENTS_PREFIX}{id}")
}

fn event_from_entry(key: String, payload: Vec<u8>) -> Event {
    let id = key
        .strip_prefix(EVENTS_PREFIX)
        .map(str::to_string)
        .unwrap_or(key);
    Event { id, payload }
}

/// Read up to `limit` events strictly after `cursor`, in one snapshot.
pub(crate) fn read_events_after(
    substrate: &dyn Substrate,
    cursor: &Cursor,
    limit: Option<usize>,
) -> Result<Vec<Event>> {
    let seek = event_key(cursor.as_str());
    let from = if cursor.is_start() {
        Bound::Unbounded
    } else {
        Bound::Excluded(seek.as_str())
    };

    let txn = substrate.begin_read()?;
    let entries = txn.scan(EVENTS_PREFIX, from)?;
    let events: Vec<Event> = match limit {
        Some(limit) => entries
            .take(limit)
            .map(|(k, v)| event_from_entry(k, v))
            .collect(),
        None => entries.map(|(k, v)| event_from_entry(k, v)).collect(),
    };
    Ok(events)
}

/// Store configuration for [`EventStore::open`].
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory of the file substrate.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync every N appends (1 = every append).
    pub sync_interval: u64,

    /// Defaults for subscriptions created with [`EventStore::subscribe`].
    pub subscription: SubscriptionConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./db"),
            create_if_missing: true,
            sync_interval: 1,
            subscription: SubscriptionConfig::default(),
        }
    }
}

/// Append-only event store with live, resumable subscriptions.
///
/// The store adds no locking of its own: concurrent appends are serialised
/// by the substrate's write transactions. Subscribers never slow down
/// writers; a full subscription buffer only pauses that subscription.
pub struct EventStore {
    substrate: Arc<dyn Substrate>,
    ids: Arc<dyn IdGenerator>,
    registry: Arc<SubscriptionRegistry>,
    defaults: SubscriptionConfig,
    span: Span,
}

impl EventStore {
    /// Build a store over an explicit substrate and id generator.
    pub fn new(substrate: Arc<dyn Substrate>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            substrate,
            ids,
            registry: SubscriptionRegistry::new(),
            defaults: SubscriptionConfig::default(),
            span: info_span!("event_store"),
        }
    }

    /// Volatile store with UUIDv7 ids.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySubstrate::new()), Arc::new(UuidV7Generator))
    }

    /// Open a file-backed store, creating it if configured to.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let substrate = FileSubstrate::open(FileSubstrateConfig {
            path: config.path.clone(),
            create_if_missing: config.create_if_missing,
            sync_interval: config.sync_interval,
        })?;

        let store = Self::new(Arc::new(substrate), Arc::new(UuidV7Generator))
            .with_subscription_defaults(config.subscription);
        store.span.in_scope(|| {
            info!(path = %config.path.display(), "event store opened");
        });
        Ok(store)
    }

    /// Log under `span` instead of the default `event_store` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_subscription_defaults(mut self, config: SubscriptionConfig) -> Self {
        self.defaults = config;
        self
    }

    pub fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.substrate
    }

    // --- Append path ---

    /// Append an event with a freshly generated id.
    ///
    /// Nothing is written if id generation fails, and a failed write leaves
    /// nothing visible, so retrying is always safe.
    pub fn append(&self, payload: impl Into<Vec<u8>>) -> Result<Event> {
        let _entered = self.span.enter();
        let payload = payload.into();

        // Ids are generated under the writer lock so that commit order and
        // id order agree even with concurrent appenders.
        let mut txn = self.substrate.begin_write()?;
        let id = self.ids.next_id().map_err(|e| match e {
            StoreError::IdGeneration(_) => e,
            other => StoreError::IdGeneration(other.to_string()),
        })?;
        let key = event_key(&id);

        if txn.exists(&key)? {
            return Err(StoreError::Storage(format!("duplicate event id {id}")));
        }
        if let Some(last) = txn.last_key(EVENTS_PREFIX)? {
            if last > key {
                warn!(
                    id = %id,
                    latest = %&last[EVENTS_PREFIX.len()..],
                    "new event id sorts before the latest stored id; subscribers past it will skip this event"
                );
            }
        }
        txn.put(&key, payload.clone())?;
        txn.commit()?;

        info!(id = %id, size = payload.len(), "new event stored");
        Ok(Event { id, payload })
    }

    // --- Reads ---

    /// Get an event by id.
    pub fn get(&self, id: &str) -> Result<Option<Event>> {
        let txn = self.substrate.begin_read()?;
        let payload = txn.get(&event_key(id))?;
        Ok(payload.map(|payload| Event::new(id, payload)))
    }

    /// Up to `limit` events strictly after `cursor`, read in one snapshot.
    pub fn read_after(&self, cursor: &Cursor, limit: usize) -> Result<Vec<Event>> {
        read_events_after(&*self.substrate, cursor, Some(limit))
    }

    /// Number of stored events.
    pub fn len(&self) -> Result<usize> {
        let txn = self.substrate.begin_read()?;
        txn.count(EVENTS_PREFIX)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.last_id()?.is_none())
    }

    /// Id of the most recently appended event.
    pub fn last_id(&self) -> Result<Option<String>> {
        let txn = self.substrate.begin_read()?;
        let last = txn.last(EVENTS_PREFIX)?;
        Ok(last.map(|(key, payload)| event_from_entry(key, payload).id))
    }

    // --- Subscriptions ---

    /// Tail the store from `cursor` with the default configuration.
    pub fn subscribe(&self, cursor: impl Into<Cursor>) -> Result<Subscription> {
        self.subscribe_with(cursor, self.defaults.clone())
    }

    pub fn subscribe_with(
        &self,
        cursor: impl Into<Cursor>,
        config: SubscriptionConfig,
    ) -> Result<Subscription> {
        self.spawn_subscription(cursor.into(), config, CancelScope::new())
    }

    /// Tail the store from `cursor`, cancelled when `parent` is.
    ///
    /// The subscription gets its own child scope: cancelling the
    /// subscription never cancels `parent`.
    pub fn subscribe_in(
        &self,
        cursor: impl Into<Cursor>,
        config: SubscriptionConfig,
        parent: &CancelScope,
    ) -> Result<Subscription> {
        self.spawn_subscription(cursor.into(), config, parent.child())
    }

    fn spawn_subscription(
        &self,
        cursor: Cursor,
        config: SubscriptionConfig,
        scope: CancelScope,
    ) -> Result<Subscription> {
        let _entered = self.span.enter();

        // Register for change signals before the first read.
        let observation = self.substrate.observe(EVENTS_PREFIX)?;

        if !cursor.is_start() && self.get(cursor.as_str())?.is_none() {
            debug!(cursor = %cursor, "cursor not found in store; resuming after it");
        }

        let registration = self.registry.register(scope.clone(), cursor.clone())?;
        let id = registration.id();

        let (sender, receiver) = bounded(config.buffer_size.max(1));
        let engine = StreamEngine::new(
            id,
            Arc::clone(&self.substrate),
            observation,
            cursor.clone(),
            sender,
            scope.signal(),
            config.max_batch,
        );

        let span = info_span!(parent: &self.span, "subscription", id = id.0);
        let worker = thread::Builder::new()
            .name(format!("changefeed-sub-{id}"))
            .spawn(move || {
                let _registration = registration;
                span.in_scope(|| engine.run())
            })?;

        Ok(Subscription::new(id, cursor, receiver, scope, worker))
    }

    /// Number of subscriptions whose worker is still running.
    pub fn active_subscriptions(&self) -> usize {
        self.registry.count()
    }

    /// Ids and starting cursors of the running subscriptions.
    pub fn subscriptions(&self) -> Vec<(SubscriptionId, Cursor)> {
        self.registry.snapshot()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called. Appends keep
    /// working; new subscriptions fail with [`StoreError::ShutDown`].
    pub fn is_shut_down(&self) -> bool {
        self.registry.is_shut_down()
    }

    /// Cancel every subscription and wait for all workers to exit.
    /// Subscriptions requested from then on are refused.
    /// Returns how many subscriptions were cancelled.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.registry.cancel_all();
        self.registry.wait_idle(None);
        self.span.in_scope(|| info!(cancelled, "subscriptions shut down"));
        cancelled
    }

    /// Like [`shutdown`](Self::shutdown) but gives up waiting after
    /// `timeout`. Returns true if every worker exited in time.
    pub fn shutdown_timeout(&self, timeout: Duration) -> bool {
        self.registry.cancel_all();
        self.registry.wait_idle(Some(timeout))
    }
}
