//! # changefeed
//!
//! An append-only event store whose consumers tail it live and resume from
//! any earlier position.
//!
//! ## Core Concepts
//!
//! - **Events**: opaque payloads stored under unique, time-ordered ids
//! - **Cursors**: the id of the last event a consumer handled (or empty)
//! - **Subscriptions**: one worker per consumer, converting change signals
//!   into ordered, exactly-once, backpressured delivery
//! - **Substrates**: the ordered transactional key space underneath
//!   (in-memory or an append-only commit log on disk)
//!
//! ## Example
//!
//! ```ignore
//! use changefeed::{Cursor, Delivery, EventStore, StoreConfig};
//!
//! let store = EventStore::open(StoreConfig {
//!     path: "./my-store".into(),
//!     ..Default::default()
//! })?;
//!
//! let first = store.append(br#"{"kind": "created"}"#.to_vec())?;
//!
//! // Resume strictly after `first`
//! let sub = store.subscribe(Cursor::from(&first))?;
//! store.append(br#"{"kind": "updated"}"#.to_vec())?;
//!
//! if let Delivery::Event(event) = sub.pull() {
//!     println!("{} {:?}", event.id, event.payload_str());
//! }
//! ```

pub mod envelope;
pub mod error;
pub mod ids;
pub mod notify;
pub mod store;
pub mod subscriptions;
pub mod substrate;
pub mod types;

// Re-exports
pub use envelope::{sse_frame, EventEnvelope};
pub use error::{Result, StoreError};
pub use ids::{IdGenerator, UuidV7Generator};
pub use notify::{Notifier, Observation, ObserverId};
pub use store::{EventStore, StoreConfig, EVENTS_PREFIX};
pub use subscriptions::{
    CancelScope, Delivery, Subscription, SubscriptionConfig, SubscriptionId, Termination,
    DEFAULT_BUFFER_SIZE,
};
pub use substrate::{
    FileSubstrate, FileSubstrateConfig, MemorySubstrate, ReadTxn, ScanIter, Substrate, WriteTxn,
};
pub use types::{Cursor, Event};
