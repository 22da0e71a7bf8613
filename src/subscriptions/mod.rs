//! Resumable change-feed subscriptions.
//!
//! Each subscription owns:
//! - A worker thread that waits for change signals and drains new events
//! - A bounded buffer between that worker and the consumer (backpressure)
//! - A cancellation scope, optionally nested under a caller's scope
//!
//! Delivery is exactly once per subscription, in id order, starting strictly
//! after the cursor the subscription was created with.
//!
//! # Example
//!
//! ```ignore
//! let store = EventStore::in_memory();
//! store.append(b"a".to_vec())?;
//!
//! let sub = store.subscribe(Cursor::start())?;
//! while let Delivery::Event(event) = sub.pull() {
//!     println!("{}: {:?}", event.id, event.payload_str());
//!     // persist event.id to resume here after a restart
//! }
//! ```

mod cancel;
mod engine;
mod registry;
mod subscription;
mod types;

pub use cancel::CancelScope;
pub use subscription::Subscription;
pub use types::{Delivery, SubscriptionConfig, SubscriptionId, Termination, DEFAULT_BUFFER_SIZE};

pub(crate) use engine::StreamEngine;
pub(crate) use registry::SubscriptionRegistry;
