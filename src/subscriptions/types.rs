//! Subscription types.

use crate::types::Event;
use std::fmt;

/// Default number of events buffered between a worker and its consumer.
pub const DEFAULT_BUFFER_SIZE: usize = 40;

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before the worker blocks (backpressure).
    /// Values below 1 are treated as 1.
    /// Default: 40
    pub buffer_size: usize,

    /// Max events collected by one read transaction (None = no limit).
    /// The worker keeps reading until a read comes back empty either way.
    pub max_batch: Option<usize>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_batch: None,
        }
    }
}

impl SubscriptionConfig {
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn max_batch(mut self, max: usize) -> Self {
        self.max_batch = Some(max);
        self
    }
}

/// Unique identifier for a subscription within one store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of pulling from a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum Delivery {
    /// The next event after the previous one delivered.
    Event(Event),
    /// The subscription has terminated and its buffer is drained.
    /// Every later pull returns this again.
    EndOfStream,
}

impl Delivery {
    pub fn into_event(self) -> Option<Event> {
        match self {
            Delivery::Event(event) => Some(event),
            Delivery::EndOfStream => None,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Delivery::EndOfStream)
    }
}

/// Why a subscription worker stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The cancellation scope was cancelled (or every handle to it dropped).
    Cancelled,
    /// The consumer dropped its end of the buffer.
    ConsumerGone,
    /// A read transaction failed while draining.
    ReadFailed,
    /// The change notifier disconnected.
    ObservationFailed,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Termination::Cancelled => "cancelled",
            Termination::ConsumerGone => "consumer gone",
            Termination::ReadFailed => "read failed",
            Termination::ObservationFailed => "observation failed",
        };
        f.write_str(reason)
    }
}
