//! Per-subscription worker turning change signals into ordered delivery.
//!
//! The worker alternates between two states:
//!
//! - `Waiting`: blocked on {cancel, change signal}. Nothing else.
//! - `Draining`: read every event after the cursor in one snapshot, push
//!   them into the bounded buffer one by one, and repeat until a read comes
//!   back empty.
//!
//! Draining to empty covers any number of coalesced signals, so delivery is
//! gapless without a one-to-one mapping between commits and wake-ups. The
//! observation is registered before the worker is built and arrives with one
//! pending signal, which makes the first drain replay history.

use super::cancel::CancelSignal;
use super::types::{SubscriptionId, Termination};
use crate::notify::Observation;
use crate::store::read_events_after;
use crate::substrate::Substrate;
use crate::types::{Cursor, Event};
use crossbeam_channel::{select, Sender};
use std::sync::Arc;
use tracing::{debug, error, trace};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EngineState {
    Waiting,
    Draining,
}

pub(crate) struct StreamEngine {
    id: SubscriptionId,
    substrate: Arc<dyn Substrate>,
    observation: Observation,
    cursor: Cursor,
    out: Sender<Event>,
    cancel: CancelSignal,
    max_batch: Option<usize>,
}

impl StreamEngine {
    pub(crate) fn new(
        id: SubscriptionId,
        substrate: Arc<dyn Substrate>,
        observation: Observation,
        cursor: Cursor,
        out: Sender<Event>,
        cancel: CancelSignal,
        max_batch: Option<usize>,
    ) -> Self {
        Self {
            id,
            substrate,
            observation,
            cursor,
            out,
            cancel,
            max_batch,
        }
    }

    /// Run until terminated. Dropping `self` on return unregisters the
    /// observation and closes the buffer, which the consumer sees as
    /// end-of-stream once it has drained what is left.
    pub(crate) fn run(mut self) -> Termination {
        debug!(subscription = %self.id, cursor = ?self.cursor, "subscription started");

        let mut state = EngineState::Waiting;
        let reason = loop {
            let next = match state {
                EngineState::Waiting => self.wait(),
                EngineState::Draining => self.drain(),
            };
            state = match next {
                Ok(next) => next,
                Err(reason) => break reason,
            };
        };

        debug!(
            subscription = %self.id,
            cursor = ?self.cursor,
            %reason,
            "subscription terminated"
        );
        reason
    }

    fn wait(&self) -> Result<EngineState, Termination> {
        select! {
            recv(self.cancel.receiver()) -> _ => Err(Termination::Cancelled),
            recv(self.observation.signal()) -> signal => match signal {
                Ok(()) => Ok(EngineState::Draining),
                Err(_) => {
                    error!(subscription = %self.id, "change observation disconnected");
                    Err(Termination::ObservationFailed)
                }
            },
        }
    }

    fn drain(&mut self) -> Result<EngineState, Termination> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Termination::Cancelled);
            }

            let batch = read_events_after(&*self.substrate, &self.cursor, self.max_batch)
                .map_err(|e| {
                    error!(
                        subscription = %self.id,
                        cursor = ?self.cursor,
                        error = %e,
                        "could not read next events"
                    );
                    Termination::ReadFailed
                })?;

            if batch.is_empty() {
                return Ok(EngineState::Waiting);
            }
            trace!(subscription = %self.id, count = batch.len(), "draining batch");

            for event in batch {
                if self.cancel.is_cancelled() {
                    return Err(Termination::Cancelled);
                }
                let id = event.id.clone();
                self.push(event)?;
                self.cursor.advance(&id);
            }
        }
    }

    /// Blocks while the buffer is full; cancellation aborts the push.
    fn push(&self, event: Event) -> Result<(), Termination> {
        select! {
            send(self.out, event) -> sent => sent.map_err(|_| Termination::ConsumerGone),
            recv(self.cancel.receiver()) -> _ => Err(Termination::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::event_key;
    use crate::subscriptions::cancel::CancelScope;
    use crate::substrate::MemorySubstrate;
    use crossbeam_channel::bounded;
    use std::thread;
    use std::time::Duration;

    fn put(substrate: &MemorySubstrate, id: &str, payload: &str) {
        let mut txn = substrate.begin_write().unwrap();
        txn.put(&event_key(id), payload.as_bytes().to_vec()).unwrap();
        txn.commit().unwrap();
    }

    fn engine(
        substrate: &Arc<MemorySubstrate>,
        cursor: Cursor,
        buffer: usize,
    ) -> (StreamEngine, crossbeam_channel::Receiver<Event>, CancelScope) {
        let scope = CancelScope::new();
        let observation = substrate.observe("events/").unwrap();
        let (out, receiver) = bounded(buffer);
        let substrate: Arc<dyn Substrate> = substrate.clone();
        let engine = StreamEngine::new(
            SubscriptionId(1),
            substrate,
            observation,
            cursor,
            out,
            scope.signal(),
            None,
        );
        (engine, receiver, scope)
    }

    #[test]
    fn test_first_drain_replays_history() {
        let substrate = Arc::new(MemorySubstrate::new());
        put(&substrate, "1", "a");
        put(&substrate, "2", "b");

        let (engine, receiver, scope) = engine(&substrate, Cursor::start(), 10);
        let worker = thread::spawn(move || engine.run());

        let first = receiver.recv_timeout(Duration::from_secs(1)).unwrap();
        let second = receiver.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(first, Event::new("1", "a"));
        assert_eq!(second, Event::new("2", "b"));

        scope.cancel();
        assert_eq!(worker.join().unwrap(), Termination::Cancelled);
        assert!(receiver.recv().is_err());
    }

    #[test]
    fn test_resume_is_exclusive() {
        let substrate = Arc::new(MemorySubstrate::new());
        put(&substrate, "1", "a");
        put(&substrate, "2", "b");

        let (engine, receiver, scope) = engine(&substrate, Cursor::after("1"), 10);
        let worker = thread::spawn(move || engine.run());

        let event = receiver.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.id, "2");
        assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());

        scope.cancel();
        worker.join().unwrap();
    }

    #[test]
    fn test_live_writes_wake_waiting_engine() {
        let substrate = Arc::new(MemorySubstrate::new());
        let (engine, receiver, scope) = engine(&substrate, Cursor::start(), 10);
        let worker = thread::spawn(move || engine.run());

        // Nothing yet; engine drains the empty store and waits
        assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());

        put(&substrate, "1", "a");
        let event = receiver.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.id, "1");

        scope.cancel();
        worker.join().unwrap();
    }

    #[test]
    fn test_cancel_while_blocked_on_full_buffer() {
        let substrate = Arc::new(MemorySubstrate::new());
        for i in 0..10 {
            put(&substrate, &format!("{i:02}"), "x");
        }

        let (engine, receiver, scope) = engine(&substrate, Cursor::start(), 2);
        let worker = thread::spawn(move || engine.run());

        // Let the worker fill the buffer and block
        thread::sleep(Duration::from_millis(50));
        assert_eq!(receiver.len(), 2);

        scope.cancel();
        assert_eq!(worker.join().unwrap(), Termination::Cancelled);

        // Only what was buffered before the cancel is left
        assert_eq!(receiver.iter().count(), 2);
    }

    #[test]
    fn test_consumer_gone_terminates() {
        let substrate = Arc::new(MemorySubstrate::new());
        put(&substrate, "1", "a");

        let (engine, receiver, _scope) = engine(&substrate, Cursor::start(), 1);
        drop(receiver);

        assert_eq!(engine.run(), Termination::ConsumerGone);
    }

    #[test]
    fn test_closed_notifier_terminates() {
        let substrate = Arc::new(MemorySubstrate::new());
        let (engine, _receiver, _scope) = engine(&substrate, Cursor::start(), 1);

        // Consume the primed signal's drain, then disconnect
        let worker = thread::spawn(move || engine.run());
        thread::sleep(Duration::from_millis(20));
        substrate.close();

        let reason = worker.join().unwrap();
        assert!(matches!(
            reason,
            Termination::ObservationFailed | Termination::ReadFailed
        ));
    }
}
