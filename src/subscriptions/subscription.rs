//! Consumer side of a subscription.

use super::cancel::CancelScope;
use super::types::{Delivery, SubscriptionId, Termination};
use crate::error::{Result, StoreError};
use crate::types::{Cursor, Event};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Handle to one live change feed.
///
/// Owns the receiving end of the bounded buffer, the subscription's
/// cancellation scope and its worker thread. Dropping the handle cancels the
/// subscription and joins the worker.
pub struct Subscription {
    id: SubscriptionId,
    start: Cursor,
    receiver: Receiver<Event>,
    scope: CancelScope,
    worker: Option<JoinHandle<Termination>>,
    termination: Option<Termination>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        start: Cursor,
        receiver: Receiver<Event>,
        scope: CancelScope,
        worker: JoinHandle<Termination>,
    ) -> Self {
        Self {
            id,
            start,
            receiver,
            scope,
            worker: Some(worker),
            termination: None,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Cursor the subscription was created with.
    pub fn cursor_start(&self) -> &Cursor {
        &self.start
    }

    /// Wait for the next event.
    ///
    /// Returns [`Delivery::EndOfStream`] once the subscription has
    /// terminated and every buffered event has been pulled; from then on
    /// every call returns it again.
    pub fn pull(&self) -> Delivery {
        match self.receiver.recv() {
            Ok(event) => Delivery::Event(event),
            Err(_) => Delivery::EndOfStream,
        }
    }

    /// Like [`pull`](Self::pull), but gives up after `timeout`.
    /// Returns `None` on timeout.
    pub fn pull_timeout(&self, timeout: Duration) -> Option<Delivery> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(Delivery::Event(event)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Delivery::EndOfStream),
        }
    }

    /// Non-blocking pull. Returns `None` when nothing is buffered yet.
    pub fn try_pull(&self) -> Option<Delivery> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Delivery::Event(event)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Delivery::EndOfStream),
        }
    }

    /// Number of events currently buffered.
    pub fn buffered(&self) -> usize {
        self.receiver.len()
    }

    /// Signal the subscription to stop. Does not wait for the worker.
    pub fn cancel(&self) {
        self.scope.cancel();
    }

    /// The subscription's own cancellation scope.
    pub fn scope(&self) -> &CancelScope {
        &self.scope
    }

    /// Whether the worker thread is still running.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(false, |worker| !worker.is_finished())
    }

    /// Cancel and wait for the worker to exit.
    ///
    /// Events already buffered stay pullable. Calling `close` again returns
    /// the same termination reason.
    pub fn close(&mut self) -> Result<Termination> {
        self.cancel();
        if let Some(worker) = self.worker.take() {
            let reason = worker.join().map_err(|_| StoreError::WorkerPanicked)?;
            self.termination = Some(reason);
        }
        self.termination.ok_or(StoreError::WorkerPanicked)
    }
}

impl Iterator for Subscription {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.pull().into_event()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("buffered", &self.receiver.len())
            .field("running", &self.is_running())
            .finish()
    }
}
