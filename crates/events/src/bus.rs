//! Publish/subscribe abstraction (mechanics only).
//!
//! The bus distributes ephemeral messages (live run updates, progress ticks)
//! to whoever is listening at the moment of publication:
//!
//! - **Transport-agnostic**: in-memory channels, Redis pub/sub, etc.
//! - **Best-effort**: nothing is persisted; a subscriber that is not connected
//!   when a message is published never sees it
//! - **Broadcast**: every subscriber gets its own copy
//!
//! Anything that must survive a crash (job records, delivery audit rows,
//! credit balances) goes through a store, never through the bus.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to a message stream.
///
/// Subscriptions are meant for single-threaded consumption. Messages arrive in
/// the order the bus accepted them; ordering across concurrent publishers is
/// not guaranteed.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Domain-agnostic pub/sub bus.
///
/// `publish()` may fail (closed transport, poisoned lock). Callers that only
/// observe a business operation (progress reporting, notifications) must log
/// the failure and carry on rather than propagate it.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
