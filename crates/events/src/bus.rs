//! Event publishing/subscription abstraction (mechanics only).
//!
//! This module provides the **event bus pattern**: a pub/sub mechanism for
//! distributing events to every interested surface (product pages, cart, admin
//! tables) without those surfaces knowing about each other.
//!
//! ## Delivery model
//!
//! - **Synchronous fan-out**: `publish` hands the event to every current subscriber
//!   before it returns.
//! - **Filtered views**: a subscription may carry a predicate; events it rejects are
//!   never queued for that subscriber.
//! - **Explicit teardown**: every subscription has a [`SubscriptionId`]; consumers call
//!   `unsubscribe` when they go away. Dropped channel subscriptions are also pruned on
//!   the next publish.
//! - **No persistence**: the bus is for distribution only. The document store is the
//!   source of truth.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Token identifying one registration on a bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Callback invoked synchronously for every matching event.
pub type Listener<M> = Arc<dyn Fn(&M) + Send + Sync>;

/// Predicate deciding whether an event reaches a subscriber.
///
/// `FnMut` so that stateful views (e.g. de-duplication) can remember what they
/// already let through.
pub type Filter<M> = Box<dyn FnMut(&M) -> bool + Send>;

/// A channel-backed subscription to an event stream.
///
/// Each subscription gets a copy of every event its filter accepts, in publish
/// order. Subscriptions are meant for a single consumer.
///
/// ```ignore
/// let sub = bus.subscribe();
/// // ... later, from the consumer's event loop:
/// for update in sub.drain() {
///     render(update);
/// }
/// bus.unsubscribe(sub.id());
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    id: SubscriptionId,
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(id: SubscriptionId, receiver: Receiver<M>) -> Self {
        Self { id, receiver }
    }

    /// Token to pass to [`EventBus::unsubscribe`].
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Take every message currently queued without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ```text
/// write → document store → cache invalidation → EventBus::publish → subscribers
///                                                                    ├─ channel subscriptions
///                                                                    └─ listeners
/// ```
///
/// Implementations must be `Send + Sync`; broadcasters share one bus between the
/// code paths that publish and the surfaces that subscribe.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    /// Receive every published message.
    fn subscribe(&self) -> Subscription<M>;

    /// Receive only the messages `filter` accepts.
    fn subscribe_filtered(&self, filter: Filter<M>) -> Subscription<M>;

    /// Register a callback invoked synchronously during `publish`.
    fn listen(&self, listener: Listener<M>) -> SubscriptionId;

    /// Remove a subscription or listener. Returns `false` if it was already gone.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Number of live registrations.
    fn subscriber_count(&self) -> usize;
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

    fn subscribe_filtered(&self, filter: Filter<M>) -> Subscription<M> {
        (**self).subscribe_filtered(filter)
    }

    fn listen(&self, listener: Listener<M>) -> SubscriptionId {
        (**self).listen(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        (**self).unsubscribe(id)
    }

    fn subscriber_count(&self) -> usize {
        (**self).subscriber_count()
    }
}
