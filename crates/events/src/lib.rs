//! In-process event publishing for the storefront consistency layer.
//!
//! Broadcasters publish typed events (stock deltas, promotion lifecycle changes)
//! through an [`EventBus`]; UI-facing consumers hold a [`Subscription`] or a
//! registered listener and deregister explicitly when they are torn down.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Listener, Subscription, SubscriptionId};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
