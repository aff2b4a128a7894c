//! In-memory event bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, Filter, Listener, Subscription, SubscriptionId};

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("event bus lock poisoned")]
    Poisoned,
}

enum Sink<M> {
    Channel(mpsc::Sender<M>),
    Listener(Listener<M>),
}

struct Registration<M> {
    id: SubscriptionId,
    sink: Sink<M>,
    filter: Option<Filter<M>>,
}

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Synchronous fan-out, publish order preserved per subscriber
/// - Listeners run after the registry lock is released, so a listener may publish
///   or unsubscribe without deadlocking
pub struct InMemoryEventBus<M> {
    registrations: Mutex<Vec<Registration<M>>>,
    next_id: AtomicU64,
}

impl<M> core::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &self.subscriber_count_inner())
            .finish()
    }
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn register(&self, sink: Sink<M>, filter: Option<Filter<M>>) -> SubscriptionId {
        let id = self.allocate_id();

        // If the lock is poisoned, we still hand out an id;
        // it just won't receive messages until the process restarts.
        match self.registrations.lock() {
            Ok(mut regs) => regs.push(Registration { id, sink, filter }),
            Err(_) => tracing::error!(subscription = %id, "event bus poisoned; registration dropped"),
        }

        id
    }

    fn subscriber_count_inner(&self) -> usize {
        self.registrations.lock().map(|regs| regs.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            registrations: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut listeners = Vec::new();
        {
            let mut regs = self.registrations.lock().map_err(|_| InMemoryBusError::Poisoned)?;

            // Drop any dead channel subscribers while publishing.
            regs.retain_mut(|reg| {
                if let Some(filter) = reg.filter.as_mut() {
                    if !filter(&message) {
                        return true;
                    }
                }
                match &reg.sink {
                    Sink::Channel(tx) => tx.send(message.clone()).is_ok(),
                    Sink::Listener(listener) => {
                        listeners.push(listener.clone());
                        true
                    }
                }
            });
        }

        for listener in listeners {
            listener(&message);
        }

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        let id = self.register(Sink::Channel(tx), None);
        Subscription::new(id, rx)
    }

    fn subscribe_filtered(&self, filter: Filter<M>) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        let id = self.register(Sink::Channel(tx), Some(filter));
        Subscription::new(id, rx)
    }

    fn listen(&self, listener: Listener<M>) -> SubscriptionId {
        self.register(Sink::Listener(listener), None)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut regs) = self.registrations.lock() else {
            return false;
        };
        let before = regs.len();
        regs.retain(|reg| reg.id != id);
        regs.len() != before
    }

    fn subscriber_count(&self) -> usize {
        self.subscriber_count_inner()
    }
}
