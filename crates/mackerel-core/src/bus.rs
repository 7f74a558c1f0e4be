//! Session change bus.
//!
//! Handlers registered with [`SessionBus::subscribe`] run synchronously on
//! the publishing thread, in registration order. Async consumers can use
//! the broadcast side instead. Nothing is unregistered automatically.

use std::sync::{Arc, PoisonError, RwLock};

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use uuid::Uuid;

use crate::model::SessionChanged;

/// Capacity of the broadcast side channel.
const CHANNEL_CAPACITY: usize = 256;

/// Handle returned by [`SessionBus::subscribe`].
pub type SubscriptionId = Uuid;

type Handler = Arc<dyn Fn(&SessionChanged) + Send + Sync>;

/// Publish/subscribe channel for [`SessionChanged`] events.
pub struct SessionBus {
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
    latest: RwLock<Option<SessionChanged>>,
    sender: broadcast::Sender<SessionChanged>,
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            handlers: RwLock::new(Vec::new()),
            latest: RwLock::new(None),
            sender,
        }
    }

    /// Register a handler. Keep the returned id to unsubscribe on teardown.
    pub fn subscribe<H>(&self, handler: H) -> SubscriptionId
    where
        H: Fn(&SessionChanged) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver an event to every handler, then to broadcast receivers.
    ///
    /// Handlers run after the registry lock is released, so they may
    /// subscribe or unsubscribe.
    pub fn publish(&self, event: SessionChanged) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(event.clone());

        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        tracing::debug!(
            kind = ?event.kind,
            did = %event.identity.did,
            subscribers = handlers.len(),
            "Publishing session change"
        );

        for handler in &handlers {
            handler(&event);
        }

        let _ = self.sender.send(event); // no live receivers is fine
    }

    /// Most recently published event.
    #[must_use]
    pub fn latest(&self) -> Option<SessionChanged> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn receiver(&self) -> broadcast::Receiver<SessionChanged> {
        self.sender.subscribe()
    }

    /// Stream of live events. Lagged receivers skip what they missed.
    #[must_use]
    pub fn stream(&self) -> BoxStream<'static, SessionChanged> {
        live_stream(self.receiver())
    }

    /// Stream that yields the latest event first, then live events.
    #[must_use]
    pub fn latest_plus_stream(&self) -> BoxStream<'static, SessionChanged> {
        // Subscribe before reading `latest` so nothing published in between is lost.
        let rx = self.receiver();
        let latest = self.latest();

        futures::stream::iter(latest).chain(live_stream(rx)).boxed()
    }
}

fn live_stream(rx: broadcast::Receiver<SessionChanged>) -> BoxStream<'static, SessionChanged> {
    BroadcastStream::new(rx)
        .filter_map(|res| async move {
            match res {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Session stream lagged");
                    None
                }
            }
        })
        .boxed()
}
