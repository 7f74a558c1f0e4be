//! Tracks the active account from observed session events.

use std::sync::{Arc, PoisonError, RwLock};

use crate::{
    bus::{SessionBus, SubscriptionId},
    model::{Identity, SessionChanged, SessionEventKind},
};

/// The currently authenticated identity as seen by one consumer.
///
/// The value is derived only from bus events, never by querying the store.
/// An inserted or updated default identity becomes current; deleting the
/// current identity, or updating it to non-default, clears it. Unsubscribes
/// from the bus when dropped.
pub struct CurrentSession {
    bus: Arc<SessionBus>,
    subscription: SubscriptionId,
    current: Arc<RwLock<Option<Identity>>>,
}

impl CurrentSession {
    /// Subscribe to `bus`, seeding from its latest event.
    #[must_use]
    pub fn attach(bus: Arc<SessionBus>) -> Self {
        let current = Arc::new(RwLock::new(None));
        if let Some(event) = bus.latest() {
            apply(&mut current.write().unwrap_or_else(PoisonError::into_inner), &event);
        }

        let slot = Arc::clone(&current);
        let subscription = bus.subscribe(move |event| {
            apply(&mut slot.write().unwrap_or_else(PoisonError::into_inner), event);
        });

        Self {
            bus,
            subscription,
            current,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<Identity> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for CurrentSession {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
    }
}

fn apply(current: &mut Option<Identity>, event: &SessionChanged) {
    let identity = &event.identity;
    let is_current = current
        .as_ref()
        .is_some_and(|c| c.id.is_some() && c.id == identity.id);

    match event.kind {
        SessionEventKind::Inserted | SessionEventKind::Updated if identity.is_default => {
            *current = Some(identity.clone());
        }
        SessionEventKind::Updated | SessionEventKind::Deleted if is_current => {
            tracing::debug!(did = %identity.did, kind = ?event.kind, "Current account signed out");
            *current = None;
        }
        _ => {}
    }
}
