// Change notification for credential updates

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::Token;

/// Listener invoked with the newly active token
pub type Listener = Arc<dyn Fn(&Arc<Token>) + Send + Sync>;

/// Handle identifying one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// Registry of credential change listeners
///
/// Listeners run synchronously on the notifying thread, in registration order.
/// The registry lock is released before any listener runs, so a listener may
/// subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub struct Observers {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(Subscription, Listener)>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<Token>) + Send + Sync + 'static,
    {
        let subscription = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((subscription, Arc::new(listener)));
        tracing::debug!(id = subscription.0, "Credential listener registered");
        subscription
    }

    /// Remove a listener; returns false if it was not registered
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription);
        before != listeners.len()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Invoke every registered listener with `token`
    pub fn notify(&self, token: &Arc<Token>) {
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        tracing::debug!(listeners = snapshot.len(), "Notifying credential listeners");

        for listener in snapshot {
            listener(token);
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("listeners", &self.len())
            .finish()
    }
}
