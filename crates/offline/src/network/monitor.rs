//! Connectivity state with edge-triggered subscriptions

use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Callback = Arc<dyn Fn() + Send + Sync>;

struct Listener {
    id: u64,
    on_online: Callback,
    on_offline: Callback,
}

struct Shared {
    online: AtomicBool,
    listeners: Mutex<Vec<Listener>>,
    next_id: AtomicU64,
}

impl Shared {
    fn remove(&self, id: u64) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|l| l.id != id);
        }
    }

    fn is_registered(&self, id: u64) -> bool {
        self.listeners
            .lock()
            .is_ok_and(|listeners| listeners.iter().any(|l| l.id == id))
    }
}

/// Tracks whether the device believes it is online
///
/// The state is the last transport-level signal reported; it does not prove
/// the remote API is reachable. Cloning yields another handle to the same
/// state.
#[derive(Clone)]
pub struct NetworkMonitor {
    shared: Arc<Shared>,
}

impl NetworkMonitor {
    /// Create a monitor with the given initial state
    pub fn new(initially_online: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                online: AtomicBool::new(initially_online),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Last observed connectivity
    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    /// Register callbacks for online and offline transitions
    ///
    /// Each callback fires at most once per transition. Dropping the
    /// returned [`Subscription`] unsubscribes.
    pub fn subscribe<F, G>(&self, on_online: F, on_offline: G) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
        G: Fn() + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.shared.listeners.lock() {
            listeners.push(Listener {
                id,
                on_online: Arc::new(on_online),
                on_offline: Arc::new(on_offline),
            });
        }
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Record a connectivity signal from the platform or a probe
    ///
    /// Callbacks run only when the state actually changes. Returns whether
    /// it changed. A subscription dropped during the notification is skipped
    /// unless its callback has already started.
    pub fn report(&self, online: bool) -> bool {
        let previous = self.shared.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        info!("Network is now {}", if online { "online" } else { "offline" });

        // Snapshot callbacks so none run under the lock; a callback may
        // subscribe or unsubscribe.
        let callbacks: Vec<(u64, Callback)> = match self.shared.listeners.lock() {
            Ok(listeners) => listeners
                .iter()
                .map(|l| {
                    let callback = if online {
                        Arc::clone(&l.on_online)
                    } else {
                        Arc::clone(&l.on_offline)
                    };
                    (l.id, callback)
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        debug!("Notifying {} network subscribers", callbacks.len());
        for (id, callback) in callbacks {
            if self.shared.is_registered(id) {
                callback();
            }
        }
        true
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.shared.listeners.lock().map_or(0, |l| l.len())
    }
}

/// Handle to a network subscription; unsubscribes when dropped
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Unsubscribe explicitly
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(self.id);
        }
    }
}
