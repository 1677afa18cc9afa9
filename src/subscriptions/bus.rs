//! Process-wide event bus.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use super::types::{ListenerId, Signal, SignalFilter, SignalReceiver};

/// Default buffer size for channel receivers.
const DEFAULT_BUFFER: usize = 256;

type Callback = Arc<dyn Fn(&Signal) + Send + Sync>;

/// Internal listener state.
enum Listener {
    /// Invoked synchronously on publish.
    Callback(Callback),
    /// Bounded channel; dropped when full or disconnected.
    Channel {
        filter: SignalFilter,
        sender: Sender<Signal>,
    },
}

struct BusInner {
    listeners: RwLock<HashMap<ListenerId, Listener>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

/// Typed publish/subscribe bus for local-write invalidation.
///
/// Cloning yields another handle to the same bus. Several stores sharing
/// one bus (and one storage backend) behave like browser tabs: a write in
/// one re-renders subscribers in all of them.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER)
    }

    /// Create a bus whose channel receivers buffer `buffer_size` signals.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer_size: buffer_size.max(1),
            }),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Register a callback run on every published signal.
    pub fn listen(&self, f: impl Fn(&Signal) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id();
        self.inner
            .listeners
            .write()
            .insert(id, Listener::Callback(Arc::new(f)));
        id
    }

    /// Register a bounded channel receiving matching signals.
    pub fn channel(&self, filter: SignalFilter) -> SignalReceiver {
        let id = self.next_id();
        let (sender, receiver) = bounded(self.inner.buffer_size);
        self.inner
            .listeners
            .write()
            .insert(id, Listener::Channel { filter, sender });
        SignalReceiver { id, receiver }
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unlisten(&self, id: ListenerId) {
        self.inner.listeners.write().remove(&id);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Publish a signal to every listener.
    ///
    /// Callbacks run after the listener table lock is released, so they may
    /// publish or (un)listen themselves.
    pub fn publish(&self, signal: Signal) {
        let mut callbacks = Vec::new();
        let mut to_remove = Vec::new();

        {
            let listeners = self.inner.listeners.read();
            for (id, listener) in listeners.iter() {
                match listener {
                    Listener::Callback(f) => callbacks.push(f.clone()),
                    Listener::Channel { filter, sender } => {
                        if !filter.matches(&signal) {
                            continue;
                        }
                        match sender.try_send(signal.clone()) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                warn!(listener = id.0, "bus receiver overflowed, dropping it");
                                to_remove.push(*id);
                            }
                            Err(TrySendError::Disconnected(_)) => to_remove.push(*id),
                        }
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            let mut listeners = self.inner.listeners.write();
            for id in to_remove {
                listeners.remove(&id);
            }
        }

        for callback in callbacks {
            callback(&signal);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
