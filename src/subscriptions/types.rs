//! Signal and handle types for the event bus.

use crate::types::RoomId;

/// Payload-less invalidation signal. Receivers re-read state on receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    /// Local overrides or tombstones of a namespace changed.
    EntitiesChanged { namespace: String },
    /// Local chat room metadata changed.
    RoomsChanged,
    /// The local message log of one room changed.
    RoomMessagesChanged { room: RoomId },
}

/// Filter criteria for channel receivers.
#[derive(Clone, Debug, Default)]
pub struct SignalFilter {
    /// Entity namespaces of interest (None = all).
    pub namespaces: Option<Vec<String>>,

    /// Include entity signals.
    pub include_entities: bool,

    /// Include room metadata signals.
    pub include_rooms: bool,

    /// Include room message signals.
    pub include_messages: bool,
}

impl SignalFilter {
    /// Everything.
    pub fn all() -> Self {
        Self {
            namespaces: None,
            include_entities: true,
            include_rooms: true,
            include_messages: true,
        }
    }

    /// Entity signals for the given namespaces.
    pub fn namespaces(namespaces: Vec<String>) -> Self {
        Self {
            namespaces: Some(namespaces),
            include_entities: true,
            ..Default::default()
        }
    }

    /// Room metadata and message signals.
    pub fn chat() -> Self {
        Self {
            include_rooms: true,
            include_messages: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, signal: &Signal) -> bool {
        match signal {
            Signal::EntitiesChanged { namespace } => {
                self.include_entities
                    && self
                        .namespaces
                        .as_ref()
                        .map_or(true, |names| names.iter().any(|n| n == namespace))
            }
            Signal::RoomsChanged => self.include_rooms,
            Signal::RoomMessagesChanged { .. } => self.include_messages,
        }
    }
}

/// Unique identifier for a bus listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Channel end of a bus listener.
///
/// Dropping the receiver is enough to detach: the bus removes
/// disconnected or overflowing channels on the next publish.
pub struct SignalReceiver {
    pub id: ListenerId,
    pub receiver: crossbeam_channel::Receiver<Signal>,
}

impl SignalReceiver {
    /// Receive the next signal (blocking).
    pub fn recv(&self) -> Result<Signal, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a signal (non-blocking).
    pub fn try_recv(&self) -> Result<Signal, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Signal, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Disposer for a layered subscription.
///
/// Owns the teardown of every piece a subscribe call attached (remote
/// watchers and bus listeners). All of them are detached together on
/// [`dispose`](Self::dispose) or drop, each exactly once.
#[must_use = "dropping a Subscription detaches it immediately"]
pub struct Subscription {
    teardown: Vec<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new() -> Self {
        Self {
            teardown: Vec::new(),
        }
    }

    pub(crate) fn on_dispose(&mut self, f: impl FnOnce() + Send + 'static) {
        self.teardown.push(Box::new(f));
    }

    /// Number of attached pieces.
    pub fn parts(&self) -> usize {
        self.teardown.len()
    }

    /// Detach everything.
    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for teardown in std::mem::take(&mut self.teardown) {
            teardown();
        }
    }
}
