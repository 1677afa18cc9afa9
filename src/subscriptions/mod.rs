//! Subscription fanout.
//!
//! This module provides:
//! - [`EventBus`]: typed, payload-less invalidation signals, delivered to
//!   callbacks or bounded channels
//! - [`Subscription`]: the disposer returned by every subscribe call
//!
//! # Example
//!
//! ```ignore
//! let bus = EventBus::new();
//!
//! // Another thread wants to know when chat data changes
//! let receiver = bus.channel(SignalFilter::chat());
//!
//! bus.publish(Signal::RoomsChanged);
//! assert_eq!(receiver.recv()?, Signal::RoomsChanged);
//! ```

mod bus;
mod types;

pub use bus::EventBus;
pub use types::{ListenerId, Signal, SignalFilter, SignalReceiver, Subscription};
