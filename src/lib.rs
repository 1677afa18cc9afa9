//! # Marketsync
//!
//! Offline-first data layer for a second-hand marketplace client. Every
//! read view merges a remote real-time store, a local durable cache, a
//! bundled seed dataset and a set of local tombstones.
//!
//! ## Core Concepts
//!
//! - **Collections**: reconciled views with optimistic, locally-backed writes
//! - **Origins**: every id records whether the remote, this client or the
//!   seed dataset minted it
//! - **Tiers**: chat writes fall through shared documents, private
//!   mailboxes and the local cache
//! - **Signals**: local writes broadcast on an event bus so every open view
//!   re-reads
//!
//! ## Example
//!
//! ```ignore
//! use marketsync::{Participant, SyncStore};
//!
//! let store = SyncStore::builder().build()?;
//!
//! let _feed = store.listings().subscribe(|view| {
//!     println!("{} listings", view.len());
//! });
//!
//! let listing = store.listings().fetch().remove(0);
//! let buyer = Participant::new("u1", "구매자");
//! if let Some(room) = store.messenger().create_or_get_room(&buyer, &listing)? {
//!     store.messenger().send_message(&room, "안녕하세요", "u1", "bot-seller")?;
//! }
//! ```

pub mod clock;
pub mod collection;
pub mod config;
pub mod error;
pub mod keywords;
pub mod listings;
pub mod messaging;
pub mod reconcile;
pub mod remote;
pub mod seed;
pub mod storage;
pub mod store;
pub mod subscriptions;
pub mod tiers;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use collection::Collection;
pub use config::SyncConfig;
pub use error::{RemoteError, Result, SyncError};
pub use keywords::{match_listing, scan, KeywordBook, KeywordWatcher};
pub use listings::{Likes, RecentSearches};
pub use messaging::{merge_messages, merge_rooms, Delivery, Messenger};
pub use reconcile::reconcile;
pub use remote::{MemoryRemote, RemoteSnapshot, RemoteStore, RemoteSubscriptionId};
pub use storage::{FileStorage, LocalCache, LocalStorage, MemoryStorage};
pub use store::{SyncStore, SyncStoreBuilder};
pub use subscriptions::{EventBus, ListenerId, Signal, SignalFilter, SignalReceiver, Subscription};
pub use tiers::{Tier, TierChain};
pub use types::*;
