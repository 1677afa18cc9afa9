//! Local durable storage.
//!
//! Two layers:
//! - [`LocalStorage`]: synchronous string-keyed backend (memory or files)
//! - [`LocalCache`]: typed tables on top of it (overrides, tombstones,
//!   room logs, per-user sets)

mod backend;
mod cache;

pub use backend::{FileStorage, LocalStorage, MemoryStorage};
pub use cache::LocalCache;
