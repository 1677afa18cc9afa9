//! Sync store facade tying all components together.

use crate::clock::{Clock, SystemClock};
use crate::collection::Collection;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::keywords::{KeywordBook, KeywordWatcher};
use crate::listings::{self, Likes, RecentSearches};
use crate::messaging::Messenger;
use crate::remote::{join_path, MemoryRemote, RemoteStore};
use crate::seed;
use crate::storage::{LocalCache, LocalStorage, MemoryStorage};
use crate::subscriptions::EventBus;
use crate::types::{EntityId, Listing, Notification};
use std::sync::Arc;
use tracing::debug;

/// Builder for [`SyncStore`].
///
/// Every collaborator has an in-process default. Two stores built over the
/// same storage backend and bus behave like two tabs of one client.
#[derive(Default)]
pub struct SyncStoreBuilder {
    config: SyncConfig,
    remote: Option<Arc<dyn RemoteStore>>,
    storage: Option<Arc<dyn LocalStorage>>,
    bus: Option<EventBus>,
    clock: Option<Arc<dyn Clock>>,
    seed: Option<Vec<Listing>>,
}

impl SyncStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn LocalStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the bundled seed listings.
    pub fn seed(mut self, seed: Vec<Listing>) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<SyncStore> {
        self.config.validate()?;
        let config = self.config;

        let remote = self
            .remote
            .unwrap_or_else(|| Arc::new(MemoryRemote::new()) as Arc<dyn RemoteStore>);
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as Arc<dyn LocalStorage>);
        let bus = self
            .bus
            .unwrap_or_else(|| EventBus::with_buffer_size(config.bus_buffer));
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);

        let seed = match (config.include_seed, self.seed) {
            (false, _) => Vec::new(),
            (true, Some(seed)) => seed,
            (true, None) => seed::listings(),
        };

        let cache = LocalCache::new(storage, &config.storage_prefix);
        let listings = Collection::new(
            "products",
            config.listings_path.clone(),
            Arc::clone(&remote),
            cache.clone(),
            bus.clone(),
            seed,
        );
        let messenger = Messenger::new(
            &config,
            Arc::clone(&remote),
            cache.clone(),
            bus.clone(),
            Arc::clone(&clock),
        );
        let keywords = KeywordBook::new(cache.clone(), config.max_keywords);
        let likes = Likes::new(cache.clone());
        let recent_searches = RecentSearches::new(cache.clone(), config.max_recent_searches);

        debug!(prefix = %config.storage_prefix, "sync store ready");

        Ok(SyncStore {
            config,
            remote,
            cache,
            bus,
            clock,
            listings,
            messenger,
            keywords,
            likes,
            recent_searches,
        })
    }
}

/// The client-side sync layer.
///
/// Provides a unified interface for:
/// - Reconciled listing and notification collections
/// - Chat rooms and messages
/// - Keyword subscriptions and keyword notifications
/// - Likes, sold state and search helpers
pub struct SyncStore {
    config: SyncConfig,
    remote: Arc<dyn RemoteStore>,
    cache: LocalCache,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    listings: Collection<Listing>,
    messenger: Messenger,
    keywords: KeywordBook,
    likes: Likes,
    recent_searches: RecentSearches,
}

impl SyncStore {
    pub fn builder() -> SyncStoreBuilder {
        SyncStoreBuilder::new()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    // --- Listings ---

    pub fn listings(&self) -> &Collection<Listing> {
        &self.listings
    }

    pub fn likes(&self) -> &Likes {
        &self.likes
    }

    /// Like a listing once. Returns `false` if it was already liked.
    pub fn like(&self, listing: &Listing) -> Result<bool> {
        self.likes.like(&self.listings, listing)
    }

    /// Liked listings in feed order.
    pub fn watchlist(&self) -> Vec<Listing> {
        listings::watchlist(&self.listings.fetch(), &self.likes.ids())
    }

    pub fn mark_sold(&self, listing: &Listing) -> Result<()> {
        listings::mark_sold(&self.listings, listing)
    }

    /// Search the current feed and remember the query.
    pub fn search(&self, query: &str) -> Result<Vec<Listing>> {
        self.recent_searches.record(query)?;
        Ok(listings::search(&self.listings.fetch(), query))
    }

    pub fn recent_searches(&self) -> &RecentSearches {
        &self.recent_searches
    }

    // --- Notifications ---

    /// The notification collection of one user.
    pub fn notifications(&self, user: &str) -> Collection<Notification> {
        Collection::new(
            format!("notifications_{}", user),
            join_path(&[&self.config.notifications_path, user]),
            Arc::clone(&self.remote),
            self.cache.clone(),
            self.bus.clone(),
            Vec::new(),
        )
    }

    /// Mark a notification read. Returns whether anything changed.
    pub fn mark_read(&self, user: &str, id: &EntityId) -> Result<bool> {
        let notifications = self.notifications(user);
        match notifications.get(id) {
            Some(mut notification) if !notification.is_read => {
                notification.is_read = true;
                notifications.update(&notification)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn unread_count(&self, user: &str) -> usize {
        self.notifications(user)
            .fetch()
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    // --- Messaging and keywords ---

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    pub fn keywords(&self) -> &KeywordBook {
        &self.keywords
    }

    /// Start matching new listings against `user`'s keywords.
    pub fn watch_keywords(&self, user: &str) -> KeywordWatcher {
        KeywordWatcher::start(
            user,
            &self.listings,
            self.notifications(user),
            self.keywords.clone(),
            self.cache.clone(),
            Arc::clone(&self.clock),
        )
    }
}
