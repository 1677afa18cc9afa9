//! Listing helpers: likes, sold state, search and recent queries.

use crate::collection::Collection;
use crate::error::Result;
use crate::storage::LocalCache;
use crate::types::{EntityId, Listing};
use std::collections::BTreeSet;
use tracing::{debug, warn};

const LIKED: &str = "liked";
const RECENT_SEARCHES: &str = "recent_searches";

/// Listings this client has liked.
#[derive(Clone)]
pub struct Likes {
    cache: LocalCache,
}

impl Likes {
    pub fn new(cache: LocalCache) -> Self {
        Self { cache }
    }

    pub fn ids(&self) -> BTreeSet<EntityId> {
        self.cache.id_set(LIKED)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.ids().contains(id)
    }

    /// Like a listing once.
    ///
    /// The id is claimed first, then the like count of the current stored
    /// version is bumped through [`Collection::update`]. If that write
    /// fails the claim is released, so a retry can succeed. Returns `false`
    /// for a repeat like.
    pub fn like(&self, listings: &Collection<Listing>, listing: &Listing) -> Result<bool> {
        let added = self.cache.insert_ids(LIKED, std::slice::from_ref(&listing.id))?;
        if added.is_empty() {
            debug!(listing = %listing.id, "already liked");
            return Ok(false);
        }

        let mut liked = current(listings, listing);
        liked.likes = liked.likes.saturating_add(1);
        if let Err(e) = listings.update(&liked) {
            if let Err(release) = self.cache.remove_ids(LIKED, &added) {
                warn!(listing = %listing.id, error = %release, "could not release like claim");
            }
            return Err(e);
        }
        Ok(true)
    }
}

/// The freshest known version of `listing`, so writes built on it do not
/// roll back fields changed since the caller read it.
fn current(listings: &Collection<Listing>, listing: &Listing) -> Listing {
    listings.get(&listing.id).unwrap_or_else(|| listing.clone())
}

/// Liked listings, in view order.
pub fn watchlist(view: &[Listing], liked: &BTreeSet<EntityId>) -> Vec<Listing> {
    view.iter().filter(|l| liked.contains(&l.id)).cloned().collect()
}

/// Mark a listing as sold.
pub fn mark_sold(listings: &Collection<Listing>, listing: &Listing) -> Result<()> {
    let mut sold = current(listings, listing);
    if sold.is_sold {
        return Ok(());
    }
    sold.is_sold = true;
    listings.update(&sold)
}

/// Listings whose title, description, category or location contain
/// `query`, ignoring case. A blank query matches nothing.
pub fn search(view: &[Listing], query: &str) -> Vec<Listing> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }

    view.iter()
        .filter(|l| {
            [&l.title, &l.description, &l.category, &l.location]
                .iter()
                .any(|field| field.to_lowercase().contains(&query))
        })
        .cloned()
        .collect()
}

/// A seller's listings that are on sale (`sold == false`) or sold.
pub fn by_seller(view: &[Listing], seller: &str, sold: bool) -> Vec<Listing> {
    view.iter()
        .filter(|l| l.seller_id.as_deref() == Some(seller) && l.is_sold == sold)
        .cloned()
        .collect()
}

/// Recently submitted search queries, newest first.
#[derive(Clone)]
pub struct RecentSearches {
    cache: LocalCache,
    max: usize,
}

impl RecentSearches {
    pub fn new(cache: LocalCache, max: usize) -> Self {
        Self { cache, max }
    }

    pub fn list(&self) -> Vec<String> {
        self.cache.read(RECENT_SEARCHES)
    }

    /// Remember a query. Blank queries are ignored; a repeated query moves
    /// to the front.
    pub fn record(&self, query: &str) -> Result<()> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(());
        }
        let max = self.max;
        self.cache.modify(RECENT_SEARCHES, |list: &mut Vec<String>| {
            list.retain(|q| q != query);
            list.insert(0, query.to_string());
            list.truncate(max);
        })
    }

    pub fn remove(&self, query: &str) -> Result<()> {
        self.cache.modify(RECENT_SEARCHES, |list: &mut Vec<String>| {
            list.retain(|q| q != query);
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.cache.write(RECENT_SEARCHES, &Vec::<String>::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::Timestamp;
    use std::sync::Arc;

    fn listing(key: &str, title: &str, seller: &str, sold: bool) -> Listing {
        Listing {
            id: EntityId::seed(key),
            title: title.into(),
            price: 1000,
            description: "상태 좋아요".into(),
            category: "가구/인테리어".into(),
            image_url: String::new(),
            location: "역삼동".into(),
            created_at: Timestamp(1),
            likes: 0,
            seller_id: Some(seller.into()),
            seller_name: String::new(),
            is_sold: sold,
        }
    }

    fn cache() -> LocalCache {
        LocalCache::new(Arc::new(MemoryStorage::new()), "t_")
    }

    #[test]
    fn test_search_fields_and_blank_query() {
        let view = vec![
            listing("1", "Desk Lamp", "a", false),
            listing("2", "의자", "a", false),
        ];
        assert_eq!(search(&view, "lamp").len(), 1);
        assert_eq!(search(&view, "가구").len(), 2);
        assert_eq!(search(&view, "역삼").len(), 2);
        assert!(search(&view, "  ").is_empty());
    }

    #[test]
    fn test_by_seller_splits_sold() {
        let view = vec![
            listing("1", "a", "me", false),
            listing("2", "b", "me", true),
            listing("3", "c", "other", false),
        ];
        assert_eq!(by_seller(&view, "me", false).len(), 1);
        assert_eq!(by_seller(&view, "me", true)[0].id, EntityId::seed("2"));
    }

    #[test]
    fn test_recent_searches_dedup_and_cap() {
        let recent = RecentSearches::new(cache(), 3);
        for q in ["a", "b", "c", "a", "d", " "] {
            recent.record(q).unwrap();
        }
        assert_eq!(recent.list(), vec!["d", "a", "c"]);

        recent.remove("a").unwrap();
        assert_eq!(recent.list(), vec!["d", "c"]);
        recent.clear().unwrap();
        assert!(recent.list().is_empty());
    }

    #[test]
    fn test_watchlist_keeps_view_order() {
        let view = vec![
            listing("1", "a", "s", false),
            listing("2", "b", "s", false),
            listing("3", "c", "s", false),
        ];
        let liked: BTreeSet<EntityId> = [EntityId::seed("3"), EntityId::seed("1")].into_iter().collect();
        let ids: Vec<EntityId> = watchlist(&view, &liked).into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![EntityId::seed("1"), EntityId::seed("3")]);
    }
}
