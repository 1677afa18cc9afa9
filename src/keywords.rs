//! Keyword subscriptions and keyword notifications.

use crate::clock::Clock;
use crate::collection::Collection;
use crate::error::{Result, SyncError};
use crate::storage::LocalCache;
use crate::subscriptions::Subscription;
use crate::types::{EntityId, Listing, Notification, NotificationKind};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-user keyword lists, persisted locally.
#[derive(Clone)]
pub struct KeywordBook {
    cache: LocalCache,
    max_keywords: usize,
}

impl KeywordBook {
    pub fn new(cache: LocalCache, max_keywords: usize) -> Self {
        Self { cache, max_keywords }
    }

    fn name(user: &str) -> String {
        format!("keywords_{}", user)
    }

    /// Keywords in the order they were added.
    pub fn list(&self, user: &str) -> Vec<String> {
        self.cache.read(&Self::name(user))
    }

    /// Add a keyword, returning the stored (trimmed) form.
    ///
    /// Empty input, case-insensitive duplicates and additions past the
    /// configured maximum are rejected with [`SyncError::InvalidInput`].
    pub fn add(&self, user: &str, keyword: &str) -> Result<String> {
        let keyword = keyword.trim().to_string();
        if keyword.is_empty() {
            return Err(SyncError::InvalidInput("keyword is empty".into()));
        }

        let max = self.max_keywords;
        self.cache
            .modify(&Self::name(user), |list: &mut Vec<String>| {
                let folded = keyword.to_lowercase();
                if list.iter().any(|k| k.to_lowercase() == folded) {
                    return Err(SyncError::InvalidInput(format!(
                        "keyword {:?} already registered",
                        keyword
                    )));
                }
                if list.len() >= max {
                    return Err(SyncError::InvalidInput(format!(
                        "at most {} keywords allowed",
                        max
                    )));
                }
                list.push(keyword.clone());
                Ok(keyword.clone())
            })?
    }

    /// Remove a keyword. Returns whether it was registered.
    pub fn remove(&self, user: &str, keyword: &str) -> Result<bool> {
        let keyword = keyword.trim();
        self.cache.modify(&Self::name(user), |list: &mut Vec<String>| {
            let before = list.len();
            list.retain(|k| k != keyword);
            list.len() != before
        })
    }
}

/// First keyword, in list order, found in the listing's title or
/// description. Matching ignores case.
pub fn match_listing<'k>(keywords: &'k [String], listing: &Listing) -> Option<&'k str> {
    let title = listing.title.to_lowercase();
    let description = listing.description.to_lowercase();
    keywords
        .iter()
        .map(String::as_str)
        .filter(|k| !k.is_empty())
        .find(|k| {
            let needle = k.to_lowercase();
            title.contains(&needle) || description.contains(&needle)
        })
}

/// Listings that should notify `user`, paired with the matching keyword.
///
/// The user's own listings and already notified ids are skipped.
pub fn scan<'l>(
    user: &str,
    keywords: &[String],
    listings: &'l [Listing],
    notified: &BTreeSet<EntityId>,
) -> Vec<(String, &'l Listing)> {
    listings
        .iter()
        .filter(|l| l.seller_id.as_deref() != Some(user))
        .filter(|l| !notified.contains(&l.id))
        .filter_map(|l| match_listing(keywords, l).map(|k| (k.to_string(), l)))
        .collect()
}

/// Build the notification for a keyword hit.
pub fn keyword_notification(
    user: &str,
    keyword: &str,
    listing: &Listing,
    clock: &dyn Clock,
) -> Notification {
    Notification {
        id: EntityId::provisional(),
        user_id: user.to_string(),
        kind: NotificationKind::Keyword,
        text: format!("\"{}\" 키워드 알림", keyword),
        subtext: Some(format!("새로운 상품이 등록되었습니다: {}", listing.title)),
        timestamp: clock.now(),
        is_read: false,
        image_url: Some(listing.image_url.clone()).filter(|url| !url.is_empty()),
    }
}

/// Standing keyword matcher for one user.
///
/// Every listing snapshot is scanned; each listing id notifies at most
/// once, ever. The notified set is persisted before the notification is
/// created, so a crash in between loses a notification rather than
/// duplicating it.
pub struct KeywordWatcher {
    subscription: Subscription,
}

impl KeywordWatcher {
    pub fn start(
        user: &str,
        listings: &Collection<Listing>,
        notifications: Collection<Notification>,
        book: KeywordBook,
        cache: LocalCache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let user = user.to_string();
        let notified_name = format!("notified_{}", user);

        let subscription = listings.subscribe(move |view| {
            let keywords = book.list(&user);
            if keywords.is_empty() {
                return;
            }

            let notified = cache.id_set(&notified_name);
            let hits = scan(&user, &keywords, view, &notified);
            if hits.is_empty() {
                return;
            }

            let ids: Vec<EntityId> = hits.iter().map(|(_, l)| l.id.clone()).collect();
            let claimed = match cache.insert_ids(&notified_name, &ids) {
                Ok(claimed) => claimed,
                Err(e) => {
                    warn!(user = %user, error = %e, "could not persist notified set, skipping");
                    return;
                }
            };

            for (keyword, listing) in hits.into_iter().filter(|(_, l)| claimed.contains(&l.id)) {
                let notification = keyword_notification(&user, &keyword, listing, clock.as_ref());
                match notifications.create(notification) {
                    Ok(id) => {
                        info!(user = %user, listing = %listing.id, notification = %id, "keyword match")
                    }
                    Err(e) => {
                        warn!(user = %user, listing = %listing.id, error = %e, "keyword notification lost")
                    }
                }
            }
        });

        debug!(parts = subscription.parts(), "keyword watcher started");
        Self { subscription }
    }

    /// Stop watching.
    pub fn stop(self) {
        self.subscription.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;
    use crate::types::Timestamp;

    fn listing(key: &str, title: &str, seller: &str) -> Listing {
        Listing {
            id: EntityId::remote(key),
            title: title.into(),
            price: 1000,
            description: String::new(),
            category: String::new(),
            image_url: String::new(),
            location: String::new(),
            created_at: Timestamp(1),
            likes: 0,
            seller_id: Some(seller.into()),
            seller_name: String::new(),
            is_sold: false,
        }
    }

    fn book(max: usize) -> KeywordBook {
        KeywordBook::new(LocalCache::new(Arc::new(MemoryStorage::new()), "t_"), max)
    }

    #[test]
    fn test_add_trims_and_rejects_bad_input() {
        let book = book(2);
        assert_eq!(book.add("u", "  자전거 ").unwrap(), "자전거");
        assert!(matches!(book.add("u", "   "), Err(SyncError::InvalidInput(_))));
        assert!(matches!(book.add("u", "자전거"), Err(SyncError::InvalidInput(_))));
        book.add("u", "Lamp").unwrap();
        assert!(matches!(book.add("u", "lamp"), Err(SyncError::InvalidInput(_))));
        assert!(matches!(book.add("u", "책상"), Err(SyncError::InvalidInput(_))));
        assert_eq!(book.list("u"), vec!["자전거".to_string(), "Lamp".to_string()]);
    }

    #[test]
    fn test_remove_keyword() {
        let book = book(30);
        book.add("u", "의자").unwrap();
        assert!(book.remove("u", "의자").unwrap());
        assert!(!book.remove("u", "의자").unwrap());
        assert!(book.list("u").is_empty());
    }

    #[test]
    fn test_first_keyword_in_list_order_wins() {
        let keywords = vec!["팝니다".to_string(), "자전거".to_string()];
        let hit = listing("a", "자전거 팝니다", "seller");
        assert_eq!(match_listing(&keywords, &hit), Some("팝니다"));

        let mut by_description = listing("b", "급처", "seller");
        by_description.description = "BIKE in good shape".into();
        assert_eq!(match_listing(&["bike".to_string()], &by_description), Some("bike"));
    }

    #[test]
    fn test_scan_skips_own_and_notified() {
        let keywords = vec!["자전거".to_string()];
        let listings = vec![
            listing("mine", "내 자전거", "me"),
            listing("seen", "자전거 1", "other"),
            listing("new", "자전거 2", "other"),
            listing("other", "책상", "other"),
        ];
        let notified: BTreeSet<EntityId> = [EntityId::remote("seen")].into_iter().collect();

        let hits = scan("me", &keywords, &listings, &notified);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1.id, EntityId::remote("new"));
    }

    #[test]
    fn test_notification_text() {
        let clock = ManualClock::new(42, 1);
        let n = keyword_notification("u", "자전거", &listing("a", "자전거 팝니다", "s"), &clock);
        assert_eq!(n.text, "\"자전거\" 키워드 알림");
        assert_eq!(n.subtext.as_deref(), Some("새로운 상품이 등록되었습니다: 자전거 팝니다"));
        assert_eq!(n.kind, NotificationKind::Keyword);
        assert_eq!(n.timestamp, Timestamp(42));
        assert_eq!(n.image_url, None);
    }
}
