//! Chat rooms and messages.
//!
//! Room metadata is written through a [`TierChain`]: the shared room
//! document first, then the acting user's private mailbox entry, then the
//! local cache. Messages go to the remote log when possible and to a local
//! per-room log otherwise. Views merge every source, with local data
//! winning over private mailbox entries, which win over shared documents.

use crate::clock::Clock;
use crate::collection::{decode_snapshot, to_remote_value};
use crate::config::SyncConfig;
use crate::error::{RemoteError, Result};
use crate::remote::{
    join_path, RemoteSnapshot, RemoteStore, RemoteSubscriptionId, SnapshotCallback,
};
use crate::storage::LocalCache;
use crate::subscriptions::{EventBus, Signal, Subscription};
use crate::tiers::{Tier, TierChain};
use crate::types::{ChatMessage, ChatRoom, EntityId, Listing, Participant, RoomId, Timestamp};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Display name used when a listing carries no seller name.
const UNKNOWN_SELLER_NAME: &str = "당근이웃";

/// Where a sent message was stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Appended to the remote message log.
    Remote,
    /// Kept in this client's local message log only.
    Local,
}

struct MessengerInner {
    remote: Arc<dyn RemoteStore>,
    cache: LocalCache,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    rooms_path: String,
    mailbox_path: String,
    messages_path: String,
    placeholder_seller: String,
}

impl MessengerInner {
    fn shared_path(&self, room: &RoomId) -> String {
        join_path(&[&self.rooms_path, room.as_str()])
    }

    fn mailbox_root(&self, user: &str) -> String {
        join_path(&[&self.mailbox_path, user])
    }

    fn mailbox_entry(&self, user: &str, room: &RoomId) -> String {
        join_path(&[&self.mailbox_path, user, room.as_str()])
    }

    fn log_path(&self, room: &RoomId) -> String {
        join_path(&[&self.messages_path, room.as_str()])
    }

    /// Merge fields into a remote room document that must already exist.
    ///
    /// Prevents metadata-only updates from creating half-formed rooms.
    fn update_existing(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        if self.remote.get(path)?.is_none() {
            return Err(RemoteError::NotFound(path.to_string()).into());
        }
        self.remote.update(path, fields)?;
        Ok(())
    }

    fn remote_room(&self, path: &str, room: &RoomId) -> Option<ChatRoom> {
        match self.remote.get(path) {
            Ok(Some(value)) => decode_room(room.as_str(), value),
            Ok(None) => None,
            Err(e) => {
                debug!(path = %path, error = %e, "remote room read failed");
                None
            }
        }
    }

    /// Room lookup with local over private over shared precedence.
    fn find_room(&self, room: &RoomId, user: &str) -> Option<ChatRoom> {
        if let Some(local) = self.cache.rooms().remove(room) {
            if local.has_participant(user) {
                return Some(local);
            }
            debug!(room = %room, "local room belongs to other participants");
        }
        self.remote_room(&self.mailbox_entry(user, room), room)
            .or_else(|| self.remote_room(&self.shared_path(room), room))
    }

    /// Record a message's metadata on the local copy of a room.
    ///
    /// A room missing locally is seeded from any readable remote copy, or
    /// rebuilt from the two participants as a last resort.
    fn touch_local_room(
        &self,
        room: &RoomId,
        sender: &str,
        receiver: &str,
        text: &str,
        at: Timestamp,
    ) -> Result<()> {
        self.cache.upsert_room(
            room,
            || {
                self.remote_room(&self.mailbox_entry(sender, room), room)
                    .or_else(|| self.remote_room(&self.shared_path(room), room))
                    .unwrap_or_else(|| skeleton_room(room, sender, receiver, at))
            },
            |stored| {
                stored.last_message = text.to_string();
                stored.last_message_at = Some(at);
                stored.updated_at = at;
            },
        )
    }

    /// Apply a successful remote room write to the local copy, if any.
    ///
    /// Local rooms win in every view, so a copy left over from an offline
    /// period would otherwise shadow the fresher remote document. Returns
    /// whether a local room changed.
    fn sync_local_room(&self, room: &RoomId, update: impl FnOnce(&mut ChatRoom)) -> bool {
        match self.cache.update_room(room, update) {
            Ok(changed) => changed,
            Err(e) => {
                warn!(room = %room, error = %e, "local room copy not refreshed");
                false
            }
        }
    }

    fn merged_rooms(&self, user: &str, sources: &RoomSources) -> Vec<ChatRoom> {
        let local: Vec<ChatRoom> = self.cache.rooms().into_values().collect();
        merge_rooms(user, &sources.shared, &sources.private, &local)
    }
}

#[derive(Clone, Default)]
struct RoomSources {
    shared: Vec<ChatRoom>,
    private: Vec<ChatRoom>,
}

impl RoomSources {
    fn shared_mut(&mut self) -> &mut Vec<ChatRoom> {
        &mut self.shared
    }

    fn private_mut(&mut self) -> &mut Vec<ChatRoom> {
        &mut self.private
    }
}

/// Chat room and message coordinator.
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<MessengerInner>,
}

impl Messenger {
    pub fn new(
        config: &SyncConfig,
        remote: Arc<dyn RemoteStore>,
        cache: LocalCache,
        bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(MessengerInner {
                remote,
                cache,
                bus,
                clock,
                rooms_path: join_path(&[&config.rooms_path]),
                mailbox_path: join_path(&[&config.mailbox_path]),
                messages_path: join_path(&[&config.messages_path]),
                placeholder_seller: config.placeholder_seller.clone(),
            }),
        }
    }

    /// Open the room between `buyer` and the listing's seller.
    ///
    /// Returns `None` when the buyer is the seller. Repeated calls for the
    /// same pair yield the same room id and never clear a room's last
    /// message.
    pub fn create_or_get_room(&self, buyer: &Participant, listing: &Listing) -> Result<Option<RoomId>> {
        let inner = &self.inner;
        let seller = listing
            .seller_id
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| inner.placeholder_seller.clone());

        if buyer.id == seller {
            debug!(listing = %listing.id, "buyer owns the listing, no room");
            return Ok(None);
        }

        let room_id = RoomId::derive(&listing.id, &buyer.id);
        let now = inner.clock.now();

        let seller_name = if listing.seller_name.is_empty() {
            UNKNOWN_SELLER_NAME.to_string()
        } else {
            listing.seller_name.clone()
        };
        let mut participant_names = BTreeMap::new();
        participant_names.insert(buyer.id.clone(), buyer.name.clone());
        participant_names.insert(seller.clone(), seller_name);

        let room = ChatRoom {
            id: room_id.clone(),
            listing_id: Some(listing.id.clone()),
            listing_title: listing.title.clone(),
            listing_image: listing.image_url.clone(),
            participants: vec![buyer.id.clone(), seller],
            participant_names,
            last_message: String::new(),
            last_message_at: None,
            updated_at: now,
        };
        let fields = room_fields(&room)?;
        let apply_fields = |stored: &mut ChatRoom| {
            stored.listing_id = room.listing_id.clone();
            stored.listing_title = room.listing_title.clone();
            stored.listing_image = room.listing_image.clone();
            stored.participants = room.participants.clone();
            stored.participant_names = room.participant_names.clone();
            stored.updated_at = room.updated_at;
        };

        let tier = TierChain::new("open room")
            .then(Tier::Shared, || {
                inner.remote.update(&inner.shared_path(&room_id), fields.clone())?;
                Ok(())
            })
            .then(Tier::Private, || {
                inner
                    .remote
                    .update(&inner.mailbox_entry(&buyer.id, &room_id), fields.clone())?;
                Ok(())
            })
            .then(Tier::Local, || {
                inner.cache.upsert_room(&room_id, || room.clone(), &apply_fields)
            })
            .run()?;

        let refreshed = tier != Tier::Local && inner.sync_local_room(&room_id, &apply_fields);
        if tier == Tier::Local || refreshed {
            inner.bus.publish(Signal::RoomsChanged);
        }
        info!(room = %room_id, tier = %tier, "room ready");
        Ok(Some(room_id))
    }

    /// Send a message.
    ///
    /// Blank text is ignored and yields `None`. Otherwise the message is
    /// appended remotely when possible, or locally under a provisional id.
    /// Room metadata follows the same tiers as room creation. Fails only if
    /// every tier fails.
    pub fn send_message(
        &self,
        room: &RoomId,
        text: &str,
        sender: &str,
        receiver: &str,
    ) -> Result<Option<Delivery>> {
        let inner = &self.inner;
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let now = inner.clock.now();
        let message = ChatMessage {
            id: EntityId::provisional(),
            sender_id: sender.to_string(),
            text: text.to_string(),
            timestamp: now,
        };

        match inner.remote.push(&inner.log_path(room), to_remote_value(&message)?) {
            Ok(key) => {
                debug!(room = %room, key = %key, "message stored remotely");
                let meta = metadata_fields(text, now);
                let tier = TierChain::new("room metadata")
                    .then(Tier::Shared, || {
                        inner.update_existing(&inner.shared_path(room), meta.clone())
                    })
                    .then(Tier::Private, || {
                        inner.update_existing(&inner.mailbox_entry(sender, room), meta.clone())
                    })
                    .then(Tier::Local, || {
                        inner.touch_local_room(room, sender, receiver, text, now)
                    })
                    .run()?;
                let refreshed = tier != Tier::Local
                    && inner.sync_local_room(room, |stored| {
                        stored.last_message = text.to_string();
                        stored.last_message_at = Some(now);
                        stored.updated_at = now;
                    });
                if tier == Tier::Local || refreshed {
                    inner.bus.publish(Signal::RoomsChanged);
                }
                Ok(Some(Delivery::Remote))
            }
            Err(e) => {
                warn!(room = %room, error = %e, "remote send failed, keeping message locally");
                inner.cache.append_message(room, message)?;
                inner.touch_local_room(room, sender, receiver, text, now)?;
                inner.bus.publish(Signal::RoomMessagesChanged { room: room.clone() });
                inner.bus.publish(Signal::RoomsChanged);
                Ok(Some(Delivery::Local))
            }
        }
    }

    /// Watch the rooms `user` takes part in, most recently active first.
    pub fn subscribe_my_rooms(
        &self,
        user: &str,
        on_rooms: impl Fn(&[ChatRoom]) + Send + Sync + 'static,
    ) -> Subscription {
        let sources = Arc::new(Mutex::new(RoomSources::default()));
        let on_rooms: Arc<dyn Fn(&[ChatRoom]) + Send + Sync> = Arc::new(on_rooms);
        let user: Arc<str> = Arc::from(user);

        let emit: Arc<dyn Fn() + Send + Sync> = {
            let inner = Arc::clone(&self.inner);
            let sources = Arc::clone(&sources);
            let user = Arc::clone(&user);
            Arc::new(move || {
                let snapshot = sources.lock().clone();
                let rooms = inner.merged_rooms(&user, &snapshot);
                on_rooms(&rooms);
            })
        };

        emit();

        let mut subscription = Subscription::new();

        let on_signal = Arc::clone(&emit);
        let listener = self.inner.bus.listen(move |signal| {
            if *signal == Signal::RoomsChanged {
                on_signal();
            }
        });
        let bus = self.inner.bus.clone();
        subscription.on_dispose(move || bus.unlisten(listener));

        let shared = self.watch_rooms(
            &self.inner.rooms_path,
            &sources,
            &emit,
            RoomSources::shared_mut,
        );
        let private = self.watch_rooms(
            &self.inner.mailbox_root(&user),
            &sources,
            &emit,
            RoomSources::private_mut,
        );
        for id in [shared, private] {
            let remote = Arc::clone(&self.inner.remote);
            subscription.on_dispose(move || remote.unsubscribe(id));
        }

        subscription
    }

    fn watch_rooms(
        &self,
        path: &str,
        sources: &Arc<Mutex<RoomSources>>,
        emit: &Arc<dyn Fn() + Send + Sync>,
        slot: fn(&mut RoomSources) -> &mut Vec<ChatRoom>,
    ) -> RemoteSubscriptionId {
        let callback: SnapshotCallback = {
            let sources = Arc::clone(sources);
            let emit = Arc::clone(emit);
            let path = path.to_string();
            Arc::new(move |result| {
                let rooms = match result {
                    Ok(snapshot) => decode_rooms(&snapshot, &path),
                    Err(e) => {
                        warn!(path = %path, error = %e, "room snapshot failed");
                        Vec::new()
                    }
                };
                {
                    let mut guard = sources.lock();
                    *slot(&mut *guard) = rooms;
                }
                emit();
            })
        };
        self.inner.remote.subscribe(path, None, callback)
    }

    /// Watch one room's messages in send order.
    pub fn subscribe_messages(
        &self,
        room: &RoomId,
        on_messages: impl Fn(&[ChatMessage]) + Send + Sync + 'static,
    ) -> Subscription {
        let remote_rows: Arc<Mutex<Vec<ChatMessage>>> = Arc::new(Mutex::new(Vec::new()));

        let emit: Arc<dyn Fn() + Send + Sync> = {
            let cache = self.inner.cache.clone();
            let rows = Arc::clone(&remote_rows);
            let room = room.clone();
            Arc::new(move || {
                let remote = rows.lock().clone();
                let messages = merge_messages(&remote, &cache.messages(&room));
                on_messages(&messages);
            })
        };

        emit();

        let mut subscription = Subscription::new();

        let on_signal = Arc::clone(&emit);
        let watched = room.clone();
        let listener = self.inner.bus.listen(move |signal| {
            if matches!(signal, Signal::RoomMessagesChanged { room } if *room == watched) {
                on_signal();
            }
        });
        let bus = self.inner.bus.clone();
        subscription.on_dispose(move || bus.unlisten(listener));

        let path = self.inner.log_path(room);
        let callback: SnapshotCallback = {
            let path = path.clone();
            Arc::new(move |result| {
                match result {
                    Ok(snapshot) => *remote_rows.lock() = decode_snapshot(&snapshot, &path),
                    Err(e) => {
                        warn!(path = %path, error = %e, "message snapshot failed, serving local log");
                        remote_rows.lock().clear();
                    }
                }
                emit();
            })
        };
        let remote_id = self.inner.remote.subscribe(&path, Some("timestamp"), callback);
        let remote = Arc::clone(&self.inner.remote);
        subscription.on_dispose(move || remote.unsubscribe(remote_id));

        subscription
    }

    /// Look up one room as `user` sees it.
    pub fn room(&self, room: &RoomId, user: &str) -> Option<ChatRoom> {
        self.inner.find_room(room, user)
    }
}

/// Room fields written on creation. Last-message fields are left alone so
/// reopening a room never clears them.
fn room_fields(room: &ChatRoom) -> Result<Map<String, Value>> {
    let mut fields = match serde_json::to_value(room)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for key in ["id", "last_message", "last_message_at"] {
        fields.remove(key);
    }
    Ok(fields)
}

fn metadata_fields(text: &str, at: Timestamp) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("last_message".into(), Value::String(text.to_string()));
    fields.insert("last_message_at".into(), Value::from(at.0));
    fields.insert("updated_at".into(), Value::from(at.0));
    fields
}

fn skeleton_room(room: &RoomId, sender: &str, receiver: &str, at: Timestamp) -> ChatRoom {
    ChatRoom {
        id: room.clone(),
        listing_id: None,
        listing_title: String::new(),
        listing_image: String::new(),
        participants: vec![sender.to_string(), receiver.to_string()],
        participant_names: BTreeMap::new(),
        last_message: String::new(),
        last_message_at: None,
        updated_at: at,
    }
}

fn decode_room(key: &str, mut value: Value) -> Option<ChatRoom> {
    if let Value::Object(map) = &mut value {
        map.insert("id".into(), Value::String(key.to_string()));
    }
    match serde_json::from_value(value) {
        Ok(room) => Some(room),
        Err(e) => {
            warn!(room = %key, error = %e, "skipping malformed remote room");
            None
        }
    }
}

fn decode_rooms(snapshot: &RemoteSnapshot, path: &str) -> Vec<ChatRoom> {
    debug!(path = %path, rooms = snapshot.len(), "room snapshot");
    snapshot
        .children
        .iter()
        .filter_map(|(key, value)| decode_room(key, value.clone()))
        .collect()
}

/// Merge room sources for one user.
///
/// Shared documents count only when the user participates; mailbox and
/// local rooms are taken as the user's own. Later sources replace earlier
/// ones per room. Output is ordered by activity, newest first, then id.
pub fn merge_rooms(
    user: &str,
    shared: &[ChatRoom],
    private: &[ChatRoom],
    local: &[ChatRoom],
) -> Vec<ChatRoom> {
    let mut merged: BTreeMap<RoomId, ChatRoom> = BTreeMap::new();

    for room in shared.iter().filter(|r| r.has_participant(user)) {
        merged.insert(room.id.clone(), room.clone());
    }
    for room in private {
        merged.insert(room.id.clone(), room.clone());
    }
    for room in local.iter().filter(|r| r.has_participant(user)) {
        merged.insert(room.id.clone(), room.clone());
    }

    let mut rooms: Vec<ChatRoom> = merged.into_values().collect();
    rooms.sort_by(|a, b| b.activity().cmp(&a.activity()).then_with(|| a.id.cmp(&b.id)));
    rooms
}

/// Merge remote and local message logs, oldest first.
///
/// A message present in both keeps its local copy.
pub fn merge_messages(remote: &[ChatMessage], local: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut merged: BTreeMap<EntityId, ChatMessage> = BTreeMap::new();
    for message in remote.iter().chain(local) {
        merged.insert(message.id.clone(), message.clone());
    }

    let mut messages: Vec<ChatMessage> = merged.into_values().collect();
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::remote::MemoryRemote;
    use crate::storage::MemoryStorage;

    fn listing(seller: Option<&str>) -> Listing {
        Listing {
            id: EntityId::remote("p1"),
            title: "자전거".into(),
            price: 50000,
            description: String::new(),
            category: "스포츠/레저".into(),
            image_url: "bike.png".into(),
            location: "역삼동".into(),
            created_at: Timestamp(1),
            likes: 0,
            seller_id: seller.map(str::to_string),
            seller_name: "판매자".into(),
            is_sold: false,
        }
    }

    fn setup() -> (Arc<MemoryRemote>, LocalCache, Messenger) {
        let remote = Arc::new(MemoryRemote::new());
        let cache = LocalCache::new(Arc::new(MemoryStorage::new()), "t_");
        let messenger = Messenger::new(
            &SyncConfig::default(),
            remote.clone(),
            cache.clone(),
            EventBus::new(),
            Arc::new(ManualClock::new(1_000, 10)),
        );
        (remote, cache, messenger)
    }

    fn room(id: &str, participants: &[&str], activity: i64) -> ChatRoom {
        ChatRoom {
            id: RoomId(id.into()),
            listing_id: None,
            listing_title: id.into(),
            listing_image: String::new(),
            participants: participants.iter().map(|p| p.to_string()).collect(),
            participant_names: BTreeMap::new(),
            last_message: String::new(),
            last_message_at: Some(Timestamp(activity)),
            updated_at: Timestamp(0),
        }
    }

    fn message(id: EntityId, at: i64) -> ChatMessage {
        ChatMessage {
            id,
            sender_id: "u".into(),
            text: "hi".into(),
            timestamp: Timestamp(at),
        }
    }

    #[test]
    fn test_self_chat_is_refused() {
        let (remote, _cache, messenger) = setup();
        let buyer = Participant::new("seller", "판매자");
        assert_eq!(messenger.create_or_get_room(&buyer, &listing(Some("seller"))).unwrap(), None);
        assert!(remote.writes().is_empty());
    }

    #[test]
    fn test_unknown_seller_uses_placeholder() {
        let (_remote, _cache, messenger) = setup();
        let buyer = Participant::new("buyer", "구매자");
        let id = messenger
            .create_or_get_room(&buyer, &listing(None))
            .unwrap()
            .unwrap();

        let room = messenger.room(&id, "buyer").unwrap();
        assert_eq!(room.participants, vec!["buyer".to_string(), "bot-seller".to_string()]);
        assert_eq!(room.counterpart("buyer"), Some("bot-seller"));
    }

    #[test]
    fn test_room_creation_falls_back_to_mailbox() {
        let (remote, cache, messenger) = setup();
        remote.deny("chats");
        let buyer = Participant::new("buyer", "구매자");

        let id = messenger
            .create_or_get_room(&buyer, &listing(Some("seller")))
            .unwrap()
            .unwrap();

        assert!(remote.get(&format!("user_chats/buyer/{}", id)).unwrap().is_some());
        assert!(cache.rooms().is_empty());
    }

    #[test]
    fn test_blank_message_is_ignored() {
        let (remote, _cache, messenger) = setup();
        let room = RoomId("r".into());
        assert_eq!(messenger.send_message(&room, "   ", "a", "b").unwrap(), None);
        assert!(remote.writes().is_empty());
    }

    #[test]
    fn test_reopening_keeps_last_message() {
        let (_remote, _cache, messenger) = setup();
        let buyer = Participant::new("buyer", "구매자");
        let listing = listing(Some("seller"));

        let id = messenger.create_or_get_room(&buyer, &listing).unwrap().unwrap();
        assert_eq!(
            messenger.send_message(&id, "안녕하세요", "buyer", "seller").unwrap(),
            Some(Delivery::Remote)
        );
        let again = messenger.create_or_get_room(&buyer, &listing).unwrap().unwrap();

        assert_eq!(again, id);
        assert_eq!(messenger.room(&id, "buyer").unwrap().last_message, "안녕하세요");
    }

    #[test]
    fn test_local_room_hidden_from_non_participants() {
        let (remote, _cache, messenger) = setup();
        remote.set_online(false);
        let buyer = Participant::new("buyer", "구매자");

        let id = messenger
            .create_or_get_room(&buyer, &listing(Some("seller")))
            .unwrap()
            .unwrap();

        assert!(messenger.room(&id, "buyer").is_some());
        assert!(messenger.room(&id, "seller").is_some());
        assert!(messenger.room(&id, "someone-else").is_none());
    }

    #[test]
    fn test_merge_rooms_precedence_and_order() {
        let shared = vec![room("a", &["u", "x"], 5), room("b", &["x", "y"], 9)];
        let mut private_a = room("a", &["u", "x"], 5);
        private_a.listing_title = "private".into();
        let mut local_a = room("a", &["u", "x"], 7);
        local_a.listing_title = "local".into();
        let local = vec![local_a, room("c", &["u", "z"], 7)];

        let merged = merge_rooms("u", &shared, &[private_a], &local);
        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();

        // "b" is not the user's; equal activity breaks ties by id.
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(merged[0].listing_title, "local");
    }

    #[test]
    fn test_merge_messages_dedups_and_orders() {
        let shared_id = EntityId::remote("-K1");
        let remote = vec![message(shared_id.clone(), 20), message(EntityId::remote("-K0"), 10)];
        let mut local_copy = message(shared_id.clone(), 20);
        local_copy.text = "local".into();
        let local = vec![local_copy, message(EntityId::local("x"), 15)];

        let merged = merge_messages(&remote, &local);
        let stamps: Vec<i64> = merged.iter().map(|m| m.timestamp.0).collect();
        assert_eq!(stamps, vec![10, 15, 20]);
        assert_eq!(merged[2].text, "local");
    }
}
