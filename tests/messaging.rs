//! Chat room and message tests.

use marketsync::{
    seed, ChatMessage, ChatRoom, Delivery, Listing, ManualClock, MemoryRemote, Participant,
    RemoteStore, RoomId, Signal, SignalFilter, SyncStore,
};
use parking_lot::Mutex;
use std::sync::Arc;

fn test_store(remote: &Arc<MemoryRemote>) -> SyncStore {
    SyncStore::builder()
        .remote(remote.clone())
        .clock(Arc::new(ManualClock::new(1_900_000_000_000, 1_000)))
        .build()
        .unwrap()
}

fn bike() -> Listing {
    let mut listing = seed::listings()
        .into_iter()
        .find(|l| l.title.contains("자전거"))
        .unwrap();
    listing.seller_id = Some("seller".to_string());
    listing.seller_name = "판매자".to_string();
    listing
}

fn buyer() -> Participant {
    Participant::new("buyer", "구매자")
}

fn texts(messages: &[ChatMessage]) -> Vec<String> {
    messages.iter().map(|m| m.text.clone()).collect()
}

type Views<T> = Arc<Mutex<Vec<Vec<T>>>>;

fn watch_rooms(store: &SyncStore, user: &str) -> (marketsync::Subscription, Views<ChatRoom>) {
    let views: Views<ChatRoom> = Arc::new(Mutex::new(Vec::new()));
    let sink = views.clone();
    let sub = store
        .messenger()
        .subscribe_my_rooms(user, move |rooms| sink.lock().push(rooms.to_vec()));
    (sub, views)
}

fn watch_messages(store: &SyncStore, room: &RoomId) -> (marketsync::Subscription, Views<ChatMessage>) {
    let views: Views<ChatMessage> = Arc::new(Mutex::new(Vec::new()));
    let sink = views.clone();
    let sub = store
        .messenger()
        .subscribe_messages(room, move |messages| sink.lock().push(messages.to_vec()));
    (sub, views)
}

// --- Rooms ---

#[test]
fn test_room_creation_is_idempotent() {
    let remote = Arc::new(MemoryRemote::new());
    let store = test_store(&remote);

    let first = store.messenger().create_or_get_room(&buyer(), &bike()).unwrap();
    let second = store.messenger().create_or_get_room(&buyer(), &bike()).unwrap();

    assert!(first.is_some());
    assert_eq!(first, second);
    assert_eq!(first, Some(RoomId::derive(&bike().id, "buyer")));
}

#[test]
fn test_both_participants_see_shared_room() {
    let remote = Arc::new(MemoryRemote::new());
    let store = test_store(&remote);
    let (_buyer_sub, buyer_rooms) = watch_rooms(&store, "buyer");
    let (_seller_sub, seller_rooms) = watch_rooms(&store, "seller");
    let (_other_sub, other_rooms) = watch_rooms(&store, "someone-else");

    let room = store
        .messenger()
        .create_or_get_room(&buyer(), &bike())
        .unwrap()
        .unwrap();

    for views in [&buyer_rooms, &seller_rooms] {
        let last = views.lock().last().unwrap().clone();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id, room);
        assert_eq!(last[0].participant_names["seller"], "판매자");
    }
    assert!(other_rooms.lock().last().unwrap().is_empty());
}

#[test]
fn test_denied_shared_tier_falls_back_to_mailbox() {
    let remote = Arc::new(MemoryRemote::new());
    remote.deny("chats");
    let store = test_store(&remote);
    let (_sub, buyer_rooms) = watch_rooms(&store, "buyer");

    let room = store
        .messenger()
        .create_or_get_room(&buyer(), &bike())
        .unwrap()
        .unwrap();
    assert_eq!(buyer_rooms.lock().last().unwrap()[0].id, room);

    let delivery = store
        .messenger()
        .send_message(&room, "네고 되나요?", "buyer", "seller")
        .unwrap();
    assert_eq!(delivery, Some(Delivery::Remote));

    let entry = remote.get(&format!("user_chats/buyer/{}", room)).unwrap().unwrap();
    assert_eq!(entry["last_message"], "네고 되나요?");
    assert_eq!(buyer_rooms.lock().last().unwrap()[0].last_message, "네고 되나요?");
}

#[test]
fn test_offline_room_lives_locally() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_online(false);
    let store = test_store(&remote);
    let signals = store.bus().channel(SignalFilter::chat());

    let room = store
        .messenger()
        .create_or_get_room(&buyer(), &bike())
        .unwrap()
        .unwrap();

    assert_eq!(signals.try_recv().unwrap(), Signal::RoomsChanged);
    let local = store.messenger().room(&room, "buyer").unwrap();
    assert_eq!(local.listing_id, Some(bike().id));
    assert!(local.last_message.is_empty());
}

#[test]
fn test_rooms_ordered_by_activity() {
    let remote = Arc::new(MemoryRemote::new());
    let store = test_store(&remote);
    let listings = seed::listings();

    let older = store
        .messenger()
        .create_or_get_room(&buyer(), &listings[0])
        .unwrap()
        .unwrap();
    let newer = store
        .messenger()
        .create_or_get_room(&buyer(), &listings[1])
        .unwrap()
        .unwrap();

    let (_sub, rooms) = watch_rooms(&store, "buyer");
    let order = |rooms: &Views<ChatRoom>| -> Vec<RoomId> {
        rooms.lock().last().unwrap().iter().map(|r| r.id.clone()).collect()
    };
    assert_eq!(order(&rooms), vec![newer.clone(), older.clone()]);

    store
        .messenger()
        .send_message(&older, "아직 판매중인가요?", "buyer", "bot-seller")
        .unwrap();
    assert_eq!(order(&rooms), vec![older, newer]);
}

#[test]
fn test_room_subscription_detaches_every_layer() {
    let remote = Arc::new(MemoryRemote::new());
    let store = test_store(&remote);

    let (sub, _rooms) = watch_rooms(&store, "buyer");
    assert_eq!(sub.parts(), 3);
    assert_eq!(remote.subscription_count(), 2);
    assert_eq!(store.bus().listener_count(), 1);

    drop(sub);
    assert_eq!(remote.subscription_count(), 0);
    assert_eq!(store.bus().listener_count(), 0);
}

// --- Messages ---

#[test]
fn test_messages_keep_send_order_across_tiers() {
    let remote = Arc::new(MemoryRemote::new());
    let store = test_store(&remote);
    let room = store
        .messenger()
        .create_or_get_room(&buyer(), &bike())
        .unwrap()
        .unwrap();
    let (_sub, views) = watch_messages(&store, &room);

    let send = |text: &str| store.messenger().send_message(&room, text, "buyer", "seller").unwrap();

    assert_eq!(send("A"), Some(Delivery::Remote));
    remote.set_online(false);
    assert_eq!(send("B"), Some(Delivery::Local));
    remote.set_online(true);
    assert_eq!(send("C"), Some(Delivery::Remote));

    // Every emitted view keeps A before B before C.
    for view in views.lock().iter() {
        let order = texts(view);
        let pos = |t: &str| order.iter().position(|x| x == t);
        if let (Some(a), Some(b)) = (pos("A"), pos("B")) {
            assert!(a < b);
        }
        if let (Some(b), Some(c)) = (pos("B"), pos("C")) {
            assert!(b < c);
        }
    }
    assert_eq!(texts(views.lock().last().unwrap()), vec!["A", "B", "C"]);
}

#[test]
fn test_back_to_back_sends_with_system_clock() {
    let remote = Arc::new(MemoryRemote::new());
    let store = SyncStore::builder().remote(remote.clone()).build().unwrap();
    let room = RoomId::derive(&bike().id, "buyer");

    for text in ["1", "2", "3", "4", "5"] {
        store
            .messenger()
            .send_message(&room, text, "buyer", "seller")
            .unwrap();
    }

    let (_sub, views) = watch_messages(&store, &room);
    let last = views.lock().last().unwrap().clone();
    assert_eq!(texts(&last), vec!["1", "2", "3", "4", "5"]);
    assert!(last.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[test]
fn test_offline_send_builds_local_room() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_online(false);
    let store = test_store(&remote);
    let room = RoomId("unknown-room".to_string());
    let (_sub, rooms) = watch_rooms(&store, "seller");

    let delivery = store
        .messenger()
        .send_message(&room, "  사진 더 볼 수 있을까요?  ", "buyer", "seller")
        .unwrap();

    assert_eq!(delivery, Some(Delivery::Local));
    let local = store.messenger().room(&room, "buyer").unwrap();
    assert_eq!(local.participants, vec!["buyer".to_string(), "seller".to_string()]);
    assert_eq!(local.listing_id, None);
    assert_eq!(local.last_message, "사진 더 볼 수 있을까요?");
    assert_eq!(rooms.lock().last().unwrap()[0].id, room);

    let logged = store.cache().messages(&room);
    assert_eq!(logged.len(), 1);
    assert!(!logged[0].id.is_remote());
}

#[test]
fn test_local_room_follows_remote_writes_after_reconnect() {
    let remote = Arc::new(MemoryRemote::new());
    let store = test_store(&remote);
    remote.set_online(false);

    let room = store
        .messenger()
        .create_or_get_room(&buyer(), &bike())
        .unwrap()
        .unwrap();
    let delivery = store
        .messenger()
        .send_message(&room, "offline A", "buyer", "seller")
        .unwrap();
    assert_eq!(delivery, Some(Delivery::Local));

    remote.set_online(true);
    store.messenger().create_or_get_room(&buyer(), &bike()).unwrap();
    let delivery = store
        .messenger()
        .send_message(&room, "online C", "buyer", "seller")
        .unwrap();
    assert_eq!(delivery, Some(Delivery::Remote));

    let shared = remote.get(&format!("chats/{}", room)).unwrap().unwrap();
    assert_eq!(shared["last_message"], "online C");

    let (_sub, rooms) = watch_rooms(&store, "buyer");
    let view = rooms.lock().last().unwrap().clone();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].last_message, "online C");
    assert_eq!(store.messenger().room(&room, "buyer").unwrap().last_message, "online C");
}

#[test]
fn test_messages_from_another_client_arrive_live() {
    let remote = Arc::new(MemoryRemote::new());
    let buyer_store = test_store(&remote);
    let seller_store = test_store(&remote);
    let room = buyer_store
        .messenger()
        .create_or_get_room(&buyer(), &bike())
        .unwrap()
        .unwrap();
    let (_sub, views) = watch_messages(&buyer_store, &room);

    seller_store
        .messenger()
        .send_message(&room, "네 가능해요", "seller", "buyer")
        .unwrap();

    let last = views.lock().last().unwrap().clone();
    assert_eq!(texts(&last), vec!["네 가능해요"]);
    assert_eq!(last[0].sender_id, "seller");
}
