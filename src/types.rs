//! Core types for the sync layer.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Where an identifier was minted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Origin {
    /// Assigned by the remote store on insert.
    Remote,
    /// Provisional, generated on this client and never confirmed remotely.
    Local,
    /// Part of the bundled seed dataset.
    Seed,
}

impl Origin {
    fn tag(self) -> &'static str {
        match self {
            Origin::Remote => "remote",
            Origin::Local => "local",
            Origin::Seed => "seed",
        }
    }
}

/// Entity identifier tagged with its origin.
///
/// Ordering is `(origin, key)`, which is also the reconciler's tie-break
/// for entities with equal timestamps.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct EntityId {
    origin: Origin,
    key: String,
}

impl EntityId {
    pub fn remote(key: impl Into<String>) -> Self {
        Self {
            origin: Origin::Remote,
            key: key.into(),
        }
    }

    pub fn seed(key: impl Into<String>) -> Self {
        Self {
            origin: Origin::Seed,
            key: key.into(),
        }
    }

    pub fn local(key: impl Into<String>) -> Self {
        Self {
            origin: Origin::Local,
            key: key.into(),
        }
    }

    /// Mint a fresh provisional id.
    pub fn provisional() -> Self {
        Self::local(uuid::Uuid::now_v7().simple().to_string())
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True only for ids the remote store knows about.
    pub fn is_remote(&self) -> bool {
        self.origin == Origin::Remote
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin.tag(), self.key)
    }
}

impl FromStr for EntityId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, key) = s
            .split_once(':')
            .ok_or_else(|| format!("missing origin tag in id {:?}", s))?;
        if key.is_empty() {
            return Err(format!("empty key in id {:?}", s));
        }
        let origin = match tag {
            "remote" => Origin::Remote,
            "local" => Origin::Local,
            "seed" => Origin::Seed,
            other => return Err(format!("unknown origin tag {:?}", other)),
        };
        Ok(Self {
            origin,
            key: key.to_string(),
        })
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for EntityId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Timestamp(millis)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Something the reconciler can merge.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &EntityId;

    fn set_id(&mut self, id: EntityId);

    /// Sort key; views are ordered newest first.
    fn order_key(&self) -> Timestamp;
}

/// A marketplace listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: EntityId,
    pub title: String,
    pub price: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub location: String,
    pub created_at: Timestamp,
    #[serde(default)]
    pub likes: u32,
    /// `None` when the seller could not be resolved (seed data).
    #[serde(default)]
    pub seller_id: Option<String>,
    #[serde(default)]
    pub seller_name: String,
    #[serde(default)]
    pub is_sold: bool,
}

impl Entity for Listing {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn order_key(&self) -> Timestamp {
        self.created_at
    }
}

/// Deterministic chat room identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Derive the room id for a buyer talking about a listing.
    ///
    /// Hex of the first 16 bytes of SHA-256 over `listing NUL buyer`, so it
    /// is safe to use as a path segment.
    pub fn derive(listing: &EntityId, buyer: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(listing.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(buyer.as_bytes());
        let digest = hasher.finalize();
        RoomId(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chat room between a buyer and a seller about one listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: RoomId,
    /// `None` for rooms rebuilt locally without knowing the listing.
    #[serde(default)]
    pub listing_id: Option<EntityId>,
    #[serde(default)]
    pub listing_title: String,
    #[serde(default)]
    pub listing_image: String,
    pub participants: Vec<String>,
    #[serde(default)]
    pub participant_names: BTreeMap<String, String>,
    #[serde(default)]
    pub last_message: String,
    /// `None` until the first message is sent.
    #[serde(default)]
    pub last_message_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Timestamp,
}

impl ChatRoom {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The participant that is not `user_id`, if any.
    pub fn counterpart(&self, user_id: &str) -> Option<&str> {
        self.participants
            .iter()
            .map(String::as_str)
            .find(|p| *p != user_id)
    }

    /// Last-message time, falling back to the update time for empty rooms.
    pub fn activity(&self) -> Timestamp {
        self.last_message_at.unwrap_or(self.updated_at)
    }
}

/// A single chat message. The room is implied by where it is stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: EntityId,
    pub sender_id: String,
    pub text: String,
    pub timestamp: Timestamp,
}

impl Entity for ChatMessage {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn order_key(&self) -> Timestamp {
        self.timestamp
    }
}

/// Kind of notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Activity,
    Keyword,
}

/// A notification addressed to one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: EntityId,
    pub user_id: String,
    pub kind: NotificationKind,
    pub text: String,
    #[serde(default)]
    pub subtext: Option<String>,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Entity for Notification {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn order_key(&self) -> Timestamp {
        self.timestamp
    }
}

/// A user as seen by the messaging subsystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_roundtrip() {
        let id = EntityId::remote("-Nabc123");
        let encoded = id.to_string();
        assert_eq!(encoded, "remote:-Nabc123");
        assert_eq!(encoded.parse::<EntityId>().unwrap(), id);

        // Keys may themselves contain the separator.
        let id: EntityId = "seed:a:b".parse().unwrap();
        assert_eq!(id.origin(), Origin::Seed);
        assert_eq!(id.key(), "a:b");
    }

    #[test]
    fn test_entity_id_rejects_untagged() {
        assert!("abc".parse::<EntityId>().is_err());
        assert!("mock:1".parse::<EntityId>().is_err());
        assert!("local:".parse::<EntityId>().is_err());
    }

    #[test]
    fn test_provisional_ids_are_local_and_unique() {
        let a = EntityId::provisional();
        let b = EntityId::provisional();
        assert_eq!(a.origin(), Origin::Local);
        assert!(!a.is_remote());
        assert_ne!(a, b);
    }

    #[test]
    fn test_entity_id_ordering() {
        let mut ids = vec![
            EntityId::seed("1"),
            EntityId::local("z"),
            EntityId::remote("b"),
            EntityId::remote("a"),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                EntityId::remote("a"),
                EntityId::remote("b"),
                EntityId::local("z"),
                EntityId::seed("1"),
            ]
        );
    }

    #[test]
    fn test_room_id_is_deterministic() {
        let listing = EntityId::remote("p1");
        let a = RoomId::derive(&listing, "buyer");
        let b = RoomId::derive(&listing, "buyer");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert_ne!(a, RoomId::derive(&listing, "other"));
        assert_ne!(a, RoomId::derive(&EntityId::seed("p1"), "buyer"));
    }

    #[test]
    fn test_room_activity_fallback() {
        let mut room = ChatRoom {
            id: RoomId("r".into()),
            listing_id: Some(EntityId::seed("1")),
            listing_title: String::new(),
            listing_image: String::new(),
            participants: vec!["a".into(), "b".into()],
            participant_names: BTreeMap::new(),
            last_message: String::new(),
            last_message_at: None,
            updated_at: Timestamp(5),
        };
        assert_eq!(room.activity(), Timestamp(5));
        room.last_message_at = Some(Timestamp(9));
        assert_eq!(room.activity(), Timestamp(9));
        assert_eq!(room.counterpart("a"), Some("b"));
    }

    #[test]
    fn test_notification_kind_wire_format() {
        let json = serde_json::to_string(&NotificationKind::Keyword).unwrap();
        assert_eq!(json, "\"KEYWORD\"");
    }
}
