//! Typed local cache over a [`LocalStorage`] backend.

use super::backend::LocalStorage;
use crate::error::Result;
use crate::types::{ChatMessage, ChatRoom, Entity, EntityId, RoomId};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Namespace of locally created or fallback chat rooms.
const ROOMS_NAMESPACE: &str = "chats";

/// Local durable cache.
///
/// Holds one override table and one tombstone set per namespace, plus
/// per-room message logs and small per-user tables. Malformed payloads
/// read back as empty values; they are logged, never propagated.
#[derive(Clone)]
pub struct LocalCache {
    storage: Arc<dyn LocalStorage>,
    prefix: Arc<str>,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Arc<Mutex<()>>,
}

impl LocalCache {
    pub fn new(storage: Arc<dyn LocalStorage>, prefix: &str) -> Self {
        Self {
            storage,
            prefix: Arc::from(prefix),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Read a value, treating absence and corruption as the default.
    pub fn read<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let key = self.key(name);
        let raw = match self.storage.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return T::default(),
            Err(e) => {
                warn!(key = %key, error = %e, "local storage read failed, using empty value");
                return T::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "corrupt local payload, using empty value");
                T::default()
            }
        }
    }

    pub fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.storage.set(&self.key(name), &raw)
    }

    /// Read, mutate and write back a value as one step.
    pub fn modify<T, R>(&self, name: &str, f: impl FnOnce(&mut T) -> R) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let _lock = self.write_lock.lock();
        let mut value: T = self.read(name);
        let result = f(&mut value);
        self.write(name, &value)?;
        Ok(result)
    }

    // --- Override tables ---

    fn overrides_name(namespace: &str) -> String {
        format!("{}_overrides", namespace)
    }

    fn tombstones_name(namespace: &str) -> String {
        format!("{}_tombstones", namespace)
    }

    /// Local insert/override table for a namespace.
    ///
    /// Entries are decoded one by one so a single bad entry does not hide
    /// the rest of the table.
    pub fn overrides<T: Entity>(&self, namespace: &str) -> BTreeMap<EntityId, T> {
        let raw: BTreeMap<String, serde_json::Value> = self.read(&Self::overrides_name(namespace));
        let mut table = BTreeMap::new();

        for (key, value) in raw {
            let id = match key.parse::<EntityId>() {
                Ok(id) => id,
                Err(e) => {
                    warn!(namespace, key = %key, error = %e, "dropping override with bad id");
                    continue;
                }
            };
            match serde_json::from_value::<T>(value) {
                Ok(mut entity) => {
                    if entity.id() != &id {
                        debug!(namespace, id = %id, "override id mismatch, table key wins");
                        entity.set_id(id.clone());
                    }
                    table.insert(id, entity);
                }
                Err(e) => {
                    warn!(namespace, id = %id, error = %e, "dropping corrupt override");
                }
            }
        }

        table
    }

    /// Insert or replace the local version of an entity.
    pub fn put_override<T: Entity>(&self, namespace: &str, entity: &T) -> Result<()> {
        let value = serde_json::to_value(entity)?;
        let id = entity.id().to_string();
        self.modify(
            &Self::overrides_name(namespace),
            |table: &mut BTreeMap<String, serde_json::Value>| {
                table.insert(id, value);
            },
        )
    }

    /// Drop the override for `id` if it still equals `expected`.
    ///
    /// Returns whether an entry was removed.
    pub fn clear_override_if<T: Entity>(&self, namespace: &str, expected: &T) -> Result<bool> {
        let expected = serde_json::to_value(expected)?;
        let id = expected_id(&expected);
        self.modify(
            &Self::overrides_name(namespace),
            |table: &mut BTreeMap<String, serde_json::Value>| match id {
                Some(id) if table.get(&id) == Some(&expected) => {
                    table.remove(&id);
                    true
                }
                _ => false,
            },
        )
    }

    pub fn tombstones(&self, namespace: &str) -> BTreeSet<EntityId> {
        self.id_set(&Self::tombstones_name(namespace))
    }

    /// Tombstone an id and drop any local override for it.
    ///
    /// The tombstone is written first: once it lands the id is hidden even
    /// if the override cleanup fails.
    pub fn tombstone(&self, namespace: &str, id: &EntityId) -> Result<()> {
        self.insert_ids(&Self::tombstones_name(namespace), std::slice::from_ref(id))?;

        let key = id.to_string();
        self.modify(
            &Self::overrides_name(namespace),
            |table: &mut BTreeMap<String, serde_json::Value>| {
                table.remove(&key);
            },
        )
    }

    // --- Id sets ---

    pub fn id_set(&self, name: &str) -> BTreeSet<EntityId> {
        let raw: Vec<String> = self.read(name);
        raw.into_iter()
            .filter_map(|s| match s.parse() {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(name, entry = %s, error = %e, "skipping malformed id");
                    None
                }
            })
            .collect()
    }

    /// Add ids to a persisted set, returning the ones that were new.
    pub fn insert_ids(&self, name: &str, ids: &[EntityId]) -> Result<Vec<EntityId>> {
        self.modify(name, |raw: &mut Vec<String>| {
            let mut added = Vec::new();
            for id in ids {
                let encoded = id.to_string();
                if !raw.contains(&encoded) {
                    raw.push(encoded);
                    added.push(id.clone());
                }
            }
            added
        })
    }

    pub fn remove_ids(&self, name: &str, ids: &[EntityId]) -> Result<()> {
        let encoded: Vec<String> = ids.iter().map(ToString::to_string).collect();
        self.modify(name, |raw: &mut Vec<String>| {
            raw.retain(|entry| !encoded.contains(entry));
        })
    }

    // --- Chat rooms and messages ---

    pub fn rooms(&self) -> BTreeMap<RoomId, ChatRoom> {
        let raw: BTreeMap<String, serde_json::Value> =
            self.read(&Self::overrides_name(ROOMS_NAMESPACE));
        raw.into_iter()
            .filter_map(|(key, value)| match serde_json::from_value::<ChatRoom>(value) {
                Ok(mut room) => {
                    room.id = RoomId(key.clone());
                    Some((RoomId(key), room))
                }
                Err(e) => {
                    warn!(room = %key, error = %e, "dropping corrupt local room");
                    None
                }
            })
            .collect()
    }

    /// Create or mutate a local room.
    ///
    /// `create` supplies the room when none is stored yet; `update` then
    /// runs on the stored or created room.
    pub fn upsert_room(
        &self,
        id: &RoomId,
        create: impl FnOnce() -> ChatRoom,
        update: impl FnOnce(&mut ChatRoom),
    ) -> Result<()> {
        self.modify(
            &Self::overrides_name(ROOMS_NAMESPACE),
            |table: &mut BTreeMap<String, serde_json::Value>| {
                let stored = table
                    .get(&id.0)
                    .and_then(|value| serde_json::from_value::<ChatRoom>(value.clone()).ok());
                let mut room = stored.unwrap_or_else(create);
                room.id = id.clone();
                update(&mut room);
                let value = serde_json::to_value(&room)?;
                table.insert(id.0.clone(), value);
                Ok::<(), serde_json::Error>(())
            },
        )?
        .map_err(Into::into)
    }

    /// Mutate a local room only if one is stored.
    ///
    /// Returns whether a room was updated.
    pub fn update_room(&self, id: &RoomId, update: impl FnOnce(&mut ChatRoom)) -> Result<bool> {
        if !self.rooms().contains_key(id) {
            return Ok(false);
        }
        self.modify(
            &Self::overrides_name(ROOMS_NAMESPACE),
            |table: &mut BTreeMap<String, serde_json::Value>| {
                let stored = table
                    .get(&id.0)
                    .and_then(|value| serde_json::from_value::<ChatRoom>(value.clone()).ok());
                let Some(mut room) = stored else {
                    return Ok(false);
                };
                room.id = id.clone();
                update(&mut room);
                table.insert(id.0.clone(), serde_json::to_value(&room)?);
                Ok::<bool, serde_json::Error>(true)
            },
        )?
        .map_err(Into::into)
    }

    fn messages_name(room: &RoomId) -> String {
        format!("messages_{}", room)
    }

    pub fn messages(&self, room: &RoomId) -> Vec<ChatMessage> {
        self.read(&Self::messages_name(room))
    }

    pub fn append_message(&self, room: &RoomId, message: ChatMessage) -> Result<()> {
        self.modify(&Self::messages_name(room), |log: &mut Vec<ChatMessage>| {
            if !log.iter().any(|m| m.id == message.id) {
                log.push(message);
            }
        })
    }
}

fn expected_id(value: &serde_json::Value) -> Option<String> {
    value.get("id").and_then(|id| id.as_str()).map(str::to_string)
}
