//! Remote store adapter.
//!
//! The remote is a path-addressable real-time tree (think of a JSON
//! document where `chats/abc/last_message` names a leaf). The sync layer
//! only talks to it through [`RemoteStore`]; [`MemoryRemote`] is a full
//! in-process implementation with failure injection.

mod memory;

pub use memory::MemoryRemote;

use crate::error::RemoteError;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// Result of a remote call.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// What a subscription callback receives.
pub type SnapshotResult = RemoteResult<RemoteSnapshot>;

/// Subscription callback, invoked on every change below the watched path.
pub type SnapshotCallback = Arc<dyn Fn(SnapshotResult) + Send + Sync>;

/// Identifier of a remote subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RemoteSubscriptionId(pub u64);

/// The children of a watched path, in delivery order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemoteSnapshot {
    pub children: Vec<(String, Value)>,
}

impl RemoteSnapshot {
    /// Build a snapshot from the value stored at a path.
    ///
    /// Children are ordered by the `order_by` field when given (missing
    /// fields sort first), otherwise by key. Key is always the tie-break.
    pub fn from_value(value: Option<Value>, order_by: Option<&str>) -> Self {
        let mut children: Vec<(String, Value)> = match value {
            Some(Value::Object(map)) => map.into_iter().collect(),
            _ => Vec::new(),
        };

        children.sort_by(|(ka, va), (kb, vb)| {
            let by_field = match order_by {
                Some(field) => compare_json(va.get(field), vb.get(field)),
                None => Ordering::Equal,
            };
            by_field.then_with(|| ka.cmp(kb))
        });

        Self { children }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }
}

/// Ordering used by `order_by`: absent, then null, booleans, numbers,
/// strings; anything else compares equal.
fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Join path segments with `/`, skipping empty ones.
pub fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// A real-time tree store.
///
/// Calls are synchronous; a returned `Err` plays the role of a rejected
/// remote promise. Implementations invoke subscription callbacks without
/// holding internal locks, so callbacks may call back into the store.
pub trait RemoteStore: Send + Sync {
    /// Read the value at a path.
    fn get(&self, path: &str) -> RemoteResult<Option<Value>>;

    /// Replace the value at a path. `Value::Null` removes it.
    fn set(&self, path: &str, value: Value) -> RemoteResult<()>;

    /// Merge fields into the object at a path.
    fn update(&self, path: &str, fields: Map<String, Value>) -> RemoteResult<()>;

    /// Remove the value at a path.
    fn remove(&self, path: &str) -> RemoteResult<()>;

    /// Insert under a freshly generated child key and return the key.
    fn push(&self, path: &str, value: Value) -> RemoteResult<String>;

    /// Watch the children of a path.
    fn subscribe(
        &self,
        path: &str,
        order_by: Option<&str>,
        callback: SnapshotCallback,
    ) -> RemoteSubscriptionId;

    /// Stop a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: RemoteSubscriptionId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_ordering_by_field() {
        let value = json!({
            "b": {"timestamp": 2},
            "a": {"timestamp": 2},
            "c": {"timestamp": 1},
            "d": {},
        });
        let snapshot = RemoteSnapshot::from_value(Some(value), Some("timestamp"));
        let keys: Vec<_> = snapshot.children.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn test_snapshot_of_leaf_is_empty() {
        assert!(RemoteSnapshot::from_value(Some(json!(5)), None).is_empty());
        assert!(RemoteSnapshot::from_value(None, None).is_empty());
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(&["chats/", "/abc", ""]), "chats/abc");
        assert_eq!(join_path(&["user_chats", "u1/r1"]), "user_chats/u1/r1");
    }
}
