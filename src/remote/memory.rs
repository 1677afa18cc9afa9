//! In-process real-time tree store.

use super::{
    join_path, RemoteResult, RemoteSnapshot, RemoteStore, RemoteSubscriptionId, SnapshotCallback,
};
use crate::error::RemoteError;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// A registered watcher.
struct Watcher {
    path: String,
    order_by: Option<String>,
    callback: SnapshotCallback,
}

/// In-memory [`RemoteStore`].
///
/// Writes notify every watcher whose path is an ancestor or descendant of
/// the written path. Failure can be injected two ways:
/// - [`set_online(false)`](Self::set_online): every call fails with
///   `Unavailable` and watchers stay silent until the store comes back,
///   at which point all of them receive a fresh snapshot
/// - [`deny`](Self::deny): calls at or below a path fail with
///   `PermissionDenied`, and watchers there receive the error
pub struct MemoryRemote {
    tree: RwLock<Value>,
    watchers: RwLock<HashMap<RemoteSubscriptionId, Watcher>>,
    next_id: AtomicU64,
    next_key: AtomicU64,
    online: AtomicBool,
    denied: RwLock<Vec<String>>,
    /// Log of successful writes, as `"<op> <path>"`.
    writes: Mutex<Vec<String>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Value::Object(Map::new())),
            watchers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            next_key: AtomicU64::new(1),
            online: AtomicBool::new(true),
            denied: RwLock::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Toggle reachability. Coming back online re-delivers every watcher.
    pub fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            let all: Vec<_> = self.watchers.read().keys().copied().collect();
            self.deliver(all);
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Deny every call at or below `path`.
    pub fn deny(&self, path: &str) {
        let path = join_path(&[path]);
        {
            let mut denied = self.denied.write();
            if !denied.contains(&path) {
                denied.push(path.clone());
            }
        }
        self.notify(&path);
    }

    /// Lift a previous [`deny`](Self::deny).
    pub fn allow(&self, path: &str) {
        let path = join_path(&[path]);
        self.denied.write().retain(|p| p != &path);
        self.notify(&path);
    }

    /// Successful writes so far, as `"<op> <path>"`.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.watchers.read().len()
    }

    fn check(&self, path: &str) -> RemoteResult<()> {
        if !self.is_online() {
            return Err(RemoteError::Unavailable("remote store offline".into()));
        }
        let denied = self.denied.read();
        if denied.iter().any(|d| is_within(path, d)) {
            return Err(RemoteError::PermissionDenied(path.to_string()));
        }
        Ok(())
    }

    fn snapshot_for(&self, path: &str, order_by: Option<&str>) -> RemoteResult<RemoteSnapshot> {
        self.check(path)?;
        let value = get_at(&self.tree.read(), &segments(path)).cloned();
        Ok(RemoteSnapshot::from_value(value, order_by))
    }

    fn record(&self, op: &str, path: &str) {
        self.writes.lock().push(format!("{} {}", op, path));
    }

    /// Notify watchers related to a changed path.
    fn notify(&self, changed: &str) {
        let affected: Vec<_> = self
            .watchers
            .read()
            .iter()
            .filter(|(_, w)| is_within(changed, &w.path) || is_within(&w.path, changed))
            .map(|(id, _)| *id)
            .collect();
        self.deliver(affected);
    }

    /// Deliver current snapshots. No lock is held while callbacks run.
    fn deliver(&self, ids: Vec<RemoteSubscriptionId>) {
        if !self.is_online() {
            return;
        }

        let targets: Vec<(String, Option<String>, SnapshotCallback)> = {
            let watchers = self.watchers.read();
            ids.iter()
                .filter_map(|id| watchers.get(id))
                .map(|w| (w.path.clone(), w.order_by.clone(), w.callback.clone()))
                .collect()
        };

        for (path, order_by, callback) in targets {
            let result = self.snapshot_for(&path, order_by.as_deref());
            callback(result);
        }
    }

    fn write_at(&self, path: &str, value: Value) {
        let segs = segments(path);
        let mut tree = self.tree.write();
        if value.is_null() {
            remove_at(&mut tree, &segs);
        } else {
            set_at(&mut tree, &segs, value);
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryRemote {
    fn get(&self, path: &str) -> RemoteResult<Option<Value>> {
        let path = join_path(&[path]);
        self.check(&path)?;
        Ok(get_at(&self.tree.read(), &segments(&path)).cloned())
    }

    fn set(&self, path: &str, value: Value) -> RemoteResult<()> {
        let path = join_path(&[path]);
        self.check(&path)?;
        self.write_at(&path, value);
        self.record("set", &path);
        self.notify(&path);
        Ok(())
    }

    fn update(&self, path: &str, fields: Map<String, Value>) -> RemoteResult<()> {
        let path = join_path(&[path]);
        self.check(&path)?;
        for (field, value) in fields {
            self.write_at(&join_path(&[&path, &field]), value);
        }
        self.record("update", &path);
        self.notify(&path);
        Ok(())
    }

    fn remove(&self, path: &str) -> RemoteResult<()> {
        let path = join_path(&[path]);
        self.check(&path)?;
        self.write_at(&path, Value::Null);
        self.record("remove", &path);
        self.notify(&path);
        Ok(())
    }

    fn push(&self, path: &str, value: Value) -> RemoteResult<String> {
        let path = join_path(&[path]);
        self.check(&path)?;
        // Fixed-width keys keep key order equal to insertion order.
        let key = format!("-K{:012x}", self.next_key.fetch_add(1, Ordering::SeqCst));
        let child = join_path(&[&path, &key]);
        self.write_at(&child, value);
        self.record("push", &child);
        self.notify(&child);
        Ok(key)
    }

    fn subscribe(
        &self,
        path: &str,
        order_by: Option<&str>,
        callback: SnapshotCallback,
    ) -> RemoteSubscriptionId {
        let id = RemoteSubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let path = join_path(&[path]);
        debug!(path = %path, id = id.0, "remote subscribe");

        self.watchers.write().insert(
            id,
            Watcher {
                path,
                order_by: order_by.map(str::to_string),
                callback,
            },
        );

        self.deliver(vec![id]);
        id
    }

    fn unsubscribe(&self, id: RemoteSubscriptionId) {
        if self.watchers.write().remove(&id).is_some() {
            debug!(id = id.0, "remote unsubscribe");
        }
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// True when `path` equals `base` or lies below it.
fn is_within(path: &str, base: &str) -> bool {
    base.is_empty()
        || path == base
        || (path.starts_with(base) && path.as_bytes().get(base.len()) == Some(&b'/'))
}

fn get_at<'a>(root: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    segs.iter().try_fold(root, |node, seg| node.get(*seg))
}

fn set_at(root: &mut Value, segs: &[&str], value: Value) {
    let Some((last, parents)) = segs.split_last() else {
        *root = value;
        return;
    };

    let mut node = root;
    for seg in parents {
        node = object_mut(node)
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    object_mut(node).insert(last.to_string(), value);
}

/// View a node as an object, replacing leaves with an empty object.
fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just made an object"),
    }
}

/// Remove a node, pruning parents left empty. Returns whether the
/// parent became empty.
fn remove_at(node: &mut Value, segs: &[&str]) -> bool {
    let Some((first, rest)) = segs.split_first() else {
        *node = Value::Object(Map::new());
        return true;
    };

    let Value::Object(map) = node else {
        return false;
    };

    if rest.is_empty() {
        map.remove(*first);
    } else if let Some(child) = map.get_mut(*first) {
        if remove_at(child, rest) {
            map.remove(*first);
        }
    }

    map.is_empty()
}
