//! Reconciled entity collections with optimistic writes.
//!
//! A [`Collection`] binds one entity type to a remote path, a local cache
//! namespace and a seed dataset. Reads merge all of them through
//! [`reconcile`]; writes land locally first (or only) and treat the remote
//! store as best-effort sync infrastructure.

use crate::error::Result;
use crate::reconcile::reconcile;
use crate::remote::{join_path, RemoteSnapshot, RemoteStore, SnapshotCallback};
use crate::storage::LocalCache;
use crate::subscriptions::{EventBus, Signal, Subscription};
use crate::types::{Entity, EntityId};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

struct CollectionInner<T> {
    namespace: String,
    path: String,
    remote: Arc<dyn RemoteStore>,
    cache: LocalCache,
    bus: EventBus,
    seed: Arc<[T]>,
}

impl<T: Entity> CollectionInner<T> {
    fn view(&self, remote: &[T]) -> Vec<T> {
        reconcile(
            remote,
            &self.cache.overrides(&self.namespace),
            &self.seed,
            &self.cache.tombstones(&self.namespace),
        )
    }

    fn publish(&self) {
        self.bus.publish(Signal::EntitiesChanged {
            namespace: self.namespace.clone(),
        });
    }

    fn entity_path(&self, id: &EntityId) -> String {
        join_path(&[&self.path, id.key()])
    }
}

/// One entity type's merged view and write coordinator.
pub struct Collection<T> {
    inner: Arc<CollectionInner<T>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> Collection<T> {
    pub fn new(
        namespace: impl Into<String>,
        path: impl Into<String>,
        remote: Arc<dyn RemoteStore>,
        cache: LocalCache,
        bus: EventBus,
        seed: Vec<T>,
    ) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                namespace: namespace.into(),
                path: join_path(&[&path.into()]),
                remote,
                cache,
                bus,
                seed: seed.into(),
            }),
        }
    }

    /// Local cache namespace (also the bus signal namespace).
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Remote collection path.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    // --- Reads ---

    /// Watch the reconciled view.
    ///
    /// `on_snapshot` runs once synchronously with local and seed data only,
    /// then again on every remote snapshot and every local write broadcast
    /// for this namespace. A remote error drops the remote contribution
    /// until the next good snapshot.
    pub fn subscribe(&self, on_snapshot: impl Fn(&[T]) + Send + Sync + 'static) -> Subscription {
        let remote_rows: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));

        let emit: Arc<dyn Fn() + Send + Sync> = {
            let inner = Arc::clone(&self.inner);
            let rows = Arc::clone(&remote_rows);
            Arc::new(move || {
                let remote = rows.lock().clone();
                let view = inner.view(&remote);
                on_snapshot(&view);
            })
        };

        emit();

        let mut subscription = Subscription::new();

        let namespace = self.inner.namespace.clone();
        let on_signal = Arc::clone(&emit);
        let listener = self.inner.bus.listen(move |signal| {
            if matches!(signal, Signal::EntitiesChanged { namespace: ns } if *ns == namespace) {
                on_signal();
            }
        });
        let bus = self.inner.bus.clone();
        subscription.on_dispose(move || bus.unlisten(listener));

        let callback: SnapshotCallback = {
            let path = self.inner.path.clone();
            Arc::new(move |result| {
                match result {
                    Ok(snapshot) => *remote_rows.lock() = decode_snapshot(&snapshot, &path),
                    Err(e) => {
                        warn!(path = %path, error = %e, "remote snapshot failed, serving local data");
                        remote_rows.lock().clear();
                    }
                }
                emit();
            })
        };
        let remote_id = self.inner.remote.subscribe(&self.inner.path, None, callback);
        let remote = Arc::clone(&self.inner.remote);
        subscription.on_dispose(move || remote.unsubscribe(remote_id));

        subscription
    }

    /// One-shot reconciled view, using a best-effort remote read.
    pub fn fetch(&self) -> Vec<T> {
        let remote = match self.inner.remote.get(&self.inner.path) {
            Ok(value) => decode_snapshot(&RemoteSnapshot::from_value(value, None), &self.inner.path),
            Err(e) => {
                debug!(path = %self.inner.path, error = %e, "remote read failed, serving local data");
                Vec::new()
            }
        };
        self.inner.view(&remote)
    }

    /// Look up one entity in the reconciled view.
    pub fn get(&self, id: &EntityId) -> Option<T> {
        self.fetch().into_iter().find(|e| e.id() == id)
    }

    // --- Writes ---

    /// Create an entity.
    ///
    /// Tries a remote insert first and returns the remote id on success,
    /// persisting nothing locally. Otherwise the entity is stored locally
    /// under a provisional id, which is returned. Fails only if that local
    /// write fails too.
    pub fn create(&self, mut entity: T) -> Result<EntityId> {
        let provisional = EntityId::provisional();
        entity.set_id(provisional.clone());

        match self.inner.remote.push(&self.inner.path, to_remote_value(&entity)?) {
            Ok(key) => {
                let id = EntityId::remote(key);
                debug!(namespace = %self.inner.namespace, id = %id, "created remotely");
                Ok(id)
            }
            Err(e) => {
                warn!(
                    namespace = %self.inner.namespace,
                    id = %provisional,
                    error = %e,
                    "remote insert failed, keeping entity locally"
                );
                self.inner.cache.put_override(&self.inner.namespace, &entity)?;
                self.inner.publish();
                Ok(provisional)
            }
        }
    }

    /// Update an entity.
    ///
    /// The local cache is written and subscribers notified before any
    /// remote call. Remote-origin ids are then written remotely; on success
    /// the local override is cleared if nothing newer replaced it. Remote
    /// failures are logged and swallowed.
    pub fn update(&self, entity: &T) -> Result<()> {
        self.inner.cache.put_override(&self.inner.namespace, entity)?;
        self.inner.publish();

        let id = entity.id();
        if !id.is_remote() {
            debug!(id = %id, "provisional or seed id, remote write skipped");
            return Ok(());
        }

        match self
            .inner
            .remote
            .set(&self.inner.entity_path(id), to_remote_value(entity)?)
        {
            Ok(()) => match self.inner.cache.clear_override_if(&self.inner.namespace, entity) {
                Ok(true) => self.inner.publish(),
                Ok(false) => {}
                Err(e) => warn!(id = %id, error = %e, "could not clear synced override"),
            },
            Err(e) => {
                warn!(id = %id, error = %e, "remote update failed, local override stays authoritative");
            }
        }

        Ok(())
    }

    /// Delete an entity by tombstoning it.
    ///
    /// The id disappears from every view immediately and for good; the
    /// remote removal is attempted only for remote-origin ids.
    pub fn delete(&self, id: &EntityId) -> Result<()> {
        self.inner.cache.tombstone(&self.inner.namespace, id)?;
        self.inner.publish();

        if id.is_remote() {
            if let Err(e) = self.inner.remote.remove(&self.inner.entity_path(id)) {
                warn!(id = %id, error = %e, "remote delete failed, tombstone keeps it hidden");
            }
        }

        Ok(())
    }
}

/// Serialize an entity for the remote tree. The id lives in the key.
pub(crate) fn to_remote_value<T: Entity>(entity: &T) -> Result<Value> {
    let mut value = serde_json::to_value(entity)?;
    if let Value::Object(map) = &mut value {
        map.remove("id");
    }
    Ok(value)
}

/// Decode the children of a remote collection, skipping malformed ones.
pub(crate) fn decode_snapshot<T: Entity>(snapshot: &RemoteSnapshot, path: &str) -> Vec<T> {
    snapshot
        .children
        .iter()
        .filter_map(|(key, value)| {
            let mut value = value.clone();
            let id = EntityId::remote(key.as_str());
            if let Value::Object(map) = &mut value {
                map.insert("id".into(), Value::String(id.to_string()));
            }
            match serde_json::from_value::<T>(value) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    warn!(path = %path, key = %key, error = %e, "skipping malformed remote entity");
                    None
                }
            }
        })
        .collect()
}
