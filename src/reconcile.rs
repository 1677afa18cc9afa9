//! Multi-source merge.

use crate::types::{Entity, EntityId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Merge the sources of one entity type into an ordered view.
///
/// Precedence, lowest first: remote, seed (only ids absent from remote),
/// local overrides (always win). Tombstoned ids are removed last. The
/// result is sorted by [`Entity::order_key`] descending, ties broken by
/// id ascending.
pub fn reconcile<T: Entity>(
    remote: &[T],
    local: &BTreeMap<EntityId, T>,
    seed: &[T],
    tombstones: &BTreeSet<EntityId>,
) -> Vec<T> {
    let mut merged: BTreeMap<EntityId, T> = BTreeMap::new();

    for entity in remote {
        merged.insert(entity.id().clone(), entity.clone());
    }

    for entity in seed {
        merged
            .entry(entity.id().clone())
            .or_insert_with(|| entity.clone());
    }

    for (id, entity) in local {
        if merged.insert(id.clone(), entity.clone()).is_some() {
            debug!(id = %id, "local override shadows another source");
        }
    }

    for id in tombstones {
        merged.remove(id);
    }

    let mut view: Vec<T> = merged.into_values().collect();
    view.sort_by(|a, b| {
        b.order_key()
            .cmp(&a.order_key())
            .then_with(|| a.id().cmp(b.id()))
    });
    view
}
