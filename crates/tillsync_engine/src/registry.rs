//! Registry of live replication instances.
//!
//! One instance exists per `(database, collection, identifier)` triple.
//! Lookup never constructs implicitly: callers either [`Registry::get`]
//! what exists or call [`Registry::get_or_create`] with a builder. A
//! cached instance that has been canceled, or whose collection was
//! destroyed, is superseded by a fresh one instead of being
//! resurrected.

use crate::driver::Replication;
use crate::state::ReplicationState;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Stable identity hash for one replication target. Registries memoize
/// instances under it, and each instance persists its remote-ID
/// side-record under the hex rendering of its own hash.
pub fn replication_hash(database: &str, collection: &str, identifier: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    database.hash(&mut hasher);
    collection.hash(&mut hasher);
    identifier.hash(&mut hasher);
    hasher.finish()
}

/// Implemented by instance types the registry can memoize and
/// supersede.
pub trait Registrable {
    /// True once the instance can no longer serve its collection.
    fn is_defunct(&self) -> bool;

    /// Tears the instance down; must be idempotent.
    fn cancel(&self);
}

/// Keyed store of replication instances.
pub struct Registry<T> {
    inner: Mutex<HashMap<u64, Arc<T>>>,
}

/// Registry of per-endpoint [`ReplicationState`] orchestrators.
pub type ReplicationRegistry = Registry<ReplicationState>;

/// Registry of host-facing [`Replication`] drivers.
pub type DriverRegistry = Registry<Replication>;

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Registrable> Registry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live instance for `key`, if one exists and is still
    /// usable.
    pub fn get(&self, key: u64) -> Option<Arc<T>> {
        self.inner
            .lock()
            .get(&key)
            .filter(|instance| !instance.is_defunct())
            .cloned()
    }

    /// Returns the live instance for `key`, building one if it is
    /// missing or defunct. A superseded instance is canceled before the
    /// replacement is cached.
    pub fn get_or_create(&self, key: u64, build: impl FnOnce() -> T) -> Arc<T> {
        let mut map = self.inner.lock();
        if let Some(existing) = map.get(&key) {
            if !existing.is_defunct() {
                return Arc::clone(existing);
            }
            existing.cancel();
        }
        let instance = Arc::new(build());
        map.insert(key, Arc::clone(&instance));
        instance
    }

    /// Cancels and drops the instance for `key`, if present.
    pub fn remove(&self, key: u64) {
        if let Some(instance) = self.inner.lock().remove(&key) {
            instance.cancel();
        }
    }

    /// Cancels every registered instance and clears the registry.
    pub fn cancel_all(&self) {
        let mut map = self.inner.lock();
        for instance in map.values() {
            instance.cancel();
        }
        map.clear();
    }

    /// Number of registered instances, defunct ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true when no instances are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Registrable for ReplicationState {
    fn is_defunct(&self) -> bool {
        ReplicationState::is_defunct(self)
    }

    fn cancel(&self) {
        ReplicationState::cancel(self)
    }
}

impl Registrable for Replication {
    fn is_defunct(&self) -> bool {
        Replication::is_defunct(self)
    }

    fn cancel(&self) {
        Replication::cancel(self)
    }
}
