//! Process-wide sharing of in-memory native connections.
//!
//! The engine gives every `:memory:` open its own private database, so logical
//! connections that should see the same data have to share one handle. Entries are never
//! removed: closing one logical connection must not pull the database out from under
//! the others, and there is no file to reopen.
//!
//! File-backed connections are never registered here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::debug;

use crate::Result;
use crate::native::NativeConnection;

/// Acquires a mutex lock, recovering from poisoning.
fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            // The map holds only Arcs; a panic elsewhere cannot leave it half-updated.
            tracing::warn!("Connection registry mutex was poisoned, recovering");
            metrics::counter!("sqlbridge_registry_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Map from connection key to one shared native connection.
#[derive(Debug, Default)]
pub struct SharedConnectionRegistry {
    entries: Mutex<HashMap<String, Arc<NativeConnection>>>,
}

impl SharedConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry used by connections that were not given one explicitly.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<SharedConnectionRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Returns the connection registered under `key`, opening it with `factory` if absent.
    ///
    /// `factory` runs without the lock held. If another caller registers the key first,
    /// this caller's connection is closed and the registered one is returned, so every
    /// caller gets the same handle.
    ///
    /// # Errors
    ///
    /// Propagates the factory's error; nothing is registered in that case.
    pub fn get_or_create<F>(&self, key: &str, factory: F) -> Result<Arc<NativeConnection>>
    where
        F: FnOnce() -> Result<NativeConnection>,
    {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }

        let created = factory()?;

        let mut entries = acquire_lock(&self.entries);
        if let Some(existing) = entries.get(key) {
            let winner = Arc::clone(existing);
            drop(entries);
            debug!(key, "Lost registry open race; closing redundant connection");
            metrics::counter!("sqlbridge_registry_open_races_total").increment(1);
            created.close();
            return Ok(winner);
        }
        let shared = Arc::new(created);
        entries.insert(key.to_string(), Arc::clone(&shared));
        drop(entries);
        debug!(key, "Registered shared native connection");
        Ok(shared)
    }

    /// Returns the connection registered under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<NativeConnection>> {
        acquire_lock(&self.entries).get(key).cloned()
    }

    /// Returns true when `key` is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        acquire_lock(&self.entries).contains_key(key)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        acquire_lock(&self.entries).len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        acquire_lock(&self.entries).is_empty()
    }
}
