//! RoomLock: named, TTL-bounded, non-blocking exclusion.

use chrono::{DateTime, Utc};
use station_core::config::LocksConfig;
use station_core::traits::Clock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::lease::{is_live, LeaseStore};

#[derive(Clone)]
pub struct RoomLock {
    name: String,
    ttl: Duration,
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
}

impl RoomLock {
    pub fn new(
        name: impl Into<String>,
        ttl: Duration,
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            ttl,
            store,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Take the lease if no live marker exists. Never waits; a store failure
    /// counts as "not acquired".
    pub fn acquire(&self) -> bool {
        match self.store.try_acquire(&self.name, self.ttl, self.clock.now()) {
            Ok(acquired) => {
                if !acquired {
                    tracing::debug!("🔒 Lock '{}' busy", self.name);
                }
                acquired
            }
            Err(e) => {
                tracing::warn!("⚠️ Lock '{}' store error, refusing: {e}", self.name);
                false
            }
        }
    }

    /// Drop the marker. Safe to call when not held.
    pub fn release(&self) {
        if let Err(e) = self.store.release(&self.name) {
            tracing::warn!("⚠️ Lock '{}' release failed: {e}", self.name);
        }
    }

    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        self.store.acquired_at(&self.name).ok().flatten()
    }

    pub fn is_held(&self) -> bool {
        self.acquired_at()
            .is_some_and(|at| is_live(at, self.ttl, self.clock.now()))
    }
}

impl std::fmt::Debug for RoomLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomLock")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("store", &self.store.name())
            .finish()
    }
}

/// Locks for a fixed set of names, all sharing one lease store. TTLs come
/// from `[locks]` in the config.
#[derive(Debug, Clone)]
pub struct LockTable {
    locks: BTreeMap<String, RoomLock>,
}

impl LockTable {
    /// `prefix` namespaces marker names so different tables can share a store.
    pub fn new<I, S>(
        names: I,
        prefix: &str,
        config: &LocksConfig,
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let locks = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                let lock = RoomLock::new(
                    format!("{prefix}{name}"),
                    config.ttl_for(&name),
                    Arc::clone(&store),
                    Arc::clone(&clock),
                );
                (name, lock)
            })
            .collect();
        Self { locks }
    }

    pub fn get(&self, name: &str) -> Option<&RoomLock> {
        self.locks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.locks.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.locks.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.locks.len()
    }
}
