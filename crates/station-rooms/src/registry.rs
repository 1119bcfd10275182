//! RoomsRegistry: room id → Room, with lease-guarded runs.
//!
//! Every map mutation goes through one registry-wide async mutex. The mutex is
//! never held across a handler call; exclusion during a run comes from the
//! room's lease, so a slow room never blocks listing or other rooms.
//!
//! A run future dropped mid-flight still releases its lease and leaves the
//! room marked failed rather than stuck in `running`.

use chrono::Utc;
use futures::FutureExt;
use serde_json::{Value, json};
use station_core::config::LocksConfig;
use station_core::error::{Result, StationError};
use station_core::traits::Clock;
use station_core::types::{Room, RoomKind, RoomRun, RunStatus};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::handlers::{HandlerTable, RoomHandler};
use crate::lease::LeaseStore;
use crate::lock::RoomLock;

/// Prefix for the lease names taken by room runs.
pub const ROOM_LEASE_PREFIX: &str = "rooms/";

/// The rooms every registry starts with.
pub fn default_rooms() -> Vec<Room> {
    vec![
        Room::new("room_guard", "Guard Diagnostics", RoomKind::Guard)
            .with_description("Static capability checks for the backend core"),
        Room::new("room_health", "Health Snapshot", RoomKind::Health)
            .with_description("Liveness snapshot stamped with the current time"),
        Room::new("room_seed", "Seed/Bootstrap", RoomKind::Seed)
            .with_description("Bootstrap placeholder"),
    ]
}

type RoomMap = Arc<Mutex<BTreeMap<String, Room>>>;

pub struct RoomsRegistry {
    rooms: RoomMap,
    handlers: HandlerTable,
    leases: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    lease_ttl: Duration,
}

impl RoomsRegistry {
    pub fn new(
        handlers: HandlerTable,
        leases: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(BTreeMap::new())),
            handlers,
            leases,
            clock,
            lease_ttl,
        }
    }

    /// Default handlers, lease TTL from `[locks] room_ttl_secs`.
    pub fn from_config(
        config: &LocksConfig,
        leases: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ttl = config.room_ttl();
        let handlers = HandlerTable::with_defaults(Arc::clone(&clock));
        Self::new(handlers, leases, clock, ttl)
    }

    /// Add a handler for a new kind, or replace an existing one.
    pub fn with_handler(mut self, handler: Arc<dyn RoomHandler>) -> Self {
        self.handlers.register(handler);
        self
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Seed the default rooms if the registry is empty. Safe to call any
    /// number of times from any number of tasks.
    pub async fn ensure_defaults(&self) {
        let mut rooms = self.rooms.lock().await;
        seed_defaults(&mut rooms);
    }

    /// Snapshot of every room, ordered by id.
    pub async fn list_rooms(&self) -> BTreeMap<String, Room> {
        let mut rooms = self.rooms.lock().await;
        seed_defaults(&mut rooms);
        rooms.clone()
    }

    pub async fn get(&self, id: &str) -> Result<Room> {
        let mut rooms = self.rooms.lock().await;
        seed_defaults(&mut rooms);
        rooms
            .get(id)
            .cloned()
            .ok_or_else(|| StationError::not_found(format!("room {id}")))
    }

    /// Insert or replace a room. Defaults are seeded first so a registration
    /// never stands in for them.
    pub async fn register(&self, room: Room) {
        let mut rooms = self.rooms.lock().await;
        seed_defaults(&mut rooms);
        tracing::debug!("🏠 Registered room '{}' ({})", room.id, room.kind);
        rooms.insert(room.id.clone(), room);
    }

    /// Run a room once. `Busy` when its lease is held, `NotFound` for unknown
    /// ids; handler failures come back inside the envelope. Only a payload
    /// carrying `"ok": true` counts as a successful run.
    pub async fn run(&self, id: &str) -> Result<RoomRun> {
        let lock = RoomLock::new(
            format!("{ROOM_LEASE_PREFIX}{id}"),
            self.lease_ttl,
            Arc::clone(&self.leases),
            Arc::clone(&self.clock),
        );

        let (room, guard) = {
            let mut rooms = self.rooms.lock().await;
            seed_defaults(&mut rooms);
            let Some(room) = rooms.get_mut(id) else {
                return Err(StationError::not_found(format!("room {id}")));
            };
            if !lock.acquire() {
                return Err(StationError::busy(format!("room {id}")));
            }
            room.last_status = RunStatus::Running;
            let guard = RunGuard {
                rooms: Arc::clone(&self.rooms),
                id: id.to_string(),
                lock,
                clock: Arc::clone(&self.clock),
                finished: false,
            };
            (room.clone(), guard)
        };

        let started = Utc::now();
        let outcome = self.dispatch(&room).await;
        let duration_ms = (Utc::now() - started).num_milliseconds();
        let ran_at = self.clock.now();

        let (status, result) = match outcome {
            Ok(payload) if payload.get("ok") == Some(&Value::Bool(true)) => (RunStatus::Ok, payload),
            Ok(payload) => (RunStatus::Fail, payload),
            Err(e) => (RunStatus::Fail, json!({"ok": false, "error": e.to_string()})),
        };

        {
            let mut rooms = self.rooms.lock().await;
            if let Some(stored) = rooms.get_mut(id) {
                stored.last_status = status;
                stored.last_result = Some(result.clone());
                stored.last_run_at = Some(ran_at);
            }
        }
        guard.finish();

        match status {
            RunStatus::Fail => tracing::warn!("⚠️ Room '{id}' failed in {duration_ms}ms"),
            _ => tracing::info!("🏠 Room '{id}' ran ok in {duration_ms}ms"),
        }

        Ok(RoomRun {
            room_id: id.to_string(),
            status,
            result,
            ran_at,
            duration_ms,
        })
    }

    /// Handler call bounded by the lease TTL, with panics turned into errors.
    async fn dispatch(&self, room: &Room) -> Result<Value> {
        let call = AssertUnwindSafe(self.handlers.dispatch(room)).catch_unwind();
        match tokio::time::timeout(self.lease_ttl, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => Err(StationError::execution(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(StationError::execution(format!(
                "handler exceeded lease ttl of {:?}",
                self.lease_ttl
            ))),
        }
    }
}

/// Owns the lease of an in-flight run. Dropping it releases the lease; if the
/// run never recorded a result the room is marked failed.
struct RunGuard {
    rooms: RoomMap,
    id: String,
    lock: RoomLock,
    clock: Arc<dyn Clock>,
    finished: bool,
}

impl RunGuard {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.lock.release();
        if self.finished {
            return;
        }
        tracing::warn!("⚠️ Room '{}' run cancelled", self.id);

        let id = std::mem::take(&mut self.id);
        let ran_at = self.clock.now();
        let mark = move |rooms: &mut BTreeMap<String, Room>| {
            if let Some(room) = rooms.get_mut(&id) {
                if room.last_status == RunStatus::Running {
                    room.last_status = RunStatus::Fail;
                    room.last_result = Some(json!({"ok": false, "error": "run cancelled"}));
                    room.last_run_at = Some(ran_at);
                }
            }
        };
        match self.rooms.try_lock() {
            Ok(mut rooms) => mark(&mut *rooms),
            Err(_) => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let rooms = Arc::clone(&self.rooms);
                    handle.spawn(async move {
                        let mut rooms = rooms.lock().await;
                        mark(&mut *rooms);
                    });
                }
            }
        }
    }
}

fn seed_defaults(rooms: &mut BTreeMap<String, Room>) {
    if !rooms.is_empty() {
        return;
    }
    for room in default_rooms() {
        rooms.insert(room.id.clone(), room);
    }
    tracing::debug!("🏠 Seeded {} default rooms", rooms.len());
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::MemoryLeaseStore;
    use async_trait::async_trait;
    use station_core::traits::ManualClock;

    struct FailingHandler;

    #[async_trait]
    impl RoomHandler for FailingHandler {
        fn kind(&self) -> &str {
            "broken"
        }

        async fn run(&self, _room: &Room) -> Result<Value> {
            Err(StationError::execution("disk on fire"))
        }
    }

    struct NotOkHandler;

    #[async_trait]
    impl RoomHandler for NotOkHandler {
        fn kind(&self) -> &str {
            "grumpy"
        }

        async fn run(&self, _room: &Room) -> Result<Value> {
            Ok(json!({"ok": false, "notes": "threshold exceeded"}))
        }
    }

    struct SilentHandler;

    #[async_trait]
    impl RoomHandler for SilentHandler {
        fn kind(&self) -> &str {
            "silent"
        }

        async fn run(&self, _room: &Room) -> Result<Value> {
            Ok(json!({"notes": "finished without a verdict"}))
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl RoomHandler for PanickingHandler {
        fn kind(&self) -> &str {
            "panicky"
        }

        async fn run(&self, _room: &Room) -> Result<Value> {
            panic!("handler blew up")
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl RoomHandler for SlowHandler {
        fn kind(&self) -> &str {
            "slow"
        }

        async fn run(&self, _room: &Room) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({"ok": true}))
        }
    }

    fn registry() -> (RoomsRegistry, Arc<MemoryLeaseStore>) {
        let store = Arc::new(MemoryLeaseStore::new());
        let registry = RoomsRegistry::from_config(
            &LocksConfig::default(),
            store.clone(),
            Arc::new(ManualClock::default()),
        )
        .with_handler(Arc::new(FailingHandler))
        .with_handler(Arc::new(NotOkHandler))
        .with_handler(Arc::new(SilentHandler))
        .with_handler(Arc::new(PanickingHandler))
        .with_handler(Arc::new(SlowHandler));
        (registry, store)
    }

    #[tokio::test]
    async fn test_defaults_seeded_once_under_concurrency() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let r = registry.clone();
            handles.push(tokio::spawn(async move { r.ensure_defaults().await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let rooms = registry.list_rooms().await;
        let ids: Vec<&str> = rooms.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["room_guard", "room_health", "room_seed"]);
        assert_eq!(rooms["room_guard"].last_status, RunStatus::Never);
    }

    #[tokio::test]
    async fn test_get_unknown_room() {
        let (registry, _) = registry();
        assert!(matches!(registry.get("room_nope").await, Err(StationError::NotFound(_))));
        assert!(matches!(registry.run("room_nope").await, Err(StationError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_run_guard_records_result() {
        let (registry, store) = registry();
        let run = registry.run("room_guard").await.unwrap();
        assert!(run.is_ok());
        assert_eq!(run.result["ok"], true);

        let room = registry.get("room_guard").await.unwrap();
        assert_eq!(room.last_status, RunStatus::Ok);
        assert!(room.last_run_at.is_some());
        assert_eq!(room.last_result, Some(run.result));
        // Lease released after the run.
        assert!(store.acquired_at("rooms/room_guard").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failing_room_is_isolated() {
        let (registry, _) = registry();
        registry.register(Room::new("room_broken", "Broken", "broken")).await;

        let run = registry.run("room_broken").await.unwrap();
        assert_eq!(run.status, RunStatus::Fail);
        assert!(run.error().is_some_and(|e| e.contains("disk on fire")));

        let room = registry.get("room_broken").await.unwrap();
        assert_eq!(room.last_status, RunStatus::Fail);
        assert_eq!(room.last_result.as_ref().unwrap()["ok"], false);

        // Other rooms still run.
        assert!(registry.run("room_health").await.unwrap().is_ok());
        assert!(registry.run("room_broken").await.is_ok());
    }

    #[tokio::test]
    async fn test_ok_false_payload_is_failure() {
        let (registry, _) = registry();
        registry.register(Room::new("room_grumpy", "Grumpy", "grumpy")).await;
        let run = registry.run("room_grumpy").await.unwrap();
        assert_eq!(run.status, RunStatus::Fail);
        assert_eq!(run.result["notes"], "threshold exceeded");
    }

    #[tokio::test]
    async fn test_payload_without_ok_is_failure() {
        let (registry, _) = registry();
        registry.register(Room::new("room_silent", "Silent", "silent")).await;
        let run = registry.run("room_silent").await.unwrap();
        assert_eq!(run.status, RunStatus::Fail);
        assert!(!run.is_ok());
        assert_eq!(
            registry.get("room_silent").await.unwrap().last_status,
            RunStatus::Fail
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_captured() {
        let (registry, store) = registry();
        registry.register(Room::new("room_panicky", "Panicky", "panicky")).await;
        let run = registry.run("room_panicky").await.unwrap();
        assert_eq!(run.status, RunStatus::Fail);
        assert!(run.error().is_some_and(|e| e.contains("handler blew up")));
        assert!(store.acquired_at("rooms/room_panicky").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_bounded_by_lease_ttl() {
        let (registry, _) = registry();
        registry.register(Room::new("room_slow", "Slow", "slow")).await;
        let run = registry.run("room_slow").await.unwrap();
        assert_eq!(run.status, RunStatus::Fail);
        assert!(run.error().is_some_and(|e| e.contains("lease ttl")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_run_is_busy() {
        let (registry, store) = registry();
        let registry = Arc::new(registry);
        registry.register(Room::new("room_slow", "Slow", "slow")).await;

        let first = {
            let r = registry.clone();
            tokio::spawn(async move { r.run("room_slow").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(registry.get("room_slow").await.unwrap().last_status, RunStatus::Running);
        let err = registry.run("room_slow").await.unwrap_err();
        assert!(matches!(err, StationError::Busy(_)));
        // Other rooms are not blocked by the in-flight run.
        assert!(registry.run("room_guard").await.unwrap().is_ok());

        let run = first.await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Fail);
        assert!(store.acquired_at("rooms/room_slow").unwrap().is_none());
        assert!(registry.run("room_slow").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_releases_lease() {
        let (registry, store) = registry();
        registry.register(Room::new("room_slow", "Slow", "slow")).await;

        let cut = tokio::time::timeout(Duration::from_secs(1), registry.run("room_slow")).await;
        assert!(cut.is_err());

        assert!(store.acquired_at("rooms/room_slow").unwrap().is_none());
        let room = registry.get("room_slow").await.unwrap();
        assert_eq!(room.last_status, RunStatus::Fail);
        assert_eq!(room.last_result.as_ref().unwrap()["error"], "run cancelled");
        assert!(room.last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_kind_runs_ok() {
        let (registry, _) = registry();
        registry.register(Room::new("room_backup", "Backup", "backup")).await;
        let run = registry.run("room_backup").await.unwrap();
        assert!(run.is_ok());
        assert_eq!(run.result["notes"], "unknown kind=backup");
    }

    #[tokio::test]
    async fn test_run_busy_when_lease_held() {
        let (registry, store) = registry();
        assert!(
            store
                .try_acquire("rooms/room_guard", Duration::from_secs(10), registry.clock.now())
                .unwrap()
        );
        let err = registry.run("room_guard").await.unwrap_err();
        assert!(matches!(err, StationError::Busy(_)));
        // Declined runs leave the room untouched.
        assert_eq!(registry.get("room_guard").await.unwrap().last_status, RunStatus::Never);
    }

    #[tokio::test]
    async fn test_register_replaces_room() {
        let (registry, _) = registry();
        registry
            .register(Room::new("room_seed", "Seed v2", RoomKind::Seed))
            .await;
        let rooms = registry.list_rooms().await;
        assert_eq!(rooms.len(), 3);
        assert_eq!(rooms["room_seed"].name, "Seed v2");
    }
}
