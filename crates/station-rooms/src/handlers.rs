//! Room handlers: the work a room does when it runs, keyed by kind tag.

use async_trait::async_trait;
use serde_json::{Value, json};
use station_core::error::Result;
use station_core::traits::Clock;
use station_core::types::{Room, RoomKind};
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait RoomHandler: Send + Sync {
    /// Kind tag this handler serves.
    fn kind(&self) -> &str;

    /// Execute one run. The run succeeds only when the payload carries
    /// `"ok": true`.
    async fn run(&self, room: &Room) -> Result<Value>;
}

/// Static capability checks.
pub struct GuardHandler;

#[async_trait]
impl RoomHandler for GuardHandler {
    fn kind(&self) -> &str {
        "guard"
    }

    async fn run(&self, _room: &Room) -> Result<Value> {
        Ok(json!({
            "ok": true,
            "checks": {
                "lease_locks": true,
                "task_queue": true,
                "offline_executor": true,
            },
        }))
    }
}

/// Liveness snapshot stamped with the current time.
pub struct HealthHandler {
    clock: Arc<dyn Clock>,
}

impl HealthHandler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl RoomHandler for HealthHandler {
    fn kind(&self) -> &str {
        "health"
    }

    async fn run(&self, _room: &Room) -> Result<Value> {
        Ok(json!({
            "ok": true,
            "ts": self.clock.now().to_rfc3339(),
            "notes": "backend alive",
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "pid": std::process::id(),
        }))
    }
}

/// Bootstrap placeholder.
pub struct SeedHandler;

#[async_trait]
impl RoomHandler for SeedHandler {
    fn kind(&self) -> &str {
        "seed"
    }

    async fn run(&self, _room: &Room) -> Result<Value> {
        Ok(json!({"ok": true, "notes": "seed placeholder"}))
    }
}

/// Kind tag → handler. Kinds without a handler get a benign ok payload.
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn RoomHandler>>,
}

impl HandlerTable {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Guard, health and seed.
    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        let mut table = Self::empty();
        table.register(Arc::new(GuardHandler));
        table.register(Arc::new(HealthHandler::new(clock)));
        table.register(Arc::new(SeedHandler));
        table
    }

    /// Add or replace the handler for its kind.
    pub fn register(&mut self, handler: Arc<dyn RoomHandler>) {
        self.handlers.insert(handler.kind().to_string(), handler);
    }

    pub fn get(&self, kind: &RoomKind) -> Option<Arc<dyn RoomHandler>> {
        self.handlers.get(kind.as_str()).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub async fn dispatch(&self, room: &Room) -> Result<Value> {
        match self.get(&room.kind) {
            Some(handler) => handler.run(room).await,
            None => Ok(unknown_kind(&room.kind)),
        }
    }
}

pub(crate) fn unknown_kind(kind: &RoomKind) -> Value {
    json!({"ok": true, "notes": format!("unknown kind={kind}")})
}
