//! DynamoEngine: background loop rotating over a plan of rooms.
//!
//! One tokio task per running engine. Each tick runs `plan[ticks % len]`
//! through the rooms registry, records the outcome, then sleeps for the
//! interval. `stop()` signals the loop over a watch channel, which also
//! cancels the in-flight sleep, and awaits the task before returning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use station_core::config::DynamoConfig;
use station_core::traits::Clock;
use station_core::types::RunStatus;
use station_rooms::RoomsRegistry;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Room run when the plan is empty.
pub const FALLBACK_PLAN_ROOM: &str = "room_health";

/// Lowest sleep between ticks, whatever `min_interval_secs` says.
pub const MIN_TICK_INTERVAL_SECS: u64 = 1;

/// Snapshot of the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamoState {
    pub running: bool,
    pub interval_secs: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_room: Option<String>,
    pub last_status: RunStatus,
    pub last_error: Option<String>,
    pub ticks: u64,
    pub plan: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamoEvent {
    pub ts: DateTime<Utc>,
    pub kind: String,
    pub payload: Value,
}

struct Shared {
    registry: Arc<RoomsRegistry>,
    clock: Arc<dyn Clock>,
    state: Mutex<DynamoState>,
    events: Mutex<VecDeque<DynamoEvent>>,
    // Held for a whole tick so loop and manual ticks never interleave.
    tick_gate: Mutex<()>,
    min_interval_secs: u64,
    max_events: usize,
}

impl Shared {
    async fn record(&self, kind: &str, payload: Value) {
        let event = DynamoEvent {
            ts: self.clock.now(),
            kind: kind.to_string(),
            payload,
        };
        let mut events = self.events.lock().await;
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    fn floor(&self, interval_secs: u64) -> u64 {
        interval_secs.max(self.min_interval_secs)
    }

    async fn tick(&self) -> DynamoState {
        let _gate = self.tick_gate.lock().await;

        let room = {
            let mut state = self.state.lock().await;
            let room = if state.plan.is_empty() {
                FALLBACK_PLAN_ROOM.to_string()
            } else {
                let idx = (state.ticks % state.plan.len() as u64) as usize;
                state.plan[idx].clone()
            };
            state.last_room = Some(room.clone());
            state.last_status = RunStatus::Running;
            room
        };

        let outcome = self.registry.run(&room).await;

        let (status, error) = match &outcome {
            Ok(run) if run.is_ok() => (RunStatus::Ok, None),
            Ok(run) => (
                RunStatus::Fail,
                Some(
                    run.error()
                        .map(String::from)
                        .unwrap_or_else(|| run.result.to_string()),
                ),
            ),
            Err(e) => (RunStatus::Fail, Some(e.to_string())),
        };

        let snapshot = {
            let mut state = self.state.lock().await;
            state.last_tick_at = Some(self.clock.now());
            state.last_status = status;
            state.last_error = error.clone();
            state.ticks += 1;
            state.clone()
        };

        match &error {
            None => self.record("tick", json!({"room": room, "ticks": snapshot.ticks})).await,
            Some(err) => {
                tracing::warn!("⚠️ Dynamo tick on '{room}' failed: {err}");
                self.record(
                    "tick_failed",
                    json!({"room": room, "ticks": snapshot.ticks, "error": err}),
                )
                .await
            }
        }
        snapshot
    }
}

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct DynamoEngine {
    shared: Arc<Shared>,
    // Serializes start/stop so a restart never overlaps the old loop.
    control: Mutex<Option<LoopHandle>>,
}

impl DynamoEngine {
    pub fn new(registry: Arc<RoomsRegistry>, config: &DynamoConfig, clock: Arc<dyn Clock>) -> Self {
        let min_interval_secs = config.min_interval_secs.max(MIN_TICK_INTERVAL_SECS);
        let state = DynamoState {
            running: false,
            interval_secs: config.interval_secs.max(min_interval_secs),
            last_tick_at: None,
            last_room: None,
            last_status: RunStatus::Never,
            last_error: None,
            ticks: 0,
            plan: config.plan.clone(),
        };
        Self {
            shared: Arc::new(Shared {
                registry,
                clock,
                state: Mutex::new(state),
                events: Mutex::new(VecDeque::new()),
                tick_gate: Mutex::new(()),
                min_interval_secs,
                max_events: config.max_events.max(1),
            }),
            control: Mutex::new(None),
        }
    }

    /// Start the loop. While already running, only the interval is updated
    /// (from the next sleep on); no second loop is spawned.
    pub async fn start(&self, interval_secs: Option<u64>) -> DynamoState {
        let mut control = self.control.lock().await;
        if control.as_ref().is_some_and(|h| !h.handle.is_finished()) {
            if let Some(secs) = interval_secs {
                self.shared.state.lock().await.interval_secs = self.shared.floor(secs);
            }
            return self.status().await;
        }

        let interval = {
            let mut state = self.shared.state.lock().await;
            if let Some(secs) = interval_secs {
                state.interval_secs = self.shared.floor(secs);
            }
            state.running = true;
            state.interval_secs
        };
        self.shared.record("start", json!({"interval_secs": interval})).await;

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(Arc::clone(&self.shared), rx));
        *control = Some(LoopHandle { shutdown, handle });

        tracing::info!("⚡ Dynamo loop started (every {interval}s)");
        self.status().await
    }

    /// Stop the loop and wait for it to exit. No-op when not running.
    pub async fn stop(&self) -> DynamoState {
        let mut control = self.control.lock().await;
        if let Some(LoopHandle { shutdown, handle }) = control.take() {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                tracing::warn!("⚠️ Dynamo loop ended abnormally: {e}");
            }
            let ticks = {
                let mut state = self.shared.state.lock().await;
                state.running = false;
                state.ticks
            };
            self.shared.record("stop", json!({"ticks": ticks})).await;
            tracing::info!("🛑 Dynamo loop stopped after {ticks} ticks");
        }
        self.status().await
    }

    /// Replace the plan. Blank ids are ignored; an empty plan is refused and
    /// the current one kept.
    pub async fn set_plan(&self, ids: Vec<String>) -> DynamoState {
        let plan: Vec<String> = ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if plan.is_empty() {
            return self.status().await;
        }
        self.shared.state.lock().await.plan = plan.clone();
        self.shared.record("plan", json!({"plan": plan})).await;
        tracing::debug!("⚡ Dynamo plan set to {plan:?}");
        self.status().await
    }

    /// Run one rotation step now, independent of the loop.
    pub async fn tick(&self) -> DynamoState {
        self.shared.tick().await
    }

    pub async fn status(&self) -> DynamoState {
        self.shared.state.lock().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.shared.state.lock().await.running
    }

    /// The most recent `limit` events, oldest first.
    pub async fn events(&self, limit: usize) -> Vec<DynamoEvent> {
        let events = self.shared.events.lock().await;
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    /// Append an external event to the log.
    pub async fn record_event(&self, kind: &str, payload: Value) {
        self.shared.record(kind, payload).await;
    }
}

impl Drop for DynamoEngine {
    fn drop(&mut self) {
        if let Some(h) = self.control.get_mut().take() {
            let _ = h.shutdown.send(true);
            h.handle.abort();
        }
    }
}

async fn run_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        shared.tick().await;

        let secs = shared.floor(shared.state.lock().await.interval_secs);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = shutdown.changed() => break,
        }
    }
}
