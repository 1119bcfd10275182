//! Task executors: deterministic offline handlers and online/offline dispatch.

use async_trait::async_trait;
use serde_json::{Value, json};
use station_core::error::Result;
use station_core::traits::{Clock, TaskExecutor};
use station_core::types::{Task, TaskMode};
use std::sync::Arc;
use std::time::Duration;

/// Cap on a single online attempt unless configured otherwise.
pub const DEFAULT_ONLINE_TIMEOUT: Duration = Duration::from_secs(15);

/// Chars kept by the offline `summarize` handler before the ellipsis.
pub const SUMMARY_CHARS: usize = 240;

/// First `SUMMARY_CHARS` chars of `text`, plus `...` when anything was cut.
pub fn summarize(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(SUMMARY_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Pure, network-free handlers keyed by task type.
pub struct OfflineExecutor {
    rooms: Vec<String>,
    lock_count: usize,
    clock: Arc<dyn Clock>,
}

impl OfflineExecutor {
    pub fn new(rooms: Vec<String>, lock_count: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms,
            lock_count,
            clock,
        }
    }
}

#[async_trait]
impl TaskExecutor for OfflineExecutor {
    fn name(&self) -> &str {
        "offline"
    }

    async fn execute(&self, task: &Task) -> Result<Value> {
        let payload = &task.payload;
        let out = match task.task_type.trim() {
            "ping" => json!({
                "ok": true,
                "mode": "offline",
                "echo": payload,
                "ts": self.clock.now().to_rfc3339(),
            }),
            "room_check" => json!({
                "ok": true,
                "mode": "offline",
                "rooms": self.rooms,
                "locks": self.lock_count,
            }),
            "summarize" => {
                let text = match payload.get("text") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                json!({"ok": true, "mode": "offline", "summary": summarize(&text)})
            }
            other => json!({
                "ok": true,
                "mode": "offline",
                "note": "stub_task",
                "type": other,
                "payload": payload,
            }),
        };
        Ok(out)
    }
}

/// What running one task produced.
#[derive(Debug)]
pub struct Execution {
    pub result: Result<Value>,
    /// Set when an online attempt failed and the offline handler ran instead.
    pub online_error: Option<String>,
}

/// Routes a task by the mode stamped on it at submission. Online tasks fall
/// back to the offline handler when the remote call fails or runs too long.
pub struct Executor {
    offline: Arc<dyn TaskExecutor>,
    online: Option<Arc<dyn TaskExecutor>>,
    online_timeout: Duration,
}

impl Executor {
    pub fn new(offline: Arc<dyn TaskExecutor>, online: Option<Arc<dyn TaskExecutor>>) -> Self {
        Self {
            offline,
            online,
            online_timeout: DEFAULT_ONLINE_TIMEOUT,
        }
    }

    pub fn with_online_timeout(mut self, timeout: Duration) -> Self {
        self.online_timeout = timeout;
        self
    }

    pub fn offline_only(offline: Arc<dyn TaskExecutor>) -> Self {
        Self::new(offline, None)
    }

    pub fn has_online(&self) -> bool {
        self.online.is_some()
    }

    /// Online attempts get at most three quarters of `budget`, so the
    /// offline fallback still has time to run inside it.
    pub fn online_budget(&self, budget: Duration) -> Duration {
        self.online_timeout.min(budget - budget / 4)
    }

    /// Run `task` within `budget`, the caller's own deadline.
    pub async fn run(&self, task: &Task, budget: Duration) -> Execution {
        let online_error = match (task.mode, &self.online) {
            (TaskMode::Offline, _) => None,
            (TaskMode::Online, None) => Some("no online executor configured".to_string()),
            (TaskMode::Online, Some(online)) => {
                let limit = self.online_budget(budget);
                match tokio::time::timeout(limit, online.execute(task)).await {
                    Ok(Ok(value)) => {
                        return Execution {
                            result: Ok(value),
                            online_error: None,
                        };
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("⚠️ Online run of task {} failed, going offline: {e}", task.id);
                        Some(e.to_string())
                    }
                    Err(_) => {
                        tracing::warn!(
                            "⚠️ Online run of task {} exceeded {limit:?}, going offline",
                            task.id
                        );
                        Some(format!("online call exceeded {limit:?}"))
                    }
                }
            }
        };

        Execution {
            result: self.offline.execute(task).await,
            online_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use station_core::error::StationError;
    use station_core::traits::ManualClock;

    const BUDGET: Duration = Duration::from_secs(10);

    struct FakeOnline {
        fail: bool,
    }

    struct HangingOnline;

    #[async_trait]
    impl TaskExecutor for HangingOnline {
        fn name(&self) -> &str {
            "hanging-online"
        }

        async fn execute(&self, _task: &Task) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!({"ok": true, "mode": "online"}))
        }
    }

    #[async_trait]
    impl TaskExecutor for FakeOnline {
        fn name(&self) -> &str {
            "fake-online"
        }

        async fn execute(&self, task: &Task) -> Result<Value> {
            if self.fail {
                Err(StationError::remote("connection refused"))
            } else {
                Ok(json!({"ok": true, "mode": "online", "task_type": task.task_type}))
            }
        }
    }

    fn offline() -> Arc<dyn TaskExecutor> {
        Arc::new(OfflineExecutor::new(
            vec!["core".into(), "ops".into()],
            2,
            Arc::new(ManualClock::default()),
        ))
    }

    fn task(task_type: &str, payload: Value, mode: TaskMode) -> Task {
        Task::queued("t1", "core", task_type, payload, mode, Utc::now())
    }

    #[test]
    fn test_summarize() {
        let long = "a".repeat(300);
        let s = summarize(&long);
        assert_eq!(s.chars().count(), 243);
        assert!(s.ends_with("..."));

        assert_eq!(summarize(&"b".repeat(240)), "b".repeat(240));
        assert_eq!(summarize(""), "");
        // Multi-byte chars are counted, not bytes.
        assert_eq!(summarize(&"é".repeat(241)).chars().count(), 243);
    }

    #[tokio::test]
    async fn test_offline_ping() {
        let out = offline()
            .execute(&task("ping", json!({"x": 1}), TaskMode::Offline))
            .await
            .unwrap();
        assert_eq!(out["ok"], true);
        assert_eq!(out["echo"], json!({"x": 1}));
        assert!(out["ts"].is_string());
    }

    #[tokio::test]
    async fn test_offline_room_check() {
        let out = offline()
            .execute(&task("room_check", json!({}), TaskMode::Offline))
            .await
            .unwrap();
        assert_eq!(out["rooms"], json!(["core", "ops"]));
        assert_eq!(out["locks"], 2);
    }

    #[tokio::test]
    async fn test_offline_summarize() {
        let out = offline()
            .execute(&task("summarize", json!({"text": "a".repeat(300)}), TaskMode::Offline))
            .await
            .unwrap();
        let summary = out["summary"].as_str().unwrap();
        assert!(summary.len() <= 243);
        assert!(summary.ends_with("..."));
    }

    #[tokio::test]
    async fn test_offline_unknown_type_is_stub() {
        let out = offline()
            .execute(&task("reindex", json!({"k": "v"}), TaskMode::Offline))
            .await
            .unwrap();
        assert_eq!(out["note"], "stub_task");
        assert_eq!(out["type"], "reindex");
        assert_eq!(out["payload"]["k"], "v");
    }

    #[tokio::test]
    async fn test_online_success() {
        let exec = Executor::new(offline(), Some(Arc::new(FakeOnline { fail: false })));
        let run = exec.run(&task("summarize", json!({}), TaskMode::Online), BUDGET).await;
        assert_eq!(run.result.unwrap()["mode"], "online");
        assert!(run.online_error.is_none());
    }

    #[tokio::test]
    async fn test_online_failure_falls_back_offline() {
        let exec = Executor::new(offline(), Some(Arc::new(FakeOnline { fail: true })));
        let run = exec.run(&task("ping", json!({}), TaskMode::Online), BUDGET).await;
        assert_eq!(run.result.unwrap()["mode"], "offline");
        assert!(run.online_error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_online_mode_without_executor() {
        let exec = Executor::offline_only(offline());
        assert!(!exec.has_online());
        let run = exec.run(&task("ping", json!({}), TaskMode::Online), BUDGET).await;
        assert!(run.result.is_ok());
        assert!(run.online_error.is_some());
    }

    #[tokio::test]
    async fn test_offline_mode_never_calls_online() {
        let exec = Executor::new(offline(), Some(Arc::new(FakeOnline { fail: true })));
        let run = exec.run(&task("ping", json!({}), TaskMode::Offline), BUDGET).await;
        assert_eq!(run.result.unwrap()["mode"], "offline");
        assert!(run.online_error.is_none());
    }

    #[test]
    fn test_online_budget_leaves_room_for_fallback() {
        let exec = Executor::offline_only(offline());
        assert_eq!(exec.online_budget(Duration::from_secs(8)), Duration::from_secs(6));
        assert_eq!(exec.online_budget(Duration::from_secs(60)), DEFAULT_ONLINE_TIMEOUT);

        let exec = exec.with_online_timeout(Duration::from_secs(2));
        assert_eq!(exec.online_budget(Duration::from_secs(8)), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_online_falls_back_within_budget() {
        let exec = Executor::new(offline(), Some(Arc::new(HangingOnline)));
        let started = tokio::time::Instant::now();
        let run = exec.run(&task("ping", json!({}), TaskMode::Online), BUDGET).await;

        assert!(started.elapsed() < BUDGET);
        assert_eq!(run.result.unwrap()["mode"], "offline");
        assert!(run.online_error.unwrap().contains("exceeded"));
    }
}
