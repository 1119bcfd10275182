//! Queued task entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Execution mode, stamped once at submission.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    Online,
    #[default]
    Offline,
}

impl std::fmt::Display for TaskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskMode::Online => write!(f, "online"),
            TaskMode::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub room: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub mode: TaskMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_error: Option<String>,
}

impl Task {
    /// A freshly queued task. Non-object payloads are replaced by `{}`.
    pub fn queued(
        id: impl Into<String>,
        room: impl Into<String>,
        task_type: impl Into<String>,
        payload: serde_json::Value,
        mode: TaskMode,
        now: DateTime<Utc>,
    ) -> Self {
        let payload = if payload.is_object() {
            payload
        } else {
            serde_json::json!({})
        };
        Self {
            id: id.into(),
            room: room.into(),
            task_type: task_type.into(),
            payload,
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            mode,
            online_error: None,
        }
    }
}
