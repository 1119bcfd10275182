//! Room entities: named, independently locked units of maintenance work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capability tag selecting the handler a room runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RoomKind {
    Guard,
    Health,
    Seed,
    Custom(String),
}

impl RoomKind {
    pub fn as_str(&self) -> &str {
        match self {
            RoomKind::Guard => "guard",
            RoomKind::Health => "health",
            RoomKind::Seed => "seed",
            RoomKind::Custom(tag) => tag,
        }
    }
}

impl From<String> for RoomKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "guard" => RoomKind::Guard,
            "health" => RoomKind::Health,
            "seed" => RoomKind::Seed,
            _ => RoomKind::Custom(tag),
        }
    }
}

impl From<&str> for RoomKind {
    fn from(tag: &str) -> Self {
        RoomKind::from(tag.to_string())
    }
}

impl From<RoomKind> for String {
    fn from(kind: RoomKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for RoomKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent run. Shared by rooms and the scheduler state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Never,
    Running,
    Ok,
    Fail,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Never => write!(f, "never"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Ok => write!(f, "ok"),
            RunStatus::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub kind: RoomKind,
    #[serde(default)]
    pub description: String,
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status: RunStatus,
    pub last_result: Option<serde_json::Value>,
}

impl Room {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<RoomKind>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            description: String::new(),
            last_run_at: None,
            last_status: RunStatus::Never,
            last_result: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Envelope returned by a room run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRun {
    pub room_id: String,
    pub status: RunStatus,
    pub result: serde_json::Value,
    pub ran_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl RoomRun {
    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }

    /// Error description carried by a failed run, if any.
    pub fn error(&self) -> Option<&str> {
        self.result["error"].as_str()
    }
}
