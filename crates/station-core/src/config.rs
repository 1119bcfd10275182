//! Station configuration: `~/.station/config.toml`.
//!
//! Every section has full defaults, so a missing file or a partial file both
//! load cleanly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StationError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub dynamo: DynamoConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub locks: LocksConfig,
    #[serde(default)]
    pub online: OnlineConfig,
}

/// Background loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamoConfig {
    pub interval_secs: u64,
    /// Floor applied to every sleep between ticks.
    pub min_interval_secs: u64,
    pub plan: Vec<String>,
    pub max_events: usize,
}

impl Default for DynamoConfig {
    fn default() -> Self {
        Self {
            interval_secs: 20,
            min_interval_secs: 5,
            plan: vec!["room_guard".into(), "room_health".into()],
            max_events: 250,
        }
    }
}

/// What `run_next` does with a task whose room lease is already held.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Put the task back at the head of the queue.
    #[default]
    Requeue,
    /// Mark the task failed.
    Drop,
}

/// Task queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub fallback_room: String,
    pub rooms: Vec<String>,
    pub busy_policy: BusyPolicy,
    /// Maximum number of tasks kept in memory. Oldest finished tasks go first.
    pub retention: usize,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            fallback_room: "core".into(),
            rooms: ["core", "ops", "senses", "hooks", "agent", "git", "render", "llm"]
                .into_iter()
                .map(String::from)
                .collect(),
            busy_policy: BusyPolicy::Requeue,
            retention: 1000,
        }
    }
}

/// Where lease markers live.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    #[default]
    Memory,
    File,
}

/// Lease lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocksConfig {
    pub backend: LockBackend,
    pub dir: String,
    pub default_ttl_secs: f64,
    /// TTL of the leases taken by registry room runs.
    pub room_ttl_secs: f64,
    pub ttl_overrides: BTreeMap<String, f64>,
}

impl Default for LocksConfig {
    fn default() -> Self {
        let mut ttl_overrides = BTreeMap::new();
        ttl_overrides.insert("core".into(), 8.0);
        ttl_overrides.insert("llm".into(), 10.0);
        ttl_overrides.insert("git".into(), 12.0);
        ttl_overrides.insert("ops".into(), 12.0);
        Self {
            backend: LockBackend::Memory,
            dir: "~/.station/locks".into(),
            default_ttl_secs: 10.0,
            room_ttl_secs: 10.0,
            ttl_overrides,
        }
    }
}

/// TTL used when a configured value cannot be represented.
pub const FALLBACK_TTL: Duration = Duration::from_secs(10);

/// A usable lease TTL: finite, positive and representable as a `Duration`.
fn ttl_from_secs(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

impl LocksConfig {
    /// TTL for a named lock, falling back to the default.
    pub fn ttl_for(&self, name: &str) -> Duration {
        let secs = self
            .ttl_overrides
            .get(name)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        ttl_from_secs(secs)
            .or_else(|| ttl_from_secs(self.default_ttl_secs))
            .unwrap_or(FALLBACK_TTL)
    }

    /// TTL of the leases taken by registry room runs.
    pub fn room_ttl(&self) -> Duration {
        ttl_from_secs(self.room_ttl_secs).unwrap_or(FALLBACK_TTL)
    }

    /// Every TTL must be finite and positive; a zero TTL would make every
    /// lease instantly stale.
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("default_ttl_secs", self.default_ttl_secs),
            ("room_ttl_secs", self.room_ttl_secs),
        ];
        for (key, secs) in named {
            if ttl_from_secs(secs).is_none() {
                return Err(StationError::config(format!(
                    "locks.{key} must be a positive number of seconds, got {secs}"
                )));
            }
        }
        for (name, secs) in &self.ttl_overrides {
            if ttl_from_secs(*secs).is_none() {
                return Err(StationError::config(format!(
                    "locks.ttl_overrides.{name} must be a positive number of seconds, got {secs}"
                )));
            }
        }
        Ok(())
    }

    /// Lock directory with `~` expanded.
    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dir).to_string())
    }
}

/// Remote executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnlineConfig {
    pub api_url: String,
    pub model: String,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for OnlineConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".into(),
            model: "gpt-5".into(),
            timeout_secs: 15,
            api_key: None,
        }
    }
}

impl StationConfig {
    /// `~/.station`
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".station")
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Load from the default path; defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit path; the file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StationError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| StationError::config(format!("Invalid config: {e}")))?;
        config.locks.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| StationError::config(format!("Serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
