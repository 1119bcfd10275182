//! Online credential lookup.
//!
//! The presence of a usable credential decides whether a task is stamped
//! `online` or `offline` at submission.

use crate::config::OnlineConfig;

/// Environment variables checked in order before the config file.
pub const CREDENTIAL_ENV_VARS: &[&str] = &["STATION_OPENAI_API_KEY", "OPENAI_API_KEY"];

pub trait CredentialSource: Send + Sync {
    /// The credential for the remote executor, if one is configured.
    fn online_credential(&self) -> Option<String>;

    fn has_online_credential(&self) -> bool {
        self.online_credential().is_some()
    }
}

/// Blank values and `CHANGE_ME` placeholders don't count.
pub fn usable_credential(raw: Option<&str>) -> Option<String> {
    let key = raw?.trim();
    if key.is_empty() || key.starts_with("CHANGE_ME") {
        None
    } else {
        Some(key.to_string())
    }
}

/// Reads the process environment, then the config file's `online.api_key`.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    config_key: Option<String>,
}

impl EnvCredentials {
    pub fn new(config: &OnlineConfig) -> Self {
        Self {
            config_key: config.api_key.clone(),
        }
    }
}

impl CredentialSource for EnvCredentials {
    fn online_credential(&self) -> Option<String> {
        CREDENTIAL_ENV_VARS
            .iter()
            .find_map(|var| usable_credential(std::env::var(var).ok().as_deref()))
            .or_else(|| usable_credential(self.config_key.as_deref()))
    }
}

/// Fixed credential, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<String>);

impl StaticCredentials {
    pub fn online(key: impl Into<String>) -> Self {
        Self(Some(key.into()))
    }

    pub fn offline() -> Self {
        Self(None)
    }
}

impl CredentialSource for StaticCredentials {
    fn online_credential(&self) -> Option<String> {
        usable_credential(self.0.as_deref())
    }
}
