//! # Station Providers
//! Remote executors for online tasks.

pub mod online;

pub use online::OnlineExecutor;

use station_core::config::OnlineConfig;
use station_core::error::Result;
use station_core::traits::{CredentialSource, TaskExecutor};
use std::sync::Arc;

/// Create the online executor from configuration.
pub fn create_online_executor(
    config: &OnlineConfig,
    credentials: Arc<dyn CredentialSource>,
) -> Result<Arc<dyn TaskExecutor>> {
    tracing::debug!("🌐 Online executor → {} ({})", config.api_url, config.model);
    Ok(Arc::new(OnlineExecutor::new(config, credentials)?))
}
