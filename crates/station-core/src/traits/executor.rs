//! Task executor trait: offline handlers and the remote executor implement it.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Task;

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// Run the task and return its result payload.
    async fn execute(&self, task: &Task) -> Result<serde_json::Value>;
}
