//! Online executor: one call to an OpenAI-compatible Responses endpoint.

use async_trait::async_trait;
use serde_json::{Value, json};
use station_core::config::OnlineConfig;
use station_core::error::{Result, StationError};
use station_core::traits::{CredentialSource, TaskExecutor};
use station_core::types::Task;
use std::sync::Arc;
use std::time::Duration;

/// Longest output text kept on a task result, in chars.
pub const MAX_OUTPUT_CHARS: usize = 3000;

pub struct OnlineExecutor {
    api_url: String,
    model: String,
    credentials: Arc<dyn CredentialSource>,
    client: reqwest::Client,
}

impl OnlineExecutor {
    pub fn new(config: &OnlineConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| StationError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            credentials,
            client,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn prompt(task: &Task) -> String {
        format!(
            "Task type: {}\nRoom: {}\nPayload(JSON): {}\nReturn a concise result.",
            task.task_type, task.room, task.payload
        )
    }
}

/// Concatenate every `output_text` piece of a Responses API reply.
pub fn extract_output_text(reply: &Value) -> String {
    let text: String = reply["output"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| item["content"].as_array())
        .flatten()
        .filter(|c| c["type"] == "output_text")
        .filter_map(|c| c["text"].as_str())
        .collect();
    text.chars().take(MAX_OUTPUT_CHARS).collect()
}

#[async_trait]
impl TaskExecutor for OnlineExecutor {
    fn name(&self) -> &str {
        "online"
    }

    async fn execute(&self, task: &Task) -> Result<Value> {
        let api_key = self
            .credentials
            .online_credential()
            .ok_or_else(|| StationError::remote("no online credential configured"))?;

        let body = json!({
            "model": self.model,
            "input": [{"role": "user", "content": Self::prompt(task)}],
            "temperature": 0.2,
        });

        let resp = self
            .client
            .post(format!("{}/responses", self.api_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                StationError::remote(format!("connection to {} failed: {e}", self.api_url))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!("⚠️ Online executor got {status} for task {}", task.id);
            return Err(StationError::remote(format!("API error {status}: {text}")));
        }

        let reply: Value = resp
            .json()
            .await
            .map_err(|e| StationError::remote(format!("invalid response body: {e}")))?;

        Ok(json!({
            "ok": true,
            "mode": "online",
            "task_type": task.task_type,
            "text": extract_output_text(&reply),
            "http": status.as_u16(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use station_core::traits::StaticCredentials;
    use station_core::types::TaskMode;

    fn task() -> Task {
        Task::queued("t1", "llm", "summarize", json!({"text": "hello"}), TaskMode::Online, Utc::now())
    }

    fn executor(url: &str, creds: StaticCredentials) -> OnlineExecutor {
        let config = OnlineConfig {
            api_url: url.to_string(),
            ..OnlineConfig::default()
        };
        OnlineExecutor::new(&config, Arc::new(creds)).unwrap()
    }

    #[test]
    fn test_extract_output_text() {
        let reply = json!({
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Hello, "},
                    {"type": "refusal", "text": "ignored"},
                    {"type": "output_text", "text": "world"},
                ]},
            ]
        });
        assert_eq!(extract_output_text(&reply), "Hello, world");
        assert_eq!(extract_output_text(&json!({})), "");

        let long = json!({"output": [{"content": [{"type": "output_text", "text": "x".repeat(5000)}]}]});
        assert_eq!(extract_output_text(&long).len(), MAX_OUTPUT_CHARS);
    }

    #[tokio::test]
    async fn test_execute_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/responses")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(json!({"model": "gpt-5", "temperature": 0.2})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"output":[{"content":[{"type":"output_text","text":"done"}]}]}"#)
            .create_async()
            .await;

        let exec = executor(&server.url(), StaticCredentials::online("sk-test"));
        let out = exec.execute(&task()).await.unwrap();
        assert_eq!(out["ok"], true);
        assert_eq!(out["mode"], "online");
        assert_eq!(out["text"], "done");
        assert_eq!(out["http"], 200);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_execute_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/responses")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let exec = executor(&server.url(), StaticCredentials::online("sk-test"));
        let err = exec.execute(&task()).await.unwrap_err();
        assert!(matches!(err, StationError::RemoteCall(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_execute_without_credential() {
        let exec = executor("http://127.0.0.1:9", StaticCredentials::offline());
        let err = exec.execute(&task()).await.unwrap_err();
        assert!(matches!(err, StationError::RemoteCall(_)));
    }

    #[tokio::test]
    async fn test_execute_unreachable() {
        let exec = executor("http://127.0.0.1:9", StaticCredentials::online("sk-test"));
        let err = exec.execute(&task()).await.unwrap_err();
        assert!(matches!(err, StationError::RemoteCall(_)));
    }
}
