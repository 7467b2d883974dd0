//! HTTP client for an Ollama-compatible inference runtime

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{Result, TollgateError};
use crate::llm::client::{GenerateRequest, GenerateResponse, InferenceClient, InferenceError};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Timeouts per kind of call
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub generate_timeout: Duration,
    pub tags_timeout: Duration,
    pub health_timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            generate_timeout: Duration::from_secs(300),
            tags_timeout: Duration::from_secs(10),
            health_timeout: Duration::from_secs(5),
        }
    }
}

pub struct OllamaClient {
    client: Client,
    config: OllamaConfig,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| TollgateError::Startup(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: OllamaConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn map_send_error(e: reqwest::Error, timeout: Duration) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout(timeout)
        } else {
            InferenceError::Network(e)
        }
    }

    async fn check_status(response: reqwest::Response) -> std::result::Result<reqwest::Response, InferenceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(InferenceError::ApiError {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn generate(
        &self,
        request: GenerateRequest,
        timeout: Option<Duration>,
    ) -> std::result::Result<GenerateResponse, InferenceError> {
        let timeout = timeout.unwrap_or(self.config.generate_timeout);
        log::debug!("POST /api/generate model={} timeout={:?}", request.model, timeout);

        let response = self
            .client
            .post(self.url("/api/generate"))
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout))?;

        let response = Self::check_status(response).await?;
        let body = response.text().await.map_err(|e| Self::map_send_error(e, timeout))?;
        let parsed: GenerateResponse = serde_json::from_str(&body)?;
        Ok(parsed)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, InferenceError> {
        let timeout = self.config.tags_timeout;
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout))?;

        let response = Self::check_status(response).await?;
        let body = response.text().await.map_err(|e| Self::map_send_error(e, timeout))?;
        let tags: TagsResponse = serde_json::from_str(&body)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn health(&self) -> bool {
        match self
            .client
            .get(self.url("/"))
            .timeout(self.config.health_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                log::debug!("Inference health check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalised() {
        let client = OllamaClient::new(OllamaConfig {
            base_url: "http://gpu-box:11434/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://gpu-box:11434");
        assert_eq!(client.url("/api/tags"), "http://gpu-box:11434/api/tags");
    }

    #[test]
    fn test_tags_parsing() {
        let body = r#"{"models":[{"name":"qwen2.5:1.5b","size":1},{"name":"worker-auditor:latest"}]}"#;
        let tags: TagsResponse = serde_json::from_str(body).unwrap();
        let names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["qwen2.5:1.5b", "worker-auditor:latest"]);
    }

    #[test]
    fn test_tags_without_models_is_empty() {
        let tags: TagsResponse = serde_json::from_str("{}").unwrap();
        assert!(tags.models.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_runtime_is_unhealthy() {
        // Port 9 (discard) is almost never listening.
        let client = OllamaClient::new(OllamaConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            health_timeout: Duration::from_millis(200),
            tags_timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();
        assert!(!client.health().await);
        assert!(client.list_models().await.is_err());
    }
}
