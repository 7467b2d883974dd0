//! Inference client trait, request/response types and errors

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Client for a local inference runtime. Each call is independent.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run one non-streaming generation. `timeout` overrides the client default.
    async fn generate(&self, request: GenerateRequest, timeout: Option<Duration>) -> Result<GenerateResponse, InferenceError>;

    /// Names of the models the runtime currently serves
    async fn list_models(&self) -> Result<Vec<String>, InferenceError>;

    /// Whether the runtime answers at all
    async fn health(&self) -> bool;
}

/// Body of a generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(default, skip_serializing_if = "GenerateOptions::is_empty")]
    pub options: GenerateOptions,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: false,
            options: GenerateOptions::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn with_num_predict(mut self, num_predict: u32) -> Self {
        self.options.num_predict = Some(num_predict);
        self
    }
}

/// Sampling options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Cap on generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

impl GenerateOptions {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.num_predict.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
}

impl GenerateResponse {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

/// Errors that can occur talking to the inference runtime
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::ApiError { status, .. } => *status >= 500,
            InferenceError::Network(_) => true,
            InferenceError::Timeout(_) => true,
            InferenceError::InvalidResponse(_) => false,
            InferenceError::JsonError(_) => false,
        }
    }
}

/// Scripted client for tests
///
/// Replies are consumed in order; once the script runs dry every call gets
/// the fallback reply. Requests are recorded for inspection.
pub struct MockInference {
    replies: Mutex<VecDeque<Result<String, String>>>,
    fallback: Mutex<Option<String>>,
    models: Mutex<Result<Vec<String>, String>>,
    healthy: Mutex<bool>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl MockInference {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            models: Mutex::new(Ok(Vec::new())),
            healthy: Mutex::new(true),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful reply
    pub fn reply(self, text: impl Into<String>) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Ok(text.into()));
        }
        self
    }

    /// Queue a failed call
    pub fn fail(self, message: impl Into<String>) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(message.into()));
        }
        self
    }

    /// Reply used once the script is exhausted
    pub fn fallback(self, text: impl Into<String>) -> Self {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = Some(text.into());
        }
        self
    }

    pub fn models(self, models: &[&str]) -> Self {
        self.set_models(Ok(models.iter().map(|m| m.to_string()).collect()));
        self
    }

    pub fn models_unreachable(self) -> Self {
        self.set_models(Err("connection refused".to_string()));
        self
    }

    pub fn unhealthy(self) -> Self {
        if let Ok(mut healthy) = self.healthy.lock() {
            *healthy = false;
        }
        self
    }

    fn set_models(&self, models: Result<Vec<String>, String>) {
        if let Ok(mut guard) = self.models.lock() {
            *guard = models;
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Default for MockInference {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceClient for MockInference {
    async fn generate(&self, request: GenerateRequest, _timeout: Option<Duration>) -> Result<GenerateResponse, InferenceError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        match next {
            Some(Ok(text)) => Ok(GenerateResponse::new(text)),
            Some(Err(message)) => Err(InferenceError::ApiError { status: 500, message }),
            None => match self.fallback.lock().ok().and_then(|f| f.clone()) {
                Some(text) => Ok(GenerateResponse::new(text)),
                None => Err(InferenceError::InvalidResponse("no scripted reply".to_string())),
            },
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let models = self
            .models
            .lock()
            .map_err(|_| InferenceError::InvalidResponse("mock poisoned".to_string()))?;
        models.clone().map_err(InferenceError::InvalidResponse)
    }

    async fn health(&self) -> bool {
        self.healthy.lock().map(|h| *h).unwrap_or(false)
    }
}
