//! Inference-backed cost estimation
//!
//! The admin model is asked for a unit estimate in free text; the first
//! number in the reply wins. Anything else yields the fallback cost.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;

use crate::domain::Task;
use crate::llm::{GenerateRequest, InferenceClient};

/// Cost used whenever the model gives no usable answer
pub const FALLBACK_COST: f64 = 5.0;

/// Payload characters shown to the estimator
const PAYLOAD_PREVIEW_CHARS: usize = 200;

static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").ok());

/// First decimal number anywhere in `text`.
pub fn extract_first_number(text: &str) -> Option<f64> {
    NUMBER.as_ref()?.find(text)?.as_str().parse().ok()
}

pub struct CostEstimator {
    client: Arc<dyn InferenceClient>,
    model: String,
    timeout: Duration,
    fallback: f64,
}

impl CostEstimator {
    pub fn new(client: Arc<dyn InferenceClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            timeout: Duration::from_secs(60),
            fallback: FALLBACK_COST,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fallback(mut self, fallback: f64) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn prompt(task: &Task) -> String {
        let payload = serde_json::Value::Object(task.payload.clone()).to_string();
        let preview: String = payload.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
        format!(
            "Estimate the cost of this task in units (1-100). Type: {}. Data: {}. Answer with a number only.",
            task.task_type, preview
        )
    }

    /// Estimated units for `task`. Never fails.
    pub async fn estimate(&self, task: &Task) -> f64 {
        let request = GenerateRequest::new(&self.model, Self::prompt(task));
        match self.client.generate(request, Some(self.timeout)).await {
            Ok(response) => match extract_first_number(&response.response) {
                Some(cost) => cost,
                None => {
                    log::debug!("No number in estimate for {}: {:?}", task.id, response.response);
                    self.fallback
                }
            },
            Err(e) => {
                log::debug!("Estimate for {} failed: {}", task.id, e);
                self.fallback
            }
        }
    }
}
