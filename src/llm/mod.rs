//! Inference layer
//!
//! - `InferenceClient` trait for the local model runtime
//! - `OllamaClient` HTTP implementation
//! - `MockInference` scripted client for tests

pub mod client;
pub mod ollama;

pub use client::{GenerateOptions, GenerateRequest, GenerateResponse, InferenceClient, InferenceError, MockInference};
pub use ollama::{DEFAULT_BASE_URL, OllamaClient, OllamaConfig};
