//! Wire types for the vLLM server HTTP API

use serde::{Deserialize, Serialize};

/// Sampling parameters for a generation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    /// -1 disables top-k sampling.
    pub top_k: i32,
    pub stop: Option<Vec<String>>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.95,
            top_k: -1,
            stop: None,
        }
    }
}

/// Body of `POST /generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(flatten)]
    pub params: GenerationParams,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, params: &GenerationParams) -> Self {
        Self {
            prompt: prompt.into(),
            params: params.clone(),
        }
    }
}

/// Successful `POST /generate` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    pub prompt: String,
    pub model: String,
    pub gpu_id: String,
}

/// `GET /health` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub gpu_id: String,
    pub model: String,
    pub port: u16,
}

/// `GET /info` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub gpu_id: String,
    pub model: String,
    pub description: String,
    pub port: u16,
    pub config: EngineConfig,
}

/// Engine-level settings echoed by `/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub tensor_parallel_size: u32,
    pub gpu_memory_utilization: f64,
    pub max_model_len: u32,
}
