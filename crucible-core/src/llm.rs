//! LLM-related primitive types.
//!
//! Pure data types for generation and retrieval. Traits and clients live in crucible-llm.

use crate::{DurationMs, Hyperparameters};
use serde::{Deserialize, Serialize};

/// A single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    /// Fully rendered user prompt, context included
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub hyperparameters: Hyperparameters,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system_prompt: None,
            hyperparameters: Hyperparameters::default(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn with_hyperparameters(mut self, hyperparameters: Hyperparameters) -> Self {
        self.hyperparameters = hyperparameters;
        self
    }
}

/// Generated text plus timing metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct GenerationOutput {
    pub text: String,
    pub duration_ms: DurationMs,
    pub tokens_per_second: f64,
    pub time_to_first_token_ms: Option<DurationMs>,
}

/// A ranked chunk returned by the retrieval gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RetrievedChunk {
    pub content: String,
    /// Similarity score, higher is closer
    pub score: f32,
    #[serde(default)]
    pub source: Option<String>,
}
