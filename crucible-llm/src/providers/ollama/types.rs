//! Ollama API request and response types

use crucible_core::{DurationMs, GenerationOutput, Hyperparameters};
use serde::{Deserialize, Serialize};

// ============================================================================
// GENERATION TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    #[serde(skip_serializing_if = "GenerateOptions::is_empty")]
    pub options: GenerateOptions,
}

/// Ollama `options` object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

impl GenerateOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl From<&Hyperparameters> for GenerateOptions {
    fn from(params: &Hyperparameters) -> Self {
        Self {
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            num_predict: params.max_tokens,
            repeat_penalty: params.repeat_penalty,
            seed: params.seed,
            num_ctx: params.context_window,
        }
    }
}

/// Final (non-streaming) generate response. Durations are nanoseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub model: String,
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub load_duration: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
}

const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

impl GenerateResponse {
    /// Decoded tokens per second of wall time spent decoding.
    pub fn tokens_per_second(&self) -> f64 {
        match (self.eval_count, self.eval_duration) {
            (Some(count), Some(duration)) if duration > 0 => {
                count as f64 / (duration as f64 / NANOS_PER_SEC)
            }
            _ => 0.0,
        }
    }

    /// Model load plus prompt evaluation, the delay before the first token.
    pub fn time_to_first_token_ms(&self) -> Option<DurationMs> {
        if self.load_duration.is_none() && self.prompt_eval_duration.is_none() {
            return None;
        }
        let nanos = self.load_duration.unwrap_or(0) + self.prompt_eval_duration.unwrap_or(0);
        Some((nanos / NANOS_PER_MILLI) as DurationMs)
    }

    /// Convert to the gateway output. `elapsed_ms` is used when the server
    /// omits `total_duration`.
    pub fn into_output(self, elapsed_ms: DurationMs) -> GenerationOutput {
        let duration_ms = self
            .total_duration
            .map(|nanos| (nanos / NANOS_PER_MILLI) as DurationMs)
            .unwrap_or(elapsed_ms);
        let tokens_per_second = self.tokens_per_second();
        let time_to_first_token_ms = self.time_to_first_token_ms();
        GenerationOutput {
            text: self.response,
            duration_ms,
            tokens_per_second,
            time_to_first_token_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// MODEL TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListModelsResponse {
    pub models: Vec<ModelInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_from_response() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{
                "model": "llama3",
                "response": "Paris",
                "done": true,
                "total_duration": 2500000000,
                "load_duration": 100000000,
                "prompt_eval_count": 12,
                "prompt_eval_duration": 50000000,
                "eval_count": 40,
                "eval_duration": 2000000000
            }"#,
        )
        .unwrap();

        assert_eq!(response.tokens_per_second(), 20.0);
        assert_eq!(response.time_to_first_token_ms(), Some(150));

        let output = response.into_output(9999);
        assert_eq!(output.text, "Paris");
        assert_eq!(output.duration_ms, 2500);
    }

    #[test]
    fn test_missing_metrics_fall_back() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"model": "llama3", "response": "ok"}"#).unwrap();
        assert_eq!(response.tokens_per_second(), 0.0);
        assert_eq!(response.time_to_first_token_ms(), None);
        assert_eq!(response.into_output(321).duration_ms, 321);
    }

    #[test]
    fn test_options_map_hyperparameters() {
        let params = Hyperparameters {
            temperature: Some(0.2),
            max_tokens: Some(256),
            context_window: Some(4096),
            seed: Some(7),
            ..Default::default()
        };
        let options = GenerateOptions::from(&params);
        assert_eq!(options.num_predict, Some(256));
        assert_eq!(options.num_ctx, Some(4096));

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["seed"], 7);
        assert!(json.get("top_p").is_none());
        assert!(GenerateOptions::from(&Hyperparameters::default()).is_empty());
    }
}
