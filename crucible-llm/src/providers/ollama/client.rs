//! Ollama HTTP client

use super::types::{ErrorResponse, ListModelsResponse, ModelInfo};
use super::PROVIDER;
use crate::providers::{invalid_response, request_failed, unavailable};
use crate::GatewayResult;
use crucible_core::{EngineConfig, GatewayError};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Thin client over the Ollama REST API.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a client.
    ///
    /// # Arguments
    /// * `base_url` - Ollama server URL (e.g., "http://localhost:11434")
    /// * `timeout` - Whole-request timeout applied to every call
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| unavailable(PROVIDER, format!("Failed to build HTTP client: {}", e)))?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Create a client from engine configuration.
    pub fn from_config(config: &EngineConfig) -> GatewayResult<Self> {
        Self::new(config.ollama_base_url.clone(), config.generation_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body. A 404 is reported as `ModelNotFound` for `model`.
    pub(crate) async fn post_json<Req: Serialize, Res: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
        model: &str,
    ) -> GatewayResult<Res> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = self.check_status(response, model).await?;
        response
            .json()
            .await
            .map_err(|e| self.map_body_error(e))
    }

    /// Models installed on the server (`GET /api/tags`).
    pub async fn list_models(&self) -> GatewayResult<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = self.check_status(response, "").await?;
        let list: ListModelsResponse = response.json().await.map_err(|e| self.map_body_error(e))?;
        Ok(list.models)
    }

    /// Whether `model` is installed. Untagged names match any tag.
    pub async fn has_model(&self, model: &str) -> GatewayResult<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| model_matches(&m.name, model)))
    }

    async fn check_status(&self, response: Response, model: &str) -> GatewayResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let error_msg = match serde_json::from_str::<ErrorResponse>(&error_text) {
            Ok(api_error) => api_error.error,
            Err(_) => error_text,
        };

        Err(match status {
            StatusCode::NOT_FOUND if !model.is_empty() => GatewayError::ModelNotFound {
                provider: PROVIDER.to_string(),
                model: model.to_string(),
            },
            _ => request_failed(PROVIDER, status.as_u16(), error_msg),
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout {
                provider: PROVIDER.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            unavailable(PROVIDER, format!("Failed to connect to Ollama: {}", e))
        }
    }

    fn map_body_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout {
                provider: PROVIDER.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            invalid_response(PROVIDER, format!("Failed to parse response: {}", e))
        }
    }
}

fn model_matches(installed: &str, wanted: &str) -> bool {
    if installed == wanted {
        return true;
    }
    !wanted.contains(':') && installed.split(':').next() == Some(wanted)
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_matching() {
        assert!(model_matches("llama3:latest", "llama3"));
        assert!(model_matches("llama3:8b", "llama3:8b"));
        assert!(!model_matches("llama3:8b", "llama3:70b"));
        assert!(!model_matches("llama3.1:latest", "llama3"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = OllamaClient::new("http://localhost:11434/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }
}
