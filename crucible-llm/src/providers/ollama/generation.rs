//! Ollama generation gateway (`POST /api/generate`, non-streaming)

use super::client::OllamaClient;
use super::types::{GenerateOptions, GenerateRequest, GenerateResponse};
use super::PROVIDER;
use crate::{GatewayResult, GenerationGateway};
use async_trait::async_trait;
use crucible_core::{DurationMs, GenerationOutput, GenerationRequest};
use std::time::Instant;

/// Generation gateway backed by a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaGenerationGateway {
    client: OllamaClient,
}

impl OllamaGenerationGateway {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }
}

#[async_trait]
impl GenerationGateway for OllamaGenerationGateway {
    async fn generate(&self, request: &GenerationRequest) -> GatewayResult<GenerationOutput> {
        let body = GenerateRequest {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            system: request.system_prompt.clone(),
            stream: false,
            options: GenerateOptions::from(&request.hyperparameters),
        };

        let started = Instant::now();
        let response: GenerateResponse = self
            .client
            .post_json("/api/generate", &body, &request.model)
            .await?;
        let elapsed_ms = started.elapsed().as_millis() as DurationMs;

        tracing::debug!(
            model = %request.model,
            eval_count = ?response.eval_count,
            elapsed_ms,
            "Ollama generation finished"
        );

        Ok(response.into_output(elapsed_ms))
    }

    fn provider_name(&self) -> &str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::GatewayError;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on an ephemeral port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if request_complete(&buf) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}", addr)
    }

    fn request_complete(buf: &[u8]) -> bool {
        let text = String::from_utf8_lossy(buf);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        buf.len() >= header_end + 4 + content_length
    }

    fn gateway(base_url: &str) -> OllamaGenerationGateway {
        OllamaGenerationGateway::new(OllamaClient::new(base_url, Duration::from_secs(5)).unwrap())
    }

    #[tokio::test]
    async fn test_generate_parses_metrics() {
        let url = serve_once(
            "200 OK",
            r#"{"model":"llama3","response":"42","done":true,"total_duration":1000000000,"load_duration":0,"prompt_eval_duration":20000000,"eval_count":10,"eval_duration":500000000}"#,
        )
        .await;

        let output = gateway(&url)
            .generate(&GenerationRequest::new("llama3", "meaning of life?"))
            .await
            .unwrap();

        assert_eq!(output.text, "42");
        assert_eq!(output.duration_ms, 1000);
        assert_eq!(output.tokens_per_second, 20.0);
        assert_eq!(output.time_to_first_token_ms, Some(20));
    }

    #[tokio::test]
    async fn test_404_maps_to_model_not_found() {
        let url = serve_once("404 Not Found", r#"{"error":"model 'nope' not found"}"#).await;

        let err = gateway(&url)
            .generate(&GenerationRequest::new("nope", "hi"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GatewayError::ModelNotFound {
                provider: "ollama".to_string(),
                model: "nope".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_server_error_keeps_message() {
        let url = serve_once("500 Internal Server Error", r#"{"error":"out of memory"}"#).await;

        let err = gateway(&url)
            .generate(&GenerationRequest::new("llama3", "hi"))
            .await
            .unwrap_err();

        match err {
            GatewayError::RequestFailed { status, message, .. } => {
                assert_eq!(status, 500);
                assert_eq!(message, "out of memory");
            }
            other => panic!("expected RequestFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = gateway(&format!("http://{}", addr))
            .generate(&GenerationRequest::new("llama3", "hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Unavailable { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_list_models() {
        let url = serve_once(
            "200 OK",
            r#"{"models":[{"name":"llama3:latest","modified_at":"2024-05-01T00:00:00Z","size":4661224676},{"name":"mistral:7b"}]}"#,
        )
        .await;

        let client = OllamaClient::new(url, Duration::from_secs(5)).unwrap();
        let models = client.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "llama3:latest");
        assert_eq!(models[1].size, None);
    }
}
