//! CRUCIBLE LLM - Gateway Layer
//!
//! Provider-agnostic traits for text generation and retrieval, plus the
//! Ollama client and the retry policy applied to transient failures.

use async_trait::async_trait;
use crucible_core::{
    DocumentId, GatewayError, GenerationOutput, GenerationRequest, RetrievedChunk,
};
use serde::{Deserialize, Serialize};

pub mod providers;
pub mod retry;

pub use providers::ollama::{OllamaClient, OllamaGenerationGateway};
pub use retry::{retry_transient, RetryPolicy};

/// Result type for gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

// ============================================================================
// GENERATION GATEWAY
// ============================================================================

/// Sends one prompt to a model and returns the text with timing metrics.
///
/// Implementations must be thread-safe (Send + Sync); the engine shares one
/// gateway across every executing experiment.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Run a single non-streaming generation.
    ///
    /// # Errors
    /// * `GatewayError::Unavailable` - the service could not be reached
    /// * `GatewayError::Timeout` - the call exceeded the configured timeout
    /// * `GatewayError::ModelNotFound` - the model is not installed
    async fn generate(&self, request: &GenerationRequest) -> GatewayResult<GenerationOutput>;

    /// Provider name used in logs and error messages.
    fn provider_name(&self) -> &str;
}

// ============================================================================
// RETRIEVAL GATEWAY
// ============================================================================

/// Parameters of a retrieval lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub query: String,
    pub embedding_model: String,
    pub top_k: usize,
    /// Restrict the search to one document's chunks
    pub document_id: Option<DocumentId>,
}

/// Returns ranked context chunks for a query (RETRIEVAL mode only).
#[async_trait]
pub trait RetrievalGateway: Send + Sync {
    /// Chunks ordered by descending score, at most `top_k` of them.
    async fn retrieve(&self, query: &RetrievalQuery) -> GatewayResult<Vec<RetrievedChunk>>;
}

/// Retrieval gateway for deployments without an embedding index.
///
/// Every lookup fails with `RetrievalUnavailable`, so RETRIEVAL trials are
/// recorded as FAILED while other modes run normally.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredRetrieval;

#[async_trait]
impl RetrievalGateway for UnconfiguredRetrieval {
    async fn retrieve(&self, query: &RetrievalQuery) -> GatewayResult<Vec<RetrievedChunk>> {
        Err(GatewayError::RetrievalUnavailable {
            reason: format!(
                "no retrieval backend configured for embedding model {}",
                query.embedding_model
            ),
        })
    }
}
