//! Prompt materials and context rendering for trials.

use crucible_core::{
    ContextMode, CrucibleResult, Document, ExperimentConfig, GatewayError, RetrievedChunk,
    SystemPrompt, TrialSpec,
};
use crucible_llm::{RetrievalGateway, RetrievalQuery, RetryPolicy};
use crucible_storage::PromptSource;

/// System prompt and document of an experiment, resolved once per loop.
///
/// A reference that could not be resolved is kept as an error message and
/// fails every trial that needs it.
#[derive(Debug, Clone, Default)]
pub struct PromptMaterials {
    system_prompt: Option<Result<SystemPrompt, String>>,
    document: Option<Result<Document, String>>,
}

impl PromptMaterials {
    /// Look up the configured system prompt and document.
    ///
    /// # Errors
    /// Storage failures. A missing row is not an error here.
    pub async fn resolve(
        source: &dyn PromptSource,
        config: &ExperimentConfig,
    ) -> CrucibleResult<Self> {
        let system_prompt = match config.system_prompt_id {
            Some(id) => Some(
                source
                    .system_prompt_get(id)
                    .await?
                    .ok_or_else(|| format!("system prompt {} not found", id)),
            ),
            None => None,
        };
        let document = match config.document_id {
            Some(id) if config.context_mode.requires_document() => Some(
                source
                    .document_get(id)
                    .await?
                    .ok_or_else(|| format!("document {} not found", id)),
            ),
            _ => None,
        };
        Ok(Self {
            system_prompt,
            document,
        })
    }

    pub fn system_prompt(&self) -> Result<Option<&str>, String> {
        match &self.system_prompt {
            None => Ok(None),
            Some(Ok(prompt)) => Ok(Some(prompt.content.as_str())),
            Some(Err(message)) => Err(message.clone()),
        }
    }

    pub fn document(&self) -> Result<&Document, String> {
        match &self.document {
            Some(Ok(document)) => Ok(document),
            Some(Err(message)) => Err(message.clone()),
            None => Err("no document configured".to_string()),
        }
    }
}

/// A prompt ready for the generation gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Context block inlined into the prompt, stored on the run
    pub context: Option<String>,
}

/// Why a trial's prompt could not be built.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextError {
    /// A referenced system prompt or document does not exist
    Missing(String),
    Retrieval(GatewayError),
}

impl ContextError {
    /// Error event code.
    pub fn code(&self) -> &'static str {
        match self {
            ContextError::Missing(_) => "CONTEXT_MISSING",
            ContextError::Retrieval(err) => err.code(),
        }
    }
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextError::Missing(message) => f.write_str(message),
            ContextError::Retrieval(err) => write!(f, "{}", err),
        }
    }
}

/// Builds the prompt of each trial according to its context mode.
pub struct ContextResolver<'a> {
    retrieval: &'a dyn RetrievalGateway,
    retry: &'a RetryPolicy,
    default_top_k: usize,
}

impl<'a> ContextResolver<'a> {
    pub fn new(
        retrieval: &'a dyn RetrievalGateway,
        retry: &'a RetryPolicy,
        default_top_k: usize,
    ) -> Self {
        Self {
            retrieval,
            retry,
            default_top_k,
        }
    }

    pub async fn render(
        &self,
        trial: &TrialSpec,
        prompt: &str,
        materials: &PromptMaterials,
    ) -> Result<RenderedPrompt, ContextError> {
        let system_prompt = materials
            .system_prompt()
            .map_err(ContextError::Missing)?
            .map(str::to_string);

        let context = match trial.context_mode {
            ContextMode::None => None,
            ContextMode::FullContext => {
                let document = materials.document().map_err(ContextError::Missing)?;
                Some(document.content.clone())
            }
            ContextMode::Retrieval => {
                materials.document().map_err(ContextError::Missing)?;
                let chunks = self.retrieve(trial, prompt).await?;
                Some(render_chunks(&chunks))
            }
        };

        let prompt = match &context {
            Some(block) => with_context(block, prompt),
            None => prompt.to_string(),
        };

        Ok(RenderedPrompt {
            prompt,
            system_prompt,
            context,
        })
    }

    async fn retrieve(
        &self,
        trial: &TrialSpec,
        prompt: &str,
    ) -> Result<Vec<RetrievedChunk>, ContextError> {
        let embedding_model = trial.embedding_model.clone().ok_or_else(|| {
            ContextError::Missing("RETRIEVAL trial has no embedding model".to_string())
        })?;
        let query = RetrievalQuery {
            query: prompt.to_string(),
            embedding_model,
            top_k: trial.retrieval_top_k.unwrap_or(self.default_top_k),
            document_id: trial.document_id,
        };
        let mut chunks = self
            .retry
            .execute("retrieve", || self.retrieval.retrieve(&query))
            .await
            .map_err(ContextError::Retrieval)?;
        chunks.truncate(query.top_k);
        Ok(chunks)
    }
}

/// Numbered chunk list, one chunk per paragraph.
pub fn render_chunks(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("[{}] (score {:.3}) {}", i + 1, chunk.score, chunk.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prepend a context block to the user prompt.
pub fn with_context(context: &str, prompt: &str) -> String {
    format!(
        "Use the following context to answer.\n\nContext:\n{}\n\nQuestion:\n{}",
        context, prompt
    )
}
