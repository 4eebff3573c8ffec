//! TOML experiment definitions.
//!
//! ```toml
//! name = "temperature sweep"
//!
//! [config]
//! models = ["llama3.2:3b", "mistral:7b"]
//! iterations = 3
//! context_mode = "FULL_CONTEXT"
//! prompt = "Summarize the handbook in one sentence."
//!
//! [config.hyperparameters]
//! temperature = 0.7
//!
//! [system_prompt]
//! content = "You are a terse assistant."
//!
//! [document]
//! title = "Handbook"
//! content = "..."
//! ```

use crucible_core::{
    ConfigError, CrucibleResult, Document, DocumentId, Experiment, ExperimentConfig, SystemPrompt,
    SystemPromptId,
};
use crucible_storage::{ExperimentStore, InMemoryStorage};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InlineSystemPrompt {
    #[serde(default)]
    pub name: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InlineDocument {
    pub title: String,
    pub content: String,
}

/// An experiment with its prompt materials inlined.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExperimentDefinition {
    pub name: String,
    pub config: ExperimentConfig,
    #[serde(default)]
    pub system_prompt: Option<InlineSystemPrompt>,
    #[serde(default)]
    pub document: Option<InlineDocument>,
}

impl ExperimentDefinition {
    /// Parse a definition. `source_name` only labels errors.
    pub fn from_toml_str(source_name: &str, content: &str) -> CrucibleResult<Self> {
        let definition: Self = toml::from_str(content).map_err(|e| ConfigError::ParseFailed {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })?;
        definition.check_references()?;
        Ok(definition)
    }

    pub async fn from_path(path: impl AsRef<Path>) -> CrucibleResult<Self> {
        let path = path.as_ref();
        let source_name = path.display().to_string();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::ParseFailed {
                source_name: source_name.clone(),
                reason: e.to_string(),
            })?;
        Self::from_toml_str(&source_name, &content)
    }

    fn check_references(&self) -> Result<(), ConfigError> {
        if self.document.is_some() && self.config.document_id.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "config.document_id".to_string(),
                value: self
                    .config
                    .document_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                reason: "an inline [document] is also given".to_string(),
            });
        }
        if self.system_prompt.is_some() && self.config.system_prompt_id.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "config.system_prompt_id".to_string(),
                value: self
                    .config
                    .system_prompt_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                reason: "an inline [system_prompt] is also given".to_string(),
            });
        }
        Ok(())
    }

    /// Store the inline materials and a DRAFT experiment referencing them.
    pub async fn seed(self, storage: &InMemoryStorage) -> CrucibleResult<Experiment> {
        let mut config = self.config;

        if let Some(prompt) = self.system_prompt {
            let system_prompt = SystemPrompt {
                system_prompt_id: SystemPromptId::now_v7(),
                name: prompt.name.unwrap_or_else(|| format!("{} system prompt", self.name)),
                content: prompt.content,
            };
            config.system_prompt_id = Some(system_prompt.system_prompt_id);
            storage.system_prompt_insert(system_prompt)?;
        }
        if let Some(document) = self.document {
            let document = Document {
                document_id: DocumentId::now_v7(),
                title: document.title,
                content: document.content,
            };
            config.document_id = Some(document.document_id);
            storage.document_insert(document)?;
        }

        let experiment = Experiment::new(self.name, config);
        storage.experiment_insert(&experiment).await?;
        Ok(experiment)
    }
}
