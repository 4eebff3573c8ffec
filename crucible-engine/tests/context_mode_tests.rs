//! Context modes end to end: prompts reaching the gateway and the context
//! snapshot stored on each run.

use crucible_core::{
    ContextMode, DocumentId, Experiment, ExperimentStatus, RunStatus, SystemPrompt, SystemPromptId,
};
use crucible_llm::UnconfiguredRetrieval;
use crucible_test_utils::assertions::assert_run_statuses;
use crucible_test_utils::{fixtures, ScriptedGenerationGateway, StaticRetrievalGateway};
use std::sync::Arc;

#[path = "support/harness.rs"]
mod harness;
use harness::Harness;

#[tokio::test]
async fn test_full_context_inlines_document_and_system_prompt() {
    let document = fixtures::document("Mercury is the closest planet to the sun.");
    let system_prompt = SystemPrompt {
        system_prompt_id: SystemPromptId::now_v7(),
        name: "terse".to_string(),
        content: "Answer in one word.".to_string(),
    };
    let mut config = fixtures::config(&["m0"], 2);
    config.context_mode = ContextMode::FullContext;
    config.document_id = Some(document.document_id);
    config.system_prompt_id = Some(system_prompt.system_prompt_id);
    let experiment = Experiment::new("full context", config);

    let h = Harness::new(experiment, ScriptedGenerationGateway::new()).await;
    h.storage.document_insert(document).unwrap();
    h.storage.system_prompt_insert(system_prompt).unwrap();

    h.engine.start_experiment(h.experiment_id).await.unwrap();
    h.settle(ExperimentStatus::Completed).await;

    let requests = h.gateway.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert!(request.prompt.contains("Mercury is the closest planet"));
        assert!(request.prompt.ends_with("Name one primary color."));
        assert_eq!(request.system_prompt.as_deref(), Some("Answer in one word."));
    }
    for run in h.runs().await {
        assert_eq!(
            run.retrieved_context.as_deref(),
            Some("Mercury is the closest planet to the sun.")
        );
    }
}

#[tokio::test]
async fn test_missing_document_fails_each_trial() {
    let mut config = fixtures::config(&["m0"], 2);
    config.context_mode = ContextMode::FullContext;
    config.document_id = Some(DocumentId::now_v7());

    let h = Harness::new(
        Experiment::new("dangling document", config),
        ScriptedGenerationGateway::new(),
    )
    .await;
    h.engine.start_experiment(h.experiment_id).await.unwrap();
    h.settle(ExperimentStatus::Completed).await;

    let runs = h.runs().await;
    assert_run_statuses(&runs, &[RunStatus::Failed, RunStatus::Failed]);
    assert!(runs
        .iter()
        .all(|r| r.error_message.as_deref().unwrap().contains("not found")));
    assert_eq!(h.gateway.calls(), 0);
}

#[tokio::test]
async fn test_retrieval_runs_once_per_embedding_model() {
    let document = fixtures::document("unused in retrieval mode");
    let mut config = fixtures::config(&["m0"], 1);
    config.context_mode = ContextMode::Retrieval;
    config.document_id = Some(document.document_id);
    config.embedding_models = vec!["nomic-embed-text".to_string(), "mxbai-embed-large".to_string()];
    config.retrieval_top_k = Some(1);
    let experiment = Experiment::new("retrieval", config);

    let retrieval = Arc::new(StaticRetrievalGateway::new(&["Red is primary.", "Blue too."]));
    let h = Harness::with_parts(
        experiment,
        ScriptedGenerationGateway::new(),
        retrieval.clone(),
        fixtures::engine_config(),
    )
    .await;
    h.storage.document_insert(document).unwrap();

    h.engine.start_experiment(h.experiment_id).await.unwrap();
    h.settle(ExperimentStatus::Completed).await;

    let runs = h.runs().await;
    let embeddings: Vec<Option<&str>> = runs.iter().map(|r| r.embedding_model.as_deref()).collect();
    assert_eq!(embeddings, vec![Some("nomic-embed-text"), Some("mxbai-embed-large")]);
    assert_run_statuses(&runs, &[RunStatus::Success, RunStatus::Success]);

    let queried: Vec<String> = retrieval
        .queries()
        .into_iter()
        .map(|q| q.embedding_model)
        .collect();
    assert_eq!(queried, vec!["nomic-embed-text", "mxbai-embed-large"]);
    assert!(retrieval.queries().iter().all(|q| q.top_k == 1));

    let context = runs[0].retrieved_context.as_deref().unwrap();
    assert!(context.contains("Red is primary."));
    assert!(!context.contains("Blue too."));
}

#[tokio::test]
async fn test_retrieval_without_backend_fails_trials_only() {
    let document = fixtures::document("text");
    let mut config = fixtures::config(&["m0"], 2);
    config.context_mode = ContextMode::Retrieval;
    config.document_id = Some(document.document_id);
    config.embedding_models = vec!["nomic-embed-text".to_string()];

    let h = Harness::with_parts(
        Experiment::new("no retrieval backend", config),
        ScriptedGenerationGateway::new(),
        Arc::new(UnconfiguredRetrieval),
        fixtures::engine_config_without_retries(),
    )
    .await;
    h.storage.document_insert(document).unwrap();

    h.engine.start_experiment(h.experiment_id).await.unwrap();
    h.settle(ExperimentStatus::Completed).await;

    let runs = h.runs().await;
    assert_run_statuses(&runs, &[RunStatus::Failed, RunStatus::Failed]);
    assert!(runs[0]
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("Retrieval unavailable"));
}
