//! CRUCIBLE Test Utilities
//!
//! Centralized test infrastructure for the CRUCIBLE workspace:
//! - Scripted generation and retrieval gateways
//! - A progress sink that records every event
//! - Proptest generators for configurations
//! - Fixtures and polling helpers for async lifecycle tests

pub use crucible_storage::InMemoryStorage;

pub use crucible_core::{
    ContextMode, CrucibleError, CrucibleResult, Document, DocumentId, EngineConfig, EngineError,
    Experiment, ExperimentConfig, ExperimentId, ExperimentStatus, GatewayError, GenerationOutput,
    GenerationRequest, Hyperparameters, RetryConfig, RetrievedChunk, Run, RunStatus,
};

use async_trait::async_trait;
use crucible_events::{EventPayload, ProgressEvent, ProgressEventKind, ProgressSink, PublishError};
use crucible_core::{EntityIdType, EntityType, StorageError};
use crucible_llm::{GatewayResult, GenerationGateway, RetrievalGateway, RetrievalQuery};
use crucible_storage::{ExperimentStore, ExperimentUpdate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// SCRIPTED GATEWAYS
// ============================================================================

/// What the scripted gateway does on a given call.
#[derive(Debug, Clone)]
pub enum Step {
    Fail(GatewayError),
    Panic(String),
}

/// Generation gateway whose per-call behavior is scripted by call index
/// (0-based, retries included).
///
/// Unscripted calls succeed with `"<model> answer <call>"`. A gated gateway
/// blocks every call until the test releases it.
#[derive(Debug, Default)]
pub struct ScriptedGenerationGateway {
    script: Mutex<HashMap<usize, Step>>,
    requests: Mutex<Vec<GenerationRequest>>,
    entered: AtomicUsize,
    finished: AtomicUsize,
    gate: Option<Semaphore>,
    duration_ms: i64,
}

impl ScriptedGenerationGateway {
    pub fn new() -> Self {
        Self {
            duration_ms: 10,
            ..Default::default()
        }
    }

    /// Every call waits for [`release`](Self::release) before returning.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn fail_on(self, call: usize, error: GatewayError) -> Self {
        lock(&self.script).insert(call, Step::Fail(error));
        self
    }

    pub fn panic_on(self, call: usize, message: impl Into<String>) -> Self {
        lock(&self.script).insert(call, Step::Panic(message.into()));
        self
    }

    /// Let `calls` blocked or future calls through.
    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Open the gate for good.
    pub fn release_all(&self) {
        self.release(1 << 20);
    }

    /// Calls that have reached the gateway.
    pub fn calls(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Calls that have returned.
    pub fn completed_calls(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    /// Wait until at least `calls` calls have reached the gateway.
    pub async fn wait_for_calls(&self, calls: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.calls() < calls {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {} gateway calls, saw {}",
                calls,
                self.calls()
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGenerationGateway {
    async fn generate(&self, request: &GenerationRequest) -> GatewayResult<GenerationOutput> {
        let call = self.entered.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let step = lock(&self.script).remove(&call);
        self.finished.fetch_add(1, Ordering::SeqCst);
        match step {
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Panic(message)) => panic!("{}", message),
            None => Ok(GenerationOutput {
                text: format!("{} answer {}", request.model, call),
                duration_ms: self.duration_ms,
                tokens_per_second: 25.0,
                time_to_first_token_ms: Some(2),
            }),
        }
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

/// Retrieval gateway returning the same chunks for every query.
#[derive(Debug, Default)]
pub struct StaticRetrievalGateway {
    chunks: Vec<RetrievedChunk>,
    queries: Mutex<Vec<RetrievalQuery>>,
}

impl StaticRetrievalGateway {
    pub fn new(contents: &[&str]) -> Self {
        let chunks = contents
            .iter()
            .enumerate()
            .map(|(i, content)| RetrievedChunk {
                content: content.to_string(),
                score: 1.0 / (i as f32 + 1.0),
                source: None,
            })
            .collect();
        Self {
            chunks,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<RetrievalQuery> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl RetrievalGateway for StaticRetrievalGateway {
    async fn retrieve(&self, query: &RetrievalQuery) -> GatewayResult<Vec<RetrievedChunk>> {
        lock(&self.queries).push(query.clone());
        Ok(self.chunks.iter().take(query.top_k).cloned().collect())
    }
}

// ============================================================================
// FAULTY STORAGE
// ============================================================================

/// Experiment store over [`InMemoryStorage`] whose first `n` updates fail
/// with `StorageError::UpdateFailed`.
#[derive(Debug)]
pub struct FailingUpdateStore {
    inner: Arc<InMemoryStorage>,
    failures_left: AtomicUsize,
}

impl FailingUpdateStore {
    pub fn new(inner: Arc<InMemoryStorage>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ExperimentStore for FailingUpdateStore {
    async fn experiment_insert(&self, experiment: &Experiment) -> CrucibleResult<()> {
        self.inner.experiment_insert(experiment).await
    }

    async fn experiment_get(&self, id: ExperimentId) -> CrucibleResult<Option<Experiment>> {
        self.inner.experiment_get(id).await
    }

    async fn experiment_update(
        &self,
        id: ExperimentId,
        update: ExperimentUpdate,
    ) -> CrucibleResult<()> {
        if self.take_failure() {
            return Err(CrucibleError::Storage(StorageError::UpdateFailed {
                entity_type: EntityType::Experiment,
                id: id.as_uuid(),
                reason: "injected failure".to_string(),
            }));
        }
        self.inner.experiment_update(id, update).await
    }

    async fn experiment_list_by_status(
        &self,
        status: ExperimentStatus,
    ) -> CrucibleResult<Vec<Experiment>> {
        self.inner.experiment_list_by_status(status).await
    }

    async fn experiment_delete(&self, id: ExperimentId) -> CrucibleResult<()> {
        self.inner.experiment_delete(id).await
    }
}

// ============================================================================
// RECORDING SINK
// ============================================================================

/// Progress sink that keeps every published event in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        lock(&self.events).clone()
    }

    pub fn events_for(&self, experiment_id: ExperimentId) -> Vec<ProgressEvent> {
        lock(&self.events)
            .iter()
            .filter(|e| e.experiment_id == experiment_id)
            .cloned()
            .collect()
    }

    pub fn kinds_for(&self, experiment_id: ExperimentId) -> Vec<ProgressEventKind> {
        self.events_for(experiment_id)
            .iter()
            .map(ProgressEvent::kind)
            .collect()
    }

    pub fn count(&self, experiment_id: ExperimentId, kind: ProgressEventKind) -> usize {
        self.kinds_for(experiment_id)
            .into_iter()
            .filter(|k| *k == kind)
            .count()
    }

    /// Final status carried by each experiment-completed event.
    pub fn final_statuses(&self, experiment_id: ExperimentId) -> Vec<ExperimentStatus> {
        self.events_for(experiment_id)
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::ExperimentCompleted { final_status, .. } => Some(final_status),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn publish(&self, event: &ProgressEvent) -> Result<(), PublishError> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for CRUCIBLE configuration types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_context_mode() -> impl Strategy<Value = ContextMode> {
        prop_oneof![
            Just(ContextMode::None),
            Just(ContextMode::Retrieval),
            Just(ContextMode::FullContext),
        ]
    }

    pub fn arb_experiment_status() -> impl Strategy<Value = ExperimentStatus> {
        prop_oneof![
            Just(ExperimentStatus::Draft),
            Just(ExperimentStatus::Running),
            Just(ExperimentStatus::Paused),
            Just(ExperimentStatus::Completed),
            Just(ExperimentStatus::Failed),
        ]
    }

    /// Hyperparameters inside their valid ranges.
    pub fn arb_hyperparameters() -> impl Strategy<Value = Hyperparameters> {
        (
            proptest::option::of(0.0f32..=2.0),
            proptest::option::of(0.0f32..=1.0),
            proptest::option::of(1u32..100),
            proptest::option::of(1u32..4096),
            proptest::option::of(any::<i64>()),
        )
            .prop_map(|(temperature, top_p, top_k, max_tokens, seed)| Hyperparameters {
                temperature,
                top_p,
                top_k,
                max_tokens,
                seed,
                ..Default::default()
            })
    }

    /// Valid configurations with distinct model and embedding names.
    pub fn arb_experiment_config() -> impl Strategy<Value = ExperimentConfig> {
        (
            proptest::collection::btree_set("[a-z][a-z0-9]{0,7}", 1..4),
            proptest::collection::btree_set("[a-z][a-z0-9]{0,7}", 1..3),
            1u32..5,
            arb_context_mode(),
            arb_hyperparameters(),
        )
            .prop_map(|(models, embeddings, iterations, mode, hyperparameters)| {
                let mut config = ExperimentConfig::new(models.into_iter().collect(), "prompt");
                config.iterations = iterations;
                config.context_mode = mode;
                config.embedding_models = embeddings.into_iter().collect();
                if mode.requires_document() {
                    config.document_id = Some(DocumentId::nil());
                }
                config.hyperparameters = hyperparameters;
                config
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations and experiments.

    use super::*;
    use crucible_storage::ExperimentStore;
    use std::sync::Arc;

    /// Engine configuration with millisecond backoffs.
    pub fn engine_config() -> EngineConfig {
        EngineConfig {
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(4),
                backoff_multiplier: 2.0,
            },
            ..EngineConfig::default()
        }
    }

    /// Engine configuration that never retries.
    pub fn engine_config_without_retries() -> EngineConfig {
        EngineConfig {
            retry: RetryConfig::disabled(),
            ..EngineConfig::default()
        }
    }

    pub fn config(models: &[&str], iterations: u32) -> ExperimentConfig {
        let mut config = ExperimentConfig::new(
            models.iter().map(|m| m.to_string()).collect(),
            "Name one primary color.",
        );
        config.iterations = iterations;
        config
    }

    /// A DRAFT experiment with no context.
    pub fn draft_experiment(models: &[&str], iterations: u32) -> Experiment {
        Experiment::new("fixture", config(models, iterations))
    }

    /// Storage holding `experiment`.
    pub async fn seeded_storage(experiment: &Experiment) -> Arc<InMemoryStorage> {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .experiment_insert(experiment)
            .await
            .unwrap_or_else(|e| panic!("failed to seed experiment: {}", e));
        storage
    }

    /// A stored document for context-mode tests.
    pub fn document(content: &str) -> Document {
        Document {
            document_id: DocumentId::now_v7(),
            title: "fixture document".to_string(),
            content: content.to_string(),
        }
    }

    /// Poll until the stored experiment reaches `status`.
    pub async fn wait_for_status(
        store: &dyn ExperimentStore,
        experiment_id: ExperimentId,
        status: ExperimentStatus,
        timeout: Duration,
    ) -> Experiment {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let experiment = store
                .experiment_get(experiment_id)
                .await
                .unwrap_or_else(|e| panic!("storage error while waiting: {}", e))
                .unwrap_or_else(|| panic!("experiment {} disappeared", experiment_id));
            if experiment.status == status {
                return experiment;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "experiment stayed {} while waiting for {}",
                experiment.status,
                status
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on CRUCIBLE results and run sets.

    use super::*;

    /// Assert that a result is a specific engine error.
    #[track_caller]
    pub fn assert_engine_error<T: std::fmt::Debug>(
        result: &CrucibleResult<T>,
        matches: impl Fn(&EngineError) -> bool,
    ) {
        match result {
            Err(CrucibleError::Engine(e)) if matches(e) => {}
            other => panic!("Expected matching Engine error, got: {:?}", other),
        }
    }

    /// Assert the statuses of `runs`, in order.
    #[track_caller]
    pub fn assert_run_statuses(runs: &[Run], expected: &[RunStatus]) {
        let actual: Vec<RunStatus> = runs.iter().map(|r| r.status).collect();
        assert_eq!(actual, expected, "run statuses differ");
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn request(model: &str) -> GenerationRequest {
        GenerationRequest::new(model, "hi")
    }

    #[tokio::test]
    async fn test_scripted_gateway_failures_by_call() {
        let gateway = ScriptedGenerationGateway::new().fail_on(
            1,
            GatewayError::Timeout {
                provider: "scripted".to_string(),
                timeout_ms: 5,
            },
        );

        assert!(gateway.generate(&request("a")).await.is_ok());
        assert!(gateway.generate(&request("a")).await.is_err());
        let third = gateway.generate(&request("b")).await.unwrap();
        assert_eq!(third.text, "b answer 2");
        assert_eq!(gateway.calls(), 3);
        assert_eq!(gateway.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_gated_gateway_waits_for_release() {
        let gateway = std::sync::Arc::new(ScriptedGenerationGateway::gated());
        let worker = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.generate(&request("m")).await })
        };

        gateway.wait_for_calls(1, Duration::from_secs(1)).await;
        assert_eq!(gateway.completed_calls(), 0);

        gateway.release(1);
        assert!(worker.await.unwrap().is_ok());
        assert_eq!(gateway.completed_calls(), 1);
    }

    #[tokio::test]
    async fn test_static_retrieval_respects_top_k() {
        let retrieval = StaticRetrievalGateway::new(&["a", "b", "c"]);
        let chunks = retrieval
            .retrieve(&RetrievalQuery {
                query: "q".to_string(),
                embedding_model: "e".to_string(),
                top_k: 2,
                document_id: None,
            })
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(retrieval.queries().len(), 1);
    }

    #[test]
    fn test_recording_sink_filters_by_experiment() {
        let sink = RecordingSink::new();
        let a = ExperimentId::now_v7();
        let b = ExperimentId::now_v7();
        sink.publish(&ProgressEvent::new(
            a,
            EventPayload::ExperimentPaused {
                completed_runs: 1,
                remaining_runs: 1,
            },
        ))
        .unwrap();
        sink.publish(&ProgressEvent::new(
            b,
            EventPayload::Error {
                code: "X".to_string(),
                message: "y".to_string(),
                recoverable: true,
            },
        ))
        .unwrap();

        assert_eq!(sink.kinds_for(a), vec![ProgressEventKind::ExperimentPaused]);
        assert_eq!(sink.count(b, ProgressEventKind::Error), 1);
        assert_eq!(sink.events().len(), 2);
    }

    proptest! {
        #[test]
        fn prop_generated_configs_are_valid(config in generators::arb_experiment_config()) {
            prop_assert!(config.validate().is_ok());
        }
    }
}
