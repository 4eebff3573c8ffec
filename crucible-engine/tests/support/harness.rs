#![allow(dead_code)]

use crucible_core::{EngineConfig, Experiment, ExperimentId, ExperimentStatus, Run};
use crucible_engine::{EngineParts, ExecutionRegistry, ExperimentEngine};
use crucible_llm::{RetrievalGateway, UnconfiguredRetrieval};
use crucible_storage::{ExperimentStore, InMemoryStorage, RunStore};
use crucible_test_utils::fixtures;
use crucible_test_utils::{RecordingSink, ScriptedGenerationGateway};
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

/// An engine over in-memory storage, a scripted gateway and a recording sink.
pub struct Harness {
    pub engine: ExperimentEngine,
    pub storage: Arc<InMemoryStorage>,
    pub gateway: Arc<ScriptedGenerationGateway>,
    pub sink: Arc<RecordingSink>,
    pub experiment_id: ExperimentId,
}

impl Harness {
    pub async fn new(experiment: Experiment, gateway: ScriptedGenerationGateway) -> Self {
        Self::with_parts(
            experiment,
            gateway,
            Arc::new(UnconfiguredRetrieval),
            fixtures::engine_config(),
        )
        .await
    }

    pub async fn with_parts(
        experiment: Experiment,
        gateway: ScriptedGenerationGateway,
        retrieval: Arc<dyn RetrievalGateway>,
        config: EngineConfig,
    ) -> Self {
        let storage = fixtures::seeded_storage(&experiment).await;
        Self::over_storage(storage, experiment.experiment_id, gateway, retrieval, config)
    }

    pub fn over_storage(
        storage: Arc<InMemoryStorage>,
        experiment_id: ExperimentId,
        gateway: ScriptedGenerationGateway,
        retrieval: Arc<dyn RetrievalGateway>,
        config: EngineConfig,
    ) -> Self {
        let gateway = Arc::new(gateway);
        let sink = Arc::new(RecordingSink::new());
        let engine = ExperimentEngine::with_storage(
            storage.clone(),
            gateway.clone(),
            retrieval,
            sink.clone(),
            config,
        );
        Self {
            engine,
            storage,
            gateway,
            sink,
            experiment_id,
        }
    }

    /// Engine whose experiment writes go through `experiments` while runs
    /// and prompts stay in `storage`.
    pub fn with_experiment_store(
        storage: Arc<InMemoryStorage>,
        experiment_id: ExperimentId,
        experiments: Arc<dyn ExperimentStore>,
        gateway: ScriptedGenerationGateway,
    ) -> Self {
        let gateway = Arc::new(gateway);
        let sink = Arc::new(RecordingSink::new());
        let engine = ExperimentEngine::new(EngineParts {
            experiments,
            runs: storage.clone(),
            prompts: storage.clone(),
            generation: gateway.clone(),
            retrieval: Arc::new(UnconfiguredRetrieval),
            sink: sink.clone(),
            registry: Arc::new(ExecutionRegistry::new()),
            config: fixtures::engine_config(),
        });
        Self {
            engine,
            storage,
            gateway,
            sink,
            experiment_id,
        }
    }

    pub async fn runs(&self) -> Vec<Run> {
        self.storage
            .run_list_by_experiment(self.experiment_id)
            .await
            .expect("list runs")
    }

    /// Wait until the experiment is in `status` and no loop executes it.
    pub async fn settle(&self, status: ExperimentStatus) -> Experiment {
        let experiment =
            fixtures::wait_for_status(self.storage.as_ref(), self.experiment_id, status, WAIT).await;
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.engine.is_executing(self.experiment_id) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "loop still active after reaching {}",
                status
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        experiment
    }
}
