//! Run one experiment definition against a local Ollama server.
//!
//! Usage: `crucible-run <experiment.toml>`
//!
//! Progress is logged as it arrives. Ctrl-C cancels the experiment and waits
//! for the in-flight trial to finish.

use crucible_core::{ConfigError, CrucibleResult, EngineConfig, ExperimentId};
use crucible_engine::{init_tracing, ExperimentDefinition, ExperimentEngine, TelemetryConfig};
use crucible_events::{BroadcastSink, EventPayload, ExperimentSubscription};
use crucible_llm::{OllamaClient, OllamaGenerationGateway, UnconfiguredRetrieval};
use crucible_storage::{InMemoryStorage, RunStore};
use std::sync::Arc;

#[tokio::main]
async fn main() -> CrucibleResult<()> {
    let telemetry_config = TelemetryConfig::from_env()?;
    init_tracing(&telemetry_config)?;

    let config = EngineConfig::from_env();
    config.validate()?;

    let path = std::env::args().nth(1).ok_or_else(|| ConfigError::MissingRequired {
        field: "experiment definition path (crucible-run <experiment.toml>)".to_string(),
    })?;
    let definition = ExperimentDefinition::from_path(&path).await?;

    let client = OllamaClient::from_config(&config)?;
    check_models(&client, &definition.config.models).await;

    let storage = Arc::new(InMemoryStorage::new());
    let experiment = definition.seed(&storage).await?;
    let experiment_id = experiment.experiment_id;

    let sink = Arc::new(BroadcastSink::new(config.event_channel_capacity));
    let subscription = sink.subscribe_experiment(experiment_id);
    let engine = ExperimentEngine::with_storage(
        storage.clone(),
        Arc::new(OllamaGenerationGateway::new(client)),
        Arc::new(UnconfiguredRetrieval),
        sink,
        config,
    );

    let total_runs = engine.start_experiment(experiment_id).await?;
    tracing::info!(
        experiment_id = %experiment_id,
        name = %experiment.name,
        total_runs,
        "Running experiment"
    );

    follow(&engine, experiment_id, subscription).await?;
    summarize(storage.as_ref(), experiment_id).await
}

/// Warn about models the server does not have; trials for them will fail.
async fn check_models(client: &OllamaClient, models: &[String]) {
    for model in models {
        match client.has_model(model).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(model = %model, "Model is not installed on the server"),
            Err(e) => {
                tracing::warn!(error = %e, base_url = client.base_url(), "Could not list models");
                return;
            }
        }
    }
}

async fn follow(
    engine: &ExperimentEngine,
    experiment_id: ExperimentId,
    mut subscription: ExperimentSubscription,
) -> CrucibleResult<()> {
    let mut cancel_sent = false;
    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    tracing::warn!("Progress stream closed before the experiment finished");
                    return Ok(());
                };
                log_event(&event.payload);
                if event.payload.is_terminal() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_sent => {
                tracing::info!("Interrupt received, cancelling experiment");
                cancel_sent = true;
                engine.cancel_experiment(experiment_id).await?;
            }
        }
    }
}

fn log_event(payload: &EventPayload) {
    match payload {
        EventPayload::Progress {
            completed_runs,
            total_runs,
            percent_complete,
            estimated_time_remaining_ms,
            ..
        } => tracing::info!(
            completed_runs,
            total_runs,
            percent = %format!("{:.1}", percent_complete),
            eta_ms = ?estimated_time_remaining_ms,
            "Progress"
        ),
        EventPayload::RunStarted {
            model,
            iteration,
            embedding_model,
            ..
        } => tracing::info!(model = %model, iteration, embedding_model = ?embedding_model, "Run started"),
        EventPayload::RunCompleted {
            status,
            duration_ms,
            tokens_per_second,
            error,
            ..
        } => tracing::info!(
            status = %status,
            duration_ms = ?duration_ms,
            tokens_per_second = ?tokens_per_second,
            error = ?error,
            "Run completed"
        ),
        EventPayload::ExperimentPaused {
            completed_runs,
            remaining_runs,
        } => tracing::info!(completed_runs, remaining_runs, "Experiment paused"),
        EventPayload::ExperimentCompleted {
            final_status,
            completed_runs,
            failed_runs,
            total_duration_ms,
            ..
        } => tracing::info!(
            final_status = %final_status,
            completed_runs,
            failed_runs,
            total_duration_ms,
            "Experiment finished"
        ),
        EventPayload::Error {
            code,
            message,
            recoverable,
        } => tracing::warn!(code = %code, recoverable, "{}", message),
    }
}

async fn summarize(runs: &dyn RunStore, experiment_id: ExperimentId) -> CrucibleResult<()> {
    for run in runs.run_list_by_experiment(experiment_id).await? {
        tracing::info!(
            sequence = run.sequence,
            model = %run.model,
            iteration = run.iteration,
            status = %run.status,
            duration_ms = ?run.duration_ms,
            tokens_per_second = ?run.tokens_per_second,
            "Run result"
        );
    }
    Ok(())
}
