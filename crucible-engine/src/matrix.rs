//! Run matrix builder.
//!
//! Expands an experiment configuration into its ordered trials. Order is
//! model position, then iteration, then embedding position, so re-running
//! the builder on the same configuration reproduces the same sequence
//! numbers and execution can resume from any index.

use crucible_core::{ContextMode, EngineError, ExperimentConfig, TrialSpec};

/// Upper bound on the trials of a single experiment.
pub const MAX_TOTAL_RUNS: u32 = 100_000;

/// The ordered trials of one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMatrix {
    trials: Vec<TrialSpec>,
}

impl RunMatrix {
    /// Validate `config` and expand it.
    ///
    /// # Errors
    /// `EngineError::InvalidConfiguration` when the configuration has no
    /// models, fewer than one iteration, RETRIEVAL without embedding models,
    /// or any other invalid field.
    pub fn build(config: &ExperimentConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let embeddings = effective_embeddings(config);
        let total = expected_total_runs(config)?;

        let mut trials = Vec::with_capacity(total as usize);
        let mut sequence: u32 = 0;
        for model in &config.models {
            for iteration in 1..=config.iterations {
                for embedding in &embeddings {
                    trials.push(TrialSpec {
                        sequence,
                        model: model.clone(),
                        embedding_model: embedding.clone(),
                        iteration,
                        hyperparameters: config.hyperparameters.clone(),
                        context_mode: config.context_mode,
                        document_id: config.document_id,
                        system_prompt_id: config.system_prompt_id,
                        retrieval_top_k: config.retrieval_top_k,
                    });
                    sequence += 1;
                }
            }
        }

        Ok(Self { trials })
    }

    pub fn total_runs(&self) -> u32 {
        self.trials.len() as u32
    }

    pub fn trials(&self) -> &[TrialSpec] {
        &self.trials
    }

    pub fn into_trials(self) -> Vec<TrialSpec> {
        self.trials
    }
}

/// Embedding set actually iterated: the configured list in RETRIEVAL mode,
/// otherwise a single "no embedding" entry.
pub fn effective_embeddings(config: &ExperimentConfig) -> Vec<Option<String>> {
    match config.context_mode {
        ContextMode::Retrieval => config
            .embedding_models
            .iter()
            .cloned()
            .map(Some)
            .collect(),
        ContextMode::None | ContextMode::FullContext => vec![None],
    }
}

/// `|models| x |effective embeddings| x iterations`, at most [`MAX_TOTAL_RUNS`].
pub fn expected_total_runs(config: &ExperimentConfig) -> Result<u32, EngineError> {
    let models = u32::try_from(config.models.len()).ok();
    let embeddings = u32::try_from(effective_embeddings(config).len().max(1)).ok();
    models
        .zip(embeddings)
        .and_then(|(m, e)| m.checked_mul(e))
        .and_then(|n| n.checked_mul(config.iterations))
        .filter(|total| *total <= MAX_TOTAL_RUNS)
        .ok_or_else(|| {
            EngineError::invalid_configuration(format!(
                "run matrix exceeds {} trials",
                MAX_TOTAL_RUNS
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::DocumentId;
    use proptest::prelude::*;

    fn config(models: &[&str], iterations: u32) -> ExperimentConfig {
        let mut config = ExperimentConfig::new(
            models.iter().map(|m| m.to_string()).collect(),
            "Summarize the document.",
        );
        config.iterations = iterations;
        config
    }

    #[test]
    fn test_two_models_three_iterations_model_major() {
        let matrix = RunMatrix::build(&config(&["m0", "m1"], 3)).unwrap();

        let order: Vec<(&str, u32)> = matrix
            .trials()
            .iter()
            .map(|t| (t.model.as_str(), t.iteration))
            .collect();
        assert_eq!(
            order,
            vec![("m0", 1), ("m0", 2), ("m0", 3), ("m1", 1), ("m1", 2), ("m1", 3)]
        );
        assert_eq!(matrix.total_runs(), 6);
        assert!(matrix.trials().iter().all(|t| t.embedding_model.is_none()));
    }

    #[test]
    fn test_sequence_numbers_are_contiguous() {
        let matrix = RunMatrix::build(&config(&["a", "b", "c"], 2)).unwrap();
        for (index, trial) in matrix.trials().iter().enumerate() {
            assert_eq!(trial.sequence as usize, index);
        }
    }

    #[test]
    fn test_retrieval_multiplies_by_embeddings() {
        let mut config = config(&["m0", "m1"], 2);
        config.context_mode = ContextMode::Retrieval;
        config.document_id = Some(DocumentId::now_v7());
        config.embedding_models = vec!["e0".to_string(), "e1".to_string(), "e2".to_string()];

        let matrix = RunMatrix::build(&config).unwrap();
        assert_eq!(matrix.total_runs(), 12);

        let first: Vec<(u32, Option<&str>)> = matrix.trials()[..3]
            .iter()
            .map(|t| (t.iteration, t.embedding_model.as_deref()))
            .collect();
        assert_eq!(
            first,
            vec![(1, Some("e0")), (1, Some("e1")), (1, Some("e2"))]
        );
    }

    #[test]
    fn test_embeddings_ignored_outside_retrieval() {
        let mut config = config(&["m0"], 2);
        config.context_mode = ContextMode::FullContext;
        config.document_id = Some(DocumentId::now_v7());
        config.embedding_models = vec!["e0".to_string(), "e1".to_string()];

        let matrix = RunMatrix::build(&config).unwrap();
        assert_eq!(matrix.total_runs(), 2);
        assert!(matrix.trials().iter().all(|t| t.embedding_model.is_none()));
    }

    #[test]
    fn test_invalid_configurations() {
        assert!(matches!(
            RunMatrix::build(&config(&[], 1)),
            Err(EngineError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            RunMatrix::build(&config(&["m0"], 0)),
            Err(EngineError::InvalidConfiguration { .. })
        ));

        let mut retrieval = config(&["m0"], 1);
        retrieval.context_mode = ContextMode::Retrieval;
        retrieval.document_id = Some(DocumentId::now_v7());
        assert!(matches!(
            RunMatrix::build(&retrieval),
            Err(EngineError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_oversized_matrix_is_rejected() {
        assert!(expected_total_runs(&config(&["m0", "m1"], u32::MAX)).is_err());
        assert!(RunMatrix::build(&config(&["m0"], MAX_TOTAL_RUNS + 1)).is_err());
        assert!(expected_total_runs(&config(&["m0"], MAX_TOTAL_RUNS)).is_ok());
    }

    fn arb_config() -> impl Strategy<Value = ExperimentConfig> {
        (
            proptest::collection::btree_set("[a-z]{1,8}", 1..5),
            proptest::collection::btree_set("[a-z]{1,8}", 0..4),
            1u32..6,
            any::<bool>(),
        )
            .prop_map(|(models, embeddings, iterations, retrieval)| {
                let mut config = ExperimentConfig::new(models.into_iter().collect(), "prompt");
                config.iterations = iterations;
                config.embedding_models = embeddings.into_iter().collect();
                if retrieval {
                    config.context_mode = ContextMode::Retrieval;
                    config.document_id = Some(DocumentId::nil());
                }
                config
            })
    }

    proptest! {
        #[test]
        fn prop_total_matches_product(config in arb_config()) {
            match RunMatrix::build(&config) {
                Ok(matrix) => {
                    let embeddings = match config.context_mode {
                        ContextMode::Retrieval => config.embedding_models.len(),
                        _ => 1,
                    };
                    let expected = config.models.len() * embeddings.max(1) * config.iterations as usize;
                    prop_assert_eq!(matrix.total_runs() as usize, expected);
                    prop_assert_eq!(matrix.total_runs(), expected_total_runs(&config).unwrap());
                }
                Err(_) => {
                    prop_assert!(config.context_mode == ContextMode::Retrieval && config.embedding_models.is_empty());
                }
            }
        }

        #[test]
        fn prop_builder_is_deterministic(config in arb_config()) {
            let first = RunMatrix::build(&config);
            let second = RunMatrix::build(&config);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_order_is_model_then_iteration_then_embedding(config in arb_config()) {
            if let Ok(matrix) = RunMatrix::build(&config) {
                let position = |t: &TrialSpec| {
                    let model = config.models.iter().position(|m| *m == t.model).unwrap_or(0);
                    let embedding = match &t.embedding_model {
                        Some(e) => config.embedding_models.iter().position(|x| x == e).unwrap_or(0),
                        None => 0,
                    };
                    (model, t.iteration, embedding)
                };
                for pair in matrix.trials().windows(2) {
                    prop_assert!(position(&pair[0]) <= position(&pair[1]));
                }
            }
        }
    }
}
