//! Train command

use super::print_json;
use anyhow::{Context, Result};
use defender_core::evaluation::{evaluate_agent, EvaluationMetrics};
use defender_core::persistence::save_agent;
use defender_core::{Dataset, DdqnAgent, EngineConfig, Trainer, TrainingHistory, TrainingOptions};
use serde::Serialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Serialize)]
struct TrainingReport {
    model: String,
    sidecar: String,
    epsilon: f64,
    training_steps: u64,
    history: TrainingHistory,
    evaluation: EvaluationMetrics,
}

pub fn handle(
    mut config: EngineConfig,
    dataset: &Path,
    out: &Path,
    episodes: usize,
    batch_size: usize,
    seed: Option<u64>,
) -> Result<()> {
    let dataset = Dataset::load(dataset).with_context(|| format!("cannot load dataset {}", dataset.display()))?;
    if seed.is_some() {
        config.agent.seed = seed;
    }
    info!(
        "Training on {} episodes ({} validation, {} test)",
        dataset.train.len(),
        dataset.validation.len(),
        dataset.test.len()
    );

    let mut agent = DdqnAgent::new(config.agent.clone())?;
    let mut trainer = Trainer::new(TrainingOptions {
        episodes,
        batch_size,
        seed,
        ..Default::default()
    });
    let history = trainer.train(&mut agent, &dataset)?;

    let samples = dataset.evaluation_samples(config.agent.window_size);
    let evaluation = evaluate_agent(&agent, &samples)?;
    info!(
        "Evaluation: accuracy {:.4}, precision {:.4}, recall {:.4}, false alarms {:.4}",
        evaluation.accuracy, evaluation.precision, evaluation.recall, evaluation.false_alarm_rate
    );

    let sidecar = save_agent(&agent, out).with_context(|| format!("cannot save model to {}", out.display()))?;
    print_json(&TrainingReport {
        model: out.display().to_string(),
        sidecar: sidecar.display().to_string(),
        epsilon: agent.epsilon(),
        training_steps: agent.stats().training_steps,
        history,
        evaluation,
    })
}
