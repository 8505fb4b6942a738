//! Offline training over labeled datasets

use crate::agent::DdqnAgent;
use crate::approximator::{argmax, ValueApproximator};
use crate::dataset::{sliding_windows, Dataset, LabeledEpisode};
use crate::reward::labeled_reward;
use crate::{DefenderError, DefenderResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Episodes after which early stopping may trigger
const EARLY_STOP_WARMUP: usize = 20;
/// Stop once validation accuracy falls below this share of the best
const EARLY_STOP_RATIO: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    pub episodes: usize,
    pub batch_size: usize,
    /// Cap on steps taken from each episode
    pub max_steps: Option<usize>,
    pub early_stopping: bool,
    /// Episodes between validation passes
    pub validation_interval: usize,
    pub seed: Option<u64>,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            episodes: 100,
            batch_size: 32,
            max_steps: None,
            early_stopping: true,
            validation_interval: 5,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    /// Mean training loss per episode
    pub loss: Vec<f64>,
    /// Greedy accuracy per episode
    pub accuracy: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
    pub best_val_accuracy: f64,
    /// 1-based episode that produced the best validation accuracy
    pub best_episode: usize,
    pub stopped_early: bool,
}

/// Validation loss against one-hot label targets and greedy accuracy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationScore {
    pub loss: f64,
    pub accuracy: f64,
}

pub struct Trainer {
    options: TrainingOptions,
    rng: StdRng,
}

impl Trainer {
    pub fn new(options: TrainingOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { options, rng }
    }

    /// Train on randomly drawn episodes, keeping the best validated parameters
    pub fn train<A: ValueApproximator>(
        &mut self,
        agent: &mut DdqnAgent<A>,
        dataset: &Dataset,
    ) -> DefenderResult<TrainingHistory> {
        if dataset.train.is_empty() {
            return Err(DefenderError::Input("no training episodes".into()));
        }
        let interval = self.options.validation_interval.max(1);
        let mut history = TrainingHistory::default();
        let mut best_parameters: Option<Vec<f64>> = None;

        for episode_index in 0..self.options.episodes {
            let Some(episode) = dataset.train.choose(&mut self.rng) else {
                break;
            };
            let (loss, accuracy) = self.run_episode(agent, episode)?;
            history.loss.push(loss);
            history.accuracy.push(accuracy);
            debug!(
                "Episode {}/{}: loss {:.4}, accuracy {:.4}, epsilon {:.4}",
                episode_index + 1,
                self.options.episodes,
                loss,
                accuracy,
                agent.epsilon()
            );

            if (episode_index + 1) % interval != 0 || dataset.validation.is_empty() {
                continue;
            }
            let score = validate(agent, &dataset.validation)?;
            history.val_loss.push(score.loss);
            history.val_accuracy.push(score.accuracy);
            info!(
                "Validation after episode {}: loss {:.4}, accuracy {:.4}",
                episode_index + 1,
                score.loss,
                score.accuracy
            );

            if score.accuracy > history.best_val_accuracy {
                history.best_val_accuracy = score.accuracy;
                history.best_episode = episode_index + 1;
                best_parameters = Some(agent.parameters());
            }
            if self.options.early_stopping
                && episode_index > EARLY_STOP_WARMUP
                && score.accuracy < history.best_val_accuracy * EARLY_STOP_RATIO
            {
                warn!("Early stop at episode {}: validation accuracy regressed", episode_index + 1);
                history.stopped_early = true;
                break;
            }
        }

        if let Some(params) = best_parameters {
            agent.load_parameters(&params)?;
            info!("Restored best parameters from episode {}", history.best_episode);
        }
        Ok(history)
    }

    fn run_episode<A: ValueApproximator>(
        &self,
        agent: &mut DdqnAgent<A>,
        episode: &LabeledEpisode,
    ) -> DefenderResult<(f64, f64)> {
        let window = agent.config().window_size;
        let action_size = agent.config().action_size;
        let steps = match self.options.max_steps {
            Some(max) => episode.len().min(max),
            None => episode.len(),
        };

        let mut losses = Vec::new();
        let mut correct = 0usize;
        for step in 0..steps {
            let state = episode.state_at(step, window);
            let label = episode.attack_labels()[step];
            let action = agent.act(&state)?;
            let reward = labeled_reward(action, label, action_size);

            let terminal = step + 1 >= steps;
            let next_state = if terminal { state.clone() } else { episode.state_at(step + 1, window) };
            if let Err(e) = agent.remember(&state, action, reward, &next_state, terminal) {
                warn!("Skipping transition at step {}: {}", step, e);
            }

            if agent.replay_len() >= self.options.batch_size {
                losses.push(agent.train_step(self.options.batch_size)?);
            }

            let (greedy, _) = agent.predict(&state)?;
            if (greedy != 0) == label {
                correct += 1;
            }
        }

        let mean_loss = if losses.is_empty() { 0.0 } else { losses.iter().sum::<f64>() / losses.len() as f64 };
        let accuracy = if steps == 0 { 0.0 } else { correct as f64 / steps as f64 };
        Ok((mean_loss, accuracy))
    }
}

/// Score the greedy policy on full sliding windows of `episodes`
pub fn validate<A: ValueApproximator>(
    agent: &DdqnAgent<A>,
    episodes: &[LabeledEpisode],
) -> DefenderResult<ValidationScore> {
    let window = agent.config().window_size;
    let mut squared_error = 0.0;
    let mut values = 0usize;
    let mut correct = 0usize;
    let mut samples = 0usize;

    for (input, label) in episodes.iter().flat_map(|e| sliding_windows(e, window)) {
        let (_, q_values) = agent.predict(&input)?;
        let target_index = usize::from(label);
        for (i, q) in q_values.iter().enumerate() {
            let target = if i == target_index { 1.0 } else { 0.0 };
            squared_error += (q - target).powi(2);
        }
        values += q_values.len();
        if (argmax(&q_values) != 0) == label {
            correct += 1;
        }
        samples += 1;
    }

    if samples == 0 {
        return Ok(ValidationScore { loss: 0.0, accuracy: 0.0 });
    }
    Ok(ValidationScore {
        loss: squared_error / values as f64,
        accuracy: correct as f64 / samples as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::features::StateVector;

    const ATTACK: [f64; 8] = [0.95, 0.05, 0.9, 0.7, 0.8, 0.8, 0.02, 0.1];
    const BENIGN: [f64; 8] = [0.4, 0.5, 0.05, 0.3, 0.1, 0.1, 0.4, 0.4];

    fn episode() -> LabeledEpisode {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let attack = (i / 10) % 2 == 1;
            features.push(StateVector::from_array(if attack { ATTACK } else { BENIGN }));
            labels.push(attack);
        }
        LabeledEpisode::new(features, labels).unwrap()
    }

    fn dataset() -> Dataset {
        Dataset {
            train: vec![episode()],
            validation: vec![episode()],
            ..Default::default()
        }
    }

    #[test]
    fn test_training_records_history() {
        let mut agent = DdqnAgent::new(AgentConfig {
            action_size: 2,
            epsilon_decay: 0.9,
            seed: Some(3),
            ..Default::default()
        })
        .unwrap();
        let mut trainer = Trainer::new(TrainingOptions {
            episodes: 10,
            batch_size: 16,
            validation_interval: 2,
            seed: Some(3),
            ..Default::default()
        });

        let history = trainer.train(&mut agent, &dataset()).unwrap();
        assert_eq!(history.loss.len(), 10);
        assert_eq!(history.accuracy.len(), 10);
        assert_eq!(history.val_accuracy.len(), 5);
        assert!(history.best_episode > 0);
        assert!(agent.stats().training_steps > 0);
        assert!(agent.epsilon() < 1.0);
        assert!(history.best_val_accuracy >= 0.5);
    }

    #[test]
    fn test_validate_heuristic() {
        let agent = DdqnAgent::heuristic(AgentConfig {
            action_size: 2,
            ..Default::default()
        })
        .unwrap();
        let score = validate(&agent, &[episode()]).unwrap();
        assert_eq!(score.accuracy, 1.0);
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let mut agent = DdqnAgent::heuristic(AgentConfig::default()).unwrap();
        let mut trainer = Trainer::new(TrainingOptions::default());
        assert!(trainer.train(&mut agent, &Dataset::default()).is_err());
    }
}
