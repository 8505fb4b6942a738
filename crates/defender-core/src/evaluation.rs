//! Detection quality metrics

use crate::agent::DdqnAgent;
use crate::approximator::ValueApproximator;
use crate::DefenderResult;
use serde::{Deserialize, Serialize};

/// Confusion-matrix derived metrics; any action other than 0 counts as "attack"
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub false_alarm_rate: f64,
    pub detection_rate: f64,
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
}

impl EvaluationMetrics {
    pub fn from_predictions(predictions: &[bool], labels: &[bool]) -> Self {
        let mut metrics = Self::default();
        for (&predicted, &actual) in predictions.iter().zip(labels) {
            match (predicted, actual) {
                (true, true) => metrics.true_positives += 1,
                (true, false) => metrics.false_positives += 1,
                (false, false) => metrics.true_negatives += 1,
                (false, true) => metrics.false_negatives += 1,
            }
        }
        metrics.update_rates();
        metrics
    }

    pub fn total(&self) -> u64 {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    fn update_rates(&mut self) {
        let ratio = |num: u64, den: u64| if den > 0 { num as f64 / den as f64 } else { 0.0 };

        self.accuracy = ratio(self.true_positives + self.true_negatives, self.total());
        self.precision = ratio(self.true_positives, self.true_positives + self.false_positives);
        self.recall = ratio(self.true_positives, self.true_positives + self.false_negatives);
        self.false_alarm_rate = ratio(self.false_positives, self.false_positives + self.true_negatives);
        self.detection_rate = self.recall;

        if self.precision + self.recall > 0.0 {
            self.f1 = 2.0 * self.precision * self.recall / (self.precision + self.recall);
        }
    }
}

/// Greedy predictions of `agent` over `(input, is_attack)` samples
pub fn evaluate_agent<A: ValueApproximator>(
    agent: &DdqnAgent<A>,
    samples: &[(Vec<f64>, bool)],
) -> DefenderResult<EvaluationMetrics> {
    let mut predictions = Vec::with_capacity(samples.len());
    let mut labels = Vec::with_capacity(samples.len());
    for (input, label) in samples {
        let (action, _) = agent.predict(input)?;
        predictions.push(action != 0);
        labels.push(*label);
    }
    Ok(EvaluationMetrics::from_predictions(&predictions, &labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    #[test]
    fn test_confusion_matrix() {
        let predictions = [true, true, false, false, true, false];
        let labels = [true, false, false, true, true, false];
        let m = EvaluationMetrics::from_predictions(&predictions, &labels);

        assert_eq!((m.true_positives, m.false_positives, m.true_negatives, m.false_negatives), (2, 1, 2, 1));
        assert!((m.accuracy - 4.0 / 6.0).abs() < 1e-12);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.f1 - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.false_alarm_rate - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.detection_rate, m.recall);
    }

    #[test]
    fn test_empty_is_all_zero() {
        assert_eq!(EvaluationMetrics::from_predictions(&[], &[]), EvaluationMetrics::default());
    }

    #[test]
    fn test_heuristic_agent_evaluation() {
        let agent = DdqnAgent::heuristic(AgentConfig::default()).unwrap();
        let samples = vec![
            (vec![0.99, 0.0, 0.95, 0.54, 0.6, 0.8, 0.02, 0.0], true),
            (vec![0.5, 0.6, 0.05, 0.4, 0.1, 0.2, 0.5, 0.4], false),
        ];
        let m = evaluate_agent(&agent, &samples).unwrap();
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.false_alarm_rate, 0.0);
    }
}
