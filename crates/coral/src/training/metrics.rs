//! Metric records emitted by training and evaluation.

use serde::{Deserialize, Serialize};

/// Losses observed at one optimization step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetric {
    /// Epoch this step belongs to, starting at 1.
    pub epoch: usize,
    /// Step within the epoch, starting at 1.
    pub step: usize,
    /// Steps the epoch runs in total.
    pub total_steps: usize,
    /// Regularizer weight in effect.
    pub lambda: f64,
    /// Covariance discrepancy between the domains, before weighting.
    pub discrepancy_loss: f64,
    /// Mean cross-entropy on the labeled source batch.
    pub classification_loss: f64,
    /// `classification_loss + lambda * discrepancy_loss`.
    pub total_loss: f64,
}

/// Aggregate result of one evaluation pass over a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMetric {
    /// Epoch the evaluated weights come from, starting at 1.
    pub epoch: usize,
    /// Summed cross-entropy divided by the number of examples.
    pub average_loss: f64,
    /// Examples whose argmax prediction equals the label.
    pub correct: usize,
    /// Examples scored.
    pub total: usize,
    /// `100 * correct / total`.
    pub accuracy: f64,
}

impl EvalMetric {
    /// Build a metric, deriving `accuracy` from the counts.
    pub fn new(epoch: usize, average_loss: f64, correct: usize, total: usize) -> Self {
        let accuracy = 100.0 * correct as f64 / total as f64;
        Self {
            epoch,
            average_loss,
            correct,
            total,
            accuracy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_follows_counts() {
        let metric = EvalMetric::new(3, 0.5, 7, 10);
        assert_eq!(metric.accuracy, 70.0);
        assert!(metric.correct <= metric.total);
    }

    #[test]
    fn batch_metric_round_trips_through_json() {
        let metric = BatchMetric {
            epoch: 1,
            step: 2,
            total_steps: 9,
            lambda: 1.0,
            discrepancy_loss: 0.25,
            classification_loss: 1.5,
            total_loss: 1.75,
        };
        let json = serde_json::to_string(&metric).unwrap();
        let back: BatchMetric = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metric);
    }
}
