use std::fmt;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Mean loss per sample.
    pub loss: f64,
    pub accuracy: f64,
    /// F1 averaged over classes weighted by their support.
    pub f1: f64,
}

impl fmt::Display for EpochMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loss {:.4} | accuracy {:.2}% | f1 {:.4}",
            self.loss,
            self.accuracy * 100.0,
            self.f1
        )
    }
}

/// Running totals over the batches of one epoch.
#[derive(Debug, Clone, Default)]
pub struct EpochAccumulator {
    n_samples: usize,
    tot_loss: f64,
    correct: usize,
    predictions: Vec<usize>,
    targets: Vec<usize>,
}

impl EpochAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `batch_loss` is the loss averaged over the batch, as losses usually
    /// reduce with a mean.
    pub fn update(&mut self, batch_loss: f64, predictions: &[usize], targets: &[usize]) {
        debug_assert_eq!(predictions.len(), targets.len());
        let batch_size = targets.len();

        self.n_samples += batch_size;
        self.tot_loss += batch_size as f64 * batch_loss;
        self.correct += predictions
            .iter()
            .zip(targets)
            .filter(|(p, t)| p == t)
            .count();

        self.predictions.extend_from_slice(predictions);
        self.targets.extend_from_slice(targets);
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn finish(&self) -> Result<EpochMetrics> {
        if self.n_samples == 0 {
            return Err(Error::EmptyEpoch);
        }

        let n = self.n_samples as f64;
        Ok(EpochMetrics {
            loss: self.tot_loss / n,
            accuracy: self.correct as f64 / n,
            f1: weighted_f1_score(&self.targets, &self.predictions),
        })
    }
}

/// Rows are true classes, columns predicted classes.
pub fn confusion_matrix(y_true: &[usize], y_pred: &[usize]) -> Array2<usize> {
    let size = y_true
        .iter()
        .chain(y_pred)
        .max()
        .map_or(0, |max| max + 1);

    let mut matrix = Array2::zeros((size, size));
    for (&t, &p) in y_true.iter().zip(y_pred) {
        matrix[[t, p]] += 1;
    }
    matrix
}

/// Per-class F1 averaged with class support as weight. Classes with no true
/// sample weigh nothing, undefined precision or recall counts as zero.
pub fn weighted_f1_score(y_true: &[usize], y_pred: &[usize]) -> f64 {
    let matrix = confusion_matrix(y_true, y_pred);
    let support = matrix.sum_axis(Axis(1));
    let predicted = matrix.sum_axis(Axis(0));

    let total: usize = support.sum();
    if total == 0 {
        return 0.0;
    }

    let weighted: f64 = (0..matrix.nrows())
        .filter(|&class| support[class] > 0)
        .map(|class| {
            let tp = matrix[[class, class]] as f64;
            let precision = if predicted[class] > 0 {
                tp / predicted[class] as f64
            } else {
                0.0
            };
            let recall = tp / support[class] as f64;

            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            f1 * support[class] as f64
        })
        .sum();

    weighted / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn perfect_predictions() {
        assert!(close(weighted_f1_score(&[0, 1, 2, 2], &[0, 1, 2, 2]), 1.0));
    }

    #[test]
    fn weighted_f1_matches_hand_computation() {
        // class 0: tp 1, fp 1, fn 1 -> f1 0.5, support 2
        // class 1: tp 1, fp 0, fn 1 -> p 1, r 0.5, f1 2/3, support 2
        // class 2: tp 1, fp 1, fn 0 -> p 0.5, r 1, f1 2/3, support 1
        let y_true = [0, 0, 1, 1, 2];
        let y_pred = [0, 2, 1, 0, 2];

        let expected = (0.5 * 2.0 + 2.0 / 3.0 * 2.0 + 2.0 / 3.0) / 5.0;
        assert!(close(weighted_f1_score(&y_true, &y_pred), expected));
    }

    #[test]
    fn predicted_only_classes_carry_no_weight() {
        // class 3 never appears in y_true
        let f1 = weighted_f1_score(&[0, 0], &[0, 3]);
        // class 0: p 1, r 0.5 -> 2/3
        assert!(close(f1, 2.0 / 3.0));
    }

    #[test]
    fn all_wrong_is_zero() {
        assert!(close(weighted_f1_score(&[0, 1], &[1, 0]), 0.0));
        assert!(close(weighted_f1_score(&[], &[]), 0.0));
    }

    #[test]
    fn confusion_matrix_counts() {
        let matrix = confusion_matrix(&[0, 1, 1], &[1, 1, 0]);
        assert_eq!(matrix.dim(), (2, 2));
        assert_eq!(matrix[[0, 1]], 1);
        assert_eq!(matrix[[1, 1]], 1);
        assert_eq!(matrix[[1, 0]], 1);
        assert_eq!(matrix[[0, 0]], 0);
    }

    #[test]
    fn accumulator_weights_loss_by_batch_size() {
        let mut acc = EpochAccumulator::new();
        acc.update(1.0, &[0, 1, 1], &[0, 1, 0]);
        acc.update(4.0, &[2], &[2]);

        let metrics = acc.finish().unwrap();

        assert_eq!(acc.n_samples(), 4);
        assert!(close(metrics.loss, (3.0 * 1.0 + 4.0) / 4.0));
        assert!(close(metrics.accuracy, 0.75));
        assert!(close(
            metrics.f1,
            weighted_f1_score(&[0, 1, 0, 2], &[0, 1, 1, 2])
        ));
    }

    #[test]
    fn empty_epoch_is_an_error() {
        assert!(matches!(EpochAccumulator::new().finish(), Err(Error::EmptyEpoch)));
    }
}
