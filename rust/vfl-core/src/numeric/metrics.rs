//! Evaluation metrics for trained models.

use super::DataError;

fn check_lengths(real: &[f64], predicted: &[f64]) -> Result<(), DataError> {
    if real.is_empty() {
        return Err(DataError::EmptyInput("label list"));
    }
    if real.len() != predicted.len() {
        return Err(DataError::RaggedRow(predicted.len()));
    }
    Ok(())
}

/// Mean squared error of regression predictions.
///
/// # Errors
/// Fails if the lists are empty or of different length.
pub fn mse(real: &[f64], predicted: &[f64]) -> Result<f64, DataError> {
    check_lengths(real, predicted)?;
    let sum = real
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum::<f64>();
    Ok(sum / real.len() as f64)
}

/// Root mean squared error of regression predictions.
///
/// # Errors
/// Fails if the lists are empty or of different length.
pub fn rmse(real: &[f64], predicted: &[f64]) -> Result<f64, DataError> {
    mse(real, predicted).map(f64::sqrt)
}

/// Counts of a binary classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    /// Classifies predicted probabilities at `threshold` against `0.0`/`1.0` labels.
    ///
    /// # Errors
    /// Fails if the lists are empty or of different length.
    pub fn new(real: &[f64], probabilities: &[f64], threshold: f64) -> Result<Self, DataError> {
        check_lengths(real, probabilities)?;
        let mut matrix = Self::default();
        for (y, p) in real.iter().zip(probabilities) {
            match (*y >= 0.5, *p >= threshold) {
                (true, true) => matrix.true_positives += 1,
                (false, true) => matrix.false_positives += 1,
                (false, false) => matrix.true_negatives += 1,
                (true, false) => matrix.false_negatives += 1,
            }
        }
        Ok(matrix)
    }

    fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    /// Share of correctly classified samples.
    pub fn accuracy(&self) -> f64 {
        (self.true_positives + self.true_negatives) as f64 / self.total() as f64
    }

    /// Share of positive predictions that are correct; `None` without positive predictions.
    pub fn precision(&self) -> Option<f64> {
        let predicted = self.true_positives + self.false_positives;
        if predicted == 0 {
            None
        } else {
            Some(self.true_positives as f64 / predicted as f64)
        }
    }

    /// Share of positive samples that are found; `None` without positive samples.
    pub fn recall(&self) -> Option<f64> {
        let positives = self.true_positives + self.false_negatives;
        if positives == 0 {
            None
        } else {
            Some(self.true_positives as f64 / positives as f64)
        }
    }

    /// Harmonic mean of precision and recall.
    pub fn f1_score(&self) -> Option<f64> {
        let (precision, recall) = (self.precision()?, self.recall()?);
        if precision + recall == 0.0 {
            Some(0.0)
        } else {
            Some(2.0 * precision * recall / (precision + recall))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regression_metrics() {
        let real = [3.0, -0.5, 2.0, 7.0];
        let predicted = [2.5, 0.0, 2.0, 8.0];
        assert!((mse(&real, &predicted).unwrap() - 0.375).abs() < 1e-12);
        assert!((rmse(&real, &predicted).unwrap() - 0.375_f64.sqrt()).abs() < 1e-12);
        assert!(mse(&[], &[]).is_err());
        assert!(mse(&real, &predicted[..2]).is_err());
    }

    #[test]
    fn test_confusion_matrix() {
        let real = [1.0, 1.0, 0.0, 0.0, 1.0];
        let probabilities = [0.9, 0.4, 0.2, 0.7, 0.6];
        let matrix = ConfusionMatrix::new(&real, &probabilities, 0.5).unwrap();
        assert_eq!(
            matrix,
            ConfusionMatrix {
                true_positives: 2,
                false_positives: 1,
                true_negatives: 1,
                false_negatives: 1,
            }
        );
        assert!((matrix.accuracy() - 0.6).abs() < 1e-12);
        assert!((matrix.precision().unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((matrix.recall().unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((matrix.f1_score().unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }
}
