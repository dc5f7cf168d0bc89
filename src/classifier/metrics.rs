//! Binary classification metrics with spam as the positive class.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(predicted: &[bool], actual: &[bool]) -> Self {
        let mut m = Self::default();
        for (&p, &a) in predicted.iter().zip(actual) {
            match (p, a) {
                (true, true) => m.true_positive += 1,
                (true, false) => m.false_positive += 1,
                (false, false) => m.true_negative += 1,
                (false, true) => m.false_negative += 1,
            }
        }
        m
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Per-model scores served by `/model/metrics`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub training_accuracy: f64,
}

impl ModelMetrics {
    pub fn new(validation: &ConfusionMatrix, training: &ConfusionMatrix) -> Self {
        Self {
            accuracy: round4(validation.accuracy()),
            precision: round4(validation.precision()),
            recall: round4(validation.recall()),
            f1: round4(validation.f1()),
            training_accuracy: round4(training.accuracy()),
        }
    }
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_scores() {
        let predicted = [true, true, false, false, true];
        let actual = [true, false, false, true, true];
        let m = ConfusionMatrix::from_predictions(&predicted, &actual);
        assert_eq!(m.true_positive, 2);
        assert_eq!(m.false_positive, 1);
        assert_eq!(m.true_negative, 1);
        assert_eq!(m.false_negative, 1);
        assert!((m.accuracy() - 0.6).abs() < 1e-9);
        assert!((m.precision() - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.recall() - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.f1() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_matrix_is_zero() {
        let m = ConfusionMatrix::default();
        assert_eq!(m.accuracy(), 0.0);
        assert_eq!(m.f1(), 0.0);
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(1.0), 1.0);
    }
}
