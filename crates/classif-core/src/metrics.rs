//! Classification scores computed from true and predicted labels.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Named scalar scores, ordered by name
pub type Scores = BTreeMap<String, f64>;

/// 2x2 confusion counts for labels in `{0, 1}`.
///
/// Multi-label targets are scored element-wise: every (sample, class) cell
/// counts as one binary decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryConfusion {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl BinaryConfusion {
    /// Counts outcomes from two equal-length label arrays
    pub fn from_labels(true_y: &[i64], pred_y: &[i64]) -> Result<Self> {
        if true_y.len() != pred_y.len() {
            return Err(Error::Metrics(format!(
                "Label arrays differ in length: {} true vs {} predicted",
                true_y.len(),
                pred_y.len()
            )));
        }

        let mut counts = Self::default();
        for (&actual, &predicted) in true_y.iter().zip(pred_y.iter()) {
            match (actual, predicted) {
                (1, 1) => counts.true_positives += 1,
                (0, 1) => counts.false_positives += 1,
                (0, 0) => counts.true_negatives += 1,
                (1, 0) => counts.false_negatives += 1,
                _ => {
                    return Err(Error::Metrics(format!(
                        "Labels must be 0 or 1, got true={} predicted={}",
                        actual, predicted
                    )))
                }
            }
        }
        Ok(counts)
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// Sensitivity / true positive rate
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// True negative rate
    pub fn specificity(&self) -> f64 {
        ratio(self.true_negatives, self.true_negatives + self.false_positives)
    }

    pub fn f1_score(&self) -> f64 {
        let precision = self.precision();
        let recall = self.recall();
        if precision + recall > 0.0 {
            2.0 * (precision * recall) / (precision + recall)
        } else {
            0.0
        }
    }

    pub fn balanced_accuracy(&self) -> f64 {
        (self.recall() + self.specificity()) / 2.0
    }

    /// Scores keyed the way they are published to the dashboard
    pub fn scores(&self) -> Scores {
        let mut scores = Scores::new();
        scores.insert("accuracy".to_string(), self.accuracy());
        scores.insert("balanced_accuracy".to_string(), self.balanced_accuracy());
        scores.insert("precision".to_string(), self.precision());
        scores.insert("recall".to_string(), self.recall());
        scores.insert("f1".to_string(), self.f1_score());
        scores
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Maps true and predicted labels to named classification scores
pub fn classification_metrics(true_y: &[i64], pred_y: &[i64]) -> Result<Scores> {
    Ok(BinaryConfusion::from_labels(true_y, pred_y)?.scores())
}
