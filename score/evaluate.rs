//! Self-evaluation of the scoring model on the dataset its statistics came from.
//!
//! Every sample is re-scored with the same `ModelSpec` used for patients, thresholded
//! at the model's decision threshold, and tallied into a confusion matrix. There is no
//! held-out split, so these numbers describe fit rather than generalization.

use crate::model::ModelSpec;
use crate::stats::StatsTable;
use crate::types::{Dataset, Label};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// ROC-AUC reported in placeholder mode.
pub const PLACEHOLDER_ROC_AUC: f64 = 0.94;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("Cannot evaluate the model on an empty dataset.")]
    EmptyDataset,
}

/// How the ROC-AUC figure in `Metrics` is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RocAucMode {
    /// Trapezoidal area under the ROC curve of the re-scored dataset.
    #[default]
    Computed,
    /// The constant `PLACEHOLDER_ROC_AUC`.
    Placeholder,
}

impl fmt::Display for RocAucMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RocAucMode::Computed => f.write_str("computed"),
            RocAucMode::Placeholder => f.write_str("placeholder"),
        }
    }
}

/// Binary confusion matrix with disease as the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    #[serde(rename = "tp")]
    pub true_positives: usize,
    #[serde(rename = "tn")]
    pub true_negatives: usize,
    #[serde(rename = "fp")]
    pub false_positives: usize,
    #[serde(rename = "fn")]
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    pub fn record(&mut self, actual: Label, predicted: Label) {
        match (actual, predicted) {
            (Label::Disease, Label::Disease) => self.true_positives += 1,
            (Label::Healthy, Label::Healthy) => self.true_negatives += 1,
            (Label::Healthy, Label::Disease) => self.false_positives += 1,
            (Label::Disease, Label::Healthy) => self.false_negatives += 1,
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            true_positives: self.true_positives + other.true_positives,
            true_negatives: self.true_negatives + other.true_negatives,
            false_positives: self.false_positives + other.false_positives,
            false_negatives: self.false_negatives + other.false_negatives,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.true_negatives + self.false_positives + self.false_negatives
    }

    pub fn correct(&self) -> usize {
        self.true_positives + self.true_negatives
    }

    /// Percent of all predictions that were right; `None` for an empty matrix.
    pub fn accuracy(&self) -> Option<f64> {
        percent(self.correct(), self.total())
    }

    /// Percent of disease cases predicted as disease.
    pub fn sensitivity(&self) -> Option<f64> {
        percent(
            self.true_positives,
            self.true_positives + self.false_negatives,
        )
    }

    /// Percent of healthy cases predicted as healthy.
    pub fn specificity(&self) -> Option<f64> {
        percent(
            self.true_negatives,
            self.true_negatives + self.false_positives,
        )
    }
}

fn percent(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64 * 100.0)
}

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Classification quality of the model on its own dataset. Percentages carry one
/// decimal; a metric whose denominator is zero is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub accuracy: Option<f64>,
    pub sensitivity: Option<f64>,
    pub specificity: Option<f64>,
    pub roc_auc: Option<f64>,
    pub roc_auc_source: RocAucMode,
    pub confusion_matrix: ConfusionMatrix,
}

/// Re-scores every sample in `dataset` and summarizes how well the threshold separates
/// the two classes.
pub fn evaluate(
    dataset: &Dataset,
    stats: &StatsTable,
    model: &ModelSpec,
    roc_mode: RocAucMode,
) -> Result<Metrics, EvaluationError> {
    if dataset.is_empty() {
        return Err(EvaluationError::EmptyDataset);
    }

    let scored: Vec<(f64, Label)> = dataset
        .samples()
        .par_iter()
        .map(|sample| (model.probability_percent(sample, stats), sample.label))
        .collect();

    let confusion_matrix = scored
        .par_iter()
        .fold(ConfusionMatrix::default, |mut matrix, &(probability, actual)| {
            matrix.record(actual, model.predicted_label(probability));
            matrix
        })
        .reduce(ConfusionMatrix::default, ConfusionMatrix::merge);

    let roc_auc = match roc_mode {
        RocAucMode::Computed => roc_auc(&scored).map(|auc| round_to(auc, 2)),
        RocAucMode::Placeholder => Some(PLACEHOLDER_ROC_AUC),
    };

    debug!(
        "Evaluated {} samples: {:?}, ROC-AUC {:?} ({})",
        scored.len(),
        confusion_matrix,
        roc_auc,
        roc_mode
    );

    Ok(Metrics {
        accuracy: confusion_matrix.accuracy().map(|v| round_to(v, 1)),
        sensitivity: confusion_matrix.sensitivity().map(|v| round_to(v, 1)),
        specificity: confusion_matrix.specificity().map(|v| round_to(v, 1)),
        roc_auc,
        roc_auc_source: roc_mode,
        confusion_matrix,
    })
}

/// Area under the ROC curve by the trapezoidal rule, treating disease as positive and
/// higher scores as more positive. Tied scores move the curve diagonally. `None` when
/// either class is absent.
pub fn roc_auc(scored: &[(f64, Label)]) -> Option<f64> {
    let positives = scored.iter().filter(|(_, l)| *l == Label::Disease).count();
    let negatives = scored.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut ordered: Vec<(f64, Label)> = scored.to_vec();
    ordered.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut area = 0.0;
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut i = 0;
    while i < ordered.len() {
        let threshold = ordered[i].0;
        let (prev_tp, prev_fp) = (tp, fp);
        while i < ordered.len() && ordered[i].0 == threshold {
            match ordered[i].1 {
                Label::Disease => tp += 1,
                Label::Healthy => fp += 1,
            }
            i += 1;
        }
        area += (fp - prev_fp) as f64 * (tp + prev_tp) as f64 / 2.0;
    }

    Some(area / (positives * negatives) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::catalog;
    use crate::data::generate_synthetic;
    use crate::stats::compute_stats;
    use crate::types::{DatasetSource, Sample};
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn confusion_matrix_accounts_for_every_sample() {
        let mut rng = StdRng::seed_from_u64(7);
        for count in [2, 3, 10, 51] {
            let dataset = generate_synthetic(count, catalog(), &mut rng);
            let stats = compute_stats(&dataset, catalog()).unwrap();
            let metrics = evaluate(
                &dataset,
                &stats,
                &ModelSpec::default(),
                RocAucMode::Computed,
            )
            .unwrap();
            assert_eq!(metrics.confusion_matrix.total(), count);
        }
    }

    #[test]
    fn synthetic_data_is_well_separated() {
        let mut rng = StdRng::seed_from_u64(2024);
        let dataset = generate_synthetic(200, catalog(), &mut rng);
        let stats = compute_stats(&dataset, catalog()).unwrap();
        let metrics = evaluate(
            &dataset,
            &stats,
            &ModelSpec::default(),
            RocAucMode::Computed,
        )
        .unwrap();
        assert!(metrics.roc_auc.unwrap() > 0.9);
        assert!(metrics.specificity.unwrap() > 90.0);
    }

    #[test]
    fn rates_follow_the_matrix() {
        let matrix = ConfusionMatrix {
            true_positives: 40,
            true_negatives: 45,
            false_positives: 5,
            false_negatives: 10,
        };
        assert_abs_diff_eq!(matrix.accuracy().unwrap(), 85.0, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix.sensitivity().unwrap(), 80.0, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix.specificity().unwrap(), 90.0, epsilon = 1e-12);
    }

    #[test]
    fn empty_denominators_yield_none() {
        let mut matrix = ConfusionMatrix::default();
        assert_eq!(matrix.accuracy(), None);
        matrix.record(Label::Healthy, Label::Healthy);
        assert_eq!(matrix.sensitivity(), None);
        assert_eq!(matrix.specificity(), Some(100.0));
    }

    #[test]
    fn confusion_matrix_serializes_with_short_names() {
        let matrix = ConfusionMatrix {
            true_positives: 1,
            true_negatives: 2,
            false_positives: 3,
            false_negatives: 4,
        };
        let json = serde_json::to_value(matrix).unwrap();
        assert_eq!(json["tp"], 1);
        assert_eq!(json["tn"], 2);
        assert_eq!(json["fp"], 3);
        assert_eq!(json["fn"], 4);
    }

    #[test]
    fn roc_auc_handles_perfect_reversed_and_tied_scores() {
        use Label::{Disease, Healthy};
        let perfect = [(90.0, Disease), (80.0, Disease), (20.0, Healthy), (10.0, Healthy)];
        assert_eq!(roc_auc(&perfect), Some(1.0));

        let reversed = [(90.0, Healthy), (80.0, Healthy), (20.0, Disease), (10.0, Disease)];
        assert_eq!(roc_auc(&reversed), Some(0.0));

        let tied = [(50.0, Healthy), (50.0, Disease), (50.0, Healthy), (50.0, Disease)];
        assert_eq!(roc_auc(&tied), Some(0.5));

        let one_swap = [(90.0, Disease), (70.0, Healthy), (60.0, Disease), (10.0, Healthy)];
        assert_abs_diff_eq!(roc_auc(&one_swap).unwrap(), 0.75, epsilon = 1e-12);

        assert_eq!(roc_auc(&[(90.0, Disease)]), None);
    }

    #[test]
    fn placeholder_mode_reports_the_fixed_figure() {
        let dataset = Dataset::new(
            DatasetSource::Uploaded,
            vec![
                Sample::new(Label::Healthy).with_value("nfl", 400.0),
                Sample::new(Label::Healthy).with_value("nfl", 500.0),
                Sample::new(Label::Disease).with_value("nfl", 1500.0),
            ],
        );
        let stats = compute_stats(&dataset, catalog()).unwrap();
        let metrics = evaluate(
            &dataset,
            &stats,
            &ModelSpec::default(),
            RocAucMode::Placeholder,
        )
        .unwrap();
        assert_eq!(metrics.roc_auc, Some(PLACEHOLDER_ROC_AUC));
        assert_eq!(metrics.roc_auc_source, RocAucMode::Placeholder);
    }

    #[test]
    fn round_to_keeps_the_requested_decimals() {
        assert_eq!(round_to(66.666_666, 1), 66.7);
        assert_eq!(round_to(0.935, 2), 0.94);
        assert_eq!(round_to(12.04, 1), 12.0);
    }
}
