//! Running tally of clinician verdicts on issued predictions.
//!
//! A clinician reviews a prediction and says whether it was right. Combined with the
//! predicted class, that verdict places the case in one cell of a confusion matrix,
//! from which a running accuracy is derived. Nothing here is persisted.

use crate::evaluate::{ConfusionMatrix, round_to};
use crate::types::Label;
use log::debug;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedbackError {
    #[error("Feedback refers to a probability of {0}%, which is not between 0 and 100.")]
    InvalidProbability(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeedbackSummary {
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
    /// Percent, one decimal. `None` until the first verdict.
    pub accuracy: Option<f64>,
    pub breakdown: ConfusionMatrix,
}

#[derive(Debug, Clone)]
pub struct FeedbackLedger {
    threshold: f64,
    matrix: ConfusionMatrix,
}

impl FeedbackLedger {
    /// `threshold` is the decision threshold in percent the predictions were made with.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            matrix: ConfusionMatrix::default(),
        }
    }

    /// Records the verdict on a prediction of `probability_percent`. `confirmed` means
    /// the clinician agreed with the predicted class.
    pub fn record(&mut self, probability_percent: f64, confirmed: bool) -> Result<(), FeedbackError> {
        if !(0.0..=100.0).contains(&probability_percent) {
            return Err(FeedbackError::InvalidProbability(probability_percent));
        }
        let predicted = if probability_percent > self.threshold {
            Label::Disease
        } else {
            Label::Healthy
        };
        let actual = match (predicted, confirmed) {
            (label, true) => label,
            (Label::Disease, false) => Label::Healthy,
            (Label::Healthy, false) => Label::Disease,
        };
        self.matrix.record(actual, predicted);
        debug!(
            "Recorded {} verdict on a {predicted} prediction ({} verdicts so far)",
            if confirmed { "confirming" } else { "rejecting" },
            self.matrix.total()
        );
        Ok(())
    }

    pub fn snapshot(&self) -> FeedbackSummary {
        let correct = self.matrix.correct();
        FeedbackSummary {
            total: self.matrix.total(),
            correct,
            incorrect: self.matrix.total() - correct,
            accuracy: self.matrix.accuracy().map(|v| round_to(v, 1)),
            breakdown: self.matrix,
        }
    }
}
