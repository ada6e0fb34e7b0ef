use crate::catalog::Catalog;
use crate::data::{self, DEFAULT_SYNTHETIC_SAMPLES, DataError};
use crate::evaluate::{self, EvaluationError, Metrics, RocAucMode};
use crate::feedback::{FeedbackError, FeedbackLedger, FeedbackSummary};
use crate::model::{BiomarkerDetail, Exclusion, ModelError, ModelSpec};
use crate::stats::{self, StatsError};
use crate::types::{Dataset, DatasetSummary, Label, PatientRecord};
use ahash::AHashMap;
use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

// ========================================================================================
//                          Public API, configuration & error handling
// ========================================================================================

/// Run options that are not part of the scoring model itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Size of the synthetic dataset drawn when no upload is in use.
    pub synthetic_samples: usize,
    /// Seed for synthetic generation. `None` draws from OS entropy, so repeated runs
    /// differ.
    pub seed: Option<u64>,
    /// Turn a zero-variance weighted biomarker into a hard error instead of a
    /// per-biomarker status.
    pub strict_variance: bool,
    pub roc_auc: RocAucMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            synthetic_samples: DEFAULT_SYNTHETIC_SAMPLES,
            seed: None,
            strict_variance: false,
            roc_auc: RocAucMode::default(),
        }
    }
}

/// Which dataset the statistics are computed from. There is no fallback between the
/// two: an upload that fails to parse is an error, not a reason to go synthetic.
#[derive(Debug, Clone)]
pub enum TrainingSource {
    Synthetic,
    Uploaded(Dataset),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Stats(#[from] StatsError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
    #[error(
        "The healthy samples show no variation for weighted biomarker(s) {}, so their z-scores are undefined. Provide a more varied dataset or disable strict variance checking.",
        .biomarkers.join(", ")
    )]
    ZeroVariance { biomarkers: Vec<String> },
    #[error("Patient value for '{key}' must be a finite, non-negative number (found {value}).")]
    InvalidPatientValue { key: String, value: f64 },
    #[error("No prediction with id {0} has been issued in this session.")]
    UnknownPrediction(u64),
    #[error("Feedback for prediction {0} has already been recorded.")]
    FeedbackAlreadyRecorded(u64),
}

/// Everything reported for one patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub probability_percent: f64,
    pub logit: f64,
    pub predicted_label: Label,
    pub per_biomarker: BTreeMap<String, BiomarkerDetail>,
    pub excluded_from_logit: Vec<Exclusion>,
    pub metrics: Metrics,
    pub dataset: DatasetSummary,
}

/// Builds the random source for synthetic generation.
pub fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

// ========================================================================================
//                                One-shot prediction
// ========================================================================================

/// Scores `patient` against statistics drawn from `source`, and evaluates the model on
/// that same dataset.
pub fn predict(
    patient: &PatientRecord,
    source: &TrainingSource,
    model: &ModelSpec,
    config: &EngineConfig,
    catalog: &Catalog,
) -> Result<PredictionResult, EngineError> {
    match source {
        TrainingSource::Synthetic => {
            let mut rng = rng_for(config.seed);
            let dataset = data::generate_synthetic(config.synthetic_samples, catalog, &mut rng);
            predict_with_dataset(patient, &dataset, model, config, catalog)
        }
        TrainingSource::Uploaded(dataset) => {
            predict_with_dataset(patient, dataset, model, config, catalog)
        }
    }
}

fn predict_with_dataset(
    patient: &PatientRecord,
    dataset: &Dataset,
    model: &ModelSpec,
    config: &EngineConfig,
    catalog: &Catalog,
) -> Result<PredictionResult, EngineError> {
    validate_patient(patient, catalog)?;
    let summary = dataset.summary();
    info!("Training on {summary}");

    let stats = stats::compute_stats(dataset, catalog)?;

    if config.strict_variance {
        let flat: Vec<String> = stats
            .zero_variance_keys()
            .into_iter()
            .filter(|key| model.weight(key).is_some())
            .map(str::to_string)
            .collect();
        if !flat.is_empty() {
            return Err(EngineError::ZeroVariance { biomarkers: flat });
        }
    }

    let score = model.score(patient, &stats, catalog);
    let metrics = evaluate::evaluate(dataset, &stats, model, config.roc_auc)?;

    if !score.excluded.is_empty() {
        warn!(
            "{} weighted biomarker(s) did not contribute to the score",
            score.excluded.len()
        );
    }
    info!(
        "Disease probability {:.1}% (threshold {}%)",
        score.probability_percent, model.decision_threshold
    );

    Ok(PredictionResult {
        probability_percent: score.probability_percent,
        logit: score.logit,
        predicted_label: model.predicted_label(score.probability_percent),
        per_biomarker: score.details,
        excluded_from_logit: score.excluded,
        metrics,
        dataset: summary,
    })
}

fn validate_patient(patient: &PatientRecord, catalog: &Catalog) -> Result<(), EngineError> {
    for (key, value) in patient.iter() {
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::InvalidPatientValue {
                key: key.to_string(),
                value,
            });
        }
        if !catalog.contains(key) {
            warn!("Patient value '{key}' is not a known biomarker and will be ignored");
        }
    }
    if patient.is_empty() {
        warn!("Patient record has no values; the score reflects the intercept only");
    }
    Ok(())
}

// ========================================================================================
//                                 Interactive session
// ========================================================================================

/// A long-lived engine that issues numbered predictions and collects clinician
/// feedback on them. The training source is switched explicitly by the caller.
///
/// Each prediction is held until its verdict arrives, so predictions that never receive
/// feedback stay in memory for the lifetime of the session.
pub struct Session {
    model: ModelSpec,
    config: EngineConfig,
    catalog: &'static Catalog,
    source: TrainingSource,
    rng: StdRng,
    ledger: FeedbackLedger,
    issued: AHashMap<u64, f64>,
    next_id: u64,
}

impl Session {
    pub fn new(
        model: ModelSpec,
        config: EngineConfig,
        catalog: &'static Catalog,
    ) -> Result<Self, EngineError> {
        model.validate(catalog)?;
        Ok(Self {
            ledger: FeedbackLedger::new(model.decision_threshold),
            rng: rng_for(config.seed),
            model,
            config,
            catalog,
            source: TrainingSource::Synthetic,
            issued: AHashMap::new(),
            next_id: 1,
        })
    }

    pub fn use_uploaded(&mut self, dataset: Dataset) {
        info!("Switching to uploaded data: {}", dataset.summary());
        self.source = TrainingSource::Uploaded(dataset);
    }

    pub fn use_synthetic(&mut self) {
        info!("Switching to synthetic data");
        self.source = TrainingSource::Synthetic;
    }

    pub fn source(&self) -> &TrainingSource {
        &self.source
    }

    /// Scores `patient` and returns the id under which feedback can be recorded.
    pub fn predict(&mut self, patient: &PatientRecord) -> Result<(u64, PredictionResult), EngineError> {
        let result = match &self.source {
            TrainingSource::Synthetic => {
                let dataset = data::generate_synthetic(
                    self.config.synthetic_samples,
                    self.catalog,
                    &mut self.rng,
                );
                predict_with_dataset(patient, &dataset, &self.model, &self.config, self.catalog)?
            }
            TrainingSource::Uploaded(dataset) => {
                predict_with_dataset(patient, dataset, &self.model, &self.config, self.catalog)?
            }
        };
        let id = self.next_id;
        self.next_id += 1;
        self.issued.insert(id, result.probability_percent);
        Ok((id, result))
    }

    /// Records whether the clinician agreed with prediction `id`. Each prediction
    /// accepts one verdict.
    pub fn record_feedback(&mut self, id: u64, confirmed: bool) -> Result<FeedbackSummary, EngineError> {
        let Some(&probability) = self.issued.get(&id) else {
            return Err(if id > 0 && id < self.next_id {
                EngineError::FeedbackAlreadyRecorded(id)
            } else {
                EngineError::UnknownPrediction(id)
            });
        };
        self.ledger.record(probability, confirmed)?;
        self.issued.remove(&id);
        Ok(self.ledger.snapshot())
    }

    pub fn feedback_summary(&self) -> FeedbackSummary {
        self.ledger.snapshot()
    }
}
