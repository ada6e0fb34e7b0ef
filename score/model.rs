use crate::catalog::{Catalog, Category};
use crate::stats::{StatsEntry, StatsTable};
use crate::types::{Label, Measurements};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the public, human-readable format of the scoring model
// when serialized to a TOML file.

pub const DEFAULT_INTERCEPT: f64 = -2.5;

/// Probability (in percent) above which a sample is called disease-positive.
pub const DEFAULT_DECISION_THRESHOLD: f64 = 50.0;

/// Hand-authored logistic weights per biomarker. Positive weights raise the risk as
/// the biomarker rises above the healthy mean; negative weights raise it as the
/// biomarker falls.
const DEFAULT_WEIGHTS: [(&str, f64); 33] = [
    // CSF markers carry the largest weights
    ("ptau217", 0.08),
    ("ptau181", 0.07),
    ("ptau231", 0.06),
    ("ab4240", -0.09),
    ("ab42", -0.07),
    ("ttau", 0.06),
    ("nfl", 0.05),
    ("ykl40", 0.04),
    // Blood
    ("gfap", 0.05),
    ("uchl1", 0.04),
    ("strem2", 0.04),
    ("apod", 0.03),
    ("asynuclein", 0.03),
    // Inflammatory
    ("il1", 0.03),
    ("il6", 0.03),
    ("tnfa", 0.03),
    // Lipids
    ("ceramide", 0.03),
    ("dha", -0.02),
    ("linolenic", -0.02),
    ("cholesterol", 0.02),
    ("apoc3", 0.02),
    // Saliva, tears, urine
    ("lactoferrin", 0.03),
    ("serpina3", 0.03),
    ("formic", 0.02),
    ("ache", 0.02),
    ("pche", 0.02),
    ("ad7cntp", 0.03),
    // Molecular
    ("mir545", 0.03),
    ("mir7g", -0.03),
    ("mir15b", 0.03),
    ("neurograin", 0.03),
    ("evproteins", 0.03),
    ("substancep", 0.02),
];

/// One row of the z-score interpretation table. A missing bound is unbounded on
/// that side; the `*_inclusive` flags decide which band owns a boundary value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretationBand {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default)]
    pub lower_inclusive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    #[serde(default)]
    pub upper_inclusive: bool,
}

impl InterpretationBand {
    fn new(
        label: &str,
        lower: Option<f64>,
        lower_inclusive: bool,
        upper: Option<f64>,
        upper_inclusive: bool,
    ) -> Self {
        Self {
            label: label.to_string(),
            lower,
            lower_inclusive,
            upper,
            upper_inclusive,
        }
    }

    pub fn contains(&self, z: f64) -> bool {
        let above_lower = match self.lower {
            None => true,
            Some(lo) if self.lower_inclusive => z >= lo,
            Some(lo) => z > lo,
        };
        let below_upper = match self.upper {
            None => true,
            Some(hi) if self.upper_inclusive => z <= hi,
            Some(hi) => z < hi,
        };
        above_lower && below_upper
    }

    fn is_empty_interval(&self) -> bool {
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) => {
                lo > hi || (lo == hi && !(self.lower_inclusive && self.upper_inclusive))
            }
            _ => false,
        }
    }
}

/// The default interpretation table. ±1 sit inside the normal band; ±2 and ±3 belong
/// to the more severe neighbour.
fn default_bands() -> Vec<InterpretationBand> {
    vec![
        InterpretationBand::new("Severely reduced", None, false, Some(-3.0), true),
        InterpretationBand::new("Moderately reduced", Some(-3.0), false, Some(-2.0), true),
        InterpretationBand::new("Mildly reduced", Some(-2.0), false, Some(-1.0), false),
        InterpretationBand::new("Within normal range", Some(-1.0), true, Some(1.0), true),
        InterpretationBand::new("Mildly elevated", Some(1.0), false, Some(2.0), false),
        InterpretationBand::new("Moderately elevated", Some(2.0), true, Some(3.0), false),
        InterpretationBand::new("Severely elevated", Some(3.0), true, None, false),
    ]
}

/// The complete, self-contained scoring model: intercept, decision threshold, weight
/// table and interpretation bands. This is the structure that gets saved to and
/// loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub intercept: f64,
    pub decision_threshold: f64,
    pub weights: BTreeMap<String, f64>,
    pub bands: Vec<InterpretationBand>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            intercept: DEFAULT_INTERCEPT,
            decision_threshold: DEFAULT_DECISION_THRESHOLD,
            weights: DEFAULT_WEIGHTS
                .iter()
                .map(|&(key, weight)| (key.to_string(), weight))
                .collect(),
            bands: default_bands(),
        }
    }
}

/// Custom error type for model loading, saving, and validation.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("The model assigns a weight to '{0}', which is not a known biomarker key.")]
    UnknownWeightKey(String),
    #[error("Model parameter '{0}' must be a finite number.")]
    NonFiniteParameter(String),
    #[error("The decision threshold must lie strictly between 0 and 100 percent (found {0}).")]
    ThresholdOutOfRange(f64),
    #[error("The interpretation table is empty.")]
    EmptyBands,
    #[error("Interpretation band '{0}' covers no z-score values.")]
    EmptyBand(String),
    #[error(
        "The interpretation table must start and end with an unbounded band so every z-score gets a label."
    )]
    BandsNotExhaustive,
    #[error(
        "Interpretation bands '{left}' and '{right}' must meet at one boundary owned by exactly one of them."
    )]
    BandsNotContiguous { left: String, right: String },
}

impl ModelSpec {
    /// Loads a model from TOML and validates it against the catalog.
    pub fn load(path: &Path, catalog: &Catalog) -> Result<Self, ModelError> {
        let text = fs::read_to_string(path)?;
        let model: ModelSpec = toml::from_str(&text)?;
        model.validate(catalog)?;
        info!(
            "Loaded scoring model from '{}' ({} weights, {} bands)",
            path.display(),
            model.weights.len(),
            model.bands.len()
        );
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Checks that the parameters are finite, the weights name catalog biomarkers, and
    /// the bands tile the whole real line without gaps or overlaps.
    pub fn validate(&self, catalog: &Catalog) -> Result<(), ModelError> {
        if !self.intercept.is_finite() {
            return Err(ModelError::NonFiniteParameter("intercept".to_string()));
        }
        if !(self.decision_threshold > 0.0 && self.decision_threshold < 100.0) {
            return Err(ModelError::ThresholdOutOfRange(self.decision_threshold));
        }
        for (key, weight) in &self.weights {
            if !catalog.contains(key) {
                return Err(ModelError::UnknownWeightKey(key.clone()));
            }
            if !weight.is_finite() {
                return Err(ModelError::NonFiniteParameter(format!("weights.{key}")));
            }
        }
        self.validate_bands()
    }

    fn validate_bands(&self) -> Result<(), ModelError> {
        if self.bands.is_empty() {
            return Err(ModelError::EmptyBands);
        }
        if let Some(band) = self.bands.iter().find(|b| b.is_empty_interval()) {
            return Err(ModelError::EmptyBand(band.label.clone()));
        }

        let mut ordered: Vec<&InterpretationBand> = self.bands.iter().collect();
        // `None` sorts first, which is exactly the unbounded-below band.
        ordered.sort_by(|a, b| a.lower.partial_cmp(&b.lower).unwrap_or(std::cmp::Ordering::Equal));

        let first = ordered[0];
        let last = ordered[ordered.len() - 1];
        if first.lower.is_some() || last.upper.is_some() {
            return Err(ModelError::BandsNotExhaustive);
        }

        for pair in ordered.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            let meets = match (left.upper, right.lower) {
                (Some(hi), Some(lo)) => hi == lo && (left.upper_inclusive != right.lower_inclusive),
                _ => false,
            };
            if !meets {
                return Err(ModelError::BandsNotContiguous {
                    left: left.label.clone(),
                    right: right.label.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn weight(&self, key: &str) -> Option<f64> {
        self.weights.get(key).copied()
    }

    /// The label of the first band containing `z`.
    pub fn interpret(&self, z: f64) -> Option<&str> {
        self.bands
            .iter()
            .find(|band| band.contains(z))
            .map(|band| band.label.as_str())
    }

    #[inline]
    pub fn predicts_disease(&self, probability_percent: f64) -> bool {
        probability_percent > self.decision_threshold
    }

    pub fn predicted_label(&self, probability_percent: f64) -> Label {
        if self.predicts_disease(probability_percent) {
            Label::Disease
        } else {
            Label::Healthy
        }
    }

    /// The linear predictor for one set of measurements. Only weighted biomarkers
    /// with a measured value and a defined, non-zero-variance healthy class
    /// contribute; everything else adds zero.
    pub fn logit<M: Measurements + ?Sized>(&self, measurements: &M, stats: &StatsTable) -> f64 {
        self.weights
            .iter()
            .filter_map(|(key, &weight)| {
                let (_, z) = assess(measurements.value(key), stats.get(key));
                Some(weight * z?)
            })
            .fold(self.intercept, |acc, term| acc + term)
    }

    /// Disease probability in percent for one set of measurements.
    pub fn probability_percent<M: Measurements + ?Sized>(
        &self,
        measurements: &M,
        stats: &StatsTable,
    ) -> f64 {
        logistic_percent(self.logit(measurements, stats))
    }

    /// Scores one patient: the disease probability plus a detail entry for every
    /// catalog biomarker, whether or not it carries a weight.
    pub fn score<M: Measurements + ?Sized>(
        &self,
        patient: &M,
        stats: &StatsTable,
        catalog: &Catalog,
    ) -> Score {
        let logit = self.logit(patient, stats);
        let mut details = BTreeMap::new();
        let mut excluded = Vec::new();

        for def in catalog.definitions() {
            let value = patient.value(def.key);
            let weight = self.weight(def.key);
            let (status, z_score) = assess(value, stats.get(def.key));

            if weight.is_some() && z_score.is_none() {
                excluded.push(Exclusion {
                    key: def.key.to_string(),
                    reason: status,
                });
            }

            let defined = stats.defined(def.key);
            details.insert(
                def.key.to_string(),
                BiomarkerDetail {
                    display_name: def.display_name,
                    unit: def.unit,
                    category: def.category,
                    value,
                    healthy_mean: defined.map(|s| s.healthy_mean),
                    healthy_std: defined.map(|s| s.healthy_std),
                    disease_mean: defined.map(|s| s.disease_mean),
                    z_score,
                    interpretation: z_score
                        .and_then(|z| self.interpret(z))
                        .map(str::to_string),
                    weight,
                    status,
                },
            );
        }

        if !excluded.is_empty() {
            debug!(
                "{} weighted biomarker(s) left out of the logit: {:?}",
                excluded.len(),
                excluded.iter().map(|e| e.key.as_str()).collect::<Vec<_>>()
            );
        }

        Score {
            logit,
            probability_percent: logistic_percent(logit),
            details,
            excluded,
        }
    }
}

/// Status and z-score of one measurement against its reference statistics.
fn assess(value: Option<f64>, entry: Option<&StatsEntry>) -> (AssessmentStatus, Option<f64>) {
    match (value, entry) {
        (_, None) | (_, Some(StatsEntry::Undefined { .. })) => {
            (AssessmentStatus::UndefinedStats, None)
        }
        (None, Some(StatsEntry::Defined(_))) => (AssessmentStatus::MissingValue, None),
        (Some(v), Some(StatsEntry::Defined(s))) => match s.z_score(v) {
            Some(z) => (AssessmentStatus::Scored, Some(z)),
            None => (AssessmentStatus::ZeroVariance, None),
        },
    }
}

/// `100 / (1 + e^(-logit))`.
#[inline]
pub fn logistic_percent(logit: f64) -> f64 {
    100.0 / (1.0 + (-logit).exp())
}

/// Why a biomarker did or did not get a z-score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Scored,
    /// Every healthy value in the dataset is identical, so the z-score is undefined.
    ZeroVariance,
    /// The patient has no value for this biomarker.
    MissingValue,
    /// The dataset had no values for this biomarker in at least one class.
    UndefinedStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiomarkerDetail {
    pub display_name: &'static str,
    pub unit: &'static str,
    pub category: Category,
    pub value: Option<f64>,
    pub healthy_mean: Option<f64>,
    pub healthy_std: Option<f64>,
    pub disease_mean: Option<f64>,
    pub z_score: Option<f64>,
    pub interpretation: Option<String>,
    pub weight: Option<f64>,
    pub status: AssessmentStatus,
}

/// A weighted biomarker that could not contribute to the logit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    pub key: String,
    pub reason: AssessmentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Score {
    pub logit: f64,
    pub probability_percent: f64,
    pub details: BTreeMap<String, BiomarkerDetail>,
    pub excluded: Vec<Exclusion>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::catalog;
    use crate::stats::BiomarkerStats;
    use crate::types::PatientRecord;
    use approx::assert_abs_diff_eq;

    fn stats_with(entries: &[(&str, f64, f64)]) -> StatsTable {
        entries
            .iter()
            .map(|&(key, mean, std)| {
                (
                    key.to_string(),
                    StatsEntry::Defined(BiomarkerStats {
                        healthy_mean: mean,
                        healthy_std: std,
                        disease_mean: mean * 4.0,
                        healthy_n: 10,
                        disease_n: 10,
                    }),
                )
            })
            .collect()
    }

    #[test]
    fn default_model_is_valid() {
        let model = ModelSpec::default();
        model.validate(catalog()).unwrap();
        assert_eq!(model.weights.len(), 33);
        assert_eq!(model.weight("ab4240"), Some(-0.09));
    }

    #[test]
    fn interpretation_boundaries_follow_the_band_table() {
        let model = ModelSpec::default();
        let cases = [
            (0.0, "Within normal range"),
            (1.0, "Within normal range"),
            (-1.0, "Within normal range"),
            (1.5, "Mildly elevated"),
            (2.0, "Moderately elevated"),
            (2.999, "Moderately elevated"),
            (3.0, "Severely elevated"),
            (42.0, "Severely elevated"),
            (-1.5, "Mildly reduced"),
            (-2.0, "Moderately reduced"),
            (-2.5, "Moderately reduced"),
            (-3.0, "Severely reduced"),
            (-10.0, "Severely reduced"),
        ];
        for (z, expected) in cases {
            assert_eq!(model.interpret(z), Some(expected), "z = {z}");
        }
    }

    #[test]
    fn logistic_percent_matches_known_points() {
        assert_abs_diff_eq!(logistic_percent(0.0), 50.0, epsilon = 1e-12);
        assert_abs_diff_eq!(logistic_percent(-2.5), 7.585818002124355, epsilon = 1e-9);
    }

    #[test]
    fn patient_at_the_healthy_mean_scores_the_intercept() {
        let stats = stats_with(&[("ptau181", 20.0, 3.0), ("ab42", 850.0, 40.0)]);
        let mut patient = PatientRecord::new();
        patient.insert("ptau181", 20.0);
        patient.insert("ab42", 850.0);
        let model = ModelSpec::default();
        assert_eq!(model.logit(&patient, &stats), DEFAULT_INTERCEPT);
    }

    #[test]
    fn zero_variance_is_flagged_and_left_out_of_the_logit() {
        let stats = stats_with(&[("gfap", 80.0, 0.0), ("nfl", 450.0, 50.0)]);
        let mut patient = PatientRecord::new();
        patient.insert("gfap", 300.0);
        patient.insert("nfl", 550.0);

        let model = ModelSpec::default();
        let score = model.score(&patient, &stats, catalog());
        let gfap = &score.details["gfap"];
        assert_eq!(gfap.status, AssessmentStatus::ZeroVariance);
        assert_eq!(gfap.z_score, None);
        assert_eq!(gfap.interpretation, None);
        assert!(score.probability_percent.is_finite());
        assert_abs_diff_eq!(score.logit, DEFAULT_INTERCEPT + 0.05 * 2.0, epsilon = 1e-12);
        assert!(score.excluded.contains(&Exclusion {
            key: "gfap".to_string(),
            reason: AssessmentStatus::ZeroVariance
        }));
    }

    #[test]
    fn unweighted_biomarkers_still_get_a_detail_entry() {
        let stats = stats_with(&[("nfl", 450.0, 50.0)]);
        let mut patient = PatientRecord::new();
        patient.insert("nfl", 600.0);

        let mut model = ModelSpec::default();
        model.weights.remove("nfl");
        let score = model.score(&patient, &stats, catalog());
        let nfl = &score.details["nfl"];
        assert_eq!(nfl.weight, None);
        assert_eq!(nfl.status, AssessmentStatus::Scored);
        assert_abs_diff_eq!(nfl.z_score.unwrap(), 3.0, epsilon = 1e-12);
        assert_eq!(nfl.interpretation.as_deref(), Some("Severely elevated"));
        assert_eq!(score.logit, DEFAULT_INTERCEPT);
    }

    #[test]
    fn patient_score_and_dataset_scoring_share_one_logit() {
        use crate::data::generate_synthetic;
        use crate::stats::compute_stats;
        use rand::SeedableRng;
        use rand::rngs::StdRng;

        let mut rng = StdRng::seed_from_u64(31);
        let dataset = generate_synthetic(120, catalog(), &mut rng);
        let stats = compute_stats(&dataset, catalog()).unwrap();
        let model = ModelSpec::default();

        let patient: PatientRecord = catalog()
            .keys()
            .enumerate()
            .filter(|(i, _)| i % 4 != 0)
            .map(|(i, key)| {
                let mean = stats.defined(key).unwrap().healthy_mean;
                (key.to_string(), mean * (0.55 + 0.13 * i as f64))
            })
            .collect();

        let score = model.score(&patient, &stats, catalog());
        assert_eq!(score.logit, model.logit(&patient, &stats));
        assert_eq!(
            score.probability_percent,
            model.probability_percent(&patient, &stats)
        );
        for sample in dataset.samples().iter().take(10) {
            let sample_score = model.score(sample, &stats, catalog());
            assert_eq!(sample_score.logit, model.logit(sample, &stats));
        }
    }

    #[test]
    fn missing_patient_values_are_reported_as_missing() {
        let stats = stats_with(&[("il6", 2.0, 0.5)]);
        let score = ModelSpec::default().score(&PatientRecord::new(), &stats, catalog());
        assert_eq!(score.details.len(), 33);
        assert_eq!(score.details["il6"].status, AssessmentStatus::MissingValue);
        assert_eq!(score.details["gfap"].status, AssessmentStatus::UndefinedStats);
        assert_eq!(score.logit, DEFAULT_INTERCEPT);
    }

    #[test]
    fn validation_rejects_gaps_and_overlaps() {
        let cat = catalog();

        let mut gap = ModelSpec::default();
        gap.bands[3].upper_inclusive = false;
        assert!(matches!(
            gap.validate(cat),
            Err(ModelError::BandsNotContiguous { .. })
        ));

        let mut overlap = ModelSpec::default();
        overlap.bands[4].lower_inclusive = true;
        assert!(matches!(
            overlap.validate(cat),
            Err(ModelError::BandsNotContiguous { .. })
        ));

        let mut bounded = ModelSpec::default();
        bounded.bands.pop();
        assert!(matches!(
            bounded.validate(cat),
            Err(ModelError::BandsNotExhaustive)
        ));
    }

    #[test]
    fn validation_rejects_unknown_weights_and_bad_thresholds() {
        let cat = catalog();

        let mut unknown = ModelSpec::default();
        unknown.weights.insert("apoe4".to_string(), 0.1);
        assert!(matches!(
            unknown.validate(cat),
            Err(ModelError::UnknownWeightKey(key)) if key == "apoe4"
        ));

        let mut threshold = ModelSpec::default();
        threshold.decision_threshold = 100.0;
        assert!(matches!(
            threshold.validate(cat),
            Err(ModelError::ThresholdOutOfRange(_))
        ));
    }

    #[test]
    fn model_survives_a_toml_round_trip() {
        let model = ModelSpec::default();
        let text = toml::to_string_pretty(&model).unwrap();
        let back: ModelSpec = toml::from_str(&text).unwrap();
        assert_eq!(back, model);
    }
}
