// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use crate::catalog::Catalog;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Binary class of a sample: 0 is healthy, 1 is disease-positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Label {
    Healthy = 0,
    Disease = 1,
}

impl Label {
    #[inline]
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Label::Healthy),
            1 => Some(Label::Disease),
            _ => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Healthy => f.write_str("healthy"),
            Label::Disease => f.write_str("disease"),
        }
    }
}

impl From<Label> for u8 {
    fn from(label: Label) -> Self {
        label.code()
    }
}

impl TryFrom<u8> for Label {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Label::from_code(i64::from(code)).ok_or_else(|| format!("label must be 0 or 1, got {code}"))
    }
}

/// Anything that can hand out a measured value per biomarker key.
///
/// Patients and dataset samples are scored through the same code path, so both
/// implement this. `None` means the value was not measured.
pub trait Measurements {
    fn value(&self, key: &str) -> Option<f64>;
}

/// One labeled row of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub label: Label,
    pub values: BTreeMap<String, f64>,
}

impl Sample {
    pub fn new(label: Label) -> Self {
        Self {
            label,
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    pub fn with_value(mut self, key: impl Into<String>, value: f64) -> Self {
        self.insert(key, value);
        self
    }
}

impl Measurements for Sample {
    fn value(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

/// Where a dataset came from. Switching between the two is always an explicit caller
/// decision; the engine never substitutes one for the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSource {
    Synthetic,
    Uploaded,
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSource::Synthetic => f.write_str("synthetic"),
            DatasetSource::Uploaded => f.write_str("uploaded"),
        }
    }
}

/// An ordered collection of labeled samples.
#[derive(Debug, Clone)]
pub struct Dataset {
    source: DatasetSource,
    samples: Vec<Sample>,
}

impl Dataset {
    pub fn new(source: DatasetSource, samples: Vec<Sample>) -> Self {
        Self { source, samples }
    }

    pub fn source(&self) -> DatasetSource {
        self.source
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn count(&self, label: Label) -> usize {
        self.samples.iter().filter(|s| s.label == label).count()
    }

    pub fn summary(&self) -> DatasetSummary {
        let healthy = self.count(Label::Healthy);
        DatasetSummary {
            source: self.source,
            total: self.samples.len(),
            healthy,
            disease: self.samples.len() - healthy,
        }
    }
}

/// Class balance of a dataset, reported alongside every prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub source: DatasetSource,
    pub total: usize,
    pub healthy: usize,
    pub disease: usize,
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} samples ({} healthy, {} disease)",
            self.total, self.source, self.healthy, self.disease
        )
    }
}

/// The measurements of the single patient being scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientRecord(BTreeMap<String, f64>);

impl PatientRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// A patient sitting at the midpoint of every healthy reference range.
    pub fn healthy_baseline(catalog: &Catalog) -> Self {
        catalog
            .definitions()
            .iter()
            .map(|def| (def.key.to_string(), def.healthy_range.midpoint()))
            .collect()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(key, &value)| (key.as_str(), value))
    }
}

impl FromIterator<(String, f64)> for PatientRecord {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Measurements for PatientRecord {
    fn value(&self, key: &str) -> Option<f64> {
        self.get(key)
    }
}
