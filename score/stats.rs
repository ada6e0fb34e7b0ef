//! Per-biomarker descriptive statistics over a labeled dataset.
//!
//! For every catalog biomarker the dataset is split by label; the healthy class gets
//! a mean and a population standard deviation (divisor `n`), the disease class a
//! mean. Missing values are left out of every aggregate. A biomarker with no values
//! in one of the classes gets an `Undefined` entry instead of a NaN.

use crate::catalog::Catalog;
use crate::types::{Dataset, Label, Measurements, Sample};
use log::{debug, warn};
use ndarray::Array1;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    #[error(
        "The dataset contains no {missing} samples (label {}). Statistics need at least one sample of each class; please check the label column.",
        .missing.code()
    )]
    DegenerateClass { missing: Label },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BiomarkerStats {
    pub healthy_mean: f64,
    pub healthy_std: f64,
    pub disease_mean: f64,
    pub healthy_n: usize,
    pub disease_n: usize,
}

impl BiomarkerStats {
    /// False when every healthy value is identical, which leaves z-scores undefined.
    #[inline]
    pub fn has_variance(&self) -> bool {
        self.healthy_std > 0.0
    }

    /// Standard score of `value` against the healthy class, or `None` when the
    /// healthy class has zero variance.
    #[inline]
    pub fn z_score(&self, value: f64) -> Option<f64> {
        self.has_variance()
            .then(|| (value - self.healthy_mean) / self.healthy_std)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatsEntry {
    Defined(BiomarkerStats),
    /// At least one class had no measured values for this biomarker.
    Undefined { healthy_n: usize, disease_n: usize },
}

/// Statistics for every catalog biomarker, keyed by biomarker key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StatsTable {
    entries: BTreeMap<String, StatsEntry>,
}

impl StatsTable {
    pub fn get(&self, key: &str) -> Option<&StatsEntry> {
        self.entries.get(key)
    }

    /// The stats for `key` if both classes had values for it.
    pub fn defined(&self, key: &str) -> Option<&BiomarkerStats> {
        match self.entries.get(key) {
            Some(StatsEntry::Defined(stats)) => Some(stats),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StatsEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn undefined_keys(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, entry)| matches!(entry, StatsEntry::Undefined { .. }))
            .map(|(key, _)| key)
            .collect()
    }

    pub fn zero_variance_keys(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, entry)| matches!(entry, StatsEntry::Defined(s) if !s.has_variance()))
            .map(|(key, _)| key)
            .collect()
    }
}

impl FromIterator<(String, StatsEntry)> for StatsTable {
    fn from_iter<I: IntoIterator<Item = (String, StatsEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Computes the statistics table for `dataset`.
///
/// Fails with `StatsError::DegenerateClass` when one of the two classes is entirely
/// absent, since no biomarker could have defined statistics in that case.
pub fn compute_stats(dataset: &Dataset, catalog: &Catalog) -> Result<StatsTable, StatsError> {
    let (healthy, disease): (Vec<&Sample>, Vec<&Sample>) = dataset
        .samples()
        .iter()
        .partition(|sample| sample.label == Label::Healthy);

    if healthy.is_empty() {
        return Err(StatsError::DegenerateClass {
            missing: Label::Healthy,
        });
    }
    if disease.is_empty() {
        return Err(StatsError::DegenerateClass {
            missing: Label::Disease,
        });
    }

    let table: StatsTable = catalog
        .definitions()
        .iter()
        .map(|def| {
            let healthy_values = column(&healthy, def.key);
            let disease_values = column(&disease, def.key);
            let entry = match (healthy_values.mean(), disease_values.mean()) {
                (Some(healthy_mean), Some(disease_mean)) => StatsEntry::Defined(BiomarkerStats {
                    healthy_mean,
                    healthy_std: healthy_values.std(0.0),
                    disease_mean,
                    healthy_n: healthy_values.len(),
                    disease_n: disease_values.len(),
                }),
                _ => {
                    warn!(
                        "Biomarker '{}' has {} healthy and {} disease values; its statistics are undefined",
                        def.key,
                        healthy_values.len(),
                        disease_values.len()
                    );
                    StatsEntry::Undefined {
                        healthy_n: healthy_values.len(),
                        disease_n: disease_values.len(),
                    }
                }
            };
            (def.key.to_string(), entry)
        })
        .collect();

    debug!(
        "Computed statistics for {} biomarkers over {} healthy and {} disease samples",
        table.len(),
        healthy.len(),
        disease.len()
    );
    Ok(table)
}

fn column(samples: &[&Sample], key: &str) -> Array1<f64> {
    samples
        .iter()
        .filter_map(|sample| sample.value(key))
        .filter(|v| v.is_finite())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::catalog;
    use crate::types::DatasetSource;
    use approx::assert_abs_diff_eq;

    fn dataset(samples: Vec<Sample>) -> Dataset {
        Dataset::new(DatasetSource::Uploaded, samples)
    }

    #[test]
    fn population_std_divides_by_n() {
        let ds = dataset(vec![
            Sample::new(Label::Healthy).with_value("gfap", 2.0),
            Sample::new(Label::Healthy).with_value("gfap", 4.0),
            Sample::new(Label::Healthy).with_value("gfap", 4.0),
            Sample::new(Label::Healthy).with_value("gfap", 4.0),
            Sample::new(Label::Healthy).with_value("gfap", 5.0),
            Sample::new(Label::Healthy).with_value("gfap", 5.0),
            Sample::new(Label::Healthy).with_value("gfap", 7.0),
            Sample::new(Label::Healthy).with_value("gfap", 9.0),
            Sample::new(Label::Disease).with_value("gfap", 300.0),
            Sample::new(Label::Disease).with_value("gfap", 100.0),
        ]);
        let table = compute_stats(&ds, catalog()).unwrap();
        let gfap = table.defined("gfap").unwrap();
        assert_abs_diff_eq!(gfap.healthy_mean, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(gfap.healthy_std, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(gfap.disease_mean, 200.0, epsilon = 1e-12);
        assert_eq!(gfap.healthy_n, 8);
        assert_eq!(gfap.disease_n, 2);
    }

    #[test]
    fn identical_healthy_values_give_zero_std() {
        let ds = dataset(vec![
            Sample::new(Label::Healthy).with_value("nfl", 450.0),
            Sample::new(Label::Healthy).with_value("nfl", 450.0),
            Sample::new(Label::Disease).with_value("nfl", 1500.0),
        ]);
        let table = compute_stats(&ds, catalog()).unwrap();
        let nfl = table.defined("nfl").unwrap();
        assert_eq!(nfl.healthy_std, 0.0);
        assert!(!nfl.has_variance());
        assert_eq!(nfl.z_score(1000.0), None);
        assert_eq!(table.zero_variance_keys(), vec!["nfl"]);
    }

    #[test]
    fn missing_values_are_excluded_not_counted() {
        let ds = dataset(vec![
            Sample::new(Label::Healthy).with_value("il6", 1.0),
            Sample::new(Label::Healthy),
            Sample::new(Label::Healthy).with_value("il6", 3.0),
            Sample::new(Label::Disease).with_value("il6", 9.0),
        ]);
        let table = compute_stats(&ds, catalog()).unwrap();
        let il6 = table.defined("il6").unwrap();
        assert_eq!(il6.healthy_n, 2);
        assert_abs_diff_eq!(il6.healthy_mean, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(il6.healthy_std, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn biomarker_missing_from_one_class_is_undefined() {
        let ds = dataset(vec![
            Sample::new(Label::Healthy).with_value("dha", 5.0),
            Sample::new(Label::Disease).with_value("gfap", 300.0),
        ]);
        let table = compute_stats(&ds, catalog()).unwrap();
        assert_eq!(table.len(), 33);
        assert_eq!(
            table.get("dha"),
            Some(&StatsEntry::Undefined {
                healthy_n: 1,
                disease_n: 0
            })
        );
        assert!(table.defined("gfap").is_none());
        assert_eq!(table.undefined_keys().len(), 33);
    }

    #[test]
    fn one_class_datasets_are_degenerate() {
        let only_healthy = dataset(vec![Sample::new(Label::Healthy).with_value("nfl", 1.0)]);
        assert_eq!(
            compute_stats(&only_healthy, catalog()),
            Err(StatsError::DegenerateClass {
                missing: Label::Disease
            })
        );

        let only_disease = dataset(vec![Sample::new(Label::Disease).with_value("nfl", 1.0)]);
        let err = compute_stats(&only_disease, catalog()).unwrap_err();
        assert_eq!(
            err,
            StatsError::DegenerateClass {
                missing: Label::Healthy
            }
        );
        assert!(err.to_string().contains("no healthy samples (label 0)"));
    }
}
