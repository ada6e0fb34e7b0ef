//! # Dataset Provider
//!
//! This module is the exclusive entry point for labeled data. It either synthesizes
//! a dataset from the catalog's reference ranges or turns user-uploaded tabular rows
//! into a clean, label-filtered `Dataset` for the statistical core.
//!
//! - Lenient Schema: Column headers are matched to biomarkers by their normalized
//!   display name. Columns that match nothing are dropped without complaint.
//! - Strict Labels: Only rows whose label coerces to exactly 0 or 1 survive.
//! - User-Centric Errors: Failures are assumed to be user-input errors. The
//!   `DataError` enum is designed to provide clear, actionable feedback, and every
//!   failure surfaces before any statistics are computed.

use crate::catalog::{BiomarkerDefinition, Catalog};
use crate::types::{Dataset, DatasetSource, Label, PatientRecord, Sample};
use log::{debug, info, warn};
use rand::Rng;
use rand::distributions::{Distribution, Uniform};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

/// One parsed row of an uploaded table, keyed by the raw column header.
pub type UploadRow = BTreeMap<String, String>;

/// Case-insensitive header names that carry the class label.
pub const LABEL_ALIASES: [&str; 2] = ["label", "diagnosis"];

/// Total noise span as a fraction of the reference range width. Noise is uniform in
/// `[-NOISE_FRACTION / 2, NOISE_FRACTION / 2) * width` around the range midpoint.
pub const NOISE_FRACTION: f64 = 0.3;

/// Sample count used when the caller asks for synthetic data without a size.
pub const DEFAULT_SYNTHETIC_SAMPLES: usize = 200;

/// Header written for the label column when a dataset is exported.
const LABEL_HEADER: &str = "label";

/// A comprehensive error type for all dataset construction failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error(
        "The dataset has no 'label' or 'diagnosis' column. Add one with 0 for healthy and 1 for disease-positive samples."
    )]
    NoLabelColumn,
    #[error(
        "No valid data rows were found ({dropped} row(s) discarded). Ensure the label column holds the values 0 or 1."
    )]
    NoValidRows { dropped: usize },
    #[error("The uploaded file could not be read as a table: {0}")]
    UnparsableFile(csv::Error),
    #[error("Failed to write the dataset as CSV: {0}")]
    ExportFailed(csv::Error),
    #[error("Patient file '{path}' could not be parsed: {reason}")]
    UnparsablePatient { path: String, reason: String },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// ========================================================================================
//                                 Synthetic generation
// ========================================================================================

/// Generates `count` labeled samples from the catalog's reference ranges.
///
/// The first `count / 2` samples (integer division) are healthy and the rest are
/// disease-positive, so an odd count gives the extra sample to the disease class.
/// Every value is the midpoint of the class's reference range plus uniform noise
/// spanning `NOISE_FRACTION` of the range width, clamped at zero.
///
/// Output is only reproducible if the caller supplies a seeded `rng`.
pub fn generate_synthetic<R: Rng + ?Sized>(count: usize, catalog: &Catalog, rng: &mut R) -> Dataset {
    let unit_noise = Uniform::new(-0.5, 0.5);
    let split = count / 2;

    let samples: Vec<Sample> = (0..count)
        .map(|i| {
            let label = if i >= split {
                Label::Disease
            } else {
                Label::Healthy
            };
            let mut sample = Sample::new(label);
            for def in catalog.definitions() {
                let range = def.range_for(label);
                let noise = unit_noise.sample(rng) * range.width() * NOISE_FRACTION;
                sample.insert(def.key, (range.midpoint() + noise).max(0.0));
            }
            sample
        })
        .collect();

    debug!(
        "Generated {} synthetic samples ({} healthy, {} disease)",
        count,
        split,
        count - split
    );
    Dataset::new(DatasetSource::Synthetic, samples)
}

// ========================================================================================
//                                   Uploaded datasets
// ========================================================================================

/// A parsed upload: the column headers in file order, and the data rows keyed by
/// header. The headers survive even when there are no data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadTable {
    pub headers: Vec<String>,
    pub rows: Vec<UploadRow>,
}

impl UploadTable {
    /// Builds a table from rows alone; the headers are the union of the row keys in
    /// sorted order.
    pub fn from_rows(rows: Vec<UploadRow>) -> Self {
        let headers: BTreeSet<&str> = rows
            .iter()
            .flat_map(|row| row.keys().map(String::as_str))
            .collect();
        Self {
            headers: headers.into_iter().map(str::to_string).collect(),
            rows,
        }
    }
}

/// Turns a parsed upload into a dataset.
///
/// 1. A label column is located among `LABEL_ALIASES` (trimmed, case-insensitive);
///    none yields `DataError::NoLabelColumn`, even for a table without data rows.
/// 2. Every other header is matched to a biomarker by normalized display name;
///    unmatched headers are dropped.
/// 3. Labels are coerced to integers and rows whose label is not exactly 0 or 1 are
///    discarded. Biomarker cells without a leading number count as missing.
/// 4. If nothing survives, `DataError::NoValidRows` is returned.
pub fn accept_uploaded(table: &UploadTable, catalog: &Catalog) -> Result<Dataset, DataError> {
    let label_headers: Vec<&str> = table
        .headers
        .iter()
        .map(String::as_str)
        .filter(|header| is_label_header(header))
        .collect();
    if label_headers.is_empty() {
        return Err(DataError::NoLabelColumn);
    }
    if table.rows.is_empty() {
        return Err(DataError::NoValidRows { dropped: 0 });
    }

    let column_map = map_biomarker_columns(&table.headers, catalog);
    info!(
        "Matched {} of {} upload column(s) to biomarkers",
        column_map.len(),
        table.headers.len() - label_headers.len()
    );

    let mut samples = Vec::with_capacity(table.rows.len());
    let mut dropped = 0usize;
    for row in &table.rows {
        let label = label_headers
            .iter()
            .filter_map(|header| row.get(*header))
            .find_map(|raw| coerce_label(raw))
            .and_then(Label::from_code);

        let Some(label) = label else {
            dropped += 1;
            continue;
        };

        let mut sample = Sample::new(label);
        for (header, def) in &column_map {
            if let Some(value) = row.get(*header).and_then(|raw| parse_value(raw)) {
                sample.insert(def.key, value);
            }
        }
        samples.push(sample);
    }

    if samples.is_empty() {
        return Err(DataError::NoValidRows { dropped });
    }
    if dropped > 0 {
        warn!("Discarded {dropped} upload row(s) whose label was not 0 or 1");
    }

    let dataset = Dataset::new(DatasetSource::Uploaded, samples);
    info!("Successfully loaded {}", dataset.summary());
    Ok(dataset)
}

/// Parses headered CSV text into an upload table. Cells are trimmed, ragged rows are
/// tolerated (missing trailing cells are simply absent), and blank lines are skipped.
/// Empty and repeated headers are ignored.
pub fn read_upload_csv<R: Read>(reader: R) -> Result<UploadTable, DataError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let raw_headers = csv_reader
        .headers()
        .map_err(DataError::UnparsableFile)?
        .clone();

    let mut seen = BTreeSet::new();
    let columns: Vec<Option<&str>> = raw_headers
        .iter()
        .map(|header| (!header.is_empty() && seen.insert(header)).then_some(header))
        .collect();

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(DataError::UnparsableFile)?;
        let row: UploadRow = columns
            .iter()
            .zip(record.iter())
            .filter_map(|(header, cell)| header.map(|h| (h.to_string(), cell.to_string())))
            .collect();
        rows.push(row);
    }

    let headers: Vec<String> = columns.iter().flatten().map(|h| h.to_string()).collect();
    debug!("Parsed {} CSV row(s) with {} column(s)", rows.len(), headers.len());
    Ok(UploadTable { headers, rows })
}

/// Reads a CSV file from disk and turns it into a dataset in one step.
pub fn load_upload(path: &Path, catalog: &Catalog) -> Result<Dataset, DataError> {
    info!("Loading uploaded dataset from '{}'", path.display());
    let table = read_upload_csv(File::open(path)?)?;
    accept_uploaded(&table, catalog)
}

/// Writes a dataset as CSV with display names as headers and a trailing `label`
/// column. The output re-imports through `read_upload_csv` + `accept_uploaded`.
pub fn write_dataset_csv<W: Write>(
    dataset: &Dataset,
    catalog: &Catalog,
    writer: W,
) -> Result<(), DataError> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header: Vec<&str> = catalog
        .definitions()
        .iter()
        .map(|def| def.display_name)
        .collect();
    header.push(LABEL_HEADER);
    csv_writer
        .write_record(&header)
        .map_err(DataError::ExportFailed)?;

    for sample in dataset.samples() {
        let mut record: Vec<String> = catalog
            .definitions()
            .iter()
            .map(|def| {
                sample
                    .values
                    .get(def.key)
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            })
            .collect();
        record.push(sample.label.code().to_string());
        csv_writer
            .write_record(&record)
            .map_err(DataError::ExportFailed)?;
    }

    csv_writer.flush()?;
    Ok(())
}

// ========================================================================================
//                                   Patient records
// ========================================================================================

/// Accepts either a bare `{ key: value }` map or the `{ "patientData": { ... } }`
/// envelope used by browser clients.
#[derive(Deserialize)]
#[serde(untagged)]
enum PatientFile {
    Envelope {
        #[serde(alias = "patientData")]
        patient_data: PatientRecord,
    },
    Bare(PatientRecord),
}

impl PatientFile {
    fn into_record(self) -> PatientRecord {
        match self {
            PatientFile::Envelope { patient_data } => patient_data,
            PatientFile::Bare(record) => record,
        }
    }
}

/// Loads a patient record from a `.toml` file, or from JSON for any other extension.
pub fn load_patient_record(path: &Path) -> Result<PatientRecord, DataError> {
    let text = fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let parsed: Result<PatientFile, String> = if is_toml {
        toml::from_str(&text).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&text).map_err(|e| e.to_string())
    };

    parsed
        .map(PatientFile::into_record)
        .map_err(|reason| DataError::UnparsablePatient {
            path: path.display().to_string(),
            reason,
        })
}

// ========================================================================================
//                                    Internal helpers
// ========================================================================================

fn is_label_header(header: &str) -> bool {
    let trimmed = header.trim();
    LABEL_ALIASES
        .iter()
        .any(|alias| trimmed.eq_ignore_ascii_case(alias))
}

/// Maps each non-label header to the biomarker it names. When two headers resolve to
/// the same biomarker the first one in column order is kept.
fn map_biomarker_columns<'h>(
    headers: &'h [String],
    catalog: &Catalog,
) -> Vec<(&'h str, &'static BiomarkerDefinition)> {
    let mut claimed: BTreeSet<&'static str> = BTreeSet::new();
    let mut mapped = Vec::new();
    for header in headers.iter().map(String::as_str) {
        if is_label_header(header) {
            continue;
        }
        match catalog.match_header(header) {
            Some(def) if claimed.insert(def.key) => mapped.push((header, def)),
            Some(def) => warn!(
                "Column '{header}' also matches biomarker '{}'; keeping the earlier column",
                def.key
            ),
            None => debug!("Dropping unrecognised column '{header}'"),
        }
    }
    mapped
}

/// Integer coercion of a label cell: the leading optionally-signed run of digits is
/// taken, so `"1"`, `" 1 "`, `"1.0"` and `"1abc"` all read as 1. Cells without a leading
/// integer are `None`.
fn coerce_label(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let digits_start = usize::from(trimmed.starts_with(['+', '-']));
    let digits_len = trimmed[digits_start..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits_len == 0 {
        return None;
    }
    trimmed[..digits_start + digits_len].parse().ok()
}

/// Numeric coercion of a biomarker cell: the longest leading decimal number is taken,
/// so `"12 pg/mL"` reads as 12 and `"1.5e2x"` as 150. Cells without a leading number
/// are `None`.
fn parse_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let bytes = trimmed.as_bytes();
    let digits_from = |start: usize| {
        bytes[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let mut end = usize::from(bytes.first().is_some_and(|b| *b == b'+' || *b == b'-'));
    let integer_digits = digits_from(end);
    end += integer_digits;
    let mut fraction_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        fraction_digits = digits_from(end + 1);
        end += 1 + fraction_digits;
    }
    if integer_digits + fraction_digits == 0 {
        return None;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exponent_digits = digits_from(end + 1 + sign);
        if exponent_digits > 0 {
            end += 1 + sign + exponent_digits;
        }
    }

    trimmed[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}
