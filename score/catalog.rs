//! # Biomarker Catalog
//!
//! The fixed reference table of every biomarker the engine knows about. Each entry
//! carries its display name, unit, sample category, and the healthy and disease
//! reference ranges. The ranges drive synthetic data generation; the display names
//! drive header matching for uploaded datasets.
//!
//! The table is process-wide, read-only data. `catalog()` builds the lookup indexes
//! once on first use and hands out a `'static` reference afterwards.

use crate::types::Label;
use ahash::AHashMap;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// The biological fluid or assay family a biomarker is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Category {
    #[serde(rename = "CSF")]
    Csf,
    Saliva,
    Tears,
    Urine,
    Blood,
    Molecular,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Csf,
        Category::Saliva,
        Category::Tears,
        Category::Urine,
        Category::Blood,
        Category::Molecular,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Csf => "CSF",
            Category::Saliva => "Saliva",
            Category::Tears => "Tears",
            Category::Urine => "Urine",
            Category::Blood => "Blood",
            Category::Molecular => "Molecular",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A closed reference interval `[low, high]` in the biomarker's own unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Range {
    pub low: f64,
    pub high: f64,
}

impl Range {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    #[inline]
    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_well_formed(&self) -> bool {
        self.low.is_finite() && self.high.is_finite() && self.low < self.high
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BiomarkerDefinition {
    pub key: &'static str,
    pub display_name: &'static str,
    pub unit: &'static str,
    pub category: Category,
    pub healthy_range: Range,
    pub disease_range: Range,
}

impl BiomarkerDefinition {
    /// The reference range that synthetic samples of the given class are drawn around.
    pub fn range_for(&self, label: Label) -> Range {
        match label {
            Label::Healthy => self.healthy_range,
            Label::Disease => self.disease_range,
        }
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(self.display_name)
    }
}

/// Lowercases `raw` and keeps only ASCII letters and digits.
///
/// `"p-tau 181"` and `"P-Tau181"` both become `"ptau181"`. Non-ASCII letters such as
/// the Greek beta in `"Aβ42"` are dropped along with punctuation and whitespace.
pub fn normalize_name(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

macro_rules! biomarker {
    ($key:literal, $name:literal, $unit:literal, $category:ident, [$hl:expr, $hh:expr], [$dl:expr, $dh:expr]) => {
        BiomarkerDefinition {
            key: $key,
            display_name: $name,
            unit: $unit,
            category: Category::$category,
            healthy_range: Range::new($hl, $hh),
            disease_range: Range::new($dl, $dh),
        }
    };
}

static DEFINITIONS: [BiomarkerDefinition; 33] = [
    // CSF
    biomarker!("ptau181", "p-tau 181", "pg/mL", Csf, [15.0, 25.0], [60.0, 120.0]),
    biomarker!("ptau231", "p-tau 231", "pg/mL", Csf, [8.0, 15.0], [40.0, 80.0]),
    biomarker!("ptau217", "p-tau 217", "pg/mL", Csf, [0.4, 0.8], [2.0, 4.0]),
    biomarker!("ab4240", "Aβ42/40 ratio", "ratio", Csf, [0.08, 0.12], [0.03, 0.05]),
    biomarker!("ttau", "T-tau", "pg/mL", Csf, [200.0, 350.0], [500.0, 800.0]),
    biomarker!("ab42", "Aβ42", "pg/mL", Csf, [700.0, 1000.0], [300.0, 500.0]),
    biomarker!("nfl", "NFL", "pg/mL", Csf, [300.0, 600.0], [1000.0, 2000.0]),
    biomarker!("ykl40", "YKL-40", "ng/mL", Csf, [100.0, 150.0], [200.0, 350.0]),
    // Saliva
    biomarker!("lactoferrin", "Lactoferrin", "μg/mL", Saliva, [10.0, 20.0], [30.0, 45.0]),
    biomarker!("ache", "AChE", "U/mL", Saliva, [0.5, 1.5], [2.5, 4.5]),
    biomarker!("pche", "PChE", "U/mL", Saliva, [1.0, 2.5], [4.0, 7.0]),
    // Tears
    biomarker!("serpina3", "SERPINA3", "ng/mL", Tears, [2.0, 3.5], [5.0, 7.5]),
    // Urine
    biomarker!("formic", "Formic acid", "μmol/L", Urine, [3.0, 8.0], [10.0, 16.0]),
    biomarker!("ad7cntp", "AD7c-NTP", "U/mL", Urine, [0.5, 1.5], [3.0, 6.0]),
    // Blood
    biomarker!("gfap", "GFAP", "pg/mL", Blood, [50.0, 120.0], [200.0, 400.0]),
    biomarker!("uchl1", "UCHL1", "ng/mL", Blood, [10.0, 25.0], [40.0, 80.0]),
    biomarker!("strem2", "sTREM2", "ng/mL", Blood, [2.0, 5.0], [8.0, 15.0]),
    biomarker!("apod", "Apolipoprotein D", "mg/dL", Blood, [5.0, 10.0], [15.0, 25.0]),
    biomarker!("asynuclein", "α-synuclein", "ng/mL", Blood, [0.5, 1.5], [2.5, 4.5]),
    biomarker!("il1", "IL-1", "pg/mL", Blood, [0.5, 2.0], [4.0, 8.0]),
    biomarker!("il6", "IL-6", "pg/mL", Blood, [1.0, 3.0], [6.0, 12.0]),
    biomarker!("tnfa", "TNF-α", "pg/mL", Blood, [1.5, 4.0], [8.0, 15.0]),
    biomarker!("ceramide", "Ceramide", "μmol/L", Blood, [2.0, 4.0], [6.0, 10.0]),
    biomarker!("dha", "DHA", "% of FA", Blood, [4.0, 7.0], [1.5, 3.0]),
    biomarker!("linolenic", "Linolenic Acid", "% of FA", Blood, [0.5, 1.5], [0.2, 0.6]),
    biomarker!("cholesterol", "Cholesterol", "mg/dL", Blood, [150.0, 200.0], [220.0, 280.0]),
    biomarker!("apoc3", "APOC3", "mg/dL", Blood, [8.0, 15.0], [18.0, 28.0]),
    biomarker!("substancep", "Substance P", "pg/mL", Blood, [50.0, 100.0], [150.0, 250.0]),
    // Molecular
    biomarker!("mir545", "miR-545-3p", "fold change", Molecular, [0.8, 1.2], [2.0, 4.0]),
    biomarker!("mir7g", "miR-7g-5p", "fold change", Molecular, [0.8, 1.2], [0.3, 0.6]),
    biomarker!("mir15b", "miR-15b-5p", "fold change", Molecular, [0.8, 1.2], [2.5, 4.5]),
    biomarker!("neurograin", "Neurograin", "ng/mL", Molecular, [5.0, 12.0], [20.0, 35.0]),
    biomarker!("evproteins", "EV proteins", "AU", Molecular, [100.0, 200.0], [350.0, 550.0]),
];

/// Keyed, ordered view over the static biomarker table.
#[derive(Debug)]
pub struct Catalog {
    definitions: &'static [BiomarkerDefinition],
    by_key: AHashMap<&'static str, usize>,
    by_normalized_name: AHashMap<String, usize>,
}

/// The process-wide catalog.
pub fn catalog() -> &'static Catalog {
    static CATALOG: OnceLock<Catalog> = OnceLock::new();
    CATALOG.get_or_init(|| Catalog::from_definitions(&DEFINITIONS))
}

impl Catalog {
    fn from_definitions(definitions: &'static [BiomarkerDefinition]) -> Self {
        let mut by_key = AHashMap::with_capacity(definitions.len());
        let mut by_normalized_name = AHashMap::with_capacity(definitions.len());
        for (idx, def) in definitions.iter().enumerate() {
            by_key.insert(def.key, idx);
            // First entry wins if two display names collapse to the same form.
            by_normalized_name.entry(def.normalized_name()).or_insert(idx);
        }
        Self {
            definitions,
            by_key,
            by_normalized_name,
        }
    }

    /// All definitions in catalog order.
    pub fn definitions(&self) -> &'static [BiomarkerDefinition] {
        self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&'static BiomarkerDefinition> {
        let definitions = self.definitions;
        self.by_key.get(key).map(|&idx| &definitions[idx])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.definitions.iter().map(|def| def.key)
    }

    /// Resolves an uploaded column header to a biomarker by exact equality of the
    /// normalized header and the normalized display name.
    pub fn match_header(&self, header: &str) -> Option<&'static BiomarkerDefinition> {
        let definitions = self.definitions;
        self.by_normalized_name
            .get(&normalize_name(header))
            .map(|&idx| &definitions[idx])
    }

    /// Definitions grouped per category. Categories appear in `Category::ALL` order and
    /// members keep their catalog order; empty categories are omitted.
    pub fn by_category(&self) -> Vec<(Category, Vec<&'static BiomarkerDefinition>)> {
        Category::ALL
            .iter()
            .filter_map(|&category| {
                let members: Vec<_> = self
                    .definitions
                    .iter()
                    .filter(|def| def.category == category)
                    .collect();
                (!members.is_empty()).then_some((category, members))
            })
            .collect()
    }
}
