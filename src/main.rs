// ========================================================================================
//
//                      THE ORCHESTRATOR: NEURORISK
//
// ========================================================================================
//
// This binary is a thin conductor over the `neurorisk` library. It parses arguments,
// loads the patient, the optional upload and the optional model file, hands them to
// the engine, and writes the result. All scoring semantics live in the library.
//
// Progress lines for the user go to stderr prefixed with `> `; the JSON result goes to
// stdout unless `--output` is given, so the output can be piped.

use clap::{Parser, Subcommand, ValueEnum};
use itertools::Itertools;
use neurorisk::catalog::{Catalog, catalog};
use neurorisk::data::{self, DEFAULT_SYNTHETIC_SAMPLES};
use neurorisk::evaluate::RocAucMode;
use neurorisk::model::ModelSpec;
use neurorisk::pipeline::{self, EngineConfig, TrainingSource};
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Clone, Copy, ValueEnum)]
enum RocAucCli {
    Computed,
    Placeholder,
}

impl From<RocAucCli> for RocAucMode {
    fn from(value: RocAucCli) -> Self {
        match value {
            RocAucCli::Computed => RocAucMode::Computed,
            RocAucCli::Placeholder => RocAucMode::Placeholder,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "neurorisk",
    version,
    about = "Biomarker-based Alzheimer's disease risk scoring",
    long_about = "Scores a patient's biomarker panel with a fixed-coefficient logistic model, \
                 using statistics from a synthetic or uploaded reference dataset."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one patient
    #[command(about = "Score a patient (outputs: JSON prediction)")]
    Predict {
        /// Patient file (.json or .toml) mapping biomarker keys to values
        #[arg(value_name = "PATIENT_PATH")]
        patient: PathBuf,

        /// Labeled CSV dataset to compute statistics from; synthetic data is used if omitted
        #[arg(long, value_name = "CSV")]
        dataset: Option<PathBuf>,

        /// Number of synthetic samples when no dataset is given
        #[arg(long, value_name = "N", default_value_t = DEFAULT_SYNTHETIC_SAMPLES)]
        samples: usize,

        /// Seed for synthetic generation; runs are not reproducible without it
        #[arg(long)]
        seed: Option<u64>,

        /// Scoring model file (.toml); the built-in model is used if omitted
        #[arg(long, value_name = "TOML")]
        model: Option<PathBuf>,

        /// Fail instead of flagging when a weighted biomarker has zero healthy variance
        #[arg(long)]
        strict_variance: bool,

        /// How the ROC-AUC figure is produced
        #[arg(long, value_enum, default_value_t = RocAucCli::Computed)]
        roc_auc: RocAucCli,

        /// Write the JSON result here instead of stdout
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Write a synthetic reference dataset as CSV
    #[command(about = "Generate a synthetic dataset (outputs: CSV)")]
    Synthesize {
        #[arg(long, value_name = "CSV")]
        out: PathBuf,

        #[arg(long, value_name = "N", default_value_t = DEFAULT_SYNTHETIC_SAMPLES)]
        samples: usize,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// List the biomarker catalog
    #[command(about = "List all biomarkers grouped by category")]
    Catalog,

    /// Write the built-in scoring model so it can be edited
    #[command(about = "Export the default scoring model (outputs: model.toml)")]
    ExportModel {
        #[arg(long, value_name = "TOML")]
        out: PathBuf,
    },
}

// ========================================================================================
//                           THE MAIN ORCHESTRATION LOGIC
// ========================================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let catalog = catalog();

    let result = match cli.command {
        Commands::Predict {
            patient,
            dataset,
            samples,
            seed,
            model,
            strict_variance,
            roc_auc,
            output,
        } => {
            let config = EngineConfig {
                synthetic_samples: samples,
                seed,
                strict_variance,
                roc_auc: roc_auc.into(),
            };
            predict_command(
                &patient,
                dataset.as_deref(),
                model.as_deref(),
                &config,
                output.as_deref(),
                catalog,
            )
        }
        Commands::Synthesize { out, samples, seed } => {
            synthesize_command(&out, samples, seed, catalog)
        }
        Commands::Catalog => catalog_command(catalog),
        Commands::ExportModel { out } => export_model_command(&out),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn predict_command(
    patient_path: &Path,
    dataset_path: Option<&Path>,
    model_path: Option<&Path>,
    config: &EngineConfig,
    output: Option<&Path>,
    catalog: &Catalog,
) -> Result<(), Box<dyn Error>> {
    eprintln!("> Loading patient from: {}", patient_path.display());
    let patient = data::load_patient_record(patient_path)?;

    let model = match model_path {
        Some(path) => {
            eprintln!("> Loading model from: {}", path.display());
            ModelSpec::load(path, catalog)?
        }
        None => ModelSpec::default(),
    };

    let source = match dataset_path {
        Some(path) => {
            eprintln!("> Loading dataset from: {}", path.display());
            let dataset = data::load_upload(path, catalog)?;
            eprintln!("> Successfully loaded {}", dataset.summary());
            TrainingSource::Uploaded(dataset)
        }
        None => {
            eprintln!(
                "> Generating {} synthetic samples{}",
                config.synthetic_samples,
                config
                    .seed
                    .map(|s| format!(" (seed {s})"))
                    .unwrap_or_default()
            );
            TrainingSource::Synthetic
        }
    };

    let result = pipeline::predict(&patient, &source, &model, config, catalog)?;
    eprintln!(
        "> Disease probability: {:.1}% ({})",
        result.probability_percent, result.predicted_label
    );

    match output {
        Some(path) => {
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(writer, &result)?;
            eprintln!("> Prediction written to: {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            serde_json::to_writer_pretty(&mut handle, &result)?;
            writeln!(handle)?;
        }
    }
    Ok(())
}

fn synthesize_command(
    out: &Path,
    samples: usize,
    seed: Option<u64>,
    catalog: &Catalog,
) -> Result<(), Box<dyn Error>> {
    let mut rng = pipeline::rng_for(seed);
    let dataset = data::generate_synthetic(samples, catalog, &mut rng);
    let writer = BufWriter::new(File::create(out)?);
    data::write_dataset_csv(&dataset, catalog, writer)?;
    eprintln!("> Wrote {} to: {}", dataset.summary(), out.display());
    Ok(())
}

fn catalog_command(catalog: &Catalog) -> Result<(), Box<dyn Error>> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for (category, definitions) in catalog.by_category() {
        writeln!(handle, "{category} ({})", definitions.len())?;
        for def in definitions {
            let ranges = [def.healthy_range, def.disease_range]
                .iter()
                .map(|r| format!("{}-{}", r.low, r.high))
                .join(" | ");
            writeln!(
                handle,
                "  {:<12} {:<28} {:<10} {}",
                def.key, def.display_name, def.unit, ranges
            )?;
        }
    }
    Ok(())
}

fn export_model_command(out: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    ModelSpec::default().save(out)?;
    eprintln!("> Model written to: {}", out.display());
    Ok(())
}
