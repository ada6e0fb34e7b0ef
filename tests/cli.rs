use std::fs;
use std::process::Command;

use tempfile::tempdir;

fn neurorisk() -> Command {
    Command::new(env!("CARGO_BIN_EXE_neurorisk"))
}

#[test]
fn synthesize_then_predict_from_the_written_dataset() {
    let tmp = tempdir().expect("temporary directory");
    let dataset_path = tmp.path().join("synthetic.csv");
    let patient_path = tmp.path().join("patient.json");
    let output_path = tmp.path().join("prediction.json");

    let status = neurorisk()
        .args([
            "synthesize",
            "--out",
            dataset_path.to_str().expect("path str"),
            "--samples",
            "60",
            "--seed",
            "4",
        ])
        .status()
        .expect("run neurorisk synthesize");
    assert!(status.success(), "synthesize exited with {status:?}");

    fs::write(
        &patient_path,
        r#"{ "patientData": { "ptau181": 95.0, "ab4240": 0.04, "nfl": 1600.0 } }"#,
    )
    .expect("write patient");

    let status = neurorisk()
        .args([
            "predict",
            patient_path.to_str().expect("path str"),
            "--dataset",
            dataset_path.to_str().expect("path str"),
            "--output",
            output_path.to_str().expect("path str"),
        ])
        .status()
        .expect("run neurorisk predict");
    assert!(status.success(), "predict exited with {status:?}");

    let text = fs::read_to_string(&output_path).expect("prediction written");
    let json: serde_json::Value = serde_json::from_str(&text).expect("valid JSON");
    assert_eq!(json["dataset"]["total"], 60);
    assert_eq!(json["dataset"]["source"], "uploaded");
    assert_eq!(json["predicted_label"], 1);
    assert!(json["probability_percent"].as_f64().expect("number") > 50.0);

    let matrix = &json["metrics"]["confusion_matrix"];
    let total: u64 = ["tp", "tn", "fp", "fn"]
        .iter()
        .map(|k| matrix[*k].as_u64().expect("count"))
        .sum();
    assert_eq!(total, 60);
    assert_eq!(json["per_biomarker"].as_object().expect("map").len(), 33);
}

#[test]
fn predict_prints_json_to_stdout_with_an_exported_model() {
    let tmp = tempdir().expect("temporary directory");
    let model_path = tmp.path().join("model.toml");
    let patient_path = tmp.path().join("patient.toml");

    let status = neurorisk()
        .args(["export-model", "--out", model_path.to_str().expect("path str")])
        .status()
        .expect("run neurorisk export-model");
    assert!(status.success());
    assert!(
        fs::read_to_string(&model_path)
            .expect("model written")
            .contains("intercept = -2.5")
    );

    fs::write(&patient_path, "ptau181 = 20.0\ngfap = 85\n").expect("write patient");
    let output = neurorisk()
        .args([
            "predict",
            patient_path.to_str().expect("path str"),
            "--model",
            model_path.to_str().expect("path str"),
            "--seed",
            "12",
            "--roc-auc",
            "placeholder",
        ])
        .output()
        .expect("run neurorisk predict");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(json["dataset"]["source"], "synthetic");
    assert_eq!(json["dataset"]["total"], 200);
    assert_eq!(json["metrics"]["roc_auc"], 0.94);
    assert_eq!(json["metrics"]["roc_auc_source"], "placeholder");
}

#[test]
fn upload_without_label_fails_with_a_message() {
    let tmp = tempdir().expect("temporary directory");
    let dataset_path = tmp.path().join("upload.csv");
    let patient_path = tmp.path().join("patient.json");
    fs::write(&dataset_path, "NFL,GFAP\n400,80\n1500,300\n").expect("write upload");
    fs::write(&patient_path, r#"{ "nfl": 500 }"#).expect("write patient");

    let output = neurorisk()
        .args([
            "predict",
            patient_path.to_str().expect("path str"),
            "--dataset",
            dataset_path.to_str().expect("path str"),
        ])
        .output()
        .expect("run neurorisk predict");

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "stderr was: {stderr}");
}

#[test]
fn catalog_lists_every_category() {
    let output = neurorisk()
        .arg("catalog")
        .output()
        .expect("run neurorisk catalog");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for category in ["CSF", "Saliva", "Tears", "Urine", "Blood", "Molecular"] {
        assert!(stdout.contains(category), "missing {category}");
    }
    assert!(stdout.contains("ptau217"));
}
