//! CLI test cases.
//!
//! These run against local folders built in temporary directories. Tests
//! which need `pdftocairo` or `tesseract` installed are ignored by default.

use std::{fs, path::Path, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::Value;

/// A tiny but valid one-page PDF.
static TINY_PDF: &[u8] = b"%PDF-1.1\n1 0 obj<</Type/Catalog/Pages 2 0 R>>endobj\n2 0 obj<</Type/Pages/Kids[3 0 R]/Count 1>>endobj\n3 0 obj<</Type/Page/Parent 2 0 R/MediaBox[0 0 200 100]>>endobj\ntrailer<</Root 1 0 R>>\n%%EOF\n";

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("ocr-harvest").unwrap()
}

/// Lay out a drive-like folder of receipts.
fn receipts_folder(root: &Path) {
    for (folder, name) in [("2024-01", "Recibo 1.pdf"), ("2024-02", "Recibo 2.pdf")] {
        fs::create_dir_all(root.join(folder)).unwrap();
        fs::write(root.join(folder).join(name), TINY_PDF).unwrap();
    }
    fs::write(root.join("2024-01").join("notes.txt"), "not a receipt").unwrap();
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_stats_counts_pending_pdfs() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("drive");
    receipts_folder(&root);

    let output = cmd()
        .arg("stats")
        .arg("rasterize")
        .arg("--local-root")
        .arg(&root)
        .arg("--state-dir")
        .arg(dir.path().join("state"))
        .output()
        .unwrap();
    assert!(output.status.success());
    let stats: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["total_remote_items"], 2);
    assert_eq!(stats["already_processed"], 0);
    assert_eq!(stats["pending"], 2);

    // Dry runs never create state.
    assert!(!dir.path().join("state").exists());
}

#[test]
fn test_stats_reads_legacy_processed_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("drive");
    receipts_folder(&root);
    let legacy = dir.path().join("processed_cache.json");
    fs::write(
        &legacy,
        r#"{"processed_image_ids": ["2024-01/Recibo 1.pdf", "2024-02/Recibo 2.pdf"], "last_update": "2024-05-01T10:00:00", "total": 2}"#,
    )
    .unwrap();
    // Only one of the marks has a record, so the other must be redone.
    let legacy_tasks = dir.path().join("tasks.json");
    fs::write(
        &legacy_tasks,
        r#"[{"data": {}, "meta": {"image_id": "2024-01/Recibo 1.pdf"}}]"#,
    )
    .unwrap();

    cmd()
        .arg("stats")
        .arg("rasterize")
        .arg("--local-root")
        .arg(&root)
        .arg("--state-dir")
        .arg(dir.path().join("state"))
        .arg("--processed-path")
        .arg(&legacy)
        .arg("--dataset-path")
        .arg(&legacy_tasks)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""already_processed": 1"#))
        .stdout(predicate::str::contains(r#""pending": 1"#))
        .stdout(predicate::str::contains(r#""dataset_size": 1"#));
}

#[test]
fn test_ocr_with_nothing_to_do_creates_empty_state() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("images");
    fs::create_dir_all(&root).unwrap();
    let state = dir.path().join("state");

    cmd()
        .arg("ocr")
        .arg("--local-root")
        .arg(&root)
        .arg("--state-dir")
        .arg(&state)
        .assert()
        .success();

    assert_eq!(read_json(&state.join("ocr_dataset.json")), Value::Array(vec![]));
    assert_eq!(read_json(&state.join("ocr_processed.json"))["total"], 0);
}

#[test]
fn test_missing_source_folder_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .arg("ocr")
        .arg("--local-root")
        .arg(dir.path().join("nope"))
        .arg("--state-dir")
        .arg(dir.path().join("state"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
    assert!(!dir.path().join("state").join("ocr_processed.json").exists());
}

#[test]
fn test_drive_images_folder_needs_a_drive_source() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .env_remove("DRIVE_FOLDER_ID")
        .arg("rasterize")
        .arg("--local-root")
        .arg(dir.path())
        .arg("--drive-images-folder")
        .arg("Recibos_Imagenes")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--drive-folder"));
}

#[test]
fn test_split() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("tasks.json");
    fs::write(&input, r#"[{"id": 1}, {"id": 2}, {"id": 3}]"#).unwrap();
    let out = dir.path().join("batches");

    cmd()
        .arg("split")
        .arg(&input)
        .arg("--out-dir")
        .arg(&out)
        .arg("--tasks-per-file")
        .arg("2")
        .assert()
        .success();

    let first = read_json(&out.join("recibos_batch_001_of_002.json"));
    let second = read_json(&out.join("recibos_batch_002_of_002.json"));
    assert_eq!(first.as_array().unwrap().len(), 2);
    assert_eq!(second.as_array().unwrap().len(), 1);
}

#[test]
fn test_schema() {
    cmd()
        .arg("schema")
        .arg("LabelStudioTask")
        .assert()
        .success()
        .stdout(predicate::str::contains("predictions"));
}

#[test]
#[ignore = "Requires poppler-utils and tesseract"]
fn test_rasterize_then_ocr() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("drive");
    receipts_folder(&root);
    let state = dir.path().join("state");

    cmd()
        .arg("rasterize")
        .arg("--local-root")
        .arg(&root)
        .arg("--state-dir")
        .arg(&state)
        .arg("--images-dir")
        .arg(root.join("Recibos_Imagenes"))
        .assert()
        .success();
    let manifests = read_json(&state.join("rasterize_dataset.json"));
    let first_page = &manifests[0]["pages"][0];
    assert_eq!(first_page["name"], "Recibo 1_p1.png");
    let page_path = Path::new(first_page["location"].as_str().unwrap());
    assert!(page_path.starts_with(root.join("Recibos_Imagenes/2024-01")));
    assert!(page_path.exists());
    assert_eq!(
        read_json(&state.join("rasterize_processed.json"))["total"],
        2
    );

    // A second run has nothing to do.
    cmd()
        .arg("rasterize")
        .arg("--local-root")
        .arg(&root)
        .arg("--state-dir")
        .arg(&state)
        .arg("--images-dir")
        .arg(root.join("Recibos_Imagenes"))
        .assert()
        .success()
        .stderr(predicate::str::contains("Nothing to do"));

    cmd()
        .arg("ocr")
        .arg("--local-root")
        .arg(&root)
        .arg("--images-folder")
        .arg("Recibos_Imagenes")
        .arg("--state-dir")
        .arg(&state)
        .args(["-O", "lang=eng"])
        .assert()
        .success();
    let tasks = read_json(&state.join("ocr_dataset.json"));
    assert_eq!(tasks.as_array().unwrap().len(), 2);
    assert!(tasks[0]["data"]["ocr"].as_str().unwrap().starts_with("file://"));
}
