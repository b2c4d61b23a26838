use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use splatgen_core::{PlyWriter, ScenePoint, SceneSink, SplatConfig};

fn splatgen() -> Command {
    Command::cargo_bin("splatgen").unwrap()
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let mut config = SplatConfig::default();
    config.model.model_dir = dir.join("models");
    config.generation.output_dir = dir.join("scenes");
    config.device.disk_threshold_bytes = 0;
    let path = dir.join("config.json");
    config.save(&path).unwrap();
    path
}

#[test]
fn test_help_lists_commands() {
    splatgen()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("generate"))
        .stdout(predicate::str::contains("batch"))
        .stdout(predicate::str::contains("models"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn test_config_init_get_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");
    let path_arg = path.to_str().unwrap();

    splatgen()
        .args(["-c", path_arg, "config", "init"])
        .assert()
        .success();
    assert!(path.exists());

    splatgen()
        .args(["-c", path_arg, "config", "get", "generation.batch_size"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2048"));

    splatgen()
        .args(["-c", path_arg, "config", "set", "generation.quality", "low"])
        .assert()
        .success();
    splatgen()
        .args(["-c", path_arg, "config", "get", "generation.quality"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"low\""));

    splatgen()
        .args(["-c", path_arg, "config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_generate_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    splatgen()
        .args(["-c", config.to_str().unwrap(), "generate"])
        .arg(dir.path().join("nope.png"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input file not found"));
}

#[test]
fn test_generate_without_model_reports_missing_resource() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let image = dir.path().join("photo.png");
    image::RgbImage::from_pixel(4, 4, image::Rgb([200, 100, 50]))
        .save(&image)
        .unwrap();

    splatgen()
        .args(["-c", config.to_str().unwrap(), "generate", "--allow-low-memory"])
        .arg(&image)
        .assert()
        .failure()
        .stderr(predicate::str::contains("model resource not found"));
    assert!(!dir.path().join("scenes").exists());
}

#[test]
fn test_models_path_and_download_without_source() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let config_arg = config.to_str().unwrap();

    splatgen()
        .args(["-c", config_arg, "models", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sharp.onnx"));

    splatgen()
        .args(["-c", config_arg, "models", "download"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No model source configured"));
}

#[test]
fn test_models_download_imports_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let source = dir.path().join("weights.onnx");
    std::fs::write(&source, b"weights").unwrap();

    splatgen()
        .args(["-c", config.to_str().unwrap(), "models", "download", "--from"])
        .arg(&source)
        .assert()
        .success()
        .stdout(predicate::str::contains("Model ready"));

    assert_eq!(
        std::fs::read(dir.path().join("models").join("sharp.onnx")).unwrap(),
        b"weights"
    );
}

#[test]
fn test_inspect_scene() {
    let dir = tempfile::tempdir().unwrap();
    let scene = dir.path().join("scene.ply");

    let point = |z: f32| ScenePoint {
        position: [0.0, 0.0, z],
        sh_dc: [0.0; 3],
        opacity: 0.5,
        scale: [0.01; 3],
        rotation: [1.0, 0.0, 0.0, 0.0],
    };
    let mut writer = PlyWriter::create(&scene).unwrap();
    writer.start(0, true, 3).unwrap();
    writer.write(vec![point(1.0), point(2.0), point(3.0)]).unwrap();
    writer.close().unwrap();

    splatgen()
        .args(["inspect", "--json"])
        .arg(&scene)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"vertex_count\": 3"))
        .stdout(predicate::str::contains("positive_z"));

    splatgen()
        .arg("inspect")
        .arg(&scene)
        .assert()
        .success()
        .stdout(predicate::str::contains("+Z"));
}
