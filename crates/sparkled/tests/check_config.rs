use std::fs;
use std::process::Command;

use tempfile::TempDir;

const SCENE: &str = r#"
version = 1

[renderer]
bloom_intensity = 0.6
effects = ["blur", "bloom"]

[effects.blur]
radius = 1.5

[particles]
simulation = "gpu"
emit_rate = 300
lifetime = "1500ms"
"#;

fn sparkled(config_dir: &std::path::Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_sparkled"));
    command
        .env("SPARKLED_CONFIG_DIR", config_dir)
        .env_remove("SPARKLED_CONFIG")
        .env("RUST_LOG", "warn");
    command
}

#[test]
fn check_config_accepts_valid_scene() {
    let root = TempDir::new().unwrap();
    let path = root.path().join("custom.toml");
    fs::write(&path, SCENE).unwrap();

    let output = sparkled(root.path())
        .arg("--check-config")
        .arg("--config")
        .arg(&path)
        .output()
        .expect("failed to run sparkled --check-config");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("effects: blur -> bloom"), "{stdout}");
    assert!(stdout.contains("lifetime 1.50s"), "{stdout}");
    assert!(stdout.contains("configuration ok"), "{stdout}");
}

#[test]
fn check_config_rejects_invalid_scene() {
    let root = TempDir::new().unwrap();
    let path = root.path().join("broken.toml");
    fs::write(&path, "version = 1\n[renderer]\nbloom_threshold = -0.5\n").unwrap();

    let output = sparkled(root.path())
        .args(["--check-config", "--config"])
        .arg(&path)
        .output()
        .expect("failed to run sparkled --check-config");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bloom_threshold must be >= 0"), "{stderr}");
}

#[test]
fn check_config_discovers_scene_in_config_dir() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("scene.toml"), SCENE).unwrap();

    let output = sparkled(root.path())
        .arg("--check-config")
        .output()
        .expect("failed to run sparkled --check-config");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("scene.toml"), "{stdout}");
}

#[test]
fn missing_scene_falls_back_to_defaults() {
    let root = TempDir::new().unwrap();

    let output = sparkled(root.path())
        .arg("--check-config")
        .output()
        .expect("failed to run sparkled --check-config");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("scene: built-in defaults"), "{stdout}");
    assert!(stdout.contains("effects: none"), "{stdout}");
}

#[test]
fn explicit_missing_scene_is_an_error() {
    let root = TempDir::new().unwrap();

    let output = sparkled(root.path())
        .args(["--check-config", "--config"])
        .arg(root.path().join("nope.toml"))
        .output()
        .expect("failed to run sparkled --check-config");

    assert!(!output.status.success());
}
