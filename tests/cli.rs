use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let vault = root.join("vault");
    fs::create_dir_all(vault.join("Projects")).unwrap();
    fs::write(
        vault.join("Projects/garden.md"),
        "# Garden\nTomato irrigation runs at six.\nCompost turned weekly.\n",
    )
    .unwrap();
    fs::create_dir_all(root.join("memory")).unwrap();
    fs::write(root.join("memory/2024-01-01.md"), "first\nsecond\nthird\n").unwrap();

    // Nothing listens on port 1, so every backend call fails fast.
    let config_content = format!(
        r#"[paths]
vault = "{}"

[vector_store]
url = "http://127.0.0.1:1"
timeout_secs = 2

[embedding]
url = "http://127.0.0.1:1"
timeout_secs = 2

[watch]
enabled = false
"#,
        vault.display()
    );

    let config_path = root.join("recall.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_recall(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_recall"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run recall binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_get_reads_line_range_offline() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_recall(
        &config,
        &["get", "vault/Projects/garden.md", "--from", "2", "--lines", "1"],
    );
    assert!(ok, "get failed: {}", stderr);
    assert_eq!(stdout.trim_end(), "Tomato irrigation runs at six.");
}

#[test]
fn test_get_memory_dir() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, ok) = run_recall(&config, &["get", "memory/2024-01-01.md", "--from", "3"]);
    assert!(ok);
    assert_eq!(stdout.trim_end(), "third");
}

#[test]
fn test_get_rejects_traversal() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_recall(&config, &["get", "vault/../recall.toml"]);
    assert!(!ok);
    assert!(stderr.contains("path traversal rejected"), "stderr: {}", stderr);
}

#[test]
fn test_get_rejects_unknown_prefix() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_recall(&config, &["get", "recall.toml"]);
    assert!(!ok);
    assert!(stderr.contains("path outside memory roots"), "stderr: {}", stderr);
}

#[test]
fn test_search_degrades_without_backends() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_recall(&config, &["search", "tomato"]);
    assert!(ok, "search failed: {}", stderr);
    // No lexical state yet and no vector store: nothing to return, no crash.
    assert!(stdout.contains("No results."));
}

#[test]
fn test_health_reports_unreachable_backends() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, ok) = run_recall(&config, &["health"]);
    assert!(!ok);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["embedding"]["ok"], false);
    assert_eq!(report["vector_store"]["ok"], false);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_recall(&tmp.path().join("absent.toml"), &["orphans"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}
