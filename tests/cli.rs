//! Drives the `infratest` binary against a shell-script stand-in for the
//! provisioning tool.

#![cfg(unix)]

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Appends its operation to `calls.log` in the suite directory, fails apply
/// when a `fail-apply` marker exists and prints a small state snapshot for
/// `show`.
const MOCK_TOOL: &str = r#"#!/bin/sh
echo "$1" >> calls.log
if [ -n "$TF_PLUGIN_CACHE_DIR" ]; then echo "$TF_PLUGIN_CACHE_DIR" > cache-dir.txt; fi
echo '{"@level":"info","@message":"mock '"$1"'","@module":"tofu.ui"}' >> "$TF_LOG_PATH"
case "$1" in
  apply)
    if [ -f fail-apply ]; then
      echo "Error: mock apply failure" >&2
      exit 1
    fi
    ;;
  show)
    echo '{"values":{"outputs":{"id":{"value":"x"}},"root_module":{"resources":[{"mode":"managed","provider_name":"mock"}]}}}'
    ;;
esac
exit 0
"#;

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn fixture() -> TempDir {
    let root = TempDir::new().unwrap();
    let base = root.path().join("suites");
    write(&root.path().join("mock.sh"), MOCK_TOOL);
    write(&base.join("docs/suite.toml"), "tags = [\"docs\"]\n");
    write(
        &base.join("network-vpc/main.tf"),
        "# tags: aws\nterraform {\n  required_providers {\n    null = { source = \"hashicorp/null\" }\n  }\n}\n",
    );
    write(&base.join("storage/main.tf"), "resource \"null\" \"b\" {}\n");
    write(&base.join("storage/fail-apply"), "");
    root
}

fn calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_run_reports_json_summary() {
    let root = fixture();
    let base = root.path().join("suites");
    let tool = format!("sh {}", root.path().join("mock.sh").display());

    let output = Command::cargo_bin("infratest")
        .unwrap()
        .current_dir(root.path())
        .args(["run", "--json", "--no-cache", "--tool", &tool])
        .arg(&base)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["total"], 3);
    assert_eq!(summary["passed"], 1);
    assert_eq!(summary["failed"], 1);
    assert_eq!(summary["skipped"], 1);

    assert_eq!(
        calls(&base.join("network-vpc")),
        vec!["init", "apply", "show", "destroy"]
    );
    assert_eq!(calls(&base.join("storage")), vec!["init", "apply", "destroy"]);
    assert!(calls(&base.join("docs")).is_empty());

    let logs = base.join(".infratest/logs");
    assert!(logs.is_dir());
}

#[test]
fn test_relative_target_shares_log_and_cache_dirs() {
    let root = fixture();
    let base = root.path().join("suites");
    let tool = format!("sh {}", root.path().join("mock.sh").display());

    Command::cargo_bin("infratest")
        .unwrap()
        .current_dir(root.path())
        .args(["run", "--json", "--tool", &tool, "suites"])
        .assert()
        .code(1);

    let structured: Vec<String> = walkdir::WalkDir::new(base.join(".infratest/logs"))
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".json.log"))
        .map(|e| std::fs::read_to_string(e.path()).unwrap())
        .collect();
    assert!(structured.iter().any(|log| log.contains("mock apply")));
    assert!(structured.iter().any(|log| log.contains("mock destroy")));
    assert!(!base.join("network-vpc/suites").exists());
    assert!(!base.join("storage/suites").exists());

    let cache = std::fs::canonicalize(base.join(".infratest/plugin-cache")).unwrap();
    for suite in ["network-vpc", "storage"] {
        let seen = std::fs::read_to_string(base.join(suite).join("cache-dir.txt")).unwrap();
        assert_eq!(std::fs::canonicalize(seen.trim()).unwrap(), cache);
    }
}

#[test]
fn test_run_all_passing_exits_zero() {
    let root = fixture();
    let base = root.path().join("suites");
    std::fs::remove_file(base.join("storage/fail-apply")).unwrap();
    let tool = format!("sh {}", root.path().join("mock.sh").display());

    Command::cargo_bin("infratest")
        .unwrap()
        .args(["run", "--no-cache", "--no-display", "-j", "1", "--tool", &tool])
        .arg(&base)
        .assert()
        .success()
        .stdout(predicate::str::contains("All suites passed!"));
}

#[test]
fn test_run_with_tag_filter() {
    let root = fixture();
    let base = root.path().join("suites");
    let tool = format!("sh {}", root.path().join("mock.sh").display());

    Command::cargo_bin("infratest")
        .unwrap()
        .args(["run", "--json", "--no-cache", "--tag", "aws", "--tool", &tool])
        .arg(&base)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total\": 1"));

    assert!(calls(&base.join("storage")).is_empty());
}

#[test]
fn test_junit_report_written() {
    let root = fixture();
    let base = root.path().join("suites");
    let tool = format!("sh {}", root.path().join("mock.sh").display());
    let junit = root.path().join("out/junit.xml");

    Command::cargo_bin("infratest")
        .unwrap()
        .args(["run", "--json", "--no-cache", "--tool", &tool, "--junit"])
        .arg(&junit)
        .arg(&base)
        .assert()
        .code(1);

    let xml = std::fs::read_to_string(junit).unwrap();
    assert!(xml.contains(r#"name="storage""#));
    assert!(xml.contains(r#"type="apply""#));
    assert!(xml.contains("mock apply failure"));
}

#[test]
fn test_missing_tool_is_fatal() {
    let root = fixture();
    let base = root.path().join("suites");

    Command::cargo_bin("infratest")
        .unwrap()
        .args(["run", "--json", "--tool", "definitely-not-an-installed-tool"])
        .arg(&base)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Fatal:"));
}

#[test]
fn test_list_prints_tags_and_types() {
    let root = fixture();
    let base = root.path().join("suites");

    Command::cargo_bin("infratest")
        .unwrap()
        .arg("list")
        .arg(&base)
        .assert()
        .success()
        .stdout(predicate::str::contains("Discovered 3 suites"))
        .stdout(predicate::str::contains("network-vpc"))
        .stdout(predicate::str::contains("aws"));
}

#[test]
fn test_list_json_applies_filters() {
    let root = fixture();
    let base = root.path().join("suites");

    let output = Command::cargo_bin("infratest")
        .unwrap()
        .args(["list", "--format", "json", "--tag", "!docs"])
        .arg(&base)
        .output()
        .unwrap();

    assert!(output.status.success());
    let suites: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> = suites
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["network-vpc", "storage"]);
}

#[test]
fn test_invalid_config_is_reported() {
    let root = fixture();
    let base = root.path().join("suites");
    write(&base.join("infratest.toml"), "[run]\nmax_parallel = \"many\"\n");

    Command::cargo_bin("infratest")
        .unwrap()
        .arg("list")
        .arg(&base)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
