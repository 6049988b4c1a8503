//! CLI integration tests for the Runbook command-line interface.
//!
//! These tests verify:
//! - Help text is displayed correctly
//! - Argument parsing works as expected
//! - Manifests run end to end with `sh` standing in for the playbook command

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the runbook binary.
fn runbook() -> Command {
    Command::cargo_bin("runbook").unwrap()
}

/// A runbook command confined to `tmp`: its own config dir, data dir,
/// artifact dir, and working directory.
fn sandboxed(tmp: &Path) -> Command {
    let config_dir = tmp.join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "[engine]\ncommand = \"sh\"\nstop_grace_secs = 2\nsweep_on_startup = false\n\n[logging]\njson = false\n",
    )
    .unwrap();

    let mut cmd = runbook();
    cmd.current_dir(tmp)
        .env_remove("RUNBOOK_CONFIG_DIR")
        .env_remove("RUNBOOK_DATA_DIR")
        .env_remove("RUNBOOK_TMP_PATH")
        .arg("--config-dir")
        .arg(&config_dir)
        .arg("--data-dir")
        .arg(tmp.join("data"))
        .arg("--tmp-path")
        .arg(tmp.join("artifacts"));
    cmd
}

const MANIFEST: &str = r#"
[[inventories]]
id = 1
kind = "static"
inventory = "[web]\nhost1\n"

[[tasks]]
template_id = 1
inventory_id = 1
arguments = ["-c", "echo hello; cat \"$1\""]

[[tasks]]
template_id = 2
arguments = ["-c", "echo boom; exit 3"]
"#;

fn write_manifest(tmp: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = tmp.path().join("run.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_displays() {
    runbook()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Runbook"))
        .stdout(predicate::str::contains("playbook runs"));
}

#[test]
fn test_version_displays() {
    runbook()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("runbook"));
}

#[test]
fn test_help_lists_subcommands() {
    runbook()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("tasks"))
        .stdout(predicate::str::contains("sweep"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_global_flags_in_help() {
    runbook()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("--json"))
        .stdout(predicate::str::contains("--data-dir"));
}

#[test]
fn test_run_requires_manifest() {
    runbook()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("MANIFEST").or(predicate::str::contains("required")));
}

#[test]
fn test_unknown_subcommand_fails() {
    runbook()
        .arg("deploy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Run Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_run_prints_output_and_fails_on_error() {
    let tmp = TempDir::new().unwrap();
    let manifest = write_manifest(&tmp, MANIFEST);

    sandboxed(tmp.path())
        .arg("run")
        .arg(&manifest)
        .assert()
        .failure()
        .stdout(predicate::str::contains("hello"))
        .stdout(predicate::str::contains("[web]"))
        .stdout(predicate::str::contains("host1"))
        .stdout(predicate::str::contains("boom"))
        .stdout(predicate::str::contains("Task failed: Process exited with code 3"))
        .stdout(predicate::str::contains("Summary"))
        .stderr(predicate::str::contains("1 of 2 tasks did not succeed"));
}

#[test]
fn test_run_json_summary_and_records() {
    let tmp = TempDir::new().unwrap();
    let manifest = write_manifest(&tmp, MANIFEST);

    let out = sandboxed(tmp.path())
        .arg("--json")
        .arg("run")
        .arg(&manifest)
        .output()
        .unwrap();
    assert!(!out.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let runs = summary.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["status"], "success");
    assert_eq!(runs[0]["lines"], 3);
    assert_eq!(runs[1]["status"], "error");
    assert_eq!(runs[1]["outcome"], "exited with code 3");

    // Temp inventory is gone once the run is over.
    let leftovers = std::fs::read_dir(tmp.path().join("artifacts"))
        .map(|d| d.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);

    // Records persist for later inspection.
    let first = runs[0]["id"].as_str().unwrap().to_string();
    sandboxed(tmp.path())
        .args(["tasks", "output", &first[..8]])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello\n[web]\nhost1\n"));

    sandboxed(tmp.path())
        .args(["tasks", "list", "--status", "error"])
        .assert()
        .success()
        .stdout(predicate::str::contains("error"))
        .stdout(predicate::str::contains(&first[..8]).not());

    sandboxed(tmp.path())
        .args(["tasks", "remove", &first])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed task"));

    sandboxed(tmp.path())
        .args(["tasks", "show", &first])
        .assert()
        .failure();
}

#[test]
fn test_run_rejects_bad_manifest() {
    let tmp = TempDir::new().unwrap();
    let manifest = write_manifest(&tmp, "[[tasks]]\ninventory_id = 4\n");

    sandboxed(tmp.path())
        .arg("run")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown inventory 4"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Sweep and Config Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_sweep_dry_run_keeps_files() {
    let tmp = TempDir::new().unwrap();
    let artifacts = tmp.path().join("artifacts");
    std::fs::create_dir_all(&artifacts).unwrap();
    std::fs::write(artifacts.join("inventory_old"), "x").unwrap();
    std::fs::write(artifacts.join("unrelated.txt"), "x").unwrap();

    sandboxed(tmp.path())
        .args(["sweep", "--dry-run", "--older-than-hours", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Would remove"))
        .stdout(predicate::str::contains("inventory_old"));
    assert!(artifacts.join("inventory_old").exists());

    sandboxed(tmp.path())
        .args(["sweep", "--older-than-hours", "0"])
        .assert()
        .success();
    assert!(!artifacts.join("inventory_old").exists());
    assert!(artifacts.join("unrelated.txt").exists());
}

#[test]
fn test_config_show_reports_sources() {
    let tmp = TempDir::new().unwrap();

    sandboxed(tmp.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"))
        .stdout(predicate::str::contains("command: sh"));
}

#[test]
fn test_config_path_uses_config_dir() {
    let tmp = TempDir::new().unwrap();

    sandboxed(tmp.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config").and(predicate::str::contains("config.toml")));
}
