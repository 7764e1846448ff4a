//! CLI integration tests for the Lore command-line interface.
//!
//! Every test points `--data-dir` and `--config-dir` at a temporary
//! directory, so nothing outside it is read or written.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the lore binary, isolated in `dir`.
fn lore(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("lore").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("LORE_DATA_DIR")
        .arg("--config-dir")
        .arg(dir.path().join("config"))
        .arg("--data-dir")
        .arg(dir.path().join("data"));
    cmd
}

fn write_log(dir: &TempDir) -> std::path::PathBuf {
    let mut lines = Vec::new();
    for day in 1..=2 {
        for minute in 0..4 {
            let (role, author) = if minute % 2 == 0 {
                ("user", "Sam")
            } else {
                ("assistant", "Aria")
            };
            lines.push(format!(
                r#"{{"role":"{role}","author":"{author}","content":"day {day} line {minute}","timestamp":"2024-03-0{day}T10:0{minute}:00Z"}}"#
            ));
        }
    }
    lines.push("not json".to_string());
    let path = dir.path().join("chat.jsonl");
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("lore")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("sweep"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn test_import_requires_log_path() {
    let dir = TempDir::new().unwrap();
    lore(&dir).args(["import", "aria"]).assert().failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Command Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_import_then_inspect() {
    let dir = TempDir::new().unwrap();
    let log = write_log(&dir);

    lore(&dir)
        .args(["--json", "import", "aria"])
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""messages": 8"#))
        .stdout(predicate::str::contains(r#""skipped_lines": 1"#));

    assert!(dir.path().join("data/personas/aria/sessions.json").exists());

    let output = lore(&dir)
        .args(["--json", "inspect", "aria"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let inspection: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(inspection["sessions"]["total_messages"], 8);
    assert_eq!(inspection["sessions"]["summarized"], 0);
    assert_eq!(inspection["memories"]["total"], 0);
    let tasks: Vec<_> = inspection["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(tasks, vec!["goal_research", "maintenance", "reflection"]);
}

#[test]
fn test_dry_run_import_saves_nothing() {
    let dir = TempDir::new().unwrap();
    let log = write_log(&dir);

    lore(&dir)
        .args(["import", "aria", "--dry-run"])
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"));

    assert!(!dir.path().join("data/personas/aria/sessions.json").exists());
}

#[test]
fn test_sweep_empty_persona() {
    let dir = TempDir::new().unwrap();

    lore(&dir)
        .args(["sweep", "aria"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No stale memories"));
}

#[test]
fn test_invalid_persona_name() {
    let dir = TempDir::new().unwrap();

    lore(&dir).args(["inspect", "../escape"]).assert().failure();
}
