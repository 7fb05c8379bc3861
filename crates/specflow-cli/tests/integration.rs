#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const ROADMAP: &str = "\
# Demo Roadmap

| Phase | Name | Status | Gate |
|-------|------|--------|------|
| 0010 | Core | ✅ Complete | Tests pass |
| 0020 | API | 🔄 In Progress | Docs |
| 0030 | UI | ⬜ Not Started | Demo |

### 0010 - Core

Core body.

### 0020 - API

API body.

### 0030 - UI

UI body.

---
";

fn specflow(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("specflow").unwrap();
    cmd.current_dir(dir.path()).env("SPECFLOW_ROOT", dir.path());
    cmd
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    specflow(&dir).arg("init").assert().success();
    std::fs::write(dir.path().join("ROADMAP.md"), ROADMAP).unwrap();
    dir
}

fn roadmap(dir: &TempDir) -> String {
    std::fs::read_to_string(dir.path().join("ROADMAP.md")).unwrap()
}

fn json(dir: &TempDir, args: &[&str]) -> serde_json::Value {
    let out = specflow(dir).arg("--json").args(args).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// specflow init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_directory_tree() {
    let dir = TempDir::new().unwrap();
    specflow(&dir).arg("init").assert().success();

    assert!(dir.path().join(".specflow/phases").is_dir());
    assert!(dir.path().join(".specflow/backlog").is_dir());
    assert!(dir.path().join(".specflow/archive").is_dir());
    assert!(dir.path().join(".specflow/config.yaml").exists());
    assert!(roadmap(&dir).contains("| Phase | Name | Status | Gate |"));
    let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert!(gitignore.contains(".specflow/registry.lock"));
}

#[test]
fn init_is_idempotent_and_keeps_roadmap() {
    let dir = project();
    specflow(&dir).arg("init").assert().success();
    assert_eq!(roadmap(&dir), ROADMAP);
}

#[test]
fn missing_roadmap_is_an_error() {
    let dir = TempDir::new().unwrap();
    specflow(&dir)
        .args(["phase", "list"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("specflow init"));
}

// ---------------------------------------------------------------------------
// specflow phase
// ---------------------------------------------------------------------------

#[test]
fn phase_list_shows_rows() {
    let dir = project();
    specflow(&dir)
        .args(["phase", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0020"))
        .stdout(predicate::str::contains("In Progress"));

    let value = json(&dir, &["phase", "list"]);
    assert_eq!(value["phases"].as_array().unwrap().len(), 3);
    assert_eq!(value["phases"][1]["status"], "in_progress");
}

#[test]
fn malformed_row_is_a_warning_not_an_error() {
    let dir = project();
    let doc = ROADMAP.replace("| 0030 | UI | ⬜", "| 0030 | UI | ❓");
    std::fs::write(dir.path().join("ROADMAP.md"), &doc).unwrap();

    specflow(&dir)
        .args(["phase", "list"])
        .assert()
        .success()
        .stderr(predicate::str::contains("warning"));

    // unrelated mutation keeps the malformed row verbatim
    specflow(&dir)
        .args(["phase", "status", "0020", "complete"])
        .assert()
        .success();
    assert!(roadmap(&dir).contains("| 0030 | UI | ❓ Not Started | Demo |"));
}

#[test]
fn phase_insert_uses_decade_slot() {
    let dir = project();
    let value = json(&dir, &["phase", "insert", "--after", "0020", "Hotfix"]);
    assert_eq!(value["number"], "0021");
    assert_eq!(value["rolled_over"], false);

    let doc = roadmap(&dir);
    assert!(doc.contains("| 0021 | Hotfix | ⬜ Not Started |"));
    assert!(doc.find("### 0021 - Hotfix").unwrap() > doc.find("### 0020 - API").unwrap());
    assert!(doc.find("### 0021 - Hotfix").unwrap() < doc.find("### 0030 - UI").unwrap());
}

#[test]
fn phase_insert_unknown_anchor_fails() {
    let dir = project();
    specflow(&dir)
        .args(["phase", "insert", "--after", "0050", "Nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("0050"));
    assert_eq!(roadmap(&dir), ROADMAP);
}

#[test]
fn defer_in_progress_needs_force() {
    let dir = project();
    specflow(&dir)
        .args(["phase", "defer", "0020"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    assert_eq!(roadmap(&dir), ROADMAP);

    specflow(&dir)
        .args(["phase", "defer", "0020", "--force", "--reason", "blocked"])
        .assert()
        .success();

    let backlog = json(&dir, &["backlog", "list"]);
    assert_eq!(backlog[0]["kind"], "deferred_phase");
    assert_eq!(backlog[0]["original_number"], "0020");
    assert_eq!(backlog[0]["reason"], "blocked");
    assert!(!roadmap(&dir).contains("| 0020 | API | 🔄"));
}

#[test]
fn defer_then_restore_round_trip() {
    let dir = project();
    specflow(&dir).args(["phase", "defer", "0030"]).assert().success();
    let value = json(&dir, &["phase", "restore", "0030"]);
    assert_eq!(value["number"], "0030");

    let phases = json(&dir, &["phase", "list"]);
    assert_eq!(phases["phases"][2]["number"], "0030");
    assert!(json(&dir, &["backlog", "list"]).as_array().unwrap().is_empty());
    assert!(roadmap(&dir).contains("### 0030 - UI"));
}

#[test]
fn restore_unknown_entry_fails() {
    let dir = project();
    specflow(&dir)
        .args(["phase", "restore", "0090"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("backlog"));
}

#[test]
fn status_update_and_archive() {
    let dir = project();
    specflow(&dir)
        .args(["phase", "archive", "0020"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("0020"));

    specflow(&dir)
        .args(["phase", "status", "0020", "complete"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Complete"));
    specflow(&dir)
        .args(["phase", "archive", "0020"])
        .assert()
        .success();

    assert!(dir.path().join(".specflow/archive/0020-api.md").exists());
    assert!(!roadmap(&dir).contains("### 0020 - API"));
    specflow(&dir)
        .args(["phase", "show", "0020"])
        .assert()
        .success()
        .stdout(predicate::str::contains("API body."));
}

#[test]
fn renumber_dry_run_writes_nothing() {
    let dir = project();
    let doc = ROADMAP.replace("0020", "0025").replace("0030", "0099");
    std::fs::write(dir.path().join("ROADMAP.md"), &doc).unwrap();

    let preview = json(&dir, &["phase", "renumber", "--dry-run"]);
    assert_eq!(preview["dry_run"], true);
    assert_eq!(roadmap(&dir), doc);

    let real = json(&dir, &["phase", "renumber"]);
    assert_eq!(preview["mapping"], real["mapping"]);
    assert_eq!(real["mapping"][1]["to"], "0020");
    assert_eq!(real["mapping"][2]["to"], "0030");
    assert!(real["backup"].is_string());
    assert_eq!(roadmap(&dir), ROADMAP);
}

// ---------------------------------------------------------------------------
// specflow backlog
// ---------------------------------------------------------------------------

#[test]
fn backlog_notes_add_and_clear() {
    let dir = project();
    specflow(&dir)
        .args(["backlog", "add", "Try caching", "--priority", "high"])
        .assert()
        .success();
    let entries = json(&dir, &["backlog", "list"]);
    assert_eq!(entries[0]["kind"], "note");
    assert_eq!(entries[0]["priority"], "high");

    let cleared = json(&dir, &["backlog", "clear", "--notes-only"]);
    assert_eq!(cleared["notes_removed"], 1);
    assert!(json(&dir, &["backlog", "list"]).as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// specflow migrate
// ---------------------------------------------------------------------------

#[test]
fn migrate_widens_legacy_keys() {
    let dir = project();
    std::fs::write(
        dir.path().join("ROADMAP.md"),
        ROADMAP.replace("0030", "003"),
    )
    .unwrap();
    specflow(&dir).arg("migrate").assert().success();
    assert!(roadmap(&dir).contains("| 0030 | UI |"));
    assert!(roadmap(&dir).contains("### 0030 - UI"));
}

// ---------------------------------------------------------------------------
// specflow reconcile / status / next
// ---------------------------------------------------------------------------

fn stale_cache(dir: &TempDir) {
    std::fs::write(
        dir.path().join(".specflow/orchestration-state.json"),
        r#"{"schema_version": 2, "orchestration": {
"phase": {"number": "0020", "name": "API", "branch": "0020-api", "status": "in_progress"},
"step": {"current": "tasks", "index": 2}, "progress": {"tasks_completed": 0, "tasks_total": 2}}}"#,
    )
    .unwrap();
    let specs = dir.path().join("specs/0020-api");
    std::fs::create_dir_all(&specs).unwrap();
    std::fs::write(specs.join("spec.md"), "spec").unwrap();
    std::fs::write(specs.join("plan.md"), "plan").unwrap();
    std::fs::write(specs.join("tasks.md"), "- [x] a\n- [x] b\n").unwrap();
}

#[test]
fn reconcile_trust_state_exits_2_on_differences() {
    let dir = project();
    stale_cache(&dir);
    specflow(&dir)
        .arg("reconcile")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("stale_step"));
}

#[test]
fn reconcile_trust_files_rewrites_cache() {
    let dir = project();
    stale_cache(&dir);
    specflow(&dir)
        .args(["reconcile", "--mode", "trust-files"])
        .assert()
        .success();
    specflow(&dir).arg("reconcile").assert().success();

    let cache: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join(".specflow/orchestration-state.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(cache["orchestration"]["step"]["index"], 4);
    assert_eq!(cache["orchestration"]["progress"]["tasks_completed"], 2);
}

#[test]
fn next_reports_filesystem_step() {
    let dir = project();
    stale_cache(&dir);
    let value = json(&dir, &["next"]);
    assert_eq!(value["phase"], "0020");
    assert_eq!(value["action"], "continue_verify");
    assert_eq!(value["ready"], true);
}

#[test]
fn status_summarizes_roadmap() {
    let dir = project();
    specflow(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("0020 - API"));
    let value = json(&dir, &["status"]);
    assert_eq!(value["phases"], 3);
    assert_eq!(value["by_status"]["complete"], 1);
}

// ---------------------------------------------------------------------------
// specflow config
// ---------------------------------------------------------------------------

#[test]
fn config_show_and_validate() {
    let dir = project();
    let value = json(&dir, &["config", "show"]);
    assert_eq!(value["roadmap"]["path"], "ROADMAP.md");
    assert_eq!(value["roadmap"]["detail_storage"], "inline");
    specflow(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn config_validate_fails_on_errors() {
    let dir = project();
    std::fs::write(
        dir.path().join(".specflow/config.yaml"),
        "project:\n  name: demo\nspecs_dir: ''\n",
    )
    .unwrap();
    specflow(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("specs_dir"));
}
