//! CLI tests for `onestep plan-check`, `init`, `diff` and `doctor`.
//!
//! Spawns the onestep binary and verifies exit codes and output for valid,
//! invalid and malformed invocations.

use std::fs;
use std::process::Command;

use onestep::exit_codes;
use onestep::test_support::TestRepo;

fn onestep() -> Command {
    Command::new(env!("CARGO_BIN_EXE_onestep"))
}

#[test]
fn plan_check_valid_inline_plan_exits_ok() {
    let plan = r#"{"summary":"one step","actions":[{"kind":"write","path":"a.txt","content":"x"},{"kind":"run","command":"pytest -q"}]}"#;
    let output = onestep()
        .args(["plan-check", "--json-input", plan])
        .output()
        .expect("onestep plan-check");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Plan check passed"));
    assert!(stdout.contains("write"));
    assert!(stdout.contains("pytest -q"));
}

#[test]
fn plan_check_invalid_plan_exits_failed() {
    let output = onestep()
        .args(["plan-check", "--json-input", r#"{"summary":"x","actions":[] }"#])
        .output()
        .expect("onestep plan-check");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Plan check failed"));
    assert!(stdout.contains("Hints:"));
}

#[test]
fn plan_check_reads_file_and_prints_json_report() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("plan.json");
    fs::write(
        &path,
        r#"{"summary":"s","actions":[{"kind":"emit","event_type":"question","message":"ok?","blocking":true}]}"#,
    )
    .expect("write plan");

    let output = onestep()
        .arg("--json")
        .arg("plan-check")
        .arg("--file")
        .arg(&path)
        .output()
        .expect("onestep plan-check");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["status"], "passed");
    assert_eq!(report["actions"][0]["notes"], "event=question, blocking=true");
}

#[test]
fn plan_check_without_input_is_usage_error() {
    let status = onestep()
        .arg("plan-check")
        .status()
        .expect("onestep plan-check");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn plan_check_missing_file_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = onestep()
        .args(["plan-check", "--file"])
        .arg(temp.path().join("nope.json"))
        .output()
        .expect("onestep plan-check");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("read action plan file"));
}

#[test]
fn init_creates_state_dir_in_repo_root() {
    let repo = TestRepo::new().expect("repo");
    let sub = repo.path().join("src");
    fs::create_dir_all(&sub).expect("mkdir");

    let status = onestep()
        .current_dir(&sub)
        .arg("init")
        .status()
        .expect("onestep init");

    assert_eq!(status.code(), Some(exit_codes::OK));
    assert!(repo.path().join(".onestep").join("config.toml").is_file());
    assert!(repo.path().join(".onestep").join("runlog.jsonl").is_file());
    assert!(!sub.join(".onestep").exists());
}

#[test]
fn diff_reports_no_changes_then_changes() {
    let repo = TestRepo::new().expect("repo");

    let output = onestep()
        .current_dir(repo.path())
        .arg("diff")
        .output()
        .expect("onestep diff");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "(no changes)\n");

    fs::write(repo.path().join("README.md"), "changed\n").expect("write");
    let output = onestep()
        .current_dir(repo.path())
        .arg("diff")
        .output()
        .expect("onestep diff");
    assert!(String::from_utf8_lossy(&output.stdout).contains("+changed"));
}

#[test]
fn run_outside_git_repository_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = onestep()
        .current_dir(temp.path())
        .args(["run", "do something"])
        .output()
        .expect("onestep run");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not a git repository"));
}

#[test]
fn doctor_without_api_key_exits_failed() {
    let repo = TestRepo::new().expect("repo");
    let output = onestep()
        .current_dir(repo.path())
        .env_remove("OPENAI_API_KEY")
        .args(["doctor", "--probe-model"])
        .output()
        .expect("onestep doctor");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Git repository detected"));
    assert!(stdout.contains("skipped: missing API key"));
    assert!(stdout.contains("[WARN] Missing API key for provider 'openai_compat'"));
    assert!(repo.path().join(".onestep").join("config.toml").is_file());
}

#[test]
fn doctor_with_env_key_reports_source_as_json() {
    let repo = TestRepo::new().expect("repo");
    let output = onestep()
        .current_dir(repo.path())
        .env("OPENAI_API_KEY", "sk-test")
        .args(["--json", "doctor"])
        .output()
        .expect("onestep doctor");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["api_key_source"], "env");
    assert_eq!(report["git_repository"], true);
    assert_eq!(report["issues"].as_array().map(Vec::len), Some(0));
}
