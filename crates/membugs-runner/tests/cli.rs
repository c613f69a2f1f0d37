//! End-to-end tests of the `membugs` binary.
//!
//! Every fault runs in a child process: the out-of-bounds stores are real
//! and may take the process down, which must never be the test runner.
//! Under the `asan` feature a worker that commits a violation aborts or
//! fails at exit, so only `--isolate` runs are expected to succeed there.

use membugs_fault::catalog::{AccessKind, Direction, FaultCategory};
use membugs_fault::report::{ExecutionResult, Outcome};
use std::process::{Command, Output};

fn membugs() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_membugs"));
    cmd.env_remove("MEMBUGS_MULTI_SHOT")
        .env_remove("MEMBUGS_REPEAT")
        .env_remove("MEMBUGS_DISABLE")
        .env("RUST_LOG", "warn");
    cmd
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("failed to spawn membugs")
}

fn json_results(output: &Output) -> Vec<ExecutionResult> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| {
            serde_json::from_str(line)
                .unwrap_or_else(|e| panic!("not a result line ({e}): {line:?}"))
        })
        .collect()
}

fn worker(fault: &str, extra: &[&str]) -> ExecutionResult {
    let output = run(membugs().args(["worker", "--fault", fault]).args(extra));
    assert!(
        output.status.success(),
        "worker for {fault} failed. stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let mut results = json_results(&output);
    assert_eq!(results.len(), 1);
    results.remove(0)
}

#[test]
fn list_shows_the_whole_catalog() {
    let output = run(membugs().arg("list"));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for category in FaultCategory::ALL {
        assert!(stdout.contains(category.as_str()), "missing {category} in:\n{stdout}");
    }
    assert_eq!(stdout.lines().count(), 8);
}

#[test]
fn list_marks_disabled_faults() {
    let output = run(membugs().args(["--disable", "leak1,oob-static-left", "list"]));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().filter(|l| l.ends_with("disabled")).count(), 2);
}

#[test]
fn worker_reports_uninitialized_read() {
    let result = worker("umr", &[]);
    assert_eq!(result.category, FaultCategory::UninitializedRead);
    assert_eq!(result.raw_value.map(|v| v.len()), Some(4));
    assert!(matches!(result.outcome, Outcome::Detected | Outcome::Undetected));
}

#[cfg(not(feature = "asan"))]
#[test]
fn worker_reports_leak_owned_size() {
    let result = worker("leak-owned", &[]);
    assert_eq!(result.outcome, Outcome::Leaked);
    assert_eq!(result.bytes, Some(1520));
    assert_eq!(result.address, None);
}

#[cfg(not(feature = "asan"))]
#[test]
fn worker_reports_caller_owned_content() {
    let result = worker("leak-caller-owned", &[]);
    assert_eq!(result.outcome, Outcome::Leaked);
    assert_eq!(result.raw_value.as_deref(), Some(&b"leaky!!\0"[..]));
}

#[test]
fn worker_control_access_is_undetected() {
    let result = worker(
        "out-of-bounds-dynamic-right",
        &["--direction", "read", "--control"],
    );
    assert_eq!(result.access, AccessKind::Control);
    assert_eq!(result.direction, Direction::Read);
    assert_eq!(result.outcome, Outcome::Undetected);
    assert_eq!(result.raw_value.map(|v| v.len()), Some(1));
}

#[cfg(not(feature = "asan"))]
#[test]
fn worker_use_after_return_survives_read_back() {
    let result = worker("uar", &[]);
    assert_eq!(result.raw_value.map(|v| v.len()), Some(64));
    assert!(result.address.is_some());
}

#[test]
fn isolated_static_right_write_records_one_result() {
    let output = run(membugs().args([
        "run",
        "out-of-bounds-static-right",
        "--direction",
        "write",
        "--isolate",
        "--json",
    ]));
    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let results = json_results(&output);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].category, FaultCategory::OobStaticRight);
    assert_eq!(results[0].direction, Direction::Write);
    assert!(matches!(
        results[0].outcome,
        Outcome::Detected | Outcome::Undetected | Outcome::Crashed
    ));
}

#[test]
fn isolated_run_all_covers_every_fault_in_order() {
    let output = run(membugs().args(["run-all", "--isolate", "--json"]));
    assert!(output.status.success());
    let results = json_results(&output);
    let order: Vec<_> = results.iter().map(|r| r.category).collect();
    assert_eq!(order, FaultCategory::ALL.to_vec());
    let seqs: Vec<_> = results.iter().map(|r| r.sequence).collect();
    assert_eq!(seqs, (1..=7).collect::<Vec<u64>>());
}

#[test]
fn run_all_prints_coverage_summary() {
    let output = run(membugs().args(["run-all", "--isolate", "--repeat", "2"]));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Coverage Report"));
    assert!(stdout.contains("Executions:             14"));
}

#[test]
fn repeat_from_environment() {
    let output = run(membugs()
        .env("MEMBUGS_REPEAT", "3")
        .args(["run", "umr", "--json"]));
    assert!(output.status.success());
    let results = json_results(&output);
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.category == FaultCategory::UninitializedRead));
}

#[test]
fn oversized_repeat_flag_is_a_usage_error() {
    let output = run(membugs().args(["run", "umr", "--repeat", "4294967295"]));
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
}

#[test]
fn oversized_repeat_payload_is_refused() {
    let output = run(membugs().args(["control", "run-all", "read repeat=4294967295"]));
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bad payload"), "stderr:\n{stderr}");
}

#[cfg(feature = "asan")]
#[test]
fn isolated_use_after_return_is_detected() {
    let output = run(membugs().args(["run", "uar", "--isolate", "--json"]));
    assert!(output.status.success());
    let results = json_results(&output);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, Outcome::Detected);
}

#[cfg(not(feature = "asan"))]
#[test]
fn multi_shot_without_sanitizer_fails_init() {
    let output = run(membugs().args(["--multi-shot", "run", "umr"]));
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not support"), "stderr:\n{stderr}");
}

#[test]
fn disabled_fault_is_an_error_not_a_crash() {
    let output = run(membugs().env("MEMBUGS_DISABLE", "umr").args(["run", "umr"]));
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("disabled"), "stderr:\n{stderr}");
}

#[test]
fn control_surface_write_and_read() {
    let output = run(membugs().args(["control", "out-of-bounds-dynamic-right", "read control"]));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("#1 out-of-bounds-dynamic-right direction=read access=control outcome=undetected"));

    let output = run(membugs().args(["control", "list"]));
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).lines().count(), 7);
}

#[test]
fn control_surface_unknown_entry() {
    let output = run(membugs().args(["control", "use-after-free"]));
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("reset-log"), "stderr:\n{stderr}");
}

#[test]
fn control_help_explains_fresh_harness() {
    let output = run(membugs().args(["control", "--help"]));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("nothing persists"), "stdout:\n{stdout}");
}
