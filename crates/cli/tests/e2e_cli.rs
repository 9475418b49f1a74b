//! End-to-end tests against the real `optimon` binary: spawns the compiled
//! CLI as a subprocess and checks its stdout/exit code, the way a user
//! actually invokes it.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn optimon() -> Command {
    Command::cargo_bin("optimon").unwrap()
}

fn write_config(dir: &std::path::Path, name: &str, body: &serde_json::Value) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string_pretty(body).unwrap()).unwrap();
    path
}

#[test]
fn validate_accepts_a_well_formed_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "config.json", &serde_json::json!({ "size": 10, "n_parents": 3 }));

    optimon()
        .args(["validate", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Config OK"));
}

#[test]
fn validate_rejects_inverted_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "config.json",
        &serde_json::json!({
            "size": 10,
            "n_parents": 3,
            "bounds": { "x0": { "min": 5.0, "max": -5.0, "scale": "linear" } }
        }),
    );

    optimon().args(["validate", "--config"]).arg(&config).assert().failure().code(1);
}

#[test]
fn validate_rejects_malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{ not json").unwrap();

    optimon().args(["validate", "--config"]).arg(&path).assert().failure().code(1);
}

#[test]
fn run_ea_against_parabola_reports_a_small_best_fitness() {
    optimon()
        .args([
            "run",
            "--algorithm",
            "ea",
            "--problem",
            "parabola",
            "--dims",
            "2",
            "--eaMaxIterations",
            "50",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"algorithm\": \"ea\""));
}

#[test]
fn run_gd_against_parabola_descends_to_a_small_value() {
    optimon()
        .args([
            "run",
            "--algorithm",
            "gd",
            "--problem",
            "parabola",
            "--dims",
            "2",
            "--gdMaxIterations",
            "50",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"algorithm\": \"gd\""));
}

#[test]
fn run_swarm_against_rosenbrock_completes() {
    optimon()
        .args([
            "run",
            "--algorithm",
            "swarm",
            "--problem",
            "rosenbrock",
            "--dims",
            "2",
            "--swarmMaxIterations",
            "10",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"algorithm\": \"swarm\""));
}

#[test]
fn run_ea_pareto_against_multi_parabola_completes() {
    optimon()
        .args([
            "run",
            "--algorithm",
            "ea",
            "--problem",
            "multi-parabola",
            "--dims",
            "2",
            "--pareto",
            "--eaMaxIterations",
            "20",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"algorithm\": \"ea\""));
}

#[test]
fn run_parameter_scan_visits_the_full_grid() {
    optimon()
        .args(["run", "--algorithm", "ps", "--parameterSpec", "d(x0,-2,2,5),d(x1,-2,2,5)"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"algorithm\": \"ps\""));
}

#[test]
fn parameter_scan_without_an_axis_spec_is_a_config_error() {
    optimon().args(["run", "--algorithm", "ps"]).assert().failure().code(1);
}

#[test]
fn missing_required_algorithm_flag_is_a_usage_error() {
    optimon().args(["run", "--problem", "parabola"]).assert().failure().code(2);
}

#[test]
fn checkpoint_resume_continues_from_the_saved_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint_dir = dir.path().join("checkpoints");
    fs::create_dir_all(&checkpoint_dir).unwrap();

    let config = write_config(
        dir.path(),
        "config.json",
        &serde_json::json!({
            "size": 8,
            "n_parents": 2,
            "halt": { "max_iteration": 5 },
            "checkpoint": { "interval": 1, "directory": checkpoint_dir, "base_name": "run" }
        }),
    );

    optimon()
        .args(["run", "--algorithm", "ea", "--problem", "parabola", "--dims", "2", "--config"])
        .arg(&config)
        .assert()
        .success();

    let saved: Vec<_> = fs::read_dir(&checkpoint_dir).unwrap().filter_map(|e| e.ok()).collect();
    assert!(!saved.is_empty(), "expected at least one checkpoint file to be written");
    let checkpoint_path = saved[0].path();

    let resume_config = write_config(
        dir.path(),
        "resume_config.json",
        &serde_json::json!({
            "size": 8,
            "n_parents": 2,
            "halt": { "max_iteration": 8 },
        }),
    );

    optimon()
        .args(["run", "--algorithm", "ea", "--problem", "parabola", "--dims", "2", "--config"])
        .arg(&resume_config)
        .arg("--checkpoint-resume")
        .arg(&checkpoint_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"iterations\": 8"));
}

#[test]
fn external_evaluator_lifecycle_hooks_are_invoked() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("evaluator.sh");
    fs::write(
        &script,
        r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    --init) echo init >> "$SCRIPT_DIR/lifecycle.log" ;;
    --finalize) echo finalize >> "$SCRIPT_DIR/lifecycle.log" ;;
    --input=*) in_file="${arg#--input=}" ;;
    --output=*) out_file="${arg#--output=}" ;;
  esac
done
if [ -n "$out_file" ]; then
  id=$(grep -o '"eval_id":[0-9]*' "$in_file" | grep -o '[0-9]*$')
  printf '{"eval_id": %s, "primary": 1.0, "secondary": [], "is_valid": true}' "$id" > "$out_file"
fi
"#,
    )
    .unwrap();
    let mut perms = fs::metadata(&script).unwrap().permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    fs::set_permissions(&script, perms).unwrap();

    optimon()
        .env("SCRIPT_DIR", dir.path())
        .args([
            "run",
            "--algorithm",
            "ea",
            "--dims",
            "2",
            "--eaMaxIterations",
            "2",
            "--evaluator",
        ])
        .arg(&script)
        .assert()
        .success();

    let log = fs::read_to_string(dir.path().join("lifecycle.log")).unwrap_or_default();
    assert!(log.contains("init"));
    assert!(log.contains("finalize"));
}
