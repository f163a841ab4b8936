use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_profit"))
}

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn tmp_path(filename: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("profit_cli_{}_{}_{}", std::process::id(), nanos, filename));
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

#[test]
fn help_exits_zero() {
    let out = run(&["--help"]);
    assert_eq!(out.status.code(), Some(0), "help should exit 0");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("--input-file"), "unexpected help text: {}", stdout);
}

#[test]
fn no_input_prints_usage_and_exits_zero() {
    let out = run(&[]);
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Usage"), "expected usage text: {}", stdout);
}

#[test]
fn bad_option_exits_with_distinct_code() {
    let out = run(&["--no-such-option"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Invalid options"), "unexpected stderr: {}", stderr);
}

#[test]
fn missing_input_file_reports_error_and_exits_zero() {
    let out = run(&["-f", "/no/such/file.json"]);
    assert_eq!(out.status.code(), Some(0), "load failures exit 0");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Error"), "expected load error: {}", stdout);
}

#[test]
fn missing_workspace_object_reports_error_and_exits_zero() {
    let input = fixture_path("simple_workspace.json");
    let out = run(&["-f", input.to_string_lossy().as_ref(), "-w", "otherWS"]);
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("workspace 'otherWS' not found"), "unexpected: {}", stdout);

    let out = run(&["-f", input.to_string_lossy().as_ref(), "-d", "otherData"]);
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("dataset 'otherData' not found"), "unexpected: {}", stdout);

    let out = run(&["-f", input.to_string_lossy().as_ref(), "-s", "noSuchSnapshot"]);
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("snapshot 'noSuchSnapshot' not found"), "unexpected: {}", stdout);
}

#[test]
fn completed_fit_exits_one_and_prints_summary() {
    let input = fixture_path("simple_workspace.json");
    assert!(input.exists(), "missing fixture: {}", input.display());

    let out = run(&[
        "-f",
        input.to_string_lossy().as_ref(),
        "--poi",
        "mu=1_0_5",
        "--hesse",
        "true",
    ]);
    assert_eq!(out.status.code(), Some(1), "completed runs exit 1");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Fit Summary of POIs"), "missing summary: {}", stdout);
    assert!(stdout.contains("STATUS OK"), "fit should converge: {}", stdout);
    assert!(stdout.contains("mu"), "summary should list the POI: {}", stdout);
}

#[test]
fn check_ws_reports_ok_for_sane_model() {
    let input = fixture_path("simple_workspace.json");
    let out = run(&[
        "-f",
        input.to_string_lossy().as_ref(),
        "--check-ws",
        "true",
        "--poi",
        "mu=1_0_5",
    ]);
    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Sanity checks on the model: OK"), "unexpected: {}", stdout);
}

#[test]
fn fit_writes_results_record() {
    let input = fixture_path("simple_workspace.json");
    let output = tmp_path("results.json");

    let out = run(&[
        "-f",
        input.to_string_lossy().as_ref(),
        "-o",
        output.to_string_lossy().as_ref(),
        "--poi",
        "mu=1_0_5",
        "--hesse",
        "true",
        "--save-errors",
        "true",
    ]);
    assert_eq!(out.status.code(), Some(1));

    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    let pois = record.get("pois").and_then(|p| p.as_array()).expect("pois array");
    assert_eq!(pois.len(), 1);
    assert_eq!(pois[0].get("name").and_then(|n| n.as_str()), Some("mu"));
    let value = pois[0].get("value").and_then(|v| v.as_f64()).expect("poi value");
    assert!((value - 1.0).abs() < 0.05, "best-fit mu should be near 1, got {}", value);
    assert!(pois[0].get("error").and_then(|e| e.as_f64()).expect("poi error") > 0.0);
    assert_eq!(record.get("status").and_then(|s| s.as_i64()), Some(0));

    let _ = std::fs::remove_file(&output);
}

#[test]
fn save_ws_embeds_postfit_workspace_with_snapshot() {
    let input = fixture_path("simple_workspace.json");
    let output = tmp_path("postfit.json");

    let out = run(&[
        "-f",
        input.to_string_lossy().as_ref(),
        "-o",
        output.to_string_lossy().as_ref(),
        "--poi",
        "mu=1_0_5",
        "--save-ws",
        "true",
        "-k",
        "postfit_snapshot",
    ]);
    assert_eq!(out.status.code(), Some(1));

    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    let workspaces = record
        .pointer("/workspace/workspaces")
        .and_then(|w| w.as_array())
        .expect("embedded workspace store");
    assert_eq!(workspaces[0].get("name").and_then(|n| n.as_str()), Some("combWS"));
    let snapshots = workspaces[0].get("snapshots").and_then(|s| s.as_array()).expect("snapshots");
    let names: Vec<&str> =
        snapshots.iter().filter_map(|s| s.get("name").and_then(|n| n.as_str())).collect();
    assert!(names.contains(&"original"), "pre-mutation snapshot saved: {:?}", names);
    assert!(names.contains(&"postfit_snapshot"), "post-fit snapshot saved: {:?}", names);

    let _ = std::fs::remove_file(&output);
}

#[test]
fn default_poi_path_floats_first_declared_poi() {
    let input = fixture_path("simple_workspace.json");
    let out = run(&["-f", input.to_string_lossy().as_ref()]);
    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        stdout.contains("No POIs specified"),
        "expected the first-POI fallback message: {}",
        stdout
    );
    assert!(stdout.contains("Fit Summary of POIs"), "missing summary: {}", stdout);
}

#[test]
fn fix_np_pattern_without_match_is_a_noop() {
    let input = fixture_path("simple_workspace.json");
    let out = run(&[
        "-f",
        input.to_string_lossy().as_ref(),
        "--poi",
        "mu=1_0_5",
        "--fix-np",
        "gamma_*",
    ]);
    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("STATUS OK"), "fit should still converge: {}", stdout);
}

#[test]
fn snapshot_load_applies_saved_state() {
    // The "nominal" snapshot stores mu = 1; fitting with the default POI
    // fallback then starts from that value.
    let input = fixture_path("simple_workspace.json");
    let out = run(&["-f", input.to_string_lossy().as_ref(), "-s", "nominal"]);
    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Fit Summary of POIs"), "missing summary: {}", stdout);
}
