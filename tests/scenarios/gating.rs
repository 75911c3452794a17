//! Test: Gating - a stage may only run once its predecessor's artifact exists

use crate::helpers::*;
use stagegate::core::{Pipeline, StageOutcome, StageWarning};
use stagegate::execution::RunnerError;
use std::time::{Duration, SystemTime};

fn two_stage_pipeline(ws: &Workspace) -> Pipeline {
    ws.write(
        "fetch.sh",
        &format!("{}printf 'home,away\\nA,B\\n' > live.csv\n", mark_launched("fetch")),
    )
    .write(
        "features.sh",
        &format!("{}cat live.csv > features.csv\n", mark_launched("features")),
    );
    ws.pipeline(
        r#"
name: "Gated"
interpreter:
  program: "sh"
stages:
  - id: "fetch"
    name: "Fetch Matches"
    script: "fetch.sh"
    output: "live.csv"
  - id: "features"
    name: "Build Features"
    script: "features.sh"
    output: "features.csv"
"#,
    )
}

/// Running a later stage alone is refused while its input is absent
#[tokio::test]
async fn test_gated_stage_blocked_without_predecessor() {
    let ws = Workspace::new();
    let pipeline = two_stage_pipeline(&ws);
    let (runner, _events) = recording_runner();

    let result = runner.run_stage_gated(&pipeline, "features").await.unwrap();

    assert!(result.is_blocked());
    assert_eq!(
        result.outcome,
        StageOutcome::Blocked {
            missing: ws.path("live.csv")
        }
    );
    assert!(result.reason().is_some_and(|r| r.contains("live.csv")));
    assert!(ws.launched().is_empty());
}

/// Once the input exists the stage runs, whoever produced it
#[tokio::test]
async fn test_gated_stage_runs_once_predecessor_exists() {
    let ws = Workspace::new();
    let pipeline = two_stage_pipeline(&ws);
    ws.write("live.csv", "home,away\nA,B\nC,D\nE,F\n");
    let (runner, _events) = recording_runner();

    let result = runner.run_stage_gated(&pipeline, "features").await.unwrap();

    assert!(result.is_success(), "{:?}", result.outcome);
    assert_eq!(result.record_count, Some(3));
    assert_eq!(ws.launched(), vec!["features"]);
}

/// The first stage has no gate
#[tokio::test]
async fn test_first_stage_is_never_gated() {
    let ws = Workspace::new();
    let pipeline = two_stage_pipeline(&ws);
    let (runner, events) = recording_runner();

    let result = runner.run_stage_gated(&pipeline, "fetch").await.unwrap();

    assert!(result.is_success());
    assert!(ws.exists("live.csv"));
    // A single stage run emits no run-level events
    assert_eq!(events.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_stage_is_an_error() {
    let ws = Workspace::new();
    let pipeline = two_stage_pipeline(&ws);
    let (runner, _events) = recording_runner();

    let err = runner.run_stage_gated(&pipeline, "train").await.unwrap_err();

    assert!(matches!(err, RunnerError::UnknownStage(ref id) if id == "train"));
    assert!(ws.launched().is_empty());
}

/// An artifact the stage did not rewrite is kept but flagged as stale
#[tokio::test]
async fn test_untouched_artifact_is_flagged_stale() {
    let ws = Workspace::new();
    let pipeline = two_stage_pipeline(&ws);
    // Overwrite fetch so it leaves yesterday's file alone
    ws.write("fetch.sh", &format!("{}echo up to date\n", mark_launched("fetch")))
        .write("live.csv", "home,away\nA,B\n");
    let file = std::fs::File::options()
        .write(true)
        .open(ws.path("live.csv"))
        .unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(24 * 3600))
        .unwrap();
    drop(file);

    let result = run_pipeline(&pipeline).await;

    assert_pipeline_completed(&result);
    assert_eq!(
        result.stage("fetch").unwrap().warnings,
        vec![StageWarning::StaleArtifact {
            artifact: ws.path("live.csv")
        }]
    );
    assert!(result.stage("features").unwrap().warnings.is_empty());
    assert_eq!(ws.launched(), vec!["fetch", "features"]);
}

/// Opaque artifacts are only checked for existence
#[tokio::test]
async fn test_opaque_artifact_is_not_counted() {
    let ws = Workspace::new();
    ws.write("train.sh", ": > model.pkl\n")
        .write("report.sh", "test -f model.pkl && echo ok > report.txt\n");
    let pipeline = ws.pipeline(
        r#"
name: "Training"
interpreter:
  program: "sh"
stages:
  - id: "train"
    name: "Train"
    script: "train.sh"
    output: "model.pkl"
  - id: "report"
    name: "Report"
    script: "report.sh"
    output: "report.txt"
"#,
    );

    let result = run_pipeline(&pipeline).await;

    assert_pipeline_completed(&result);
    let train = result.stage("train").unwrap();
    assert!(train.artifact_present);
    assert_eq!(train.record_count, None);
}

/// An empty CSV passes when record validation is switched off
#[tokio::test]
async fn test_record_validation_can_be_disabled() {
    let ws = Workspace::new();
    ws.write("fetch.sh", "echo 'home,away' > live.csv\n");
    let pipeline = ws.pipeline(
        r#"
name: "Lenient"
interpreter:
  program: "sh"
stages:
  - id: "fetch"
    name: "Fetch"
    script: "fetch.sh"
    output: "live.csv"
    validate_records: false
"#,
    );

    let result = run_pipeline(&pipeline).await;

    assert_pipeline_completed(&result);
    assert_eq!(result.stage("fetch").unwrap().record_count, Some(0));
}
