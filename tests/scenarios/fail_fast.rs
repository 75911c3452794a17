//! Test: Fail Fast - the first stage that fails or is blocked ends the run

use crate::helpers::*;
use stagegate::core::{RunStatus, StageFailure, StageOutcome, StageWarning};

fn three_stage_pipeline(ws: &Workspace) -> stagegate::core::Pipeline {
    ws.pipeline(
        r#"
name: "Fail Fast"
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
    empty_hint: "No matches available for the requested dates"
  - id: "predict"
    name: "Predict"
    script: "predict.sh"
    output: "predictions.csv"
"#,
    )
}

fn write_predict(ws: &Workspace) {
    ws.write(
        "predict.sh",
        &format!("{}cp features.csv predictions.csv\n", mark_launched("predict")),
    );
}

/// A header-only artifact fails its stage and the next stage never starts
#[tokio::test]
async fn test_empty_output_halts_pipeline() {
    let ws = Workspace::new();
    ws.write(
        "fetch.sh",
        &format!("{}printf 'home,away\\nA,B\\nC,D\\n' > live.csv\n", mark_launched("fetch")),
    )
    .write(
        "features.sh",
        &format!("{}echo 'home,away' > features.csv\n", mark_launched("features")),
    );
    write_predict(&ws);

    let result = run_pipeline(&three_stage_pipeline(&ws)).await;

    assert_pipeline_halted(&result, RunStatus::Failed, "features");
    assert_execution_order(&result, &["fetch", "features"]);
    assert_eq!(ws.launched(), vec!["fetch", "features"]);
    assert!(!ws.exists("predictions.csv"));

    let features = result.stage("features").unwrap();
    let failure = features.failure().unwrap();
    assert!(
        matches!(failure, StageFailure::EmptyOutput { .. }),
        "Expected EmptyOutput, got {:?}",
        failure
    );
    assert_eq!(
        failure.remediation(),
        "No matches available for the requested dates"
    );
    assert_eq!(features.record_count, Some(0));
    assert!(features.artifact_present);
}

/// A crashing stage reports its exit code and keeps its output
#[tokio::test]
async fn test_nonzero_exit_captures_output() {
    let ws = Workspace::new();
    ws.write(
        "fetch.sh",
        &format!(
            "{}echo 'Traceback (most recent call last):' >&2\necho 'ValueError: boom' >&2\nexit 3\n",
            mark_launched("fetch")
        ),
    )
    .write("features.sh", &mark_launched("features"));
    write_predict(&ws);

    let result = run_pipeline(&three_stage_pipeline(&ws)).await;

    assert_pipeline_halted(&result, RunStatus::Failed, "fetch");
    assert_stage_failed(&result, "fetch", "code 3");
    assert!(result.stage("fetch").unwrap().output.contains("ValueError: boom"));
    assert_eq!(result.run.results.len(), 1);
    assert_eq!(ws.launched(), vec!["fetch"]);
}

/// A missing first script fails before anything is launched
#[tokio::test]
async fn test_missing_executable_launches_nothing() {
    let ws = Workspace::new();
    ws.write("features.sh", &mark_launched("features"));
    write_predict(&ws);

    let result = run_pipeline(&three_stage_pipeline(&ws)).await;

    assert_pipeline_halted(&result, RunStatus::Failed, "fetch");
    assert!(matches!(
        result.stage("fetch").unwrap().failure(),
        Some(StageFailure::MissingExecutable { path }) if *path == ws.path("fetch.sh")
    ));
    assert_eq!(result.run.results.len(), 1);
    assert!(ws.launched().is_empty());
}

/// A stage that exits cleanly without writing its artifact blocks the next one
#[tokio::test]
async fn test_missing_artifact_blocks_next_stage() {
    let ws = Workspace::new();
    ws.write("fetch.sh", &format!("{}echo nothing to do\n", mark_launched("fetch")))
        .write("features.sh", &mark_launched("features"));
    write_predict(&ws);

    let result = run_pipeline(&three_stage_pipeline(&ws)).await;

    let fetch = result.stage("fetch").unwrap();
    assert!(fetch.is_success());
    assert!(!fetch.artifact_present);
    assert_eq!(
        fetch.warnings,
        vec![StageWarning::ArtifactMissing {
            artifact: ws.path("live.csv")
        }]
    );

    assert_pipeline_halted(&result, RunStatus::Blocked, "features");
    assert_eq!(
        result.stage("features").unwrap().outcome,
        StageOutcome::Blocked {
            missing: ws.path("live.csv")
        }
    );
    assert_eq!(ws.launched(), vec!["fetch"]);
}

/// Interpreter arguments come before the script path
#[tokio::test]
async fn test_interpreter_args_are_passed() {
    let ws = Workspace::new();
    ws.write("strict.sh", "false\necho after > out.txt\n");
    let pipeline = ws.pipeline(
        r#"
name: "Strict"
interpreter:
  program: "sh"
  args: ["-e"]
stages:
  - id: "strict"
    name: "Strict"
    script: "strict.sh"
    output: "out.txt"
"#,
    );

    let result = run_pipeline(&pipeline).await;

    assert_stage_failed(&result, "strict", "code 1");
    assert!(!ws.exists("out.txt"));
}

/// A missing interpreter is a spawn failure, not a crash
#[tokio::test]
async fn test_missing_interpreter_fails_to_spawn() {
    let ws = Workspace::new();
    ws.write("fetch.sh", "exit 0\n");
    let pipeline = ws.pipeline(
        r#"
name: "No Interpreter"
interpreter:
  program: "stagegate-no-such-interpreter"
stages:
  - id: "fetch"
    name: "Fetch"
    script: "fetch.sh"
    output: "live.csv"
"#,
    );

    let result = run_pipeline(&pipeline).await;

    assert_pipeline_halted(&result, RunStatus::Failed, "fetch");
    assert!(matches!(
        result.stage("fetch").unwrap().failure(),
        Some(StageFailure::SpawnFailed { .. })
    ));
}
