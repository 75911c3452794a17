//! Test: Success Chain - every stage runs and hands its artifact to the next

use crate::helpers::*;
use stagegate::execution::RunEvent;

const PIPELINE: &str = r#"
name: "Match Predictions"
interpreter:
  program: "sh"
env:
  STAGE_ENCODING: "utf-8"
  STAGE_MODE: "live"
stages:
  - id: "fetch"
    name: "Fetch Matches"
    script: "fetch.sh"
    output: "live.csv"
  - id: "features"
    name: "Build Features"
    script: "features.sh"
    output: "features.csv"
    env:
      STAGE_ENCODING: "ascii"
  - id: "predict"
    name: "Predict"
    script: "predict.sh"
    output: "predictions.csv"
"#;

fn workspace() -> Workspace {
    let ws = Workspace::new();
    ws.write(
        "fetch.sh",
        &format!(
            "{}printf 'home,away\\nA,B\\nC,D\\n' > live.csv\necho fetched 2 matches\n",
            mark_launched("fetch")
        ),
    )
    .write(
        "features.sh",
        &format!(
            "{}cat live.csv > features.csv\necho \"encoding=$STAGE_ENCODING mode=$STAGE_MODE\"\n",
            mark_launched("features")
        ),
    )
    .write(
        "predict.sh",
        &format!(
            "{}printf 'home,away,p\\nA,B,0.6\\nC,D,0.4\\n' > predictions.csv\necho scored >&2\n",
            mark_launched("predict")
        ),
    );
    ws
}

/// Test that all three stages run in order and report their records
#[tokio::test]
async fn test_all_stages_succeed() {
    let ws = workspace();
    let pipeline = ws.pipeline(PIPELINE);

    let result = run_pipeline(&pipeline).await;

    assert_pipeline_completed(&result);
    assert_execution_order(&result, &["fetch", "features", "predict"]);
    assert_eq!(ws.launched(), vec!["fetch", "features", "predict"]);

    assert_stage_succeeded(&result, "fetch", "fetched 2 matches");
    assert_stage_succeeded(&result, "predict", "scored");
    for stage in &result.run.results {
        assert!(stage.artifact_present);
        assert_eq!(stage.record_count, Some(2));
        assert!(stage.warnings.is_empty(), "{:?}", stage.warnings);
    }
    assert!(ws.exists("predictions.csv"));
}

/// Test that stage env overrides pipeline env and the rest is inherited
#[tokio::test]
async fn test_stage_environment() {
    let ws = workspace();
    let pipeline = ws.pipeline(PIPELINE);

    let result = run_pipeline(&pipeline).await;

    assert_stage_succeeded(&result, "features", "encoding=ascii mode=live");
}

/// Test that stdout comes before stderr in the captured output
#[tokio::test]
async fn test_output_is_stdout_then_stderr() {
    let ws = Workspace::new();
    ws.write("only.sh", "echo err >&2\necho out\ntouch done.txt\n");
    let pipeline = ws.pipeline(
        r#"
name: "Single"
interpreter: { program: "sh" }
stages:
  - id: "only"
    name: "Only"
    script: "only.sh"
    output: "done.txt"
"#,
    );

    let result = run_pipeline(&pipeline).await;

    assert_pipeline_completed(&result);
    let stage = result.stage("only").unwrap();
    assert_eq!(stage.output, "out\nerr\n");
    // Not tabular, so nothing is counted
    assert_eq!(stage.record_count, None);
}

/// Test the events a full run emits
#[tokio::test]
async fn test_run_events() {
    let ws = workspace();
    let pipeline = ws.pipeline(PIPELINE);

    let result = run_pipeline(&pipeline).await;

    assert!(matches!(
        result.events.first(),
        Some(RunEvent::RunStarted { total_stages: 3, .. })
    ));
    assert!(matches!(result.events.last(), Some(RunEvent::RunFinished { .. })));

    let started: Vec<_> = result
        .events
        .iter()
        .filter_map(|e| match e {
            RunEvent::StageStarted { stage_id, .. } => Some(stage_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["fetch", "features", "predict"]);

    let finished = result
        .events
        .iter()
        .filter(|e| matches!(e, RunEvent::StageFinished { .. }))
        .count();
    assert_eq!(finished, 3);
}
