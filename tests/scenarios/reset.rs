//! Test: Reset - deleting artifacts, alone or before a fresh run

use crate::helpers::*;
use stagegate::core::{Pipeline, RunStatus};
use stagegate::execution::RunEvent;

fn pipeline(ws: &Workspace, fetch_body: &str) -> Pipeline {
    ws.write("fetch.sh", &format!("{}{}", mark_launched("fetch"), fetch_body))
        .write(
            "features.sh",
            &format!("{}cat live.csv > features.csv\n", mark_launched("features")),
        );
    ws.pipeline(
        r#"
name: "Resettable"
interpreter:
  program: "sh"
stages:
  - id: "fetch"
    name: "Fetch"
    script: "fetch.sh"
    output: "live.csv"
  - id: "features"
    name: "Features"
    script: "features.sh"
    output: "features.csv"
"#,
    )
}

/// Reset deletes artifacts only, and doing it twice is harmless
#[tokio::test]
async fn test_reset_removes_only_artifacts() {
    let ws = Workspace::new();
    let pipeline = pipeline(&ws, "exit 0\n");
    ws.write("live.csv", "a\n1\n").write("features.csv", "a\n1\n");
    let (runner, events) = recording_runner();

    let first = runner.reset(&pipeline);

    assert_eq!(first.removed, vec![ws.path("live.csv"), ws.path("features.csv")]);
    assert!(first.is_clean());
    assert!(!ws.exists("live.csv"));
    assert!(!ws.exists("features.csv"));
    assert!(ws.exists("fetch.sh"));
    assert!(ws.exists("pipeline.yaml"));

    let second = runner.reset(&pipeline);
    assert!(second.removed.is_empty());
    assert!(second.is_clean());

    assert_eq!(events.lock().unwrap().len(), 2);
    assert!(ws.launched().is_empty());
}

/// A fresh run never gates on artifacts left by an earlier run
#[tokio::test]
async fn test_fresh_run_clears_old_artifacts() {
    let ws = Workspace::new();
    let pipeline = pipeline(&ws, "exit 0\n");
    ws.write("live.csv", "home,away\nA,B\n")
        .write("features.csv", "home,away\nA,B\n");

    let result = run_fresh(&pipeline).await;

    assert!(matches!(
        result.events.first(),
        Some(RunEvent::ArtifactsCleared { removed }) if removed.len() == 2
    ));
    assert_eq!(result.run.cleared, vec![ws.path("live.csv"), ws.path("features.csv")]);
    // fetch wrote nothing this time, so features is blocked
    assert_pipeline_halted(&result, RunStatus::Blocked, "features");
    assert!(!ws.exists("features.csv"));
    assert_eq!(ws.launched(), vec!["fetch"]);
}

/// Without a reset, the same leftovers let the pipeline continue
#[tokio::test]
async fn test_kept_artifacts_satisfy_gate() {
    let ws = Workspace::new();
    let pipeline = pipeline(&ws, "exit 0\n");
    ws.write("live.csv", "home,away\nA,B\n");

    let result = run_pipeline(&pipeline).await;

    assert!(result.run.cleared.is_empty());
    assert_eq!(result.run.status, RunStatus::Completed);
    assert_eq!(ws.launched(), vec!["fetch", "features"]);
}

/// Artifact status reflects a completed run
#[tokio::test]
async fn test_artifact_statuses_after_run() {
    let ws = Workspace::new();
    let pipeline = pipeline(&ws, "printf 'home,away\\nA,B\\nC,D\\n' > live.csv\n");

    let before = pipeline.artifact_statuses();
    assert!(before.iter().all(|(_, status)| !status.present));

    let result = run_fresh(&pipeline).await;
    assert_pipeline_completed(&result);

    let after = pipeline.artifact_statuses();
    for (stage, status) in &after {
        assert!(status.present, "{} missing", stage.id);
        assert_eq!(status.record_count, Some(2));
        assert!(status.modified_at.is_some());
    }
}
