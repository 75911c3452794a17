use anyhow::{Context, Result};
use stagegate::cli::commands::{
    HistoryCommand, ListCommand, ResetCommand, RunCommand, StatusCommand, ValidateCommand,
};
use stagegate::cli::output::*;
use stagegate::cli::{Cli, Command};
use stagegate::core::config::PipelineConfig;
use stagegate::core::{Pipeline, PipelineRun, RunStatus, StageResult};
use stagegate::execution::{PipelineRunner, RunEvent, SubprocessRunner};
use stagegate::persistence::{PersistenceBackend, RunSummary};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &cli).await?,
        Command::Reset(cmd) => reset_pipeline(cmd)?,
        Command::Status(cmd) => show_status(cmd)?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd, &cli).await?,
        Command::History(cmd) => show_history(cmd, &cli).await?,
    }

    Ok(())
}

fn load_pipeline(file: &Path) -> Result<Pipeline> {
    let config = PipelineConfig::from_file(file).context("Failed to load pipeline config")?;
    Ok(config.to_pipeline())
}

async fn open_store(cli: &Cli) -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        use stagegate::persistence::SqliteRunStore;

        let store = match &cli.history_db {
            Some(path) => SqliteRunStore::open(path).await?,
            None => SqliteRunStore::with_default_path().await?,
        };
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        use stagegate::persistence::InMemoryPersistence;

        if cli.history_db.is_some() {
            warn!("Built without the sqlite feature; --history-db is ignored");
        }
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

async fn run_pipeline(cmd: &RunCommand, cli: &Cli) -> Result<()> {
    let pipeline = load_pipeline(&cmd.file)?;

    println!(
        "{} Loaded pipeline: {} ({} stages)",
        INFO,
        style(&pipeline.name).bold(),
        pipeline.stages.len()
    );

    if let Some(stage_id) = &cmd.stage {
        let Some(stage) = pipeline.stage(stage_id) else {
            let known: Vec<_> = pipeline.stages.iter().map(|s| s.id.as_str()).collect();
            anyhow::bail!("Unknown stage '{}' (stages: {})", stage_id, known.join(", "));
        };
        println!("{} Running only: {}", INFO, style(&stage.name).cyan());
    }

    let readiness = pipeline.readiness();
    for path in &readiness.missing_executables {
        println!("{} Missing script: {}", WARN, style(path.display()).yellow());
    }
    for path in &readiness.missing_prerequisites {
        println!("{} Missing prerequisite: {}", WARN, style(path.display()).yellow());
    }

    let mut runner = PipelineRunner::new(SubprocessRunner::new());

    let total = if cmd.stage.is_some() { 1 } else { pipeline.stages.len() };
    let progress = create_progress_bar(total);
    let bar = progress.clone();
    runner.add_event_handler(move |event| {
        if let RunEvent::StageStarted { stage_name, .. } = event {
            bar.set_message(stage_name.clone());
            return;
        }
        if let RunEvent::StageFinished { .. } = event {
            bar.inc(1);
        }
        if let Some(line) = format_run_event(event) {
            bar.println(line);
        }
    });

    let outcome = match &cmd.stage {
        Some(stage_id) => runner
            .run_stage_gated(&pipeline, stage_id)
            .await
            .map(|result| single_stage_run(&pipeline, result)),
        None if cmd.keep_artifacts => Ok(runner.run_pipeline(&pipeline).await),
        None => Ok(runner.run_fresh(&pipeline).await),
    };
    progress.finish_and_clear();
    let run = outcome?;

    if let Some(halting) = run.halting_result() {
        if !halting.output.trim().is_empty() {
            println!("\n{}", style(format!("Output of {}:", halting.stage_name)).bold());
            println!("{}", format_output(&halting.output, cmd.tail));
        }
    }

    if !cmd.no_history {
        let summary = RunSummary::from(&run);
        match save_summary(cli, &summary).await {
            Ok(()) => println!(
                "\n{} Run saved to history (ID: {})",
                INFO,
                style(&summary.run_id.to_string()[..8]).dim()
            ),
            Err(e) => warn!("Could not save run history: {:#}", e),
        }
    }

    if run.is_success() {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(&pipeline.name).bold(),
            style("successfully").green()
        );
    } else {
        println!(
            "\n{} {} {} ({}/{} stages succeeded)",
            CROSS,
            style(&pipeline.name).bold(),
            format_status(run.status),
            run.succeeded_stages(),
            run.total_stages
        );
        std::process::exit(1);
    }

    Ok(())
}

/// Wrap the result of a single-stage run so it is reported and recorded like a full run
fn single_stage_run(pipeline: &Pipeline, result: StageResult) -> PipelineRun {
    let mut run = PipelineRun::new(&pipeline.name, 1);
    run.start();
    run.started_at = Some(result.started_at);
    run.record(result);
    run.finish();
    run
}

async fn save_summary(cli: &Cli, summary: &RunSummary) -> Result<()> {
    let store = open_store(cli).await?;
    store.save_run(summary).await
}

fn reset_pipeline(cmd: &ResetCommand) -> Result<()> {
    let pipeline = load_pipeline(&cmd.file)?;
    let runner = PipelineRunner::new(SubprocessRunner::new());
    let report = runner.reset(&pipeline);

    if report.removed.is_empty() {
        println!("{} No artifacts to remove", INFO);
    }
    for path in &report.removed {
        println!("{} Removed {}", TRASH, style(path.display()).dim());
    }
    for (path, reason) in &report.failed {
        println!(
            "{} Could not remove {}: {}",
            CROSS,
            style(path.display()).bold(),
            style(reason).red()
        );
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

fn show_status(cmd: &StatusCommand) -> Result<()> {
    let pipeline = load_pipeline(&cmd.file)?;
    let readiness = pipeline.readiness();
    let artifacts = pipeline.artifact_statuses();

    if cmd.json {
        let artifacts: Vec<_> = artifacts
            .iter()
            .map(|(stage, status)| serde_json::json!({ "stage": stage.id, "artifact": status }))
            .collect();
        let data = serde_json::json!({
            "pipeline": pipeline.name,
            "ready": readiness.is_ready(),
            "readiness": readiness,
            "artifacts": artifacts,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Pipeline: {}", INFO, style(&pipeline.name).bold());
    println!("  Working directory: {}", style(pipeline.working_dir.display()).dim());

    if readiness.is_ready() {
        println!("{} All scripts and prerequisites are present", CHECK);
    }
    for path in &readiness.missing_executables {
        println!("{} Missing script: {}", CROSS, style(path.display()).red());
    }
    for path in &readiness.missing_prerequisites {
        println!("{} Missing prerequisite: {}", CROSS, style(path.display()).red());
    }

    println!("\n{}", style("Artifacts:").bold());
    for (stage, status) in &artifacts {
        println!("  {}", format_artifact_status(stage, status));
    }

    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    let result = PipelineConfig::from_file(&cmd.file);

    match result {
        Ok(config) if cmd.json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            if let Some(description) = &config.description {
                println!("  Description: {}", style(description).dim());
            }
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!("  Prerequisites: {}", style(config.prerequisites.len()).cyan());

            let pipeline = config.to_pipeline();
            for (index, stage) in pipeline.stages.iter().enumerate() {
                let gate = pipeline
                    .gate_for(index)
                    .map(|gate| format!(" (needs {})", gate.display()))
                    .unwrap_or_default();
                println!(
                    "    {}. {} → {}{}",
                    index + 1,
                    style(&stage.name).cyan(),
                    stage.output.display(),
                    style(gate).dim()
                );
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn list_pipelines(cmd: &ListCommand, cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;
    let pipelines = store.list_pipelines().await?;

    if cmd.json {
        let mut json_data = Vec::new();
        for name in &pipelines {
            let runs = store.list_runs(name).await?;
            json_data.push(serde_json::json!({
                "name": name,
                "run_count": runs.len(),
                "last_status": runs.first().map(|r| r.status),
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);

    for name in &pipelines {
        if cmd.with_counts {
            let runs = store.list_runs(name).await?;
            let count = |status: RunStatus| runs.iter().filter(|r| r.status == status).count();
            println!(
                "  {} ({} runs: {} completed, {} failed, {} blocked)",
                style(name).bold(),
                style(runs.len()).cyan(),
                style(count(RunStatus::Completed)).green(),
                style(count(RunStatus::Failed)).red(),
                style(count(RunStatus::Blocked)).yellow()
            );
        } else {
            println!("  {}", style(name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand, cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;

    // If a specific run is requested
    if let Some(run_id) = &cmd.run_id {
        let run_id = Uuid::parse_str(run_id).context("Invalid run ID format")?;

        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Some(summary) => print_run_details(&summary, cmd.details)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let mut runs = match &cmd.pipeline {
        Some(name) => store.list_runs(name).await?,
        None => {
            let mut all_runs = Vec::new();
            for name in store.list_pipelines().await? {
                all_runs.extend(store.list_runs(&name).await?);
            }
            all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_runs
        }
    };
    runs.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, runs.len());
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, details: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {} ({}/{})",
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        summary.succeeded_stages,
        summary.total_stages
    );
    if let Some(stage) = &summary.halted_at {
        println!("  Halted at: {}", style(stage).yellow());
    }
    if let Some(reason) = &summary.reason {
        println!("  Reason: {}", style(reason).red());
    }

    if details {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
