//! CLI output formatting

use crate::{
    core::{artifact::ArtifactStatus, RunStatus, Stage, StageOutcome, StageResult},
    execution::RunEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static BLOCKED: Emoji<'_, '_> = Emoji("⛔ ", "# ");
pub static TRASH: Emoji<'_, '_> = Emoji("🗑️  ", "- ");

/// Create a progress bar with one tick per stage
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::NotStarted => style("NOT STARTED").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Completed => style("COMPLETED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::Blocked => style("BLOCKED").yellow().to_string(),
    }
}

/// Format a stage result as one line plus any warnings
pub fn format_stage_result(result: &StageResult) -> String {
    let mut line = match &result.outcome {
        StageOutcome::Succeeded => {
            let records = result
                .record_count
                .map(|n| format!(" - {} record(s)", n))
                .unwrap_or_default();
            format!(
                "{} {}{} {}",
                CHECK,
                style(&result.stage_name).green(),
                records,
                style(format!("({})", format_duration(result.duration()))).dim()
            )
        }
        StageOutcome::Failed { failure } => format!(
            "{} {}: {}\n   {}",
            CROSS,
            style(&result.stage_name).red(),
            failure,
            style(failure.remediation()).dim()
        ),
        StageOutcome::Blocked { missing } => format!(
            "{} {}: waiting for {}",
            BLOCKED,
            style(&result.stage_name).yellow(),
            style(missing.display()).dim()
        ),
    };

    for warning in &result.warnings {
        line.push_str(&format!("\n   {} {}", WARN, style(warning).yellow()));
    }
    line
}

/// Format a run event for display; `None` for events that print nothing
pub fn format_run_event(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::ArtifactsCleared { removed } if removed.is_empty() => None,
        RunEvent::ArtifactsCleared { removed } => Some(format!(
            "{} Removed old files: {}",
            TRASH,
            removed
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )),
        RunEvent::RunStarted {
            run_id,
            pipeline_name,
            total_stages,
        } => Some(format!(
            "{} Starting pipeline {} ({} stages, {})",
            ROCKET,
            style(pipeline_name).bold(),
            total_stages,
            style(short_id(&run_id.to_string())).dim()
        )),
        RunEvent::StageStarted { stage_name, .. } => {
            Some(format!("{} {}", SPINNER, style(stage_name).cyan()))
        }
        RunEvent::StageFinished { result, .. } => Some(format_stage_result(result)),
        RunEvent::RunFinished { .. } => None,
    }
}

/// Keep the last `max_lines` lines of stage output
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.trim_end().to_string()
    } else {
        let tail = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{} ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            tail
        )
    }
}

/// Format one artifact line for `status`
pub fn format_artifact_status(stage: &Stage, status: &ArtifactStatus) -> String {
    let icon = if status.present { CHECK } else { CROSS };
    let mut details = Vec::new();
    if let Some(count) = status.record_count {
        details.push(format!("{} record(s)", count));
    }
    if let Some(modified) = status.modified_at {
        details.push(format!("written {}", modified.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    if let Some(error) = &status.error {
        details.push(style(error).red().to_string());
    }

    let mut line = format!(
        "{} {} → {}",
        icon,
        style(&stage.name).bold(),
        style(status.path.display()).dim()
    );
    if !details.is_empty() {
        line.push_str(&format!(" ({})", details.join(", ")));
    }
    line
}

/// Format run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Completed => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Blocked => BLOCKED,
        RunStatus::Running => SPINNER,
        RunStatus::NotStarted => INFO,
    };

    let mut line = format!(
        "{} {} - {} - {} ({}/{}) - {}",
        status_icon,
        style(short_id(&summary.run_id.to_string())).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.succeeded_stages,
        summary.total_stages,
        style(summary.started_at.format("%Y-%m-%d %H:%M")).dim()
    );
    if let (Some(stage), Some(reason)) = (&summary.halted_at, &summary.reason) {
        line.push_str(&format!(" - {}: {}", style(stage).yellow(), reason));
    }
    line
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 1 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
