//! Mermaid diagram text for a frozen trace.

use crate::extract::{pipeline_iterators, ExtractError, TaskRecord};
use dagspan_monitor::Spans;
use std::ops::Range;

/// Human readable duration of a microsecond range: `12.34s`, `01m 20.00s`, `1h 02m 03.00s`.
pub fn render_seconds(us_range: &Range<i64>) -> String {
    let total_us = us_range.end - us_range.start;
    if total_us <= 60_000_000 {
        return format!("{:.2}s", total_us as f64 / 1e6);
    }

    let hours = total_us / 3_600_000_000;
    let minutes = total_us % 3_600_000_000 / 60_000_000;
    let seconds = (total_us % 60_000_000) as f64 / 1e6;
    if hours > 0 {
        format!("{}h {:02}m {:05.2}s", hours, minutes, seconds)
    } else {
        format!("{:02}m {:05.2}s", minutes, seconds)
    }
}

fn section_label(task: &TaskRecord) -> String {
    task.notebook()
        .or_else(|| task.task_id())
        .unwrap_or(task.span.span_id.as_str())
        .to_string()
}

/// Gantt chart input: one section per task and one bar per run.
pub fn make_mermaid_gantt(spans: &Spans) -> Result<String, ExtractError> {
    let mut lines: Vec<String> = [
        "gantt",
        "    %% Mermaid input file for drawing Gantt chart of run durations",
        "    %%",
        "    axisFormat %H:%M",
        "    %%",
        "    %% Timestamps are given as unix timestamps",
        "    dateFormat x",
        "    %%",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let (_, tasks) = pipeline_iterators(spans)?;
    for (task, runs) in tasks {
        lines.push(format!("    section {}", section_label(&task)));

        for run in runs {
            let (run, _) = run?;
            let modifier = if run.span.is_ok() { "" } else { "crit" };
            let us_range = run.span.duration_range_us();
            lines.push(format!(
                "    {} - {} :{}, {}, {}",
                render_seconds(&us_range),
                run.span.outcome(),
                modifier,
                us_range.start.div_euclid(1_000_000),
                us_range.end.div_euclid(1_000_000),
            ));
        }
    }

    Ok(lines.join("\n"))
}

fn dag_node_id(span_id: &str) -> String {
    format!("TASK_SPAN_ID_{}", span_id)
}

fn dag_node_label(task: &TaskRecord) -> String {
    let heading = match (task.task_type(), task.notebook()) {
        (Some("jupytext"), Some(notebook)) => format!("{} (jupytext task)", notebook),
        (task_type, _) => format!(
            "{} ({} task)",
            task.task_id().unwrap_or(task.span.span_id.as_str()),
            task_type.unwrap_or("unknown")
        ),
    };

    let mut details: Vec<String> = task
        .attributes
        .iter()
        .filter(|(k, _)| k.starts_with("task.") && *k != "task.task_type" && *k != "task.notebook")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    details.sort();

    let mut parts = vec![heading, String::new()];
    parts.extend(details);
    format!("\"{}\"", parts.join("<br />"))
}

/// Dependency graph input: one node per task, one edge per dependency.
pub fn make_mermaid_dag(spans: &Spans) -> Result<String, ExtractError> {
    let mut lines = vec![
        "graph LR".to_string(),
        "    %% Mermaid input file for drawing task dependencies".to_string(),
        "    %%".to_string(),
    ];

    let (pipeline, tasks) = pipeline_iterators(spans)?;
    for (task, _) in tasks {
        lines.push(format!(
            "    {}[{}]",
            dag_node_id(&task.span.span_id),
            dag_node_label(&task)
        ));
    }
    for (from, to) in &pipeline.task_dependencies {
        lines.push(format!("    {} --> {}", dag_node_id(from), dag_node_id(to)));
    }

    Ok(lines.join("\n"))
}
