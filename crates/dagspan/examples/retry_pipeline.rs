//! Runs a small pipeline with a flaky task and prints the extracted records.
//!
//! Run with: cargo run --example retry_pipeline

use dagspan::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let calls = Arc::new(AtomicU32::new(0));

    let engine = PipelineEngine::new("retry-demo", 2)
        .pipeline_attribute("owner", "examples")
        // Succeeds on the third attempt
        .task(
            Task::from_fn("download", move |ctx: RunContext| {
                let nr = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if nr < 2 {
                        return Err(TaskError::failed("connection reset"));
                    }
                    ctx.log_value("rows", &1200)?;
                    ctx.log_artefact("rows.csv", "id,value\n1,0.5\n")?;
                    Ok(())
                }
            })
            .max_nr_retries(3),
        )
        // Always runs over its budget
        .task(
            Task::from_fn("slow", |_ctx| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .timeout_s(0.2),
        )
        .task(Task::from_fn("report", |_ctx| async { Ok(()) }).depends_on(["download", "slow"]));

    let recorder = SpanRecorder::new();
    let outcome = engine.run(&recorder).await?;
    println!("Failed tasks: {:?}", outcome.failed());

    let spans = recorder.spans();
    let (pipeline, tasks) = pipeline_iterators(&spans)?;
    println!("Pipeline attributes: {:?}", pipeline.attributes);
    for (task, runs) in tasks {
        println!("\n{} [{}]", task.task_id().unwrap_or("?"), task.span.outcome());
        for run in runs {
            let (run, artifacts) = run?;
            println!(
                "  run={} {} in {:.3}s, values: {:?}",
                run.retry_nr().unwrap_or(-1),
                run.span.outcome(),
                run.span.duration_s,
                run.logged_values.keys().collect::<Vec<_>>()
            );
            for artifact in artifacts {
                let artifact = artifact?;
                println!("    artifact {} ({})", artifact.name, artifact.type_name);
            }
        }
    }
    Ok(())
}
