//! Retry and timeout guards around the attempts of one task.
//!
//! ```text
//! execute-task
//! └─ retry-wrapper
//!    └─ retry-call        (one per attempt)
//!       └─ timeout-guard
//!          └─ ...work spans
//! ```

use crate::error::{AttemptFailure, TaskFailure};
use crate::pool::{JobError, JobHandle};
use crate::task::{RunContext, Task};
use dagspan_core::Attributes;
use dagspan_monitor::{descriptions, names, SpanContext, SpanId, SpanRecorder, SpanStatus};
use std::sync::Arc;
use tracing::info;

/// Runs `task` to completion, recording its `execute-task` span under the
/// pre-allocated `task_span_id`. Returns the number of attempts used.
pub(crate) async fn execute_task(
    task: &Task,
    task_span_id: SpanId,
    pipeline_attributes: &Attributes,
    recorder: &Arc<SpanRecorder>,
) -> Result<u32, TaskFailure> {
    let mut task_span = recorder.start_span_with_id(task_span_id, names::EXECUTE_TASK, None);
    task_span.set_attributes(pipeline_attributes);
    task_span.set_attributes(&task.task_attributes());

    let mut wrapper = recorder.start_span(names::RETRY_WRAPPER, Some(&task_span.context()));
    wrapper.set_attribute("task.max_nr_retries", task.max_nr_retries);
    let wrapper_ctx = wrapper.context();

    let mut last = AttemptFailure::Error {
        kind: "TaskError".into(),
        message: "no attempt was made".into(),
    };

    for retry_nr in 0..task.max_nr_retries {
        match run_attempt(task, &wrapper_ctx, retry_nr, recorder).await {
            Ok(()) => {
                wrapper.end_with_status(SpanStatus::ok());
                task_span.end_with_status(SpanStatus::ok());
                return Ok(retry_nr + 1);
            }
            Err(failure) => {
                info!("║     ✗ {} attempt {} failed: {}", task.id, retry_nr, failure);
                last = failure;
            }
        }
    }

    wrapper.end_with_status(SpanStatus::error(descriptions::REMOTE_CALL_FAILED));
    task_span.end_with_status(SpanStatus::error(task.work.failure_description()));

    Err(TaskFailure::RetriesExhausted {
        attempts: task.max_nr_retries,
        last,
    })
}

/// Records the `execute-task` span of a task that never started.
pub(crate) fn record_blocked_task(
    task: &Task,
    task_span_id: SpanId,
    pipeline_attributes: &Attributes,
    recorder: &Arc<SpanRecorder>,
) {
    let mut span = recorder.start_span_with_id(task_span_id, names::EXECUTE_TASK, None);
    span.set_attributes(pipeline_attributes);
    span.set_attributes(&task.task_attributes());
    span.end_with_status(SpanStatus::error(descriptions::DEPENDENCY_NOT_SATISFIED));
}

async fn run_attempt(
    task: &Task,
    parent: &SpanContext,
    retry_nr: u32,
    recorder: &Arc<SpanRecorder>,
) -> Result<(), AttemptFailure> {
    let mut call = recorder.start_span(names::RETRY_CALL, Some(parent));
    call.set_attribute("run.retry_nr", retry_nr);

    let outcome = run_guarded(task, &call.context(), retry_nr, recorder).await;

    match &outcome {
        Ok(()) => call.end_with_status(SpanStatus::ok()),
        Err(AttemptFailure::Timeout) => call.end_with_status(SpanStatus::error(descriptions::RUN_FAILED)),
        Err(failure) => {
            call.record_exception(failure.kind(), &failure.message());
            call.end_with_status(SpanStatus::error(descriptions::RUN_FAILED));
        }
    }
    outcome
}

/// Spawns the work so an over-budget attempt can be aborted without touching
/// anything else. A timed out attempt only returns once its job has stopped,
/// so the next attempt never overlaps it.
async fn run_guarded(
    task: &Task,
    parent: &SpanContext,
    retry_nr: u32,
    recorder: &Arc<SpanRecorder>,
) -> Result<(), AttemptFailure> {
    let mut guard = recorder.start_span(names::TIMEOUT_GUARD, Some(parent));
    if let Some(timeout) = task.timeout {
        guard.set_attribute("task.timeout_s", timeout.as_secs_f64());
    }

    let ctx = RunContext::new(Arc::clone(recorder), guard.context(), task.id.clone(), retry_nr);
    let work = Arc::clone(&task.work);
    let job_ctx = ctx.clone();
    let mut handle = JobHandle::spawn(async move { work.run(job_ctx).await });

    let joined = match task.timeout {
        Some(budget) => match tokio::time::timeout(budget, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                ctx.cancel();
                handle.cancel();
                if !handle.is_finished() {
                    info!("║     ⏱ {} attempt {} timed out, waiting for it to stop", task.id, retry_nr);
                }
                // joined only to wait for the job to stop
                let _ = (&mut handle).await;
                guard.end_with_status(SpanStatus::error(descriptions::TIMEOUT));
                return Err(AttemptFailure::Timeout);
            }
        },
        None => handle.await,
    };

    guard.end_with_status(SpanStatus::ok());

    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(JobError::Panicked(message)) => Err(AttemptFailure::Panicked(message)),
        Err(JobError::Cancelled) => Err(AttemptFailure::Error {
            kind: "Cancelled".into(),
            message: "attempt was cancelled".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use dagspan_monitor::{Spans, StatusCode};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    async fn run(task: Task) -> (Result<u32, TaskFailure>, Spans) {
        let recorder = SpanRecorder::new();
        let result = execute_task(
            &task,
            SpanRecorder::generate_span_id(),
            &Attributes::new(),
            &recorder,
        )
        .await;
        (result, recorder.spans())
    }

    fn fails_until(succeed_on: u32) -> Task {
        let calls = Arc::new(AtomicU32::new(0));
        Task::from_fn("flaky", move |_ctx| {
            let nr = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if nr + 1 < succeed_on {
                    Err(TaskError::failed(format!("attempt {} failed", nr)))
                } else {
                    Ok(())
                }
            }
        })
    }

    #[tokio::test]
    async fn test_success_on_last_retry() {
        let (result, spans) = run(fails_until(3).max_nr_retries(3)).await;
        assert_eq!(result, Ok(3));

        let calls = spans.filter(&["name"], names::RETRY_CALL).sort_by_start_time();
        assert_eq!(calls.len(), 3);
        let codes: Vec<StatusCode> = calls.iter().map(|s| s.status.status_code).collect();
        assert_eq!(codes, vec![StatusCode::Error, StatusCode::Error, StatusCode::Ok]);
        assert_eq!(calls[2].attribute("run.retry_nr"), Some(&2i64.into()));
        assert_eq!(calls[0].exceptions().count(), 1);

        let task = spans.filter(&["name"], names::EXECUTE_TASK).one().unwrap().clone();
        assert!(task.status.is_ok());
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (result, spans) = run(fails_until(u32::MAX).max_nr_retries(2)).await;
        assert!(matches!(result, Err(TaskFailure::RetriesExhausted { attempts: 2, .. })));

        assert_eq!(spans.filter(&["name"], names::RETRY_CALL).len(), 2);
        let wrapper = spans.filter(&["name"], names::RETRY_WRAPPER).one().unwrap().clone();
        assert_eq!(
            wrapper.status,
            SpanStatus::error(descriptions::REMOTE_CALL_FAILED)
        );
        let task = spans.filter(&["name"], names::EXECUTE_TASK).one().unwrap().clone();
        assert_eq!(task.status, SpanStatus::error(descriptions::REMOTE_CALL_FAILED));
        assert!(spans.contains_path(&[&task, &wrapper], false));
    }

    #[tokio::test]
    async fn test_timeout_cancels_attempt() {
        let task = Task::from_fn("sleepy", |ctx: RunContext| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ctx.log_artefact("never.txt", "unreachable")?;
            Ok::<(), TaskError>(())
        })
        .timeout(Duration::from_millis(50));

        let (result, spans) = run(task).await;
        assert!(matches!(
            result,
            Err(TaskFailure::RetriesExhausted { last: AttemptFailure::Timeout, .. })
        ));

        let guard = spans.filter(&["name"], names::TIMEOUT_GUARD).one().unwrap().clone();
        assert_eq!(guard.status, SpanStatus::error(descriptions::TIMEOUT));
        assert_eq!(guard.attribute("task.timeout_s"), Some(&0.05.into()));

        let call = spans.filter(&["name"], names::RETRY_CALL).one().unwrap().clone();
        assert_eq!(call.status, SpanStatus::error(descriptions::RUN_FAILED));
        assert_eq!(call.exceptions().count(), 0);
        assert!(spans.filter(&["name"], names::ARTEFACT).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timed_out_attempts_do_not_overlap() {
        let running = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let task = {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            Task::from_fn("blocking", move |ctx: RunContext| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // does not yield, so cancellation cannot interrupt it
                    std::thread::sleep(Duration::from_millis(300));
                    running.fetch_sub(1, Ordering::SeqCst);
                    ctx.log_artefact("late.txt", "too late")?;
                    Ok::<(), TaskError>(())
                }
            })
            .timeout(Duration::from_millis(50))
            .max_nr_retries(2)
        };

        let (result, spans) = run(task).await;
        assert!(matches!(
            result,
            Err(TaskFailure::RetriesExhausted { attempts: 2, last: AttemptFailure::Timeout })
        ));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(spans.filter(&["name"], names::ARTEFACT).is_empty());

        let calls = spans.filter(&["name"], names::RETRY_CALL).sort_by_start_time();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].end_time <= calls[1].start_time);
        for call in calls.iter() {
            assert!(call.duration_s() >= 0.3);
            assert_eq!(call.exceptions().count(), 0);
        }
    }

    #[tokio::test]
    async fn test_panic_is_a_failed_attempt() {
        let task = Task::from_fn("panics", |_ctx| async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        })
        .max_nr_retries(2);

        let (result, spans) = run(task).await;
        assert!(matches!(
            result,
            Err(TaskFailure::RetriesExhausted { last: AttemptFailure::Panicked(_), .. })
        ));
        assert_eq!(spans.filter(&["name"], names::RETRY_CALL).len(), 2);
    }

    #[tokio::test]
    async fn test_span_nesting() {
        let task = Task::from_fn("logger", |ctx: RunContext| async move {
            ctx.log_value("x", &1)?;
            Ok::<(), TaskError>(())
        });
        let (_, spans) = run(task).await;

        let get = |name: &str| spans.filter(&["name"], name).one().unwrap().clone();
        let path = [
            get(names::EXECUTE_TASK),
            get(names::RETRY_WRAPPER),
            get(names::RETRY_CALL),
            get(names::TIMEOUT_GUARD),
            get(names::NAMED_VALUE),
        ];
        let refs: Vec<_> = path.iter().collect();
        assert!(spans.contains_path(&refs, false));
    }
}
