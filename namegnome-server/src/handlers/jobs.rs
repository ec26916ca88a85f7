use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use namegnome_model::{JobEvent, JobState};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

fn event_name(event: &JobEvent) -> &'static str {
    match event {
        JobEvent::Progress { .. } => "progress",
        JobEvent::LlmToken { .. } => "llm_token",
        JobEvent::Warning { .. } => "warning",
        JobEvent::Done { .. } => "done",
    }
}

/// SSE stream of job events. Events are hints: clients still fetch the
/// buffered result from the status endpoint once `done` arrives.
pub async fn job_events_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let job = state
        .jobs
        .get(&job_id)
        .ok_or_else(|| AppError::not_found(format!("unknown job {job_id}")))?;

    let status = job.status();
    let mut receiver = job.subscribe();

    let stream = async_stream::stream! {
        if status.state != JobState::Running {
            // Late subscriber: the job already finished, replay the verdict.
            let done = JobEvent::Done { state: status.state };
            if let Ok(event) = Event::default().event(event_name(&done)).json_data(&done) {
                yield Ok::<Event, Infallible>(event);
            }
            return;
        }
        loop {
            match receiver.recv().await {
                Ok(job_event) => {
                    let terminal = matches!(job_event, JobEvent::Done { .. });
                    match Event::default().event(event_name(&job_event)).json_data(&job_event) {
                        Ok(event) => yield Ok::<Event, Infallible>(event),
                        Err(err) => warn!(error = %err, "failed to encode job event"),
                    }
                    if terminal {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "job event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

pub async fn job_status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let job = state
        .jobs
        .get(&job_id)
        .ok_or_else(|| AppError::not_found(format!("unknown job {job_id}")))?;
    Ok(Json(json!({
        "status": job.status(),
        "result": job.result(),
    })))
}
