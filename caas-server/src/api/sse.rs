//! Server-sent log streaming
//!
//! One SSE event per log-ring pop, polled once a second, capped at ten
//! minutes per connection. The SSE stream is the exclusive destructive
//! consumer of the ring; snapshot reads go through the log endpoint.

use crate::api::command::NO_COMMANDS_RUNNING;
use crate::api::error::{ApiError, ApiResult};
use crate::job::Job;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures_util::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_STREAM_DURATION: Duration = Duration::from_secs(600);

/// GET /commands/{id}/log/sse
pub async fn command_log_sse(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let job = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("command {id} not found")))?;
    Ok(log_stream(job).into_response())
}

/// GET /commands/latest/log/sse
pub async fn latest_command_log_sse(State(state): State<AppState>) -> Response {
    match state.registry.latest_running() {
        Some(job) => log_stream(job).into_response(),
        None => (StatusCode::OK, NO_COMMANDS_RUNNING).into_response(),
    }
}

/// Streams ring pops as SSE events until the job is terminal and
/// drained, or the per-connection cap expires.
fn log_stream(job: Arc<Job>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let deadline = Instant::now() + MAX_STREAM_DURATION;

    let stream = stream::unfold(job, move |job| async move {
        loop {
            if Instant::now() >= deadline {
                return None;
            }
            if let Some(record) = job.log().pop() {
                let event = Event::default()
                    .json_data(&record)
                    .unwrap_or_else(|_| Event::default());
                return Some((Ok::<_, Infallible>(event), job));
            }
            if !job.is_running() {
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
