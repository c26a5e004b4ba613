//! Command API handlers
//!
//! REST lifecycle management over the shared registry. `POST /commands`
//! is asynchronous (registers the job, spawns the run, answers `{id}`);
//! `POST /exec` is the synchronous legacy shape (runs to completion and
//! answers `{id, log}`). No handler mutates job state except cancel.
//!
//! Environment precedence on created jobs matches the session channel:
//! the request wins, except server-scoped keys prefixed `CAAS_`.

use crate::api::error::{ApiError, ApiResult};
use crate::job::{Job, JobError};
use crate::metadata::{CommandMetadata, STATUS_CANCELLED, STATUS_FAILURE, STATUS_SUCCESS};
use crate::sink::{MultiSink, OutputSink};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use caas_core::domain::command::CommandRequest;
use caas_core::domain::job::JobStatus;
use caas_core::domain::log::LogRecord;
use caas_core::dto::{CommandDetail, CommandList, CreatedResponse, ExecResponse};
use std::sync::Arc;
use tracing::info;

pub const NO_COMMANDS_RUNNING: &str = "no commands running";

/// GET /commands, recent jobs newest first.
pub async fn list_commands(State(state): State<AppState>) -> Json<CommandList> {
    let commands = state
        .registry
        .list()
        .iter()
        .map(|job| job.summary())
        .collect();
    Json(CommandList {
        total: state.counters.snapshot().total,
        commands,
    })
}

/// POST /commands. Creates a job and runs it asynchronously.
pub async fn create_command(
    State(state): State<AppState>,
    Json(command): Json<CommandRequest>,
) -> ApiResult<Json<CreatedResponse>> {
    let (job, metadata) = prepare_job(&state, command).await?;
    let id = job.id().to_string();

    tokio::spawn(async move {
        let result = job.run().await;
        finish_metadata(&job, &metadata, result).await;
    });

    Ok(Json(CreatedResponse { id }))
}

/// POST /commands/{id}/create. Same as create, id taken from the path.
pub async fn create_command_with_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut command): Json<CommandRequest>,
) -> ApiResult<Json<CreatedResponse>> {
    command.id = id;
    create_command(State(state), Json(command)).await
}

/// POST /exec. Synchronous execute; answers once the job terminates.
pub async fn exec_command(
    State(state): State<AppState>,
    Json(command): Json<CommandRequest>,
) -> ApiResult<Json<ExecResponse>> {
    let (job, metadata) = prepare_job(&state, command).await?;

    let result = job.run().await;
    finish_metadata(&job, &metadata, result).await;

    let mut log = metadata
        .read_log()
        .await
        .map_err(|e| ApiError::InternalError(format!("failed to read log: {e}")))?;
    if log.ends_with('\n') {
        log.pop();
    }

    Ok(Json(ExecResponse {
        id: job.id().to_string(),
        log,
    }))
}

/// GET /commands/{id}
pub async fn get_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CommandDetail>> {
    let job = find_job(&state, &id)?;
    Ok(Json(job.detail()))
}

/// GET /commands/{id}/log. Non-destructive snapshot of the ring.
pub async fn get_command_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<LogRecord>>> {
    let job = find_job(&state, &id)?;
    Ok(Json(job.log().snapshot()))
}

/// POST /commands/{id}/cancel
pub async fn cancel_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let job = find_job(&state, &id)?;
    info!(id = %id, "cancel requested over REST");
    match job.cancel() {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(JobError::NotRunning) => Err(ApiError::BadRequest("job is not running".to_string())),
        Err(e) => Err(ApiError::InternalError(e.to_string())),
    }
}

/// GET /commands/latest. The newest still-running job.
pub async fn latest_command(State(state): State<AppState>) -> Response {
    match state.registry.latest_running() {
        Some(job) => Json(job.detail()).into_response(),
        None => (StatusCode::OK, NO_COMMANDS_RUNNING).into_response(),
    }
}

/// GET /commands/latest/log
pub async fn latest_command_log(State(state): State<AppState>) -> Response {
    match state.registry.latest_running() {
        Some(job) => Json(job.log().snapshot()).into_response(),
        None => (StatusCode::OK, NO_COMMANDS_RUNNING).into_response(),
    }
}

fn find_job(state: &AppState, id: &str) -> ApiResult<Arc<Job>> {
    state
        .registry
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("command {id} not found")))
}

/// Applies server defaults, registers the job, and wires its output
/// into the metadata log file.
async fn prepare_job(
    state: &AppState,
    mut command: CommandRequest,
) -> ApiResult<(Arc<Job>, Arc<CommandMetadata>)> {
    if command.script.is_empty() {
        return Err(ApiError::BadRequest("script is required".to_string()));
    }

    let config = &state.config;
    if command.id.is_empty() {
        command.id = uuid::Uuid::new_v4().to_string();
    }
    if command.shell.is_empty() {
        command.shell = config.shell.clone();
    }
    if command.workdirbase.is_empty() {
        command.workdirbase = config.workdir.to_string_lossy().into_owned();
    }
    for (key, value) in &config.environment {
        if key.starts_with("CAAS_") || !command.environment.contains_key(key) {
            command.environment.insert(key.clone(), value.clone());
        }
    }
    if command.timeout == 0 && config.timeout_secs > 0 {
        command.timeout = config.timeout_secs * 1000;
    }

    let job = Job::new(command);
    state.counters.track(&job);
    state.registry.insert(job.clone());

    let metadata = CommandMetadata::create(&config.metadata_dir, job.id())
        .await
        .map_err(|e| ApiError::InternalError(format!("failed to create metadata dir: {e}")))?;
    metadata.write_script(&job.command().script).await;
    metadata.write_env(&job.command().environment).await;
    metadata.write_start_at().await;

    let log_sink: Arc<dyn OutputSink> = Arc::new(
        metadata
            .log_sink()
            .await
            .map_err(|e| ApiError::InternalError(format!("failed to open log file: {e}")))?,
    );
    job.set_stdout(Arc::new(MultiSink::new(vec![log_sink.clone()])));
    job.set_stderr(Arc::new(MultiSink::new(vec![log_sink])));

    Ok((job, Arc::new(metadata)))
}

/// Terminal metadata writes, mirroring the session channel.
async fn finish_metadata(job: &Job, metadata: &CommandMetadata, result: Result<(), JobError>) {
    match result {
        Ok(()) => {
            metadata.write_succeed_at().await;
            metadata.write_status(STATUS_SUCCESS).await;
        }
        Err(err) => {
            metadata.write_error(&err.to_string()).await;
            if job.status() == JobStatus::Cancelled {
                metadata.write_status(STATUS_CANCELLED).await;
            } else {
                metadata.write_failed_at().await;
                metadata.write_status(STATUS_FAILURE).await;
            }
        }
    }
}
