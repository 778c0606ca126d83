//! Job management endpoints: thin translation onto [`SchedulerService`] calls.
//!
//! [`SchedulerService`]: cronhook_scheduler::SchedulerService

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use cronhook_core::{Job, JobId, JobStatus, RegisterJob};
use serde::Serialize;

use super::error::ApiResult;
use crate::app::AppState;

/// A job plus its derived display status.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub status: JobStatus,
}

impl JobView {
    fn at(job: Job, now: DateTime<Utc>) -> Self {
        let status = job.status(now);
        Self { job, status }
    }
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job: JobView,
    pub status_code: u16,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// GET /jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<JobView>>> {
    let now = state.scheduler.now();
    let jobs = state.scheduler.list()?;
    Ok(Json(jobs.into_iter().map(|j| JobView::at(j, now)).collect()))
}

/// POST /jobs: 201 with the stored job, 400 when validation fails.
pub async fn register_job(
    State(state): State<Arc<AppState>>,
    Json(input): Json<RegisterJob>,
) -> ApiResult<(StatusCode, Json<JobView>)> {
    let job = state.scheduler.register(input)?;
    Ok((
        StatusCode::CREATED,
        Json(JobView::at(job, state.scheduler.now())),
    ))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<JobView>> {
    let job = state.scheduler.get(JobId(id))?;
    Ok(Json(JobView::at(job, state.scheduler.now())))
}

/// DELETE /jobs/{id}
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.scheduler.delete(JobId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /jobs/{id}/pause
pub async fn pause_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<JobView>> {
    let job = state.scheduler.pause(JobId(id))?;
    Ok(Json(JobView::at(job, state.scheduler.now())))
}

/// POST /jobs/{id}/resume: 409 when the job has expired.
pub async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<JobView>> {
    let job = state.scheduler.resume(JobId(id))?;
    Ok(Json(JobView::at(job, state.scheduler.now())))
}

/// POST /jobs/{id}/trigger: fires the webhook now and reports the outcome.
pub async fn trigger_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<TriggerResponse>> {
    let (job, outcome) = state.scheduler.trigger(JobId(id)).await?;
    Ok(Json(TriggerResponse {
        job: JobView::at(job, state.scheduler.now()),
        status_code: outcome.status_code,
        error: outcome.error,
        duration_ms: outcome.duration.as_millis() as u64,
    }))
}
