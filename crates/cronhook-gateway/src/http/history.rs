use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use cronhook_core::{HistorySample, JobId};
use serde::Deserialize;

use super::error::ApiResult;
use crate::app::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1_000;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// GET /jobs/{id}/history?limit=N: most recent first.
pub async fn job_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<HistorySample>>> {
    Ok(Json(
        state
            .scheduler
            .history_for_job(JobId(id), query.limit())?,
    ))
}

/// GET /history?limit=N: most recent first, across all jobs.
pub async fn global_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<HistorySample>>> {
    Ok(Json(state.scheduler.history(query.limit())?))
}
