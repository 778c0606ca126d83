use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use cronhook_core::CronhookConfig;
use cronhook_scheduler::SchedulerService;
use tower_http::cors::CorsLayer;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CronhookConfig,
    pub scheduler: Arc<SchedulerService>,
}

impl AppState {
    pub fn new(config: CronhookConfig, scheduler: Arc<SchedulerService>) -> Self {
        Self { config, scheduler }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{health, history, jobs};

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/jobs", get(jobs::list_jobs).post(jobs::register_job))
        .route("/jobs/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/jobs/{id}/pause", post(jobs::pause_job))
        .route("/jobs/{id}/resume", post(jobs::resume_job))
        .route("/jobs/{id}/trigger", post(jobs::trigger_job))
        .route("/jobs/{id}/history", get(history::job_history))
        .route("/history", get(history::global_history))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
