//! Pause alerting. Delivery channels (e-mail, chat) are not wired up; the
//! alert is a structured warning that log shippers can match on.

use cronhook_scheduler::{JobEvent, JobListener, PauseReason};
use tracing::warn;

pub struct PauseAlert;

impl JobListener for PauseAlert {
    fn on_event(&self, event: &JobEvent) {
        if let JobEvent::Paused { job, reason } = event {
            let reason = match reason {
                PauseReason::Requested => "requested",
                PauseReason::FailureThreshold => "failure_threshold",
            };
            warn!(
                alert = "job_paused",
                job_id = %job.id,
                title = %job.title,
                url = %job.webhook_url,
                failures = job.failure_count,
                reason,
                "job paused"
            );
        }
    }
}
