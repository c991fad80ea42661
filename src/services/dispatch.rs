use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::services::demurrage::DemurrageProcessor;
use crate::services::event_payment::EventProcessor;
use crate::services::scheduler::{FiredJob, JobKind};
use crate::utils::logging::{log_job_error, log_job_event};

/// Processors the dispatcher routes fired jobs to.
pub struct JobHandlers {
    pub events: Arc<EventProcessor>,
    pub demurrage: Arc<DemurrageProcessor>,
}

impl JobHandlers {
    /// Runs one fired job to completion. Errors are logged, not returned.
    pub async fn handle(&self, job: FiredJob) {
        match job {
            FiredJob::Event(key) => {
                log_job_event(key, "fired");
                let result = match key.kind {
                    JobKind::Payment => self
                        .events
                        .run_payment(key.event_id)
                        .await
                        .map(|outcome| format!("{outcome:?}")),
                    JobKind::Reminder => self
                        .events
                        .run_reminder(key.event_id)
                        .await
                        .map(|outcome| format!("{outcome:?}")),
                };
                match result {
                    Ok(outcome) => log_job_event(key, &format!("done: {outcome}")),
                    Err(e) => log_job_error(key, &e.to_string()),
                }
            }
            FiredJob::Demurrage => match self.demurrage.run().await {
                Ok(outcome) => log_job_event("demurrage", &format!("done: {outcome:?}")),
                Err(e) => log_job_error("demurrage", &e.to_string()),
            },
        }
    }
}

/// Consumes fired jobs one at a time until every sender is dropped.
pub async fn run_dispatcher(mut fired: mpsc::UnboundedReceiver<FiredJob>, handlers: JobHandlers) {
    info!("Job dispatcher started");
    while let Some(job) = fired.recv().await {
        handlers.handle(job).await;
    }
    info!("Job dispatcher stopped");
}
