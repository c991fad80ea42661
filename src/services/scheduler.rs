//! Keeps the in-process job scheduler in step with the events table.
//!
//! Every active event owns at most two one-shot jobs: a payment job at its
//! next occurrence and a reminder job `reminder_minutes` earlier. Arming an
//! event always cancels both first, so re-arming after an edit is safe.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::models::Event;
use crate::services::recurrence::next_for_event;
use crate::utils::logging::{log_job_error, log_job_event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Payment,
    Reminder,
}

/// Identifies one scheduled job; rendered as `payment:<id>` or `reminder:<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub kind: JobKind,
    pub event_id: i64,
}

impl JobKey {
    pub fn payment(event_id: i64) -> Self {
        Self { kind: JobKind::Payment, event_id }
    }

    pub fn reminder(event_id: i64) -> Self {
        Self { kind: JobKind::Reminder, event_id }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            JobKind::Payment => write!(f, "payment:{}", self.event_id),
            JobKind::Reminder => write!(f, "reminder:{}", self.event_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiredJob {
    Event(JobKey),
    Demurrage,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job runner error: {0}")]
    Runner(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The timer backend. Implementations fire each job at most once.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn schedule_once(&self, key: JobKey, run_at: DateTime<Utc>) -> Result<(), SchedulerError>;
    /// Cancels `key`. Unknown keys are not an error.
    async fn cancel(&self, key: &JobKey) -> Result<(), SchedulerError>;
    async fn armed(&self) -> Vec<(JobKey, DateTime<Utc>)>;
}

#[derive(Debug, Clone, Copy)]
struct ArmedJob {
    job_id: Uuid,
    run_at: DateTime<Utc>,
}

/// [`JobRunner`] on top of `tokio_cron_scheduler`.
///
/// Fired jobs are not executed here; their keys are sent over `fired` to a
/// single consumer.
pub struct CronJobRunner {
    scheduler: JobScheduler,
    jobs: Arc<Mutex<HashMap<JobKey, ArmedJob>>>,
    fired: mpsc::UnboundedSender<FiredJob>,
}

impl CronJobRunner {
    pub async fn new(fired: mpsc::UnboundedSender<FiredJob>) -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new().await.map_err(runner_error)?;
        Ok(Self {
            scheduler,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            fired,
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.scheduler.start().await.map_err(runner_error)
    }

    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await.map_err(runner_error)
    }

    pub async fn add_demurrage_job(&self, cron: &str) -> Result<Uuid, SchedulerError> {
        let fired = self.fired.clone();
        let job = Job::new_async(cron, move |_uuid, _l| {
            let fired = fired.clone();
            Box::pin(async move {
                if fired.send(FiredJob::Demurrage).is_err() {
                    warn!("Dispatcher is gone, dropping demurrage trigger");
                }
            })
        })
        .map_err(runner_error)?;

        let job_id = self.scheduler.add(job).await.map_err(runner_error)?;
        log_job_event("demurrage", &format!("cron '{cron}'"));
        Ok(job_id)
    }
}

impl CronJobRunner {
    async fn remove_tracked(
        &self,
        jobs: &mut HashMap<JobKey, ArmedJob>,
        key: &JobKey,
    ) -> Result<(), SchedulerError> {
        if let Some(armed) = jobs.get(key).copied() {
            self.scheduler.remove(&armed.job_id).await.map_err(runner_error)?;
            jobs.remove(key);
            debug!("Cancelled {} ({})", key, armed.job_id);
        }
        Ok(())
    }
}

#[async_trait]
impl JobRunner for CronJobRunner {
    async fn schedule_once(
        &self,
        key: JobKey,
        run_at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        // Held until the new job is tracked, so concurrent arms of one key
        // cannot leave an untracked job behind.
        let mut tracked = self.jobs.lock().await;
        self.remove_tracked(&mut tracked, &key).await?;

        let delay = (run_at - Utc::now()).to_std().unwrap_or_default();
        let jobs = self.jobs.clone();
        let fired = self.fired.clone();

        let job = Job::new_one_shot_async(delay, move |job_id, _l| {
            let jobs = jobs.clone();
            let fired = fired.clone();
            Box::pin(async move {
                let mut jobs = jobs.lock().await;
                if jobs.get(&key).map(|armed| armed.job_id) != Some(job_id) {
                    debug!("Job {} ({}) was replaced, not firing", key, job_id);
                    return;
                }
                jobs.remove(&key);
                drop(jobs);
                if fired.send(FiredJob::Event(key)).is_err() {
                    warn!("Dispatcher is gone, dropping job {}", key);
                }
            })
        })
        .map_err(runner_error)?;

        let job_id = self.scheduler.add(job).await.map_err(runner_error)?;
        tracked.insert(key, ArmedJob { job_id, run_at });
        debug!("Scheduled {} at {} ({})", key, run_at, job_id);
        Ok(())
    }

    async fn cancel(&self, key: &JobKey) -> Result<(), SchedulerError> {
        let mut tracked = self.jobs.lock().await;
        self.remove_tracked(&mut tracked, key).await
    }

    async fn armed(&self) -> Vec<(JobKey, DateTime<Utc>)> {
        let jobs = self.jobs.lock().await;
        let mut armed: Vec<_> = jobs.iter().map(|(key, job)| (*key, job.run_at)).collect();
        armed.sort_by_key(|(key, run_at)| (*run_at, key.event_id));
        armed
    }
}

fn runner_error(error: impl fmt::Display) -> SchedulerError {
    SchedulerError::Runner(error.to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RearmSummary {
    pub armed: usize,
    pub idle: usize,
    pub failed: usize,
}

pub struct EventScheduler {
    runner: Arc<dyn JobRunner>,
    pool: SqlitePool,
    timezone: FixedOffset,
    // One arm or disarm at a time, so an event's two jobs always come from
    // the same computation.
    arming: Mutex<()>,
}

impl EventScheduler {
    pub fn new(runner: Arc<dyn JobRunner>, pool: SqlitePool, timezone: FixedOffset) -> Self {
        Self {
            runner,
            pool,
            timezone,
            arming: Mutex::new(()),
        }
    }

    pub fn timezone(&self) -> FixedOffset {
        self.timezone
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.timezone)
    }

    pub async fn arm(
        &self,
        event: &Event,
    ) -> Result<Option<DateTime<FixedOffset>>, SchedulerError> {
        self.arm_at(event, self.now()).await
    }

    /// Replaces the event's jobs with ones computed from `now`.
    ///
    /// Returns the next payment time, or `None` when nothing was scheduled.
    pub async fn arm_at(
        &self,
        event: &Event,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<DateTime<FixedOffset>>, SchedulerError> {
        let _arming = self.arming.lock().await;
        self.cancel_both(event.id).await?;

        if !event.is_active {
            debug!("Event {} is inactive, not arming", event.id);
            return Ok(None);
        }
        if event.schedule().is_none() {
            warn!("Event {} has an inconsistent schedule, not arming", event.id);
            return Ok(None);
        }

        let now = now.with_timezone(&self.timezone);
        let Some(next) = next_for_event(event, now) else {
            debug!("Event {} has no future occurrence", event.id);
            return Ok(None);
        };

        let payment = JobKey::payment(event.id);
        self.runner
            .schedule_once(payment, next.with_timezone(&Utc))
            .await?;
        log_job_event(payment, &format!("armed for {}", next.to_rfc3339()));

        if event.reminder_minutes > 0 {
            let remind_at = next - Duration::minutes(event.reminder_minutes);
            let reminder = JobKey::reminder(event.id);
            if remind_at > now {
                self.runner
                    .schedule_once(reminder, remind_at.with_timezone(&Utc))
                    .await?;
                log_job_event(reminder, &format!("armed for {}", remind_at.to_rfc3339()));
            } else {
                debug!("Reminder time for event {} already passed", event.id);
            }
        }

        Ok(Some(next))
    }

    pub async fn arm_by_id(
        &self,
        event_id: i64,
    ) -> Result<Option<DateTime<FixedOffset>>, SchedulerError> {
        match Event::find_by_id(&self.pool, event_id).await? {
            Some(event) => self.arm(&event).await,
            None => {
                self.disarm(event_id).await?;
                Ok(None)
            }
        }
    }

    pub async fn disarm(&self, event_id: i64) -> Result<(), SchedulerError> {
        let _arming = self.arming.lock().await;
        self.cancel_both(event_id).await
    }

    pub async fn disarm_activity(&self, activity_id: i64) -> Result<usize, SchedulerError> {
        let events = Event::list_for_activity(&self.pool, activity_id).await?;
        for event in &events {
            self.disarm(event.id).await?;
        }
        Ok(events.len())
    }

    async fn cancel_both(&self, event_id: i64) -> Result<(), SchedulerError> {
        self.runner.cancel(&JobKey::payment(event_id)).await?;
        self.runner.cancel(&JobKey::reminder(event_id)).await?;
        Ok(())
    }

    pub async fn rearm_all(&self) -> Result<RearmSummary, SchedulerError> {
        self.rearm_all_at(self.now()).await
    }

    /// Arms every active event. Per-event failures are logged and counted.
    pub async fn rearm_all_at(
        &self,
        now: DateTime<FixedOffset>,
    ) -> Result<RearmSummary, SchedulerError> {
        let events = Event::list_active(&self.pool).await?;
        let mut summary = RearmSummary::default();

        for event in &events {
            match self.arm_at(event, now).await {
                Ok(Some(_)) => summary.armed += 1,
                Ok(None) => summary.idle += 1,
                Err(e) => {
                    log_job_error(JobKey::payment(event.id), &e.to_string());
                    summary.failed += 1;
                }
            }
        }

        log_job_event(
            "rearm",
            &format!(
                "{} armed, {} idle, {} failed",
                summary.armed, summary.idle, summary.failed
            ),
        );
        Ok(summary)
    }

    pub async fn armed(&self) -> Vec<(JobKey, DateTime<Utc>)> {
        self.runner.armed().await
    }
}
