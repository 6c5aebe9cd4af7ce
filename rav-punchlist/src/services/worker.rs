//! Durable job worker and in-process scheduler
//!
//! Webhooks enqueue a `pipeline_jobs` row and poke the worker through a
//! [`Notify`]; the worker also polls, so a job enqueued while it was down or
//! a retry whose backoff has elapsed is still picked up. Delivery is
//! at-least-once: a job that crashes mid-run is released after
//! `pipeline.stale_claim_minutes` and runs again.

use rav_common::config::StageLimits;
use rav_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db;
use crate::models::{JobKind, JobStatus, PipelineAction, PipelineJob, TriggerSource};
use crate::services::pipeline::{ActionRequest, PunchListPipeline};

/// Handle for enqueueing work; cheap to clone
#[derive(Clone)]
pub struct JobQueue {
    db: SqlitePool,
    notify: Arc<Notify>,
    max_attempts: i64,
}

impl JobQueue {
    pub fn new(db: SqlitePool, max_attempts: i64) -> Self {
        Self {
            db,
            notify: Arc::new(Notify::new()),
            max_attempts,
        }
    }

    /// Persist a job for one voice message and wake the worker
    pub async fn enqueue_voice_message(&self, voice_message_id: i64) -> Result<i64> {
        let job_id = db::jobs::enqueue(
            &self.db,
            JobKind::ProcessVoiceMessage,
            Some(voice_message_id),
            self.max_attempts,
        )
        .await?;
        info!(job_id, voice_message_id, "Enqueued voice message job");
        self.notify.notify_one();
        Ok(job_id)
    }

    async fn notified(&self) {
        self.notify.notified().await
    }
}

/// Runs queued jobs through the pipeline
pub struct JobWorker {
    queue: JobQueue,
    pipeline: Arc<PunchListPipeline>,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(queue: JobQueue, pipeline: Arc<PunchListPipeline>, poll_interval: Duration) -> Self {
        Self {
            queue,
            pipeline,
            poll_interval,
        }
    }

    async fn execute(&self, job: &PipelineJob) -> std::result::Result<(), String> {
        match job.kind {
            JobKind::ProcessVoiceMessage => {
                let voice_message_id = job
                    .voice_message_id
                    .ok_or_else(|| "job has no voice_message_id".to_string())?;
                let outcome = self
                    .pipeline
                    .run(ActionRequest {
                        action: PipelineAction::ProcessVoiceMessage,
                        trigger: TriggerSource::Worker,
                        limits: self.pipeline.settings().default_limits,
                        voice_message_id: Some(voice_message_id),
                    })
                    .await
                    .map_err(|e| e.to_string())?;

                if outcome.report.is_clean() {
                    Ok(())
                } else {
                    Err(format!("run {} finished with errors", outcome.run_id))
                }
            }
        }
    }

    /// Claim and run a single job; `None` when the queue has nothing runnable
    pub async fn run_once(&self) -> Result<Option<JobStatus>> {
        let db = &self.queue.db;
        let Some(job) = db::jobs::claim_next(db).await? else {
            return Ok(None);
        };

        info!(job_id = job.id, kind = %job.kind, attempt = job.attempts, "Running job");

        let status = match self.execute(&job).await {
            Ok(()) => {
                db::jobs::mark_done(db, job.id).await?;
                JobStatus::Done
            }
            Err(e) => {
                let backoff = self.pipeline.settings().job_retry_backoff_secs.max(0) as u64;
                let status = db::jobs::mark_retry_or_failed(db, job.id, &e, backoff).await?;
                warn!(job_id = job.id, error = %e, next = %status, "Job did not complete");
                status
            }
        };

        Ok(Some(status))
    }

    /// Run jobs until none is runnable; returns how many ran
    pub async fn drain(&self) -> Result<usize> {
        let mut ran = 0;
        while self.run_once().await?.is_some() {
            ran += 1;
        }
        Ok(ran)
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(poll_secs = self.poll_interval.as_secs(), "Job worker started");

        let stale_minutes = self.pipeline.settings().stale_claim_minutes;
        match db::jobs::release_stale(&self.queue.db, stale_minutes).await {
            Ok(0) => {}
            Ok(n) => info!(released = n, "Released stale jobs"),
            Err(e) => warn!(error = %e, "Failed to release stale jobs"),
        }

        loop {
            if let Err(e) = self.drain().await {
                error!(error = %e, "Job worker pass failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Job worker stopped");
    }
}

/// Run `process_pipeline` with the cron limits every `interval`
pub async fn run_scheduler(
    pipeline: Arc<PunchListPipeline>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "Pipeline scheduler started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; skip it so startup is quiet
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let request = ActionRequest {
                    action: PipelineAction::ProcessPipeline,
                    trigger: TriggerSource::Scheduler,
                    limits: StageLimits::CRON,
                    voice_message_id: None,
                };
                if let Err(e) = pipeline.run(request).await {
                    error!(error = %e, "Scheduled pipeline run failed");
                }
            }
        }
    }

    info!("Pipeline scheduler stopped");
}
