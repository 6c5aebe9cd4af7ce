//! Punch-list pipeline orchestrator
//!
//! # Stages
//! TRANSCRIBE → EXTRACT → ASSIGN → DISPATCH → REMIND
//!
//! Each stage lives in its own `stage_*` module and processes at most its
//! limit of rows in the state it expects, claiming each row before any
//! external call. Every item runs inside its own error boundary, and a
//! failing stage never stops the stages after it in a `process_pipeline`
//! sweep. The orchestrator keeps no state between runs.

use rav_common::config::{PipelineConfig, StageLimits};
use rav_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::models::{PipelineAction, TriggerSource};
use crate::services::extraction::TaskExtractor;
use crate::services::messaging::MessageGateway;
use crate::services::transcription::Transcriber;

mod report;
mod stage_assign;
mod stage_dispatch;
mod stage_extract;
mod stage_remind;
mod stage_transcribe;

pub use report::{ActionReport, ItemOutcome, ItemResult, PipelineReport, StageReport};

pub const STAGE_TRANSCRIBE: &str = "transcribe";
pub const STAGE_EXTRACT: &str = "extract";
pub const STAGE_ASSIGN: &str = "assign";
pub const STAGE_DISPATCH: &str = "dispatch";
pub const STAGE_REMIND: &str = "remind";

/// Rows a stage may touch in one call
#[derive(Debug, Clone, Copy)]
pub(crate) struct StageScope {
    pub limit: u32,
    /// Restrict the stage to rows belonging to one voice message
    pub voice_message_id: Option<i64>,
}

impl StageScope {
    fn batch(limit: u32) -> Self {
        Self {
            limit,
            voice_message_id: None,
        }
    }
}

/// Per-message limits for `process_voice_message`
const SINGLE_MESSAGE_ITEM_LIMIT: u32 = 50;

/// One orchestrator action as requested by a caller
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: PipelineAction,
    pub trigger: TriggerSource,
    pub limits: StageLimits,
    pub voice_message_id: Option<i64>,
}

/// Finished action, as recorded in `pipeline_runs`
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub run_id: String,
    pub action: PipelineAction,
    pub trigger: TriggerSource,
    pub duration_ms: u64,
    pub report: ActionReport,
}

/// Batch runner for the punch-list stages
///
/// Adapters are injected; nothing here reaches for global clients.
pub struct PunchListPipeline {
    db: SqlitePool,
    transcriber: Arc<dyn Transcriber>,
    extractor: Arc<dyn TaskExtractor>,
    gateway: Arc<dyn MessageGateway>,
    settings: PipelineConfig,
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

impl PunchListPipeline {
    pub fn new(
        db: SqlitePool,
        transcriber: Arc<dyn Transcriber>,
        extractor: Arc<dyn TaskExtractor>,
        gateway: Arc<dyn MessageGateway>,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            db,
            transcriber,
            extractor,
            gateway,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineConfig {
        &self.settings
    }

    pub fn transcriber_configured(&self) -> bool {
        self.transcriber.is_configured()
    }

    pub fn gateway_configured(&self) -> bool {
        self.gateway.is_configured()
    }

    pub fn extractor_name(&self) -> &str {
        self.extractor.service_name()
    }

    /// Run one stage, timing it
    async fn timed<F>(stage: &'static str, fut: F) -> Result<StageReport>
    where
        F: std::future::Future<Output = Result<StageReport>>,
    {
        let start = Instant::now();
        let mut report = fut.await?;
        report.duration_ms = elapsed_ms(start);
        info!(
            stage,
            processed = report.processed,
            skipped = report.skipped,
            errors = report.errors,
            duration_ms = report.duration_ms,
            "Stage finished"
        );
        Ok(report)
    }

    /// Run one stage, turning a stage-level failure into an aborted report
    async fn guarded<F>(stage: &'static str, fut: F) -> StageReport
    where
        F: std::future::Future<Output = Result<StageReport>>,
    {
        match Self::timed(stage, fut).await {
            Ok(report) => report,
            Err(e) => {
                warn!(stage, error = %e, "Stage failed, continuing with next stage");
                StageReport::aborted(stage, e)
            }
        }
    }

    pub async fn process_transcriptions(&self, limit: u32) -> Result<StageReport> {
        Self::timed(STAGE_TRANSCRIBE, self.stage_transcribe(StageScope::batch(limit))).await
    }

    pub async fn process_extractions(&self, limit: u32) -> Result<StageReport> {
        Self::timed(STAGE_EXTRACT, self.stage_extract(StageScope::batch(limit))).await
    }

    pub async fn process_assignments(&self, limit: u32) -> Result<StageReport> {
        Self::timed(STAGE_ASSIGN, self.stage_assign(StageScope::batch(limit))).await
    }

    pub async fn process_sms(&self, limit: u32) -> Result<StageReport> {
        Self::timed(STAGE_DISPATCH, self.stage_dispatch(StageScope::batch(limit))).await
    }

    pub async fn send_reminders(&self, limit: u32) -> Result<StageReport> {
        Self::timed(STAGE_REMIND, self.stage_remind(limit)).await
    }

    /// All five stages in order, each isolated from the others
    pub async fn process_pipeline(&self, limits: &StageLimits) -> PipelineReport {
        let start = Instant::now();
        let stages = vec![
            Self::guarded(
                STAGE_TRANSCRIBE,
                self.stage_transcribe(StageScope::batch(limits.transcriptions)),
            )
            .await,
            Self::guarded(STAGE_EXTRACT, self.stage_extract(StageScope::batch(limits.extractions)))
                .await,
            Self::guarded(STAGE_ASSIGN, self.stage_assign(StageScope::batch(limits.assignments)))
                .await,
            Self::guarded(STAGE_DISPATCH, self.stage_dispatch(StageScope::batch(limits.sms))).await,
            Self::guarded(STAGE_REMIND, self.stage_remind(limits.reminders)).await,
        ];
        PipelineReport::from_stages(stages, elapsed_ms(start))
    }

    /// Drive one voice message as far as it will go
    ///
    /// Runs transcribe, extract, assign and dispatch restricted to rows from
    /// this message. Stages that find nothing to do report zero counts, so
    /// calling this again after a partial failure resumes where it stopped.
    pub async fn process_voice_message(&self, voice_message_id: i64) -> Result<PipelineReport> {
        if db::voice_messages::get_voice_message(&self.db, voice_message_id)
            .await?
            .is_none()
        {
            return Err(Error::NotFound(format!("Voice message {}", voice_message_id)));
        }

        let start = Instant::now();
        let one = |limit| StageScope {
            limit,
            voice_message_id: Some(voice_message_id),
        };

        let stages = vec![
            Self::guarded(STAGE_TRANSCRIBE, self.stage_transcribe(one(1))).await,
            Self::guarded(STAGE_EXTRACT, self.stage_extract(one(1))).await,
            Self::guarded(STAGE_ASSIGN, self.stage_assign(one(SINGLE_MESSAGE_ITEM_LIMIT))).await,
            Self::guarded(STAGE_DISPATCH, self.stage_dispatch(one(SINGLE_MESSAGE_ITEM_LIMIT))).await,
        ];
        Ok(PipelineReport::from_stages(stages, elapsed_ms(start)))
    }

    async fn dispatch_action(&self, request: &ActionRequest) -> Result<ActionReport> {
        let limits = &request.limits;
        let report = match request.action {
            PipelineAction::ProcessTranscriptions => {
                ActionReport::Stage(self.process_transcriptions(limits.transcriptions).await?)
            }
            PipelineAction::ProcessExtractions => {
                ActionReport::Stage(self.process_extractions(limits.extractions).await?)
            }
            PipelineAction::ProcessAssignments => {
                ActionReport::Stage(self.process_assignments(limits.assignments).await?)
            }
            PipelineAction::ProcessSms => ActionReport::Stage(self.process_sms(limits.sms).await?),
            PipelineAction::SendReminders => {
                ActionReport::Stage(self.send_reminders(limits.reminders).await?)
            }
            PipelineAction::ProcessPipeline => {
                ActionReport::Pipeline(self.process_pipeline(limits).await)
            }
            PipelineAction::ProcessVoiceMessage => {
                let id = request.voice_message_id.ok_or_else(|| {
                    Error::InvalidInput("voice_message_id is required for process_voice_message".to_string())
                })?;
                ActionReport::Pipeline(self.process_voice_message(id).await?)
            }
        };
        Ok(report)
    }

    /// Run an action and record it in the run history
    ///
    /// Validation errors are returned before a run row is written.
    pub async fn run(&self, request: ActionRequest) -> Result<ActionOutcome> {
        if request.action == PipelineAction::ProcessVoiceMessage && request.voice_message_id.is_none() {
            return Err(Error::InvalidInput(
                "voice_message_id is required for process_voice_message".to_string(),
            ));
        }

        let run_id = Uuid::new_v4().to_string();
        let start = Instant::now();
        info!(
            run_id = %run_id,
            action = %request.action,
            trigger = %request.trigger,
            "Pipeline run started"
        );

        if let Err(e) = db::runs::record_start(&self.db, &run_id, request.trigger, request.action).await {
            warn!(run_id = %run_id, error = %e, "Failed to record run start");
        }

        let result = self.dispatch_action(&request).await;
        let duration_ms = elapsed_ms(start);

        let (success, report_json) = match &result {
            Ok(report) => (
                report.is_clean(),
                serde_json::to_value(report).unwrap_or(serde_json::Value::Null),
            ),
            Err(e) => (false, serde_json::json!({ "error": e.to_string() })),
        };
        if let Err(e) =
            db::runs::record_finish(&self.db, &run_id, success, duration_ms as i64, &report_json).await
        {
            warn!(run_id = %run_id, error = %e, "Failed to record run finish");
        }

        let report = result?;
        info!(run_id = %run_id, duration_ms, clean = success, "Pipeline run finished");

        Ok(ActionOutcome {
            run_id,
            action: request.action,
            trigger: request.trigger,
            duration_ms,
            report,
        })
    }
}
