//! Pipeline actions, durable jobs and run triggers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

db_enum! {
    /// Actions accepted by the admin process endpoint
    PipelineAction {
        ProcessTranscriptions => "process_transcriptions",
        ProcessExtractions => "process_extractions",
        ProcessAssignments => "process_assignments",
        ProcessSms => "process_sms",
        SendReminders => "send_reminders",
        ProcessPipeline => "process_pipeline",
        ProcessVoiceMessage => "process_voice_message",
    }
}

db_enum! {
    /// Who started a pipeline run
    TriggerSource {
        Admin => "admin",
        Cron => "cron",
        Scheduler => "scheduler",
        Worker => "worker",
    }
}

db_enum! {
    JobKind {
        ProcessVoiceMessage => "process_voice_message",
    }
}

db_enum! {
    JobStatus {
        Queued => "queued",
        Running => "running",
        Done => "done",
        Failed => "failed",
    }
}

/// Row of the durable `pipeline_jobs` queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    pub id: i64,
    pub kind: JobKind,
    pub voice_message_id: Option<i64>,
    pub status: JobStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub run_after: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}
