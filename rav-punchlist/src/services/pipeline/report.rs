//! Per-item and per-stage results of a pipeline run

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemOutcome {
    Succeeded,
    /// Not processed this pass: claimed elsewhere, or nothing to do yet
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult {
    pub item_id: i64,
    pub outcome: ItemOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Outcome of one stage within a run
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    /// Items that completed successfully
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duration_ms: u64,
    /// Set when the stage itself failed before or between items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub items: Vec<ItemResult>,
}

impl StageReport {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            processed: 0,
            skipped: 0,
            errors: 0,
            duration_ms: 0,
            stage_error: None,
            note: None,
            items: Vec::new(),
        }
    }

    /// Report for a stage that failed as a whole
    pub fn aborted(stage: &'static str, error: impl ToString) -> Self {
        let mut report = Self::new(stage);
        report.stage_error = Some(error.to_string());
        report
    }

    pub fn record(&mut self, item_id: i64, outcome: ItemOutcome, detail: Option<String>) {
        match outcome {
            ItemOutcome::Succeeded => self.processed += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Failed => self.errors += 1,
        }
        self.items.push(ItemResult { item_id, outcome, detail });
    }

    pub fn succeeded(&mut self, item_id: i64, detail: Option<String>) {
        self.record(item_id, ItemOutcome::Succeeded, detail);
    }

    pub fn skipped(&mut self, item_id: i64, detail: impl Into<String>) {
        self.record(item_id, ItemOutcome::Skipped, Some(detail.into()));
    }

    pub fn failed(&mut self, item_id: i64, error: impl ToString) {
        self.record(item_id, ItemOutcome::Failed, Some(error.to_string()));
    }

    pub fn is_clean(&self) -> bool {
        self.stage_error.is_none() && self.errors == 0
    }
}

/// Outcome of a full (or single-message) pipeline sweep
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
    pub total_processed: usize,
    pub total_errors: usize,
    pub duration_ms: u64,
}

impl PipelineReport {
    pub fn from_stages(stages: Vec<StageReport>, duration_ms: u64) -> Self {
        let total_processed = stages.iter().map(|s| s.processed).sum();
        let total_errors = stages
            .iter()
            .map(|s| s.errors + usize::from(s.stage_error.is_some()))
            .sum();
        Self {
            stages,
            total_processed,
            total_errors,
            duration_ms,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

/// Result body of one orchestrator action
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ActionReport {
    Stage(StageReport),
    Pipeline(PipelineReport),
}

impl ActionReport {
    /// True when no stage and no item failed
    pub fn is_clean(&self) -> bool {
        match self {
            ActionReport::Stage(stage) => stage.is_clean(),
            ActionReport::Pipeline(pipeline) => pipeline.stages.iter().all(StageReport::is_clean),
        }
    }
}
