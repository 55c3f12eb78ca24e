//! Run and NodeRun execution records
//!
//! Records are immutable snapshots: every change produces a new value that is
//! handed to the sink, and observers keep the last one per id.

use crate::config::{Step, Workflow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Status of a single step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl NodeRunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, NodeRunStatus::Queued | NodeRunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

impl std::fmt::Display for NodeRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            NodeRunStatus::Queued => "queued",
            NodeRunStatus::Running => "running",
            NodeRunStatus::Succeeded => "succeeded",
            NodeRunStatus::Failed => "failed",
            NodeRunStatus::Cancelled => "cancelled",
            NodeRunStatus::Skipped => "skipped",
        };
        f.write_str(text)
    }
}

/// Milliseconds between two instants, never negative
pub fn elapsed_ms(start: DateTime<Utc>, finish: DateTime<Utc>) -> u64 {
    (finish - start).num_milliseconds().max(0) as u64
}

/// One execution of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub error: String,
}

impl Run {
    /// A freshly started run
    pub fn start(id: impl Into<String>, workflow: &Workflow) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            error: String::new(),
        }
    }

    /// Terminal snapshot of this run
    pub fn finish(&self, status: RunStatus, error: impl Into<String>) -> Self {
        let finished_at = Utc::now();
        Self {
            status,
            finished_at: Some(finished_at),
            duration_ms: elapsed_ms(self.started_at, finished_at),
            error: error.into(),
            ..self.clone()
        }
    }
}

/// One evaluated step of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRun {
    pub id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub step_id: String,
    pub step_name: String,
    pub tool_id: String,
    pub status: NodeRunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub request_summary: String,
    pub response_summary: String,
    pub output: String,
    pub error: String,
}

impl NodeRun {
    /// A queued record for `step` in `run`
    pub fn new(run: &Run, step: &Step) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: run.workflow_id.clone(),
            run_id: run.id.clone(),
            step_id: step.id.clone(),
            step_name: step.display_name().to_string(),
            tool_id: step.tool_id.clone(),
            status: NodeRunStatus::Queued,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
            request_summary: String::new(),
            response_summary: String::new(),
            output: String::new(),
            error: String::new(),
        }
    }

    /// Move to `running`, stamping the start time
    pub fn mark_running(&mut self) {
        self.status = NodeRunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Move to a terminal status, stamping the finish time
    pub fn mark_finished(&mut self, status: NodeRunStatus, error: impl Into<String>) {
        let finished_at = Utc::now();
        let started_at = *self.started_at.get_or_insert(finished_at);
        self.status = status;
        self.finished_at = Some(finished_at);
        self.duration_ms = elapsed_ms(started_at, finished_at);
        self.error = error.into();
    }

    /// Never-executed step, with the reason it was skipped
    pub fn skipped(run: &Run, step: &Step, reason: &str) -> Self {
        let mut node = Self::new(run, step);
        node.status = NodeRunStatus::Skipped;
        node.finished_at = Some(Utc::now());
        node.error = reason.to_string();
        node
    }
}
