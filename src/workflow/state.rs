//! Run-level execution state

use super::record::{Run, RunStatus};

/// Why a step was never executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Cancelled,
    PreviousStepFailed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Cancelled => "cancelled",
            SkipReason::PreviousStepFailed => "previous step failed",
        }
    }
}

/// What the step walk decided about the run as a whole
#[derive(Debug)]
pub struct RunState {
    /// The `running` snapshot published at start
    pub run: Run,

    /// Message of the failure that halted the run
    halt_error: Option<String>,

    /// A step reported cancellation
    step_cancelled: bool,
}

impl RunState {
    pub fn new(run: Run) -> Self {
        Self {
            run,
            halt_error: None,
            step_cancelled: false,
        }
    }

    /// Record the failure that stops the run
    pub fn halt_failed(&mut self, message: impl Into<String>) {
        self.halt_error.get_or_insert_with(|| message.into());
    }

    /// Record that a step stopped because of cancellation
    pub fn halt_cancelled(&mut self) {
        self.step_cancelled = true;
    }

    /// Terminal status given whether cancellation was requested
    pub fn terminal_status(&self, cancel_requested: bool) -> RunStatus {
        if cancel_requested || self.step_cancelled {
            RunStatus::Cancelled
        } else if self.halt_error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }

    /// Build the terminal snapshot
    pub fn finish(&self, cancel_requested: bool) -> Run {
        let status = self.terminal_status(cancel_requested);
        let error = match status {
            RunStatus::Failed => self.halt_error.clone().unwrap_or_default(),
            _ => String::new(),
        };
        self.run.finish(status, error)
    }
}
