//! Core types and traits for tool execution

use crate::config::{ActionType, Tool};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error code reported for cooperative cancellation
pub const CANCELLED_CODE: &str = "cancelled";

/// Typed failure of a tool invocation
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// Stopped because the run was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Tool did not finish in time
    #[error("timeout after {elapsed:?}")]
    Timeout {
        elapsed: Duration,
        partial_output: Option<String>,
    },

    /// Tool could not be started
    #[error("tool unavailable: {message}")]
    Unavailable { message: String },

    /// Tool ran and reported failure
    #[error("execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// I/O with the tool broke down
    #[error("io error: {message}")]
    Io { message: String },

    /// Contract violation between the runner and a pipeline
    #[error("{message}")]
    Internal { message: String },
}

impl ToolError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::Cancelled => CANCELLED_CODE,
            ToolError::Timeout { .. } => "timeout",
            ToolError::Unavailable { .. } => "unavailable",
            ToolError::ExecutionFailed { .. } => "execution_failed",
            ToolError::Io { .. } => "io",
            ToolError::Internal { .. } => "internal",
        }
    }

    /// Whether this failure is a cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        self.code() == CANCELLED_CODE
    }

    /// Structured extra information, if any
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            ToolError::Timeout {
                elapsed,
                partial_output,
            } => Some(serde_json::json!({
                "elapsedMs": elapsed.as_millis() as u64,
                "partialOutput": partial_output,
            })),
            ToolError::ExecutionFailed {
                exit_code, stdout, ..
            } => Some(serde_json::json!({
                "exitCode": exit_code,
                "stdout": preview(stdout, PREVIEW_LIMIT),
            })),
            _ => None,
        }
    }

    pub fn timeout(elapsed: Duration, partial: Option<String>) -> Self {
        Self::Timeout {
            elapsed,
            partial_output: partial,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn execution_failed(exit_code: Option<i32>, stdout: String, stderr: String) -> Self {
        Self::ExecutionFailed {
            exit_code,
            stdout,
            stderr,
        }
    }
}

/// Longest body preview, in characters
pub const PREVIEW_LIMIT: usize = 1024;

/// Truncate text to at most `limit` characters
pub fn preview(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// What a tool produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub status_code: i32,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub body_preview: String,
}

impl ToolOutput {
    /// Output with a preview derived from the body
    pub fn new(status_code: i32, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            status_code,
            headers: BTreeMap::new(),
            body_preview: preview(&body, PREVIEW_LIMIT),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Successful terminal result of a tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub output: ToolOutput,
    pub request_summary: String,
    pub response_summary: String,
    pub duration_ms: u64,
}

/// Terminal result of a tool invocation
pub type ToolResult = Result<ToolResponse, ToolError>;

/// One item of a pipeline's event stream
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A piece of live output
    Fragment(String),
    /// The single terminal result
    Result(ToolResult),
}

/// Request to invoke a tool
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub tool: Tool,
    pub action: ActionType,
    pub payload: Option<String>,
    pub timeout: Duration,
    pub cancel: CancellationToken,
    pub streaming: bool,
}

impl ToolRequest {
    pub fn new(tool: Tool, action: ActionType) -> Self {
        Self {
            tool,
            action,
            payload: None,
            timeout: Duration::from_millis(30_000),
            cancel: CancellationToken::new(),
            streaming: true,
        }
    }

    pub fn with_payload(mut self, payload: Option<String>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

/// Something that can invoke tools
///
/// A pipeline yields any number of [`PipelineEvent::Fragment`]s followed by
/// exactly one [`PipelineEvent::Result`]. It should watch `request.cancel`
/// and finish with [`ToolError::Cancelled`] once it fires.
pub trait ToolPipeline: Send + Sync {
    fn invoke(&self, request: ToolRequest) -> BoxStream<'static, PipelineEvent>;
}
