//! Step execution against a tool pipeline

use super::record::{NodeRun, NodeRunStatus, Run};
use super::sink::RunSink;
use crate::config::{Step, Tool};
use crate::pipeline::{PipelineEvent, ToolError, ToolPipeline, ToolRequest, ToolResult};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Message used when a pipeline's stream ends without a result
pub const MISSING_RESULT: &str = "step completed without a terminal result";

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs one step and keeps its NodeRun up to date
pub struct StepExecutor<'a> {
    pipeline: &'a dyn ToolPipeline,
    sink: &'a dyn RunSink,
    streaming: bool,
}

impl<'a> StepExecutor<'a> {
    pub fn new(pipeline: &'a dyn ToolPipeline, sink: &'a dyn RunSink, streaming: bool) -> Self {
        Self {
            pipeline,
            sink,
            streaming,
        }
    }

    /// Execute `step` with `tool`, publishing NodeRun snapshots as it goes
    ///
    /// Returns the pipeline's terminal result so the caller can decide
    /// whether the run continues.
    pub async fn execute(
        &self,
        run: &Run,
        step: &Step,
        tool: Tool,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let mut node = NodeRun::new(run, step);
        node.mark_running();
        self.sink.on_node_run_upsert(&node);

        tracing::info!(
            run_id = %run.id,
            step = %step.id,
            tool = %tool.id,
            action = %step.action,
            "Step started"
        );

        let request = ToolRequest::new(tool, step.action)
            .with_payload(step.payload.clone())
            .with_timeout(timeout)
            .with_cancel(cancel.clone())
            .with_streaming(self.streaming);

        let mut streamed = String::new();
        let result = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.pipeline.invoke(request)
        })) {
            Ok(events) => self.drain(events, &mut node, &mut streamed).await,
            Err(panic) => Err(Self::pipeline_fault(&step.id, &*panic)),
        };

        Self::finish_node(&mut node, streamed, &result);
        self.sink.on_node_run_upsert(&node);

        tracing::info!(
            run_id = %run.id,
            step = %step.id,
            status = %node.status,
            duration_ms = node.duration_ms,
            "Step finished"
        );

        result
    }

    /// Consume pipeline events up to the first terminal result
    async fn drain(
        &self,
        mut events: BoxStream<'static, PipelineEvent>,
        node: &mut NodeRun,
        streamed: &mut String,
    ) -> ToolResult {
        loop {
            match AssertUnwindSafe(events.next()).catch_unwind().await {
                Ok(Some(PipelineEvent::Fragment(text))) => {
                    streamed.push_str(&text);
                    node.output.clone_from(streamed);
                    self.sink.on_node_run_upsert(node);
                    tracing::debug!(step = %node.step_id, bytes = text.len(), "Output fragment");
                }
                Ok(Some(PipelineEvent::Result(result))) => return result,
                Ok(None) => {
                    tracing::warn!(step = %node.step_id, "Pipeline stream ended without a result");
                    return Err(ToolError::internal(MISSING_RESULT));
                }
                Err(panic) => return Err(Self::pipeline_fault(&node.step_id, &*panic)),
            }
        }
    }

    fn pipeline_fault(step_id: &str, panic: &(dyn Any + Send)) -> ToolError {
        let message = format!("pipeline panicked: {}", panic_message(panic));
        tracing::warn!(step = %step_id, error = %message, "Pipeline fault");
        ToolError::internal(message)
    }

    fn finish_node(node: &mut NodeRun, streamed: String, result: &ToolResult) {
        match result {
            Ok(response) => {
                node.request_summary.clone_from(&response.request_summary);
                node.response_summary.clone_from(&response.response_summary);
                node.output = if streamed.is_empty() {
                    response.output.body_preview.clone()
                } else {
                    streamed
                };
                node.mark_finished(NodeRunStatus::Succeeded, "");
            }
            Err(e) => {
                let status = if e.is_cancelled() {
                    NodeRunStatus::Cancelled
                } else {
                    NodeRunStatus::Failed
                };
                let message = e.to_string();
                if let Some(details) = e.details() {
                    node.response_summary = details.to_string();
                }
                node.output = if streamed.is_empty() {
                    message.clone()
                } else {
                    streamed
                };
                node.mark_finished(status, message);
            }
        }
    }
}
