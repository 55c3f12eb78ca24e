//! Scripted pipeline for runner tests

use crate::pipeline::{
    PipelineEvent, ToolError, ToolOutput, ToolPipeline, ToolRequest, ToolResponse,
};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// What the pipeline does for a given tool id
#[derive(Debug, Clone)]
pub enum Script {
    Succeed {
        fragments: Vec<String>,
        body: String,
    },
    Fail {
        fragments: Vec<String>,
        error: ToolError,
    },
    /// Emit fragments, then wait for the cancel token
    BlockUntilCancelled { fragments: Vec<String> },
    /// Ignore cancellation and succeed after a delay
    SucceedAfter { delay: Duration, body: String },
    /// End the stream without a terminal result
    NoResult { fragments: Vec<String> },
    /// Keep emitting after the terminal result
    Chatty,
    Panic,
}

impl Script {
    pub fn succeed(fragments: &[&str], body: &str) -> Self {
        Script::Succeed {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            body: body.to_string(),
        }
    }

    pub fn fail(error: ToolError) -> Self {
        Script::Fail {
            fragments: Vec::new(),
            error,
        }
    }

    pub fn block() -> Self {
        Script::BlockUntilCancelled {
            fragments: Vec::new(),
        }
    }
}

fn response(tool_id: &str, body: &str) -> PipelineEvent {
    PipelineEvent::Result(Ok(ToolResponse {
        output: ToolOutput::new(0, body),
        request_summary: format!("request {tool_id}"),
        response_summary: format!("response {tool_id}"),
        duration_ms: 1,
    }))
}

fn fragments(items: Vec<String>) -> BoxStream<'static, PipelineEvent> {
    stream::iter(items.into_iter().map(PipelineEvent::Fragment)).boxed()
}

fn explode() -> PipelineEvent {
    panic!("pipeline exploded")
}

/// Pipeline whose behaviour per tool id is fixed up front
#[derive(Debug, Default)]
pub struct ScriptedPipeline {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<ToolRequest>>,
    /// Notified on every invocation
    pub started: Notify,
}

impl ScriptedPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, tool_id: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(tool_id.to_string(), script);
    }

    pub fn calls(&self) -> Vec<ToolRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_tools(&self) -> Vec<String> {
        self.calls().into_iter().map(|r| r.tool.id).collect()
    }
}

impl ToolPipeline for ScriptedPipeline {
    fn invoke(&self, request: ToolRequest) -> BoxStream<'static, PipelineEvent> {
        let tool_id = request.tool.id.clone();
        let cancel = request.cancel.clone();
        self.calls.lock().unwrap().push(request);
        self.started.notify_one();

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&tool_id)
            .cloned()
            .unwrap_or_else(|| Script::succeed(&[], ""));

        match script {
            Script::Succeed { fragments: items, body } => fragments(items)
                .chain(stream::once(async move { response(&tool_id, &body) }))
                .boxed(),
            Script::Fail {
                fragments: items,
                error,
            } => fragments(items)
                .chain(stream::once(async move { PipelineEvent::Result(Err(error)) }))
                .boxed(),
            Script::BlockUntilCancelled { fragments: items } => fragments(items)
                .chain(stream::once(async move {
                    cancel.cancelled().await;
                    PipelineEvent::Result(Err(ToolError::Cancelled))
                }))
                .boxed(),
            Script::SucceedAfter { delay, body } => stream::once(async move {
                tokio::time::sleep(delay).await;
                response(&tool_id, &body)
            })
            .boxed(),
            Script::NoResult { fragments: items } => fragments(items),
            Script::Chatty => stream::iter(vec![
                PipelineEvent::Fragment("before".into()),
                response(&tool_id, "body"),
                PipelineEvent::Fragment("after".into()),
                PipelineEvent::Result(Err(ToolError::internal("second result"))),
            ])
            .boxed(),
            Script::Panic => stream::once(async { explode() }).boxed(),
        }
    }
}
