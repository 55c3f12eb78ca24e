//! Workflow runner - drives a run from start to a terminal state

use super::cancel::CancellationRegistry;
use super::executor::{StepExecutor, panic_message};
use super::record::{NodeRun, NodeRunStatus, Run, RunStatus};
use super::sink::RunSink;
use super::state::{RunState, SkipReason};
use crate::config::{Step, ToolResolver, Workflow};
use crate::pipeline::ToolPipeline;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Tunables for a runner
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Ask pipelines for live output fragments
    pub streaming: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self { streaming: true }
    }
}

/// Returned by [`WorkflowRunner::start_run`]
///
/// The initial `running` snapshot has already been published by the time
/// this is handed back.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: String,
    pub completion: RunCompletion,
}

/// Resolves to the terminal Run snapshot
///
/// Never fails: if the run task dies unexpectedly a failed (or cancelled)
/// terminal snapshot is published and returned instead.
pub struct RunCompletion {
    task: JoinHandle<Run>,
    initial: Run,
    registry: CancellationRegistry,
    token: CancellationToken,
    sink: Arc<dyn RunSink>,
}

impl RunCompletion {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    fn recover(&self, err: JoinError) -> Run {
        let message = if err.is_panic() {
            panic_message(&*err.into_panic())
        } else {
            "run task was aborted".to_string()
        };
        self.registry.remove(&self.initial.id);
        let status = if self.token.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Failed
        };
        tracing::error!(run_id = %self.initial.id, error = %message, "Run task died");
        let run = self.initial.finish(status, message);
        publish_terminal(self.sink.as_ref(), &run);
        run
    }
}

/// Publish a terminal Run snapshot exactly once
///
/// A sink that panics here cannot change the outcome; the panic is logged.
fn publish_terminal(sink: &dyn RunSink, run: &Run) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| sink.on_run_upsert(run))) {
        tracing::error!(
            run_id = %run.id,
            error = %panic_message(&*panic),
            "Sink panicked on terminal snapshot"
        );
    }
}

impl Future for RunCompletion {
    type Output = Run;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Run> {
        let this = self.get_mut();
        match Pin::new(&mut this.task).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(run)) => Poll::Ready(run),
            Poll::Ready(Err(err)) => Poll::Ready(this.recover(err)),
        }
    }
}

impl std::fmt::Debug for RunCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCompletion")
            .field("run_id", &self.initial.id)
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

/// Starts runs and tracks the ones still in flight
///
/// Each run executes on its own tokio task. Runs share nothing except the
/// pipeline and the cancellation registry.
pub struct WorkflowRunner {
    pipeline: Arc<dyn ToolPipeline>,
    registry: CancellationRegistry,
    options: RunnerOptions,
}

impl WorkflowRunner {
    pub fn new(pipeline: Arc<dyn ToolPipeline>) -> Self {
        Self {
            pipeline,
            registry: CancellationRegistry::new(),
            options: RunnerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// Start executing `workflow` in the background
    ///
    /// Must be called from within a tokio runtime. `default_timeout_ms`
    /// applies to steps without their own timeout.
    pub fn start_run(
        &self,
        workflow: Workflow,
        default_timeout_ms: u64,
        resolver: Arc<dyn ToolResolver>,
        sink: Arc<dyn RunSink>,
    ) -> RunHandle {
        let run_id = uuid::Uuid::new_v4().to_string();
        let token = self.registry.register(&run_id);
        let run = Run::start(&run_id, &workflow);

        tracing::info!(
            run_id = %run_id,
            workflow = %workflow.name,
            steps = workflow.steps.len(),
            "Starting run"
        );
        sink.on_run_upsert(&run);

        let ctx = RunContext {
            workflow,
            run: run.clone(),
            default_timeout: Duration::from_millis(default_timeout_ms),
            resolver,
            sink: sink.clone(),
            pipeline: self.pipeline.clone(),
            registry: self.registry.clone(),
            token: token.clone(),
            streaming: self.options.streaming,
        };
        let task = tokio::spawn(ctx.drive());

        RunHandle {
            run_id,
            completion: RunCompletion {
                task,
                initial: run,
                registry: self.registry.clone(),
                token,
                sink,
            },
        }
    }

    /// Start a run and wait for its terminal snapshot
    pub async fn run(
        &self,
        workflow: Workflow,
        default_timeout_ms: u64,
        resolver: Arc<dyn ToolResolver>,
        sink: Arc<dyn RunSink>,
    ) -> Run {
        self.start_run(workflow, default_timeout_ms, resolver, sink)
            .completion
            .await
    }

    /// Request cooperative cancellation of a live run
    ///
    /// Returns true only if the signal was raised by this call.
    pub fn cancel_run(&self, run_id: &str) -> bool {
        let cancelled = self.registry.cancel(run_id);
        if cancelled {
            tracing::info!(run_id, "Cancellation requested");
        } else {
            tracing::debug!(run_id, "Cancel ignored, run not live");
        }
        cancelled
    }

    /// Ids of runs that have not reached a terminal state
    pub fn active_runs(&self) -> Vec<String> {
        self.registry.run_ids()
    }

    pub fn is_running(&self, run_id: &str) -> bool {
        self.registry.contains(run_id)
    }
}

/// Everything a single run task owns
struct RunContext {
    workflow: Workflow,
    run: Run,
    default_timeout: Duration,
    resolver: Arc<dyn ToolResolver>,
    sink: Arc<dyn RunSink>,
    pipeline: Arc<dyn ToolPipeline>,
    registry: CancellationRegistry,
    token: CancellationToken,
    streaming: bool,
}

impl RunContext {
    async fn drive(self) -> Run {
        let outcome = AssertUnwindSafe(self.walk_steps()).catch_unwind().await;

        // leave the registry first so a successful cancel_run is always
        // reflected in the terminal status
        self.registry.remove(&self.run.id);
        let cancel_requested = self.token.is_cancelled();

        let run = match outcome {
            Ok(state) => state.finish(cancel_requested),
            Err(panic) => {
                let message = panic_message(&*panic);
                tracing::error!(run_id = %self.run.id, error = %message, "Run aborted");
                let status = if cancel_requested {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                self.run.finish(status, message)
            }
        };

        tracing::info!(
            run_id = %run.id,
            status = %run.status,
            duration_ms = run.duration_ms,
            "Run finished"
        );
        publish_terminal(self.sink.as_ref(), &run);
        run
    }

    async fn walk_steps(&self) -> RunState {
        let mut state = RunState::new(self.run.clone());
        let steps = &self.workflow.steps;
        let executor = StepExecutor::new(self.pipeline.as_ref(), self.sink.as_ref(), self.streaming);

        for (idx, step) in steps.iter().enumerate() {
            if self.token.is_cancelled() {
                tracing::info!(run_id = %self.run.id, step = %step.id, "Run cancelled, skipping remaining steps");
                self.skip(&steps[idx..], SkipReason::Cancelled);
                break;
            }

            let Some(tool) = self.resolver.resolve(&step.tool_id) else {
                let message = format!("Tool {} not found", step.tool_id);
                tracing::warn!(run_id = %self.run.id, step = %step.id, "{}", message);
                self.fail_unresolved(step, &message);
                if step.continue_on_error {
                    continue;
                }
                state.halt_failed(message);
                self.skip(&steps[idx + 1..], SkipReason::PreviousStepFailed);
                break;
            };

            let timeout = step
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.default_timeout);

            match executor.execute(&self.run, step, tool, timeout, &self.token).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => {
                    state.halt_cancelled();
                    self.skip(&steps[idx + 1..], SkipReason::Cancelled);
                    break;
                }
                Err(e) if step.continue_on_error => {
                    tracing::warn!(step = %step.id, error = %e, "Step failed, continuing");
                }
                Err(e) => {
                    state.halt_failed(e.to_string());
                    self.skip(&steps[idx + 1..], SkipReason::PreviousStepFailed);
                    break;
                }
            }
        }

        state
    }

    fn fail_unresolved(&self, step: &Step, message: &str) {
        let mut node = NodeRun::new(&self.run, step);
        node.output = message.to_string();
        node.mark_finished(NodeRunStatus::Failed, message);
        self.sink.on_node_run_upsert(&node);
    }

    fn skip(&self, steps: &[Step], reason: SkipReason) {
        for step in steps {
            tracing::debug!(step = %step.id, reason = reason.as_str(), "Skipping step");
            let node = NodeRun::skipped(&self.run, step, reason.as_str());
            self.sink.on_node_run_upsert(&node);
        }
    }
}
