//! Workflow execution engine for toolflow
//!
//! This module handles:
//! - Run and NodeRun records and their lifecycle
//! - Sequential step execution against a tool pipeline
//! - Cooperative cancellation of in-flight runs
//! - Publishing snapshots to observers
//!
//! # Example
//!
//! ```ignore
//! use toolflow::config::{ToolflowConfig, ToolRegistry, load_workflow};
//! use toolflow::pipeline::CommandPipeline;
//! use toolflow::workflow::{SnapshotStore, WorkflowRunner};
//! use std::sync::Arc;
//!
//! let config = ToolflowConfig::load(None)?;
//! let tools = Arc::new(ToolRegistry::from_config(&config.tools)?);
//! let runner = WorkflowRunner::new(Arc::new(CommandPipeline::new()));
//!
//! let workflow = load_workflow("release", None)?;
//! let store = Arc::new(SnapshotStore::new());
//! let handle = runner.start_run(workflow, config.defaults.timeout_ms, tools, store.clone());
//!
//! let run = handle.completion.await;
//! println!("{} finished: {}", run.id, run.status);
//! ```

mod cancel;
mod executor;
mod record;
mod runner;
mod sink;
mod state;
#[cfg(test)]
mod testing;

pub use cancel::CancellationRegistry;
pub use executor::MISSING_RESULT;
pub use record::{NodeRun, NodeRunStatus, Run, RunStatus, elapsed_ms};
pub use runner::{RunCompletion, RunHandle, RunnerOptions, WorkflowRunner};
pub use sink::{ChannelSink, NoopSink, RunEvent, RunSink, SnapshotStore};
pub use state::SkipReason;
