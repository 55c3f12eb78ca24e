//! toolflow - run chains of registered tools as linear workflows
//!
//! A [`workflow::WorkflowRunner`] walks a workflow's steps in order, hands
//! each one to a [`pipeline::ToolPipeline`], and publishes Run and NodeRun
//! snapshots to a [`workflow::RunSink`] as the run progresses.

pub mod cli;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod workflow;
